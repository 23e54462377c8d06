use crate::domain::model::{
    AllocationScope, DependencyEdge, DependencyType, Environment, NewDependency, NewService,
    NewSolution, PortAllocation, PortClaim, PortRange, PortType, ServiceId, ServiceRecord,
    SlugKind, SolutionRecord, TeamId,
};
use crate::utils::error::StoreError;
use async_trait::async_trait;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 寫入連接埠時儲存層要檢查的唯一性範圍
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortExclusivity {
    /// 同一 (team, environment, port_type) 內不得重複
    Scope,
    /// 只檢查 (service, environment, port)
    ServiceOnly,
}

/// 後端儲存介面
///
/// 每個寫入方法都是一個完整交易：要嘛全部生效，要嘛完全沒有效果。
/// 讀取方法只能看到交易提交前或提交後的狀態。
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn port_range(
        &self,
        team_id: &TeamId,
        port_type: PortType,
        environment: &Environment,
    ) -> StoreResult<Option<PortRange>>;

    async fn service(&self, id: &ServiceId) -> StoreResult<Option<ServiceRecord>>;

    async fn allocations_in_scope(&self, scope: &AllocationScope) -> StoreResult<Vec<PortAllocation>>;

    async fn allocations_for_service(&self, id: &ServiceId) -> StoreResult<Vec<PortAllocation>>;

    /// 批次寫入同一服務的連接埠；任何一筆違反約束時整批拒絕
    async fn insert_allocations(
        &self,
        service_id: &ServiceId,
        claims: Vec<PortClaim>,
        exclusivity: PortExclusivity,
    ) -> StoreResult<Vec<PortAllocation>>;

    /// 回傳是否真的刪除了資料
    async fn delete_allocation(
        &self,
        service_id: &ServiceId,
        environment: &Environment,
        port_number: u16,
    ) -> StoreResult<bool>;

    async fn slug_exists(&self, kind: SlugKind, team_id: &TeamId, slug: &str) -> StoreResult<bool>;

    /// 在同一交易中建立服務與其連接埠 (排他模式)
    async fn insert_service(
        &self,
        service: NewService,
        claims: Vec<PortClaim>,
    ) -> StoreResult<(ServiceRecord, Vec<PortAllocation>)>;

    /// 連帶刪除該服務的連接埠與依賴邊，回傳刪掉的連接埠數；服務不存在時為 None
    async fn delete_service(&self, id: &ServiceId) -> StoreResult<Option<usize>>;

    async fn insert_solution(&self, solution: NewSolution) -> StoreResult<SolutionRecord>;

    /// 以 ids 為 source 的所有邊
    async fn edges_from(&self, ids: &[ServiceId]) -> StoreResult<Vec<DependencyEdge>>;

    /// 以 ids 為 target 的所有邊
    async fn edges_to(&self, ids: &[ServiceId]) -> StoreResult<Vec<DependencyEdge>>;

    /// source 與 target 都在 ids 內的邊
    async fn edges_among(&self, ids: &[ServiceId]) -> StoreResult<Vec<DependencyEdge>>;

    /// 至少一端屬於該團隊服務的邊
    async fn edges_for_team(&self, team_id: &TeamId) -> StoreResult<Vec<DependencyEdge>>;

    async fn insert_edge(&self, edge: NewDependency) -> StoreResult<DependencyEdge>;

    async fn delete_edge(
        &self,
        source: &ServiceId,
        target: &ServiceId,
        dependency_type: DependencyType,
    ) -> StoreResult<bool>;
}
