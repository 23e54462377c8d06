//! 由依賴邊資料列建立的暫時性圖，每次查詢重建，從不快取。

use crate::domain::model::{DependencyEdge, DependencyType, ServiceId};
use crate::utils::error::{RegistryError, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    peer: ServiceId,
    dependency_type: DependencyType,
    required: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    outgoing: BTreeMap<ServiceId, Vec<Link>>,
    incoming: BTreeMap<ServiceId, Vec<Link>>,
    vertices: BTreeSet<ServiceId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges<'a, I>(edges: I) -> Self
    where
        I: IntoIterator<Item = &'a DependencyEdge>,
    {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_edge(
                edge.source_service_id.clone(),
                edge.target_service_id.clone(),
                edge.dependency_type,
                edge.is_required,
            );
        }
        graph
    }

    pub fn add_vertex(&mut self, id: ServiceId) {
        self.vertices.insert(id);
    }

    pub fn add_edge(&mut self, source: ServiceId, target: ServiceId, dependency_type: DependencyType, required: bool) {
        self.vertices.insert(source.clone());
        self.vertices.insert(target.clone());
        self.outgoing.entry(source.clone()).or_default().push(Link {
            peer: target.clone(),
            dependency_type,
            required,
        });
        self.incoming.entry(target).or_default().push(Link {
            peer: source,
            dependency_type,
            required,
        });
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }

    fn required_targets<'a>(&'a self, id: &ServiceId) -> impl Iterator<Item = &'a ServiceId> + 'a {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .filter(|link| link.required)
            .map(|link| &link.peer)
    }

    /// 沿必要邊從 `from` 走到 `to` 的路徑 (含兩端)
    pub fn required_path(&self, from: &ServiceId, to: &ServiceId) -> Option<Vec<ServiceId>> {
        let mut parents: BTreeMap<&ServiceId, &ServiceId> = BTreeMap::new();
        let mut seen: HashSet<&ServiceId> = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.clone()];
                let mut cursor = current;
                while let Some(parent) = parents.get(cursor) {
                    path.push((*parent).clone());
                    cursor = *parent;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.required_targets(current) {
                if seen.insert(next) {
                    parents.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// 若加入必要邊 source -> target 會形成環，回傳該環 (首尾相同)
    pub fn cycle_if_added(&self, source: &ServiceId, target: &ServiceId) -> Option<Vec<ServiceId>> {
        if source == target {
            return Some(vec![source.clone(), target.clone()]);
        }
        self.required_path(target, source).map(|path| {
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(source.clone());
            cycle.extend(path);
            cycle
        })
    }

    /// 只看必要邊，找出任意一個環
    pub fn find_cycle(&self) -> Option<Vec<ServiceId>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for vertex in &self.vertices {
            if !visited.contains(vertex) {
                if let Some(cycle) = self.visit(vertex, &mut visited, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        vertex: &'a ServiceId,
        visited: &mut HashSet<&'a ServiceId>,
        stack: &mut Vec<&'a ServiceId>,
    ) -> Option<Vec<ServiceId>> {
        visited.insert(vertex);
        stack.push(vertex);

        let mut targets: Vec<&ServiceId> = self.required_targets(vertex).collect();
        targets.sort();
        for target in targets {
            if let Some(position) = stack.iter().position(|v| *v == target) {
                let mut cycle: Vec<ServiceId> = stack[position..].iter().map(|v| (*v).clone()).collect();
                cycle.push(target.clone());
                return Some(cycle);
            }
            if !visited.contains(target) {
                if let Some(cycle) = self.visit(target, visited, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        None
    }

    /// 僅就 selection 與其間的必要邊做拓撲排序 (Kahn)，同層依 ServiceId 升冪
    ///
    /// 每個服務都排在它所依賴的服務之前。
    pub fn topological_order(&self, selection: &[ServiceId]) -> Result<Vec<ServiceId>> {
        let members: BTreeSet<&ServiceId> = selection.iter().collect();
        let mut in_degree: BTreeMap<&ServiceId, usize> = members.iter().map(|id| (*id, 0)).collect();

        for id in &members {
            for target in self.required_targets(id) {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree += 1;
                }
            }
        }

        let mut ready: BTreeSet<&ServiceId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(members.len());

        while let Some(current) = ready.pop_first() {
            order.push(current.clone());
            for target in self.required_targets(current) {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(target);
                    }
                }
            }
        }

        if order.len() < members.len() {
            let mut remaining = DependencyGraph::new();
            for id in in_degree.iter().filter(|(_, d)| **d > 0).map(|(id, _)| *id) {
                for target in self.required_targets(id) {
                    if in_degree.get(target).is_some_and(|d| *d > 0) {
                        remaining.add_edge(id.clone(), target.clone(), DependencyType::Other, true);
                    }
                }
            }
            let cycle = remaining
                .find_cycle()
                .unwrap_or_else(|| in_degree.iter().filter(|(_, d)| **d > 0).map(|(id, _)| (*id).clone()).collect());
            return Err(RegistryError::CyclicDependency { cycle });
        }

        Ok(order)
    }

    /// 反向走訪所有邊 (必要與選用)，回傳遞移依賴 `id` 的服務
    pub fn impact_of(&self, id: &ServiceId) -> BTreeSet<ServiceId> {
        let mut impacted = BTreeSet::new();
        let mut queue = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            for link in self.incoming.get(current).into_iter().flatten() {
                if &link.peer != id && impacted.insert(link.peer.clone()) {
                    queue.push_back(&link.peer);
                }
            }
        }
        impacted
    }
}
