use clap::Parser;
use registry_engine::config::Command;
use registry_engine::domain::model::{AllocationScope, Environment, ServiceId, TeamId};
use registry_engine::utils::error::ErrorCategory;
use registry_engine::utils::validation::{validate_path, Validate};
use registry_engine::utils::logger;
use registry_engine::{CliConfig, EngineConfig, InMemoryStore, RegisterService, RegistryEngine, RegistryError, RegistrySnapshot};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 載入引擎設定；沒有指定時使用預設值
    let config = match &cli.config {
        Some(path) => match EngineConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ Failed to load config file '{}': {}", path, e);
                eprintln!("💡 Make sure the file exists and is valid TOML format");
                std::process::exit(exit_code(&e));
            }
        },
        None => EngineConfig::default(),
    };

    // 初始化日誌
    let level = config.logging.level.as_deref();
    if cli.json || config.logging.json {
        logger::init_json_logger(cli.verbose, level);
    } else {
        logger::init_cli_logger(cli.verbose, level);
    }

    tracing::info!("🚀 Starting registry-engine");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = run(&cli, &config).await {
        tracing::error!("❌ {} failed: {} (Category: {:?})", command_name(&cli.command), e, e.category());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(exit_code(&e));
    }

    Ok(())
}

async fn run(cli: &CliConfig, config: &EngineConfig) -> registry_engine::Result<()> {
    validate_path("snapshot", &cli.snapshot)?;

    let snapshot = if Path::new(&cli.snapshot).exists() {
        tracing::info!("📁 Loading registry snapshot from: {}", cli.snapshot);
        let snapshot = RegistrySnapshot::from_file(&cli.snapshot)?;
        snapshot.validate()?;
        snapshot
    } else {
        tracing::info!("📁 No snapshot at {}, starting empty", cli.snapshot);
        RegistrySnapshot::default()
    };

    let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
    let engine = RegistryEngine::new(store.clone(), config)?;

    execute(&engine, &cli.command, cli.json).await?;

    if cli.command.is_mutating() {
        if cli.save {
            store.snapshot().await.save(&cli.snapshot)?;
            tracing::info!("💾 Snapshot written to {}", cli.snapshot);
        } else {
            tracing::info!("🔍 Changes not saved (pass --save to persist)");
        }
    }
    Ok(())
}

async fn execute(
    engine: &RegistryEngine<InMemoryStore>,
    command: &Command,
    json: bool,
) -> registry_engine::Result<()> {
    match command {
        Command::Slug { name } => {
            println!("{}", engine.slug_rules().canonicalize(name)?);
        }
        Command::Register { team, name, ports } => {
            let registration = engine
                .register_service(RegisterService {
                    team_id: TeamId::from(team.as_str()),
                    display_name: name.clone(),
                    ports: ports.clone(),
                    requested_by: "cli".to_string(),
                })
                .await?;
            println!("✅ {} ({})", registration.service.slug, registration.service.id);
            for allocation in &registration.allocations {
                println!("   {} {} -> {}", allocation.environment, allocation.port_type, allocation.port_number);
            }
        }
        Command::Deregister { service } => {
            let report = engine.deregister_service(&ServiceId::from(service.as_str())).await?;
            println!("✅ Removed {} and released {} port(s)", report.service.slug, report.released);
            for id in &report.impacted {
                println!("⚠️  {} depended on it", id);
            }
        }
        Command::Allocate {
            service,
            env,
            port_type,
            port,
        } => {
            let service_id = ServiceId::from(service.as_str());
            let env = Environment::from(env.as_str());
            let allocation = match port {
                Some(port) => {
                    engine
                        .allocator()
                        .allocate_port(&service_id, &env, *port_type, *port, "cli")
                        .await?
                }
                None => engine.allocator().allocate_auto(&service_id, &env, *port_type, "cli").await?,
            };
            println!("✅ {} {} -> {}", allocation.environment, allocation.port_type, allocation.port_number);
        }
        Command::Release { service, env, port } => {
            let released = engine
                .allocator()
                .release(&ServiceId::from(service.as_str()), &Environment::from(env.as_str()), *port)
                .await?;
            if released {
                println!("✅ Released port {}", port);
            } else {
                println!("ℹ️  Nothing to release");
            }
        }
        Command::Link {
            source,
            target,
            dependency_type,
            optional,
        } => {
            let edge = engine
                .topology()
                .add_edge(
                    &ServiceId::from(source.as_str()),
                    &ServiceId::from(target.as_str()),
                    *dependency_type,
                    !optional,
                )
                .await?;
            println!(
                "✅ {} -> {} ({}, required={})",
                edge.source_service_id, edge.target_service_id, edge.dependency_type, edge.is_required
            );
        }
        Command::Order { services } => {
            let selection: Vec<ServiceId> = services.iter().map(|id| ServiceId::from(id.as_str())).collect();
            let order = engine.topology().topological_order(&selection).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&order)?);
                return Ok(());
            }
            for (position, id) in order.iter().enumerate() {
                println!("{:>3}. {}", position + 1, id);
            }
        }
        Command::Impact { service } => {
            let impacted = engine.topology().impact_of(&ServiceId::from(service.as_str())).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&impacted)?);
                return Ok(());
            }
            if impacted.is_empty() {
                println!("ℹ️  Nothing depends on {}", service);
            }
            for id in impacted {
                println!("{}", id);
            }
        }
        Command::Cycles { team } => match engine.topology().find_cycle(&TeamId::from(team.as_str())).await? {
            Some(cycle) => {
                let err = RegistryError::CyclicDependency { cycle };
                println!("⚠️  {}", err);
            }
            None => println!("✅ No required dependency cycles in {}", team),
        },
        Command::Ports { team, env } => {
            let team_id = TeamId::from(team.as_str());
            let env = Environment::from(env.as_str());
            let map = engine.allocator().port_map(&team_id, &env).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&map)?);
                return Ok(());
            }
            for (port_type, allocations) in map {
                let bounds = engine
                    .allocator()
                    .resolver()
                    .resolve(&AllocationScope::new(team_id.clone(), env.clone(), port_type))
                    .await?;
                println!("{} [{}-{}]", port_type, bounds.lower, bounds.upper);
                for allocation in allocations {
                    println!("   {} {}", allocation.port_number, allocation.service_id);
                }
            }
        }
    }
    Ok(())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Slug { .. } => "slug",
        Command::Register { .. } => "register",
        Command::Deregister { .. } => "deregister",
        Command::Allocate { .. } => "allocate",
        Command::Release { .. } => "release",
        Command::Link { .. } => "link",
        Command::Order { .. } => "order",
        Command::Impact { .. } => "impact",
        Command::Cycles { .. } => "cycles",
        Command::Ports { .. } => "ports",
    }
}

// 根據錯誤類別決定退出碼
fn exit_code(error: &RegistryError) -> i32 {
    match error.category() {
        ErrorCategory::Client => 1,
        ErrorCategory::Conflict => 2,
        ErrorCategory::Contention => 3,
        ErrorCategory::Configuration => 4,
        ErrorCategory::Infrastructure => 5,
    }
}
