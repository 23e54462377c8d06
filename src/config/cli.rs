use crate::core::PortRequest;
use crate::domain::model::{DependencyType, PortType};
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "registry-engine")]
#[command(about = "Port allocation and dependency topology for a service registry")]
pub struct CliConfig {
    /// Registry snapshot (TOML) to load
    #[arg(short, long, default_value = "registry.toml")]
    pub snapshot: String,

    /// Engine configuration (TOML)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Write the snapshot back after a mutating command
    #[arg(long)]
    pub save: bool,

    /// Emit JSON logs and JSON query output
    #[arg(long)]
    pub json: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Canonicalize a display name into a slug
    Slug { name: String },

    /// Register a service and allocate its ports
    Register {
        team: String,
        name: String,
        /// env:TYPE for automatic, env:TYPE:port for a fixed port
        #[arg(long = "port", value_parser = parse_port_request)]
        ports: Vec<PortRequest>,
    },

    /// Remove a service with its ports and dependencies
    Deregister { service: String },

    /// Allocate a port for an existing service
    Allocate {
        service: String,
        env: String,
        #[arg(value_parser = parse_port_type)]
        port_type: PortType,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Release a port held by a service
    Release { service: String, env: String, port: u16 },

    /// Add a dependency edge (source depends on target)
    Link {
        source: String,
        target: String,
        #[arg(value_parser = parse_dependency_type)]
        dependency_type: DependencyType,
        #[arg(long)]
        optional: bool,
    },

    /// Startup order for the given services
    Order {
        #[arg(required = true)]
        services: Vec<String>,
    },

    /// Services that transitively depend on a service
    Impact { service: String },

    /// Audit a team's required dependencies for cycles
    Cycles { team: String },

    /// Allocated ports of a team in one environment
    Ports { team: String, env: String },
}

impl Command {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Register { .. }
                | Command::Deregister { .. }
                | Command::Allocate { .. }
                | Command::Release { .. }
                | Command::Link { .. }
        )
    }
}

fn parse_port_type(value: &str) -> Result<PortType, String> {
    value.parse()
}

fn parse_dependency_type(value: &str) -> Result<DependencyType, String> {
    value.parse()
}

/// `dev:HTTP_API` 或 `dev:HTTP_API:8080`
pub fn parse_port_request(value: &str) -> Result<PortRequest, String> {
    let parts: Vec<&str> = value.split(':').collect();
    match parts.as_slice() {
        [env, port_type] if !env.is_empty() => Ok(PortRequest::auto(*env, port_type.parse()?)),
        [env, port_type, port] if !env.is_empty() => {
            let port: u16 = port
                .parse()
                .map_err(|_| format!("Invalid port number '{}'", port))?;
            Ok(PortRequest::manual(*env, port_type.parse()?, port))
        }
        _ => Err(format!("Expected env:TYPE[:port], got '{}'", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_request() {
        let auto = parse_port_request("dev:http-api").unwrap();
        assert_eq!(auto, PortRequest::auto("dev", PortType::HttpApi));

        let manual = parse_port_request("prod:REDIS:6380").unwrap();
        assert_eq!(manual, PortRequest::manual("prod", PortType::Redis, 6380));

        assert!(parse_port_request("dev").is_err());
        assert!(parse_port_request(":REDIS").is_err());
        assert!(parse_port_request("dev:REDIS:http").is_err());
        assert!(parse_port_request("dev:NOPE").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = CliConfig::try_parse_from([
            "registry-engine",
            "--snapshot",
            "reg.toml",
            "--save",
            "register",
            "core",
            "Payment API",
            "--port",
            "dev:HTTP_API",
            "--port",
            "dev:DEBUG:5005",
        ])
        .unwrap();

        assert!(cli.save);
        assert!(cli.command.is_mutating());
        match cli.command {
            Command::Register { team, name, ports } => {
                assert_eq!(team, "core");
                assert_eq!(name, "Payment API");
                assert_eq!(ports.len(), 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let order = CliConfig::try_parse_from(["registry-engine", "order", "svc-1", "svc-2"]).unwrap();
        assert!(!order.command.is_mutating());
    }
}
