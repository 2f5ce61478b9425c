//! Inspect the packages a module host would load
//!
//! Usage:
//!   module-host [--config host.toml] list
//!   module-host [--config host.toml] resolve --kind screen --action com.example.OPEN

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use module_host::config::HostConfig;
use module_host::module::registry::{discover_and_install, PackageRegistry};
use module_host::module::{ComponentKind, Message, Resolver};
use module_host::utils::init_logging_from_config;

#[derive(Parser, Debug)]
#[command(name = "module-host", version, about = "Inspect module packages and message routing")]
struct Args {
    /// Host configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `[packages] packages_dir`
    #[arg(long)]
    packages_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed packages with their state and components
    List,
    /// Print the components a message resolves to, in resolution order
    Resolve {
        #[arg(long, value_enum)]
        kind: Kind,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        package: Option<String>,
        #[arg(long)]
        component: Option<String>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Screen,
    Service,
    Database,
}

impl From<Kind> for ComponentKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Screen => ComponentKind::Screen,
            Kind::Service => ComponentKind::Service,
            Kind::Database => ComponentKind::Database,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = HostConfig::load(args.config.as_deref())
        .with_context(|| format!("loading configuration {:?}", args.config))?;
    if let Some(dir) = args.packages_dir {
        config.packages.packages_dir = dir;
    }
    init_logging_from_config(&config.logging);
    debug!("Effective configuration: {:?}", config);

    let registry = Arc::new(PackageRegistry::new());
    let installed = discover_and_install(&config.packages, &registry);
    debug!("Installed {} packages", installed);

    match args.command {
        Command::List => list(&registry),
        Command::Resolve {
            kind,
            action,
            category,
            package,
            component,
            json,
        } => {
            let message = Message {
                action,
                category,
                package_name: package,
                component_id: component,
                ..Message::default()
            };
            resolve(registry, kind.into(), &message, json)
        }
    }
}

fn list(registry: &PackageRegistry) -> Result<()> {
    let snapshot = registry.snapshot();
    if snapshot.is_empty() {
        println!("No packages installed");
        return Ok(());
    }
    for package in snapshot.packages() {
        let permissions: Vec<String> = package
            .permissions
            .to_vec()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "{} {} [{:?}] permissions: {}",
            package.name,
            package.version,
            snapshot.state(&package.name),
            if permissions.is_empty() {
                "-".to_string()
            } else {
                permissions.join(",")
            }
        );
        for kind in [
            ComponentKind::Screen,
            ComponentKind::Service,
            ComponentKind::Database,
        ] {
            for component in package.components(kind) {
                println!(
                    "  {:<8} {:<20} {} ({} filters)",
                    kind,
                    component.id,
                    component.name,
                    component.filters.len()
                );
            }
        }
    }
    Ok(())
}

fn resolve(registry: Arc<PackageRegistry>, kind: ComponentKind, message: &Message, json: bool) -> Result<()> {
    if !message.has_routing_fields() {
        anyhow::bail!("a message needs at least one of --action, --category, --package, --component");
    }
    let results = Resolver::new(registry).query(kind, message);

    if json {
        let rows: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "package": r.package_name(),
                    "component": r.component_id(),
                    "name": r.component.name,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No {} matches", kind);
    }
    for (index, result) in results.iter().enumerate() {
        println!(
            "{}. {}/{} ({})",
            index + 1,
            result.package_name(),
            result.component_id(),
            result.component.name
        );
    }
    Ok(())
}
