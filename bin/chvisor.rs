use std::path::PathBuf;

use anyhow::Context;
use chvisor_lib::{
    config::DriverConfig,
    domain::{
        instance::{Instance, InstanceTable},
        MachineDef,
    },
    lifecycle, logging,
    vm::builder::build_vm_config,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
enum CommandKind {
    /// Start the machine and keep it running until Ctrl-C.
    Run,
    /// Print the configuration document the VMM would receive.
    BuildConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Driver settings (TOML). Defaults apply when omitted: sockets go to
    /// /run/chvisor and VMM output is discarded.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Machine definition (JSON).
    #[arg(long)]
    definition: PathBuf,

    #[command(subcommand)]
    command: CommandKind,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };
    let _log_guard = logging::init(config.log_dir.as_deref());

    let text = std::fs::read_to_string(&args.definition)
        .with_context(|| format!("reading {}", args.definition.display()))?;
    let def: MachineDef = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", args.definition.display()))?;

    match args.command {
        CommandKind::BuildConfig => {
            let document = build_vm_config(&def)?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        CommandKind::Run => {
            let instances = InstanceTable::new();
            let name = def.name.clone();
            instances.insert(Instance::new(def, config.job_wait()));

            let instance = instances
                .lookup(&name)
                .context("instance vanished from the table")?;
            let mut monitor = lifecycle::start(&instance, &config.monitor_config()).await?;
            info!(instance = %name, pid = monitor.pid(), "running, Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;

            if let Err(e) = lifecycle::shutdown(&mut monitor).await {
                warn!(instance = %name, error = %e, "graceful shutdown failed, destroying");
                lifecycle::destroy(&mut monitor).await?;
            }
            instances.remove(&name);
        }
    }

    Ok(())
}
