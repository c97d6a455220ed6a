mod cli;
mod service;

use std::process::ExitCode;

use clap::Parser;
use keystone_core::config::{ConfigurationManager, LifecycleResults};
use keystone_core::kernel::Kernel;
use keystone_core::kernel::error::Result;
use keystone_core::kernel::settings::KernelSettings;
use keystone_core::registry::name::Artifact;
use log::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, Commands};

/// Routes `log` records into `tracing` and installs a stderr subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(level: Option<&str>) -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::init()?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level.unwrap_or("warn"))?,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn parse_id(id: &str) -> Result<Artifact> {
    id.parse::<Artifact>()
}

/// Resolves on Ctrl-C or, on unix, SIGTERM. The SIGTERM handler is installed
/// before this returns, so a signal sent right after is not lost.
fn termination() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    async move {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };
        let terminated = async {
            #[cfg(unix)]
            if let Some(ref mut stream) = terminate {
                stream.recv().await;
                return;
            }
            std::future::pending::<()>().await;
        };

        tokio::select! {
            _ = interrupt => info!("Interrupted"),
            _ = terminated => info!("Terminated"),
        }
    }
}

async fn load_and_start(manager: &ConfigurationManager, id: &str) -> Result<LifecycleResults> {
    let id = parse_id(id)?;
    manager.load_configuration(&id).await?;
    manager.start_configuration(&id).await
}

async fn build(settings: &KernelSettings) -> Result<(Kernel, ConfigurationManager)> {
    let kernel = Kernel::new(&settings.kernel_name);
    kernel.register_type(service::service_type()).await?;
    let manager = ConfigurationManager::from_settings(kernel.clone(), settings).await?;
    Ok((kernel, manager))
}

async fn run(command: Commands, settings: KernelSettings) -> Result<()> {
    let (kernel, manager) = build(&settings).await?;
    let serving = matches!(command, Commands::Run { .. });
    let outcome = execute(command, &manager).await;
    kernel.shutdown().await;
    if serving {
        println!("Shut down.");
    }
    outcome
}

async fn execute(command: Commands, manager: &ConfigurationManager) -> Result<()> {
    match command {
        Commands::List => {
            let ids = manager.list_stored().await?;
            if ids.is_empty() {
                println!("No configurations found.");
            }
            for id in ids {
                println!("{}", id);
            }
        }
        Commands::Order { id } => {
            for (position, id) in manager.load_order(&parse_id(&id)?).await?.iter().enumerate() {
                println!("{:>3}. {}", position + 1, id);
            }
        }
        Commands::Run { ids, once } => {
            let restored = manager.restore().await;
            for id in &restored.started {
                println!("Restored {}", id);
            }
            for (id, reason) in &restored.failed {
                eprintln!("Failed to restore {}: {}", id, reason);
            }

            let mut outcome = Ok(());
            for id in &ids {
                match load_and_start(manager, id).await {
                    Ok(results) => {
                        for id in &results.started {
                            println!("Started {}", id);
                        }
                    }
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }

            if outcome.is_ok() && !once {
                let stop = termination();
                println!("Running; press Ctrl-C to stop.");
                stop.await;
            }
            return outcome;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let settings = match args.kernel_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(settings.log_level.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!("Starting {} with {} store(s)", settings.kernel_name, settings.store_dirs.len());

    match run(args.command, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
