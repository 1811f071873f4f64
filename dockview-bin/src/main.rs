use clap::Parser;
use color_eyre::eyre::{self, bail};
use dockview_common::{ChangeNotification, ConnectionState, ResourceKind};
use dockview_engine::{EngineConfig, SyncEngine};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{Cli, Commands, OutputFormat, PsArgs};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dockview_engine=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env()?;
    if let Some(endpoint) = cli.endpoint.clone() {
        config.endpoint = endpoint;
    }
    if let Commands::Watch(args) = &cli.command {
        if args.poll.is_some() {
            config.poll_interval_secs = args.poll.filter(|secs| *secs > 0);
        }
    }

    let endpoint = config.endpoint.clone();
    let engine = SyncEngine::with_bollard(config)?;
    info!(endpoint = %endpoint, "Connecting to daemon...");
    engine.connect(&endpoint).await?;

    let outcome = run(&engine, cli.command, cli.format).await;
    engine.disconnect().await;
    outcome
}

async fn run(engine: &SyncEngine, command: Commands, format: OutputFormat) -> eyre::Result<()> {
    match command {
        Commands::Watch(_) => watch(engine).await,
        Commands::Ps(args) => {
            print_containers(engine, &args, format).await?;
            Ok(())
        }
        Commands::Ls(args) => print_collection(engine, args.kind.into(), format).await,
        Commands::Info => {
            let cache = engine.cache().await;
            let Some(info) = cache.system_info() else {
                bail!("daemon reported no system info");
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(info.as_ref())?),
                OutputFormat::Table => {
                    println!("Name:          {}", info.name);
                    println!("OS:            {}", info.os);
                    println!("Architecture:  {}", info.architecture);
                    println!("CPUs:          {}", info.cpu_cores);
                    println!("Memory:        {:.2} GB", info.memory_gb());
                    println!(
                        "Containers:    {} ({} running, {} paused, {} stopped)",
                        info.containers,
                        info.containers_running,
                        info.containers_paused,
                        info.containers_stopped
                    );
                    println!("Images:        {}", info.images);
                }
            }
            Ok(())
        }
        Commands::Start { id } => {
            engine.start_container(&id).await?;
            println!("{id}");
            Ok(())
        }
        Commands::Stop(args) => {
            engine.stop_container(&args.id, args.grace).await?;
            println!("{}", args.id);
            Ok(())
        }
        Commands::Update(args) => {
            let options = args.options();
            if options.is_empty() {
                bail!("nothing to update: pass at least one limit");
            }
            engine.update_container(&args.id, &options).await?;
            println!("{}", args.id);
            Ok(())
        }
    }
}

async fn watch(engine: &SyncEngine) -> eyre::Result<()> {
    let mut changes = engine.subscribe_changes();
    let mut connection = engine.subscribe_connection();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    {
        let cache = engine.cache().await;
        info!(
            containers = cache.containers().len(),
            images = cache.images().len(),
            networks = cache.networks().len(),
            volumes = cache.volumes().len(),
            "Watching for changes (Ctrl-C to stop)"
        );
    }

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted");
                return Ok(());
            }
            change = changes.recv() => match change {
                Ok(notification) => println!("{}", describe(engine, &notification).await),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change stream lagged; the cache is still current");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            event = connection.recv() => match event {
                Ok(event) if event.state == ConnectionState::Disconnected => {
                    bail!(
                        "daemon connection lost: {}",
                        event.reason.unwrap_or_else(|| "disconnected".to_string())
                    );
                }
                Ok(event) => info!(state = ?event.state, generation = event.generation, "Connection state"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn describe(engine: &SyncEngine, notification: &ChangeNotification) -> String {
    let ChangeNotification::Collection {
        kind: ResourceKind::Container,
        key,
        ..
    } = notification
    else {
        return notification.to_string();
    };

    let cache = engine.cache().await;
    match cache.containers().get(key) {
        Some(container) => format!("{notification} [{} {}]", container.name, container.state),
        None => notification.to_string(),
    }
}

async fn print_containers(
    engine: &SyncEngine,
    args: &PsArgs,
    format: OutputFormat,
) -> eyre::Result<()> {
    let cache = engine.cache().await;
    let query = args.filter.as_deref().unwrap_or_default();
    let containers = cache.filter_containers(query, args.running);

    if let OutputFormat::Json = format {
        let records: Vec<_> = containers.iter().map(|c| c.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if args.group {
        for (state, group) in cache.containers_by_state() {
            let group: Vec<_> = group
                .into_iter()
                .filter(|c| containers.iter().any(|m| m.id == c.id))
                .collect();
            if group.is_empty() {
                continue;
            }
            println!("{state} ({})", group.len());
            for c in group {
                println!("  {:<14} {:<28} {:<28} {}", short_id(&c.id), c.name, c.image.name, c.status);
            }
        }
        return Ok(());
    }

    println!("{:<14} {:<28} {:<28} {:<10} {}", "ID", "NAME", "IMAGE", "STATE", "STATUS");
    for c in containers {
        println!(
            "{:<14} {:<28} {:<28} {:<10} {}",
            short_id(&c.id),
            c.name,
            c.image.name,
            c.state,
            c.status
        );
    }
    Ok(())
}

async fn print_collection(
    engine: &SyncEngine,
    kind: ResourceKind,
    format: OutputFormat,
) -> eyre::Result<()> {
    let cache = engine.cache().await;
    let json = matches!(format, OutputFormat::Json);

    match kind {
        ResourceKind::Container => {
            drop(cache);
            let args = PsArgs {
                running: false,
                filter: None,
                group: false,
            };
            return print_containers(engine, &args, format).await;
        }
        ResourceKind::Image if json => {
            let records: Vec<_> = cache.images().iter().map(|i| i.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        ResourceKind::Image => {
            println!("{:<14} {:<40} {:>10} {}", "ID", "NAME", "SIZE (MB)", "CREATED");
            for image in cache.images().iter() {
                println!(
                    "{:<14} {:<40} {:>10.1} {}",
                    short_id(&image.id),
                    image.name,
                    image.size as f64 / 1e6,
                    image.created.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ResourceKind::Network if json => {
            let records: Vec<_> = cache.networks().iter().map(|n| n.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        ResourceKind::Network => {
            println!("{:<14} {:<28} {}", "ID", "NAME", "DRIVER");
            for network in cache.networks().iter() {
                println!("{:<14} {:<28} {}", short_id(&network.id), network.name, network.driver);
            }
        }
        ResourceKind::Volume if json => {
            let records: Vec<_> = cache.volumes().iter().map(|v| v.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        ResourceKind::Volume => {
            println!("{:<40} {}", "NAME", "DRIVER");
            for volume in cache.volumes().iter() {
                println!("{:<40} {}", volume.name, volume.driver);
            }
        }
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.get(..12).unwrap_or(id)
}
