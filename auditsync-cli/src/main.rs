use anyhow::{bail, Context, Result};
use auditsync_core::config::{Config, SyncTaskConfig};
use auditsync_core::core_log::codec::{encode_descriptor, encode_event};
use auditsync_core::core_log::sync::{
    LogEndpoint, ReqwestConnectionFactory, StaticDiscovery, SyncScheduler, SyncServer,
};
use auditsync_core::core_log::{LogStore, SyncEngine};
use auditsync_core::core_repo::VersionedRepository;
use auditsync_core::logging::{init_logging_with_config, LogConfig};
use auditsync_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use auditsync_core::telemetry;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "auditsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); AUDITSYNC_* environment variables otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the sync endpoint and run the scheduled sync tasks
    Serve,

    /// Run one cycle of each configured sync task
    Sync {
        /// Only run the task with this name
        #[arg(long)]
        task: Option<String>,
    },

    /// Record a new event in the local store
    Append {
        #[arg(long)]
        target: String,
        #[arg(long)]
        log: u64,
        #[arg(long = "type", default_value_t = 0)]
        event_type: i32,
        /// Property as key=value; repeatable
        #[arg(long = "prop", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },

    /// Print the descriptors of the local store
    Descriptors {
        #[arg(long)]
        target: Option<String>,
    },

    /// Inspect or move low watermarks
    Watermark {
        #[command(subcommand)]
        action: WatermarkAction,
    },

    /// Work with a configured versioned repository
    Repo {
        /// Repository name from the configuration
        name: String,
        #[command(subcommand)]
        action: RepoAction,
    },
}

#[derive(Subcommand, Debug)]
enum WatermarkAction {
    Get {
        #[arg(long)]
        target: String,
        #[arg(long)]
        log: u64,
    },
    /// Raise the watermark; events below it are no longer served or synced
    Set {
        #[arg(long)]
        target: String,
        #[arg(long)]
        log: u64,
        value: u64,
    },
}

#[derive(Subcommand, Debug)]
enum RepoAction {
    /// Print the stored version range
    Versions,
    /// Write a version to stdout; the latest when omitted
    Checkout { version: Option<u64> },
    /// Commit a file as the version after `from`
    Commit {
        file: PathBuf,
        #[arg(long)]
        from: u64,
    },
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env()?,
    };

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config.validate()?;
    Ok(config)
}

fn build_engine(task: &SyncTaskConfig, store: Arc<LogStore>) -> Result<Arc<SyncEngine>> {
    let connections = ReqwestConnectionFactory::new(task.connect_timeout, task.read_timeout)?;
    Ok(Arc::new(SyncEngine::new(
        task.engine_config(),
        store,
        Arc::new(StaticDiscovery::new(task.server_url.clone())),
        Arc::new(connections),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;
    telemetry::init_metrics();

    let store = Arc::new(LogStore::new(config.store.clone())?);

    match args.command {
        Command::Serve => serve(&config, store).await?,
        Command::Sync { task } => sync_once(&config, store, task.as_deref()).await?,
        Command::Append { target, log, event_type, properties } => {
            let properties: BTreeMap<String, String> = properties.into_iter().collect();
            let event = store.log(&target, log, event_type, properties)?;
            println!("{}", encode_event(&event));
        }
        Command::Descriptors { target } => {
            for descriptor in store.get_descriptors(target.as_deref())? {
                println!("{}", encode_descriptor(&descriptor));
            }
        }
        Command::Watermark { action } => match action {
            WatermarkAction::Get { target, log } => {
                println!("{}", store.get_lowest_id(&target, log)?);
            }
            WatermarkAction::Set { target, log, value } => {
                let changed = store.set_lowest_id(&target, log, value)?;
                println!("{}", json!({ "target_id": target, "log_id": log, "changed": changed }));
            }
        },
        Command::Repo { name, action } => repo(&config, &name, action)?,
    }

    Ok(())
}

async fn serve(config: &Config, store: Arc<LogStore>) -> Result<()> {
    let shutdown = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));

    let mut scheduler = SyncScheduler::new();
    for task in &config.sync {
        scheduler.add(build_engine(task, store.clone())?, task.interval);
    }

    if !config.server.enabled && scheduler.is_empty() {
        bail!("nothing to do: the server is disabled and no sync tasks are configured");
    }

    info!(
        store = %store.name(),
        server = config.server.enabled,
        tasks = scheduler.len(),
        "AuditSync starting"
    );

    let mut handles = scheduler.spawn(&shutdown);

    if config.server.enabled {
        let server = SyncServer::bind(
            &config.server.bind_address.to_string(),
            LogEndpoint::new(store.clone()),
            &config.server.endpoint,
        )
        .await?;
        let mut token = shutdown.token("sync-server");
        handles.push(tokio::spawn(async move {
            let result = server
                .run(async move {
                    token.wait().await;
                })
                .await;
            if let Err(e) = result {
                warn!("Sync endpoint failed: {:#}", e);
            }
        }));
    }

    install_signal_handlers(shutdown.clone());

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Component task failed: {}", e);
        }
    }

    info!("AuditSync stopped");
    Ok(())
}

async fn sync_once(config: &Config, store: Arc<LogStore>, only: Option<&str>) -> Result<()> {
    let tasks: Vec<&SyncTaskConfig> = config
        .sync
        .iter()
        .filter(|task| only.map_or(true, |name| task.name == name))
        .collect();

    if tasks.is_empty() {
        bail!("no matching sync task configured");
    }

    let mut failed = false;
    for task in tasks {
        let report = build_engine(task, store.clone())?.run_cycle().await;
        failed |= !report.is_success();
        println!(
            "{}",
            json!({
                "task": task.name,
                "cycle_id": report.cycle_id,
                "events_sent": report.events.sent,
                "events_received": report.events.received,
                "watermarks_sent": report.watermarks.sent,
                "watermarks_received": report.watermarks.received,
                "errors": report.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            })
        );
    }

    if failed {
        bail!("sync finished with errors");
    }
    Ok(())
}

/// Versions are opaque bytes; write them unchanged
fn write_version(out: &mut impl Write, data: &[u8]) -> std::io::Result<()> {
    out.write_all(data)?;
    out.flush()
}

fn repo(config: &Config, name: &str, action: RepoAction) -> Result<()> {
    let repo_config = config
        .repositories
        .iter()
        .find(|r| r.name == name)
        .with_context(|| format!("no repository named '{}' configured", name))?;
    let repo = VersionedRepository::open(repo_config.clone())?;

    match action {
        RepoAction::Versions => println!("{}", repo.get_version_range()?),
        RepoAction::Checkout { version } => {
            let data = match version {
                Some(v) => repo.checkout(v)?,
                None => repo.checkout_latest()?.map(|(_, data)| data),
            };
            match data {
                Some(data) => write_version(&mut std::io::stdout().lock(), &data)?,
                None => bail!("version not found"),
            }
        }
        RepoAction::Commit { file, from } => {
            let data = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let committed = repo.commit(&data, from)?;
            let version = if committed { from + 1 } else { from };
            println!("{}", json!({ "repository": name, "committed": committed, "version": version }));
        }
    }

    Ok(())
}
