//! covasol-sw: drive the offline worker from the command line.
//!
//! Every run starts a fresh worker version over a persistent cache database,
//! the same way a browser starts the worker script on each visit. A version
//! whose precache is already complete in the database picks up from there.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use covasol_common::{init_logging, CovasolError, LogConfig, LogFormat};
use covasol_net::{LoaderConfig, Request, RequestDestination, ResourceLoader};
use covasol_sw::{
    ControllerEvent, FetchOutcome, OfflineController, ServiceWorkerError, SqliteCacheStorage,
    WorkerConfig,
};
use http::Method;
use tracing::{debug, error, info};

/// Covasol offline worker
#[derive(Parser)]
#[command(name = "covasol-sw", version)]
#[command(about = "Offline cache controller for the Covasol site", long_about = None)]
struct Cli {
    /// Path to a JSON worker configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache database (defaults to the platform cache directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache the manifest and activate
    Install,
    /// Send one request through the worker
    Fetch {
        /// Site path or absolute URL
        path: String,
        /// Treat as a page navigation
        #[arg(long)]
        navigate: bool,
        /// Treat as an image request
        #[arg(long, conflicts_with = "navigate")]
        image: bool,
        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
    },
    /// Deliver a push message and click the notification
    Push {
        /// JSON payload, e.g. '{"title":"Khuyến mãi","url":"/promo"}'
        payload: Option<String>,
    },
    /// Deliver a background sync event
    Sync {
        /// Sync tag
        #[arg(default_value = covasol_sw::CONTACT_FORM_SYNC)]
        tag: String,
    },
    /// List caches and their entry counts
    Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = match (cli.verbose, cli.log_format) {
        (0, LogFormat::Json) => LogConfig::production(),
        (0, format) => LogConfig::default().with_format(format),
        (1, format) => LogConfig::debug().with_format(format),
        (_, format) => LogConfig::trace().with_format(format),
    };
    init_logging(log_config)?;

    let config = match &cli.config {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };
    let controller = open_controller(config, cli.db.clone())?;

    match cli.command {
        Commands::Install => install_command(&controller).await,
        Commands::Fetch {
            path,
            navigate,
            image,
            method,
        } => fetch_command(&controller, &path, navigate, image, &method).await,
        Commands::Push { payload } => push_command(&controller, payload).await,
        Commands::Sync { tag } => sync_command(&controller, &tag).await,
        Commands::Caches => caches_command(&controller).await,
    }
}

/// Log a worker failure with its category and hand it back for reporting.
fn report(err: ServiceWorkerError) -> anyhow::Error {
    let err = CovasolError::from(err);
    error!(
        category = err.category(),
        retryable = err.is_retryable(),
        error = %err,
        "Worker operation failed"
    );
    err.into()
}

fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::cache_dir()
        .context("no platform cache directory; pass --db")?
        .join("covasol");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(dir.join("caches.db"))
}

fn open_controller(config: WorkerConfig, db: Option<PathBuf>) -> Result<OfflineController> {
    let db = match db {
        Some(path) => path,
        None => default_db_path()?,
    };
    debug!(db = %db.display(), "Opening cache database");

    let storage = SqliteCacheStorage::open(&db)?;
    let fetcher = ResourceLoader::new(LoaderConfig::default())?;
    let (controller, mut events) =
        OfflineController::new(config, Arc::new(fetcher), Box::new(storage))?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    Ok(controller)
}

fn log_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::StateChange {
            worker_id,
            new_state,
        } => debug!(worker = worker_id.raw(), state = ?new_state, "Worker state"),
        ControllerEvent::CachesDeleted { names } => info!(?names, "Deleted old caches"),
        ControllerEvent::ClientsClaimed { count } => debug!(count, "Claimed clients"),
        other => debug!(event = ?other, "Worker event"),
    }
}

async fn install_command(controller: &OfflineController) -> Result<()> {
    controller.install().await.map_err(report)?;

    let static_cache = &controller.config().static_cache;
    let count = controller.cache_keys(static_cache).await?.len();
    println!("Installed: {} entries in {}", count, static_cache);
    Ok(())
}

async fn fetch_command(
    controller: &OfflineController,
    path: &str,
    navigate: bool,
    image: bool,
    method: &str,
) -> Result<()> {
    let url = controller.config().resolve(path)?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method '{}'", method))?;

    let request = if navigate {
        Request::navigate(url)
    } else if image {
        Request::get(url).destination(RequestDestination::Image)
    } else {
        Request::get(url)
    }
    .with_method(method);

    // A fresh worker has to be active before it intercepts anything.
    if !controller.resume().await.map_err(report)? {
        if let Err(e) = controller.install().await {
            eprintln!("Install failed, request goes straight to the network: {}", e);
        }
    }

    match controller.handle_fetch(&request).await.map_err(report)? {
        FetchOutcome::Passthrough(reason) => {
            println!("{} {} -> passthrough ({:?})", request.method, request.url, reason);
        }
        FetchOutcome::Respond(answer) => {
            println!(
                "{} {} -> {} from {:?} ({} bytes)",
                request.method,
                request.url,
                answer.response.status,
                answer.source,
                answer.response.body.len()
            );
        }
    }
    Ok(())
}

async fn push_command(controller: &OfflineController, payload: Option<String>) -> Result<()> {
    let Some(id) = controller
        .handle_push(payload.as_deref().map(str::as_bytes))
        .await
    else {
        println!("No notification shown");
        return Ok(());
    };

    if let Some(notification) = controller.notifications().read().await.get(id) {
        println!("{}: {}", notification.title, notification.body);
    }
    let outcome = controller
        .handle_notification_click(id)
        .await
        .map_err(report)?;
    println!("Click -> {:?}", outcome);
    Ok(())
}

async fn sync_command(controller: &OfflineController, tag: &str) -> Result<()> {
    controller.register_sync(tag).await;
    let outcome = controller.handle_sync(tag).await;
    println!("Sync '{}' -> {:?}", tag, outcome);
    Ok(())
}

async fn caches_command(controller: &OfflineController) -> Result<()> {
    let names = controller.cache_names().await?;
    if names.is_empty() {
        println!("No caches");
    }
    for name in names {
        let count = controller.cache_keys(&name).await?.len();
        let marker = if controller.config().is_current_cache(&name) {
            ""
        } else {
            " (stale)"
        };
        println!("{}: {} entries{}", name, count, marker);
    }
    Ok(())
}
