use std::sync::Arc;

use clap::Parser;
use igmirror_core::assets::LocalAssetStore;
use igmirror_core::queue::PgJobQueue;
use igmirror_core::request_log::PgRequestLog;
use igmirror_core::settings::PgSettingsStore;
use igmirror_core::store::PgStore;
use igmirror_core::MirrorConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use igmirror_server::auth::JwtKeys;
use igmirror_server::context::SyncContext;
use igmirror_server::firebase::FirebaseVerifier;
use igmirror_server::http::{self, HttpState};
use igmirror_server::subsystems::scheduler;
use igmirror_server::worker;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "igmirror.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match MirrorConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG directives win over the configured level
    let level = config
        .service
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    // Connect to DB
    let pool = match igmirror_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match igmirror_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }

        match igmirror_core::db::queue_depth(&pool).await {
            Ok(n) => println!("✅ Sync queue reachable: {} job(s) queued", n),
            Err(e) => {
                println!("❌ Sync queue check failed: {}", e);
                std::process::exit(1);
            }
        }

        println!("✅ igmirror DB health check passed");
        return Ok(());
    }

    let store = Arc::new(PgStore::new(pool.clone()));
    let settings = Arc::new(PgSettingsStore::new(pool.clone()));
    let request_log = Arc::new(PgRequestLog::new(pool.clone()));
    let queue = Arc::new(
        PgJobQueue::new(pool.clone())
            .with_lease(std::time::Duration::from_secs(config.worker.lease_secs)),
    );
    let media_root = config.storage.media_root_path();
    tracing::info!(media_root = %media_root.display(), "Asset storage ready");

    let ctx = SyncContext {
        profiles: store.clone(),
        settings: settings.clone(),
        request_log: request_log.clone(),
        assets: Arc::new(LocalAssetStore::new(media_root)),
        queue: queue.clone(),
        http: reqwest::Client::new(),
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Batch scheduler
    tokio::spawn(scheduler::run_scheduler_loop(
        store.clone(),
        queue.clone(),
        config.scheduler.clone(),
        tx.subscribe(),
    ));

    // HTTP REST API
    if config.http.enabled {
        let state = HttpState {
            config: config.clone(),
            pool: Some(pool.clone()),
            ctx: ctx.clone(),
            accounts: store.clone(),
            request_logs: request_log.clone(),
            verifier: Arc::new(FirebaseVerifier::new(
                settings.clone(),
                config.auth.firebase_jwks_url.clone(),
            )),
            keys: JwtKeys::from_config(&config.auth),
        };
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = http::start_http_server(state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    // Worker pool runs in the foreground until shutdown
    worker::run_worker_pool(ctx, queue, config.worker.clone(), tx).await;

    Ok(())
}
