use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use prism::catalog::Catalog;
use prism::config::Config;
use prism::detector::Detector;
use prism::embedding::ThumbnailEncoder;
use prism::index::SharedIndex;
use prism::server::routes::build_router;
use prism::server::AppState;
use prism::validators::NullTextExtractor;

#[tokio::main]
async fn main() {
    // Load .env
    let _ = dotenvy::dotenv();

    // Load config first (needed for logging setup)
    let config = Config::load(None).expect("failed to load config");

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .init();
        }
    }

    tracing::info!("prism starting");
    prism::metrics::init();

    let index = SharedIndex::open(&config.index).expect("failed to open index");
    let catalog = Catalog::load(&config.catalog.path).expect("failed to load product catalog");
    let encoder =
        Arc::new(ThumbnailEncoder::new(config.index.dimension).expect("failed to build encoder"));

    let detector = Arc::new(
        Detector::new(&config, index, catalog, encoder, Arc::new(NullTextExtractor))
            .expect("failed to initialize detector"),
    );

    // Index catalog references missing from the restored index
    {
        let detector = detector.clone();
        match tokio::task::spawn_blocking(move || detector.sync_catalog()).await {
            Ok(Ok(report)) => {
                tracing::info!(indexed = report.indexed, skipped = report.skipped, "catalog ready")
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "catalog sync failed"),
            Err(e) => tracing::warn!(error = %e, "catalog sync task failed"),
        }
    }

    let state = AppState {
        detector: detector.clone(),
        config: Arc::new(config.clone()),
    };

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %addr, "listening");

    let listener = TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("shutting down, saving index");
    detector.index().save_or_warn();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
