use std::sync::Arc;

use edgegate::{
    build_client, serve, shutdown_signal, Config, HttpProber, ServerState, StateStore,
};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE_PATH: &str = "./Config.yml";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edgegate=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE_PATH.to_owned());

    let config = Config::load_from_file(&config_path)
        .and_then(|c| c.into_runtime())
        .unwrap_or_else(|e| {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        });
    let config = Arc::new(config);

    let store = Arc::new(StateStore::open(&config.state_path));
    let prober = Arc::new(HttpProber::new(
        config.probes.clone(),
        config.provider.clone(),
    ));
    let client = build_client();

    let listener = TcpListener::bind(config.listen).await.unwrap_or_else(|e| {
        eprintln!("fatal: failed to bind {}: {e}", config.listen);
        std::process::exit(1);
    });

    info!(
        listen = %config.listen,
        origin = %config.origin,
        admin_domain = %config.admin_domain,
        tunnel_mode = config.tunnel_mode,
        "gateway listening"
    );

    let concurrency_limit = config.max_concurrent_requests;
    let state = ServerState {
        config: Arc::clone(&config),
        store,
        prober,
        semaphore: Arc::new(Semaphore::new(concurrency_limit)),
        concurrency_limit,
    };

    serve(listener, client, state, shutdown_signal()).await;
}
