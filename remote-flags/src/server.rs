use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::router;
use crate::store::{PgStore, Store};

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = match PgStore::connect(
        &config.database_url,
        config.max_pg_connections,
        config.acquire_timeout(),
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to connect to the flag store: {}", e);
            return;
        }
    };

    serve_with_store(store, config, listener, shutdown).await
}

/// Serves the API on top of an already built store.
pub async fn serve_with_store<F>(
    store: Arc<dyn Store + Send + Sync>,
    config: Config,
    listener: TcpListener,
    shutdown: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router::router(store, &config);

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {:?}", addr),
        Err(e) => tracing::warn!("listening on an unknown address: {}", e),
    }

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("server error: {}", e);
    }
}
