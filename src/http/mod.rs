//! HTTP Adapter
//!
//! Maps HTTP verbs and paths onto [`Storage`] calls:
//!
//! ```text
//! GET    /health                  -> "OK"
//! GET    /keys/:id                -> get
//! GET    /keys?filter=<glob>      -> get_pattern (filter defaults to "*")
//! PUT    /keys/:id?expire_in=<s>  -> put
//! HEAD   /keys/:id                -> get, status only
//! DELETE /keys/:id                -> delete
//! DELETE /keys                    -> delete_all
//! ```

pub mod handlers;

pub use handlers::{ApiError, AppState};

use crate::storage::Storage;
use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Builds the router over a storage backend.
pub fn router(storage: Arc<dyn Storage>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/keys",
            get(handlers::get_keys).delete(handlers::delete_keys),
        )
        .route(
            "/keys/:id",
            get(handlers::get_key)
                .put(handlers::put_key)
                .head(handlers::head_key)
                .delete(handlers::delete_key),
        )
        .fallback(handlers::not_found)
        // Values have no size limit
        .layer(DefaultBodyLimit::disable())
        .with_state(storage)
}

/// Serves requests on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    storage: Arc<dyn Storage>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, provider = storage.kind(), "Listening for HTTP requests");

    axum::serve(listener, router(storage))
        .with_graceful_shutdown(shutdown)
        .await
}
