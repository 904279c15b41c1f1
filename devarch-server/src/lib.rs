pub mod handlers;
pub mod reject;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

use tracing::info;

pub use routes::routes;
pub use state::{AppState, PlanCache};

/// Serve the HTTP surface until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) {
    let eviction = state.spawn_eviction_task();
    let filter = routes(state.clone());
    info!(%addr, "http surface listening");
    let (_, server) = warp::serve(filter).bind_with_graceful_shutdown(addr, shutdown);
    server.await;
    eviction.abort();
    state.shutdown().await;
}
