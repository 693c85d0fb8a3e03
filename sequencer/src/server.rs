use dummy_chain_common::error::StoreError;
use dummy_chain_common::storage::BlockStore;
use dummy_chain_common::types::Block;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

const HOME_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Dummy Chain</title></head>
<body>
  <h1>Dummy Chain</h1>
  <p>Debug surface of the synthetic chain.</p>
  <hr/>
  <h2>Routes</h2>
  <ul>
    <li><code>/</code> - This page</li>
    <li><code>/status</code> - Chain status</li>
    <li><code>/block</code> - Current block</li>
    <li><code>/blocks/{height}</code> - Block at height</li>
  </ul>
</body>
</html>
"#;

fn with_store(
    store: Arc<BlockStore>,
) -> impl Filter<Extract = (Arc<BlockStore>,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

/// Read-only routes over the block store
pub fn routes(
    store: Arc<BlockStore>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let home = warp::get()
        .and(warp::path::end())
        .map(|| warp::reply::html(HOME_PAGE));

    let status = warp::get()
        .and(warp::path("status"))
        .and(warp::path::end())
        .and(with_store(store.clone()))
        .map(|store: Arc<BlockStore>| warp::reply::json(&store.meta()));

    let current = warp::get()
        .and(warp::path("block"))
        .and(warp::path::end())
        .and(with_store(store.clone()))
        .map(|store: Arc<BlockStore>| block_reply(store.current_block()));

    let by_height = warp::get()
        .and(warp::path!("blocks" / u64))
        .and(with_store(store))
        .map(|height: u64, store: Arc<BlockStore>| block_reply(store.read_block(height)));

    home.or(status).or(current).or(by_height)
}

fn block_reply(result: Result<Option<Block>, StoreError>) -> WithStatus<Json> {
    match result {
        Ok(Some(block)) => warp::reply::with_status(warp::reply::json(&block), StatusCode::OK),
        Ok(None) => warp::reply::with_status(
            warp::reply::json(&json!({ "error": "block not found" })),
            StatusCode::NOT_FOUND,
        ),
        Err(e) => warp::reply::with_status(
            warp::reply::json(&json!({ "error": e.to_string() })),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}

/// Serves the debug routes until `cancel` fires.
///
/// A bind failure is logged and leaves the node running without the server.
pub async fn serve(store: Arc<BlockStore>, addr: SocketAddr, cancel: CancellationToken) {
    let shutdown = async move { cancel.cancelled().await };

    match warp::serve(routes(store)).try_bind_with_graceful_shutdown(addr, shutdown) {
        Ok((bound, server)) => {
            info!(addr = %bound, "Starting server");
            server.await;
            info!("Server stopped");
        }
        Err(e) => error!(addr = %addr, error = %e, "Cannot start server"),
    }
}
