//! The client-facing router HTTP surface: selects a backend from the pool
//! and forwards the request to it verbatim.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use muster::pool::{Pool, PoolError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

async fn handle(req: Request<Body>, pool: Arc<Pool>) -> Result<Response<Body>, Infallible> {
    let selected = match pool.next() {
        Ok(selected) => selected,
        Err(PoolError::NoBackend) => {
            warn!("no backend registered, returning 502");
            return Ok(bad_gateway());
        }
        Err(PoolError::AllThrottled) => {
            warn!("every backend throttled, returning 502");
            return Ok(bad_gateway());
        }
    };

    match selected.forwarder.forward(req).await {
        Ok(resp) => Ok(resp),
        Err(e) => {
            warn!(address = %selected.address, error = %e, "upstream request failed");
            Ok(bad_gateway())
        }
    }
}

fn bad_gateway() -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Body::empty())
        .unwrap()
}

/// Serves the router HTTP surface until `shutdown` fires, allowing in-flight
/// forwarded requests up to 5s to finish.
pub async fn serve(
    addr: SocketAddr,
    pool: Arc<Pool>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let pool = pool.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, pool.clone()))) }
    });

    let server = Server::try_bind(&addr).map_err(|e| {
        error!(error = %e, %addr, "router listener failed to bind");
        e
    })?;

    info!(%addr, "router server listening");

    server
        .serve(make_svc)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("router server shutting down gracefully");
        })
        .await?;

    Ok(())
}
