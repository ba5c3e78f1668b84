//! The registry HTTP surface: `POST` to register/heartbeat, `DELETE` to
//! deregister. Consumed by backend processes, never by end users.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use muster::pool::Pool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

async fn handle(req: Request<Body>, pool: Arc<Pool>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to read registration request body");
            return Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap());
        }
    };

    let addr = match std::str::from_utf8(&body) {
        Ok(s) => s.trim(),
        Err(e) => {
            warn!(error = %e, "registration body was not valid utf-8");
            return Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap());
        }
    };

    match method {
        Method::POST => {
            pool.register(addr);
            Ok(Response::new(Body::empty()))
        }
        Method::DELETE => {
            pool.deregister(addr);
            Ok(Response::new(Body::empty()))
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap()),
    }
}

/// Serves the registry HTTP surface until `shutdown` fires, allowing
/// in-flight requests up to 5s to finish.
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
        error!(error = %e, %addr, "registry listener failed to bind");
        e
    })?;

    info!(%addr, "registry server listening");

    server
        .serve(make_svc)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("registry server shutting down gracefully");
        })
        .await?;

    Ok(())
}
