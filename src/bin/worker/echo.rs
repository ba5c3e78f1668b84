//! The worker's echo HTTP surface: writes the request body back verbatim,
//! tagging the response so the router's `X-Handled-By` pass-through is
//! observable end-to-end.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use hyper::header::HeaderValue;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

async fn handle(
    req: Request<Body>,
    handled_by: String,
    delay: Duration,
) -> Result<Response<Body>, Infallible> {
    if !delay.is_zero() {
        tokio::time::sleep(jittered(delay)).await;
    }

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to read echoed request body");
            return Ok(Response::new(Body::empty()));
        }
    };

    let mut resp = Response::new(Body::from(body));
    match HeaderValue::from_str(&handled_by) {
        Ok(value) => {
            resp.headers_mut().insert("X-Handled-By", value);
        }
        Err(e) => warn!(error = %e, %handled_by, "advertised address is not a valid header value"),
    }
    Ok(resp)
}

/// Applies up to +/-20% jitter to the configured delay so a fleet of workers
/// sharing one `WORKER_DELAY` doesn't produce perfectly lockstepped latency
/// samples.
fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    delay.mul_f64(factor)
}

/// Binds the echo service and returns its actual local address alongside the
/// future that serves it. Binding `:0` yields an ephemeral port, which is why
/// this resolves the bound address *before* deciding what `X-Handled-By`
/// advertises: `advertise_addr`, if given, otherwise the resolved address
/// itself.
pub fn bind(
    addr: SocketAddr,
    advertise_addr: Option<String>,
    delay: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<(SocketAddr, impl std::future::Future<Output = anyhow::Result<()>>)> {
    let server = Server::try_bind(&addr).map_err(|e| {
        error!(error = %e, %addr, "worker echo listener failed to bind");
        e
    })?;
    let local_addr = server.local_addr();
    info!(addr = %local_addr, "worker echo service listening");

    let handled_by = advertise_addr.unwrap_or_else(|| local_addr.to_string());
    let make_svc = make_service_fn(move |_conn| {
        let handled_by = handled_by.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle(req, handled_by.clone(), delay)
            }))
        }
    });

    let serving = async move {
        server
            .serve(make_svc)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("worker echo service shutting down gracefully");
            })
            .await?;
        Ok(())
    };

    Ok((local_addr, serving))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Client;

    #[test]
    fn test_echo_jitter_stays_within_twenty_percent() {
        let base = Duration::from_millis(100);
        for _ in 0..1000 {
            let d = jittered(base);
            assert!(d >= Duration::from_millis(80) && d <= Duration::from_millis(120));
        }
    }

    #[tokio::test]
    async fn test_echo_bound_service_echoes_the_body_and_tags_the_response() {
        let shutdown = CancellationToken::new();
        let (addr, serving) = bind(
            "127.0.0.1:0".parse().unwrap(),
            Some("worker-under-test".to_string()),
            Duration::ZERO,
            shutdown.clone(),
        )
        .unwrap();
        tokio::spawn(serving);

        let client = Client::new();
        let req = Request::builder()
            .method("POST")
            .uri(format!("http://{addr}/"))
            .body(Body::from("ping"))
            .unwrap();
        let resp = client.request(req).await.unwrap();
        assert_eq!(resp.headers().get("X-Handled-By").unwrap(), "worker-under-test");

        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"ping");

        shutdown.cancel();
    }
}
