//! Worker-side heartbeat loop: periodically announces this worker's
//! advertised address to the registry, and best-effort deregisters it on
//! shutdown.

use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEREGISTER_TIMEOUT: Duration = Duration::from_millis(500);

/// Runs the heartbeat loop until `shutdown` fires, then sends a best-effort
/// `DELETE` before returning.
pub async fn run(
    registry_addr: String,
    advertise_addr: String,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let client = Client::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                announce(&client, &registry_addr, &advertise_addr).await;
            }
            _ = shutdown.cancelled() => {
                deregister(&client, &registry_addr, &advertise_addr).await;
                return;
            }
        }
    }
}

async fn announce(client: &Client<HttpConnector>, registry_addr: &str, advertise_addr: &str) {
    let req = match heartbeat_request(Method::POST, registry_addr, advertise_addr) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "failed to build heartbeat request");
            return;
        }
    };

    match client.request(req).await {
        Ok(resp) if resp.status().is_success() => {
            debug!(%advertise_addr, "heartbeat sent");
        }
        Ok(resp) => {
            debug!(%advertise_addr, status = %resp.status(), "heartbeat rejected");
        }
        Err(e) => {
            debug!(error = %e, %advertise_addr, "heartbeat failed, will retry next tick");
        }
    }
}

async fn deregister(client: &Client<HttpConnector>, registry_addr: &str, advertise_addr: &str) {
    let req = match heartbeat_request(Method::DELETE, registry_addr, advertise_addr) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "failed to build deregistration request");
            return;
        }
    };

    match tokio::time::timeout(DEREGISTER_TIMEOUT, client.request(req)).await {
        Ok(Ok(_)) => info!(%advertise_addr, "deregistered on shutdown"),
        Ok(Err(e)) => warn!(error = %e, %advertise_addr, "deregistration request failed"),
        Err(_) => warn!(%advertise_addr, "deregistration timed out, exiting anyway"),
    }
}

fn heartbeat_request(
    method: Method,
    registry_addr: &str,
    advertise_addr: &str,
) -> anyhow::Result<Request<Body>> {
    let uri = format!("http://{registry_addr}/");
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(advertise_addr.to_string()))?)
}
