//! Per-backend reverse-proxy adapter. Owns the [`RateGate`] that the pool
//! consults through [`Forwarder::admit`] and feeds through [`Forwarder::forward`].

use std::fmt;
use std::time::{Duration, Instant};

use hyper::client::HttpConnector;
use hyper::http::uri::{Authority, Scheme};
use hyper::{Body, Client, Request, Response, Uri};

use crate::rate_gate::RateGate;

#[derive(Debug)]
pub enum ForwardError {
    /// The backend's address could not be turned into a request URI.
    BadAddress(String),
    /// The upstream request failed (timeout, connection refused, reset, ...).
    Upstream(hyper::Error),
}

impl fmt::Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardError::BadAddress(addr) => write!(f, "invalid backend address: {addr}"),
            ForwardError::Upstream(e) => write!(f, "upstream request failed: {e}"),
        }
    }
}

impl std::error::Error for ForwardError {}

/// A reverse-proxy adapter bound to a single backend address, plus the rate
/// gate guarding admission to it.
///
/// The HTTP client is shared across all forwarders in the pool (see
/// [`crate::pool::Pool`]) rather than one per backend: `hyper::Client` already
/// multiplexes connections per-authority internally, so nothing is gained by
/// giving every forwarder its own, and a shared client avoids needlessly
/// duplicating its internal connection-pool bookkeeping.
pub struct Forwarder {
    address: String,
    client: Client<HttpConnector>,
    gate: RateGate,
}

impl Forwarder {
    pub fn new(address: String, client: Client<HttpConnector>, slow_threshold: Duration) -> Self {
        Self {
            address,
            client,
            gate: RateGate::with_slow_threshold(slow_threshold),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn admit(&self) -> bool {
        self.gate.admit()
    }

    /// Streams `req` to this backend and streams the response back. Always
    /// records the elapsed time into the rate gate, even when the upstream
    /// call fails — the slowness signal this system cares about is purely
    /// temporal, not status-code based.
    pub async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ForwardError> {
        let upstream_req = match self.rewrite(req) {
            Ok(req) => req,
            Err(e) => return Err(e),
        };

        let t0 = Instant::now();
        let result = self.client.request(upstream_req).await;
        let duration = t0.elapsed();
        self.gate.record_latency(duration);

        result.map_err(ForwardError::Upstream)
    }

    fn rewrite(&self, mut req: Request<Body>) -> Result<Request<Body>, ForwardError> {
        let authority = Authority::try_from(self.address.as_str())
            .map_err(|_| ForwardError::BadAddress(self.address.clone()))?;

        let mut parts = req.uri().clone().into_parts();
        parts.scheme = Some(Scheme::HTTP);
        parts.authority = Some(authority);
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(hyper::http::uri::PathAndQuery::from_static("/"));
        }
        let new_uri =
            Uri::from_parts(parts).map_err(|_| ForwardError::BadAddress(self.address.clone()))?;

        *req.uri_mut() = new_uri;
        req.headers_mut().insert(
            hyper::header::HOST,
            hyper::header::HeaderValue::from_str(&self.address)
                .map_err(|_| ForwardError::BadAddress(self.address.clone()))?,
        );
        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::Server;
    use std::convert::Infallible;
    use std::net::SocketAddr;

    async fn spawn_echo(handled_by: &'static str) -> SocketAddr {
        let make_svc = make_service_fn(move |_conn| async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| async move {
                let body = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
                let mut resp = Response::new(Body::from(body));
                resp.headers_mut().insert(
                    "X-Handled-By",
                    hyper::header::HeaderValue::from_static(handled_by),
                );
                Ok::<_, Infallible>(resp)
            }))
        });

        let server = Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }

    #[tokio::test]
    async fn test_forwarder_forward_roundtrips_body_and_records_latency() {
        let addr = spawn_echo("worker-a").await;
        let forwarder = Forwarder::new(addr.to_string(), Client::new(), Duration::from_millis(500));

        let req = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from("hello"))
            .unwrap();

        let resp = forwarder.forward(req).await.unwrap();
        assert_eq!(resp.headers().get("X-Handled-By").unwrap(), "worker-a");

        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn test_forwarder_forward_to_a_dead_port_still_records_a_sample() {
        // Nothing is listening here; the connection attempt fails quickly.
        let forwarder = Forwarder::new(
            "127.0.0.1:1".to_string(),
            Client::new(),
            Duration::from_millis(500),
        );
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let result = forwarder.forward(req).await;
        assert!(result.is_err());
    }
}
