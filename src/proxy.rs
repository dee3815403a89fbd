use crate::assets::StaticSite;
use crate::config::Config;
use crate::error::{
    json_error_response, json_upstream_errors, GatewayErrorCode, UpstreamErrorStrategy,
};
use crate::pool::{ConnectionPool, PoolConfig};
use http_body_util::{combinators::BoxBody, BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Path prefix forwarded to the upstream API.
const API_PREFIX: &str = "/api";
/// Path prefix tunneled to the upstream for WebSocket upgrades.
const WS_PREFIX: &str = "/ws";

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// The edge gateway server
pub struct GatewayServer {
    config: Arc<Config>,
    shutdown_rx: watch::Receiver<bool>,
    pool: Arc<ConnectionPool>,
    site: Arc<StaticSite>,
    on_upstream_error: UpstreamErrorStrategy,
}

/// Everything a request handler needs, shared across connections
struct GatewayContext {
    config: Arc<Config>,
    pool: Arc<ConnectionPool>,
    site: Arc<StaticSite>,
    on_upstream_error: UpstreamErrorStrategy,
}

impl GatewayServer {
    pub fn new(config: Arc<Config>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self::with_pool_config(config, shutdown_rx, PoolConfig::default())
    }

    pub fn with_pool_config(
        config: Arc<Config>,
        shutdown_rx: watch::Receiver<bool>,
        pool_config: PoolConfig,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::new(pool_config));
        let site = Arc::new(StaticSite::new(
            config.static_root.clone(),
            config.spa_index.clone(),
        ));
        Self {
            config,
            shutdown_rx,
            pool,
            site,
            on_upstream_error: json_upstream_errors(),
        }
    }

    /// Replace the strategy that maps upstream failures to client responses.
    pub fn with_error_strategy(mut self, strategy: UpstreamErrorStrategy) -> Self {
        self.on_upstream_error = strategy;
        self
    }

    /// Get the connection pool (for statistics)
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %addr,
            upstream = %self.config.upstream.origin(),
            static_root = %self.config.static_root.display(),
            "Gateway listening (HTTP/1.1 and HTTP/2)"
        );

        let ctx = Arc::new(GatewayContext {
            config: Arc::clone(&self.config),
            pool: Arc::clone(&self.pool),
            site: Arc::clone(&self.site),
            on_upstream_error: Arc::clone(&self.on_upstream_error),
        });

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let ctx = Arc::clone(&ctx);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, ctx).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<GatewayContext>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = Arc::clone(&ctx);
        async move { handle_request(req, ctx, addr).await }
    });

    // auto::Builder supports both HTTP/1.1 and HTTP/2; WebSocket upgrades
    // arrive over HTTP/1.1 connections.
    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection_with_upgrades(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    mut req: Request<Incoming>,
    ctx: Arc<GatewayContext>,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let path = req.uri().path().to_string();

    if matches_prefix(&path, API_PREFIX) || matches_prefix(&path, WS_PREFIX) {
        // Generate or propagate request ID
        let request_id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        apply_forwarding_headers(&mut req, client_addr, &request_id);

        debug!(method = %req.method(), uri = %req.uri(), request_id, "Forwarding to upstream");

        if matches_prefix(&path, WS_PREFIX) && is_upgrade_request(&req) {
            return tunnel_upgrade(req, ctx, request_id).await;
        }

        return forward_request(req, ctx, request_id).await;
    }

    let method = req.method().clone();
    Ok(ctx.site.serve(&method, &path).await)
}

/// A prefix matches whole path segments only: `/api` and `/api/...`
/// match, `/apiary` does not.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Overwrite forwarding headers rather than appending; the gateway is the
/// first trusted hop and client-supplied values are not kept.
fn apply_forwarding_headers(
    req: &mut Request<Incoming>,
    client_addr: SocketAddr,
    request_id: &str,
) {
    let headers = req.headers_mut();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = headers.get(hyper::header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }

    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
}

async fn forward_request(
    req: Request<Incoming>,
    ctx: Arc<GatewayContext>,
    request_id: String,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    match ctx.pool.forward(req, &ctx.config.upstream).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!(
                upstream = %ctx.config.upstream.origin(),
                request_id,
                error = %e,
                "Failed to reach upstream"
            );
            Ok((ctx.on_upstream_error)(&e))
        }
    }
}

/// Check if a request is a WebSocket/HTTP upgrade request
fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let has_upgrade_connection = req
        .headers()
        .get(hyper::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);

    let has_upgrade_header = req.headers().contains_key(hyper::header::UPGRADE);

    has_upgrade_connection && has_upgrade_header
}

/// Build the raw HTTP upgrade request replayed to the upstream, with the
/// Host header rewritten to the upstream authority
fn build_upgrade_request<B>(req: &Request<B>, authority: &str) -> Vec<u8> {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut request = format!("{} {} HTTP/1.1\r\n", req.method(), path);

    for (name, value) in req.headers() {
        if name == hyper::header::HOST {
            continue;
        }
        if let Ok(v) = value.to_str() {
            request.push_str(&format!("{}: {}\r\n", name, v));
        }
    }

    request.push_str(&format!("Host: {}\r\n", authority));
    request.push_str("\r\n");

    request.into_bytes()
}

/// Parse the upstream's reply to an upgrade request
fn parse_upgrade_response(data: &[u8]) -> Option<(StatusCode, Vec<(String, String)>)> {
    let response_str = std::str::from_utf8(data).ok()?;
    let mut lines = response_str.lines();

    // Status line: HTTP/1.1 101 Switching Protocols
    let status_line = lines.next()?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();
    if parts.len() < 2 {
        return None;
    }

    let status_code: u16 = parts[1].parse().ok()?;
    let status = StatusCode::from_u16(status_code).ok()?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Some((status, headers))
}

/// Relay bytes between the upgraded client connection and the upstream
/// until either side closes.
async fn forward_bidirectional(client: Upgraded, upstream: TcpStream, request_id: &str) {
    let mut client_io = TokioIo::new(client);
    let mut upstream_io = upstream;

    match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
        Ok((client_to_upstream, upstream_to_client)) => {
            debug!(
                request_id,
                client_to_upstream, upstream_to_client, "Tunnel closed normally"
            );
        }
        Err(e) => {
            debug!(request_id, error = %e, "Tunnel closed with error");
        }
    }
}

/// Handle a WebSocket upgrade request by opening a duplex tunnel to the
/// corresponding upstream path
async fn tunnel_upgrade(
    req: Request<Incoming>,
    ctx: Arc<GatewayContext>,
    request_id: String,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let upstream = &ctx.config.upstream;
    let raw_request = build_upgrade_request(&req, upstream.authority());

    let mut upstream_stream = match TcpStream::connect(upstream.addr()).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(upstream = %upstream.origin(), request_id, error = %e, "Failed to connect to upstream for upgrade");
            return Ok((ctx.on_upstream_error)(&e));
        }
    };

    if let Err(e) = upstream_stream.write_all(&raw_request).await {
        error!(upstream = %upstream.origin(), request_id, error = %e, "Failed to send upgrade request to upstream");
        return Ok((ctx.on_upstream_error)(&e));
    }

    // Read the upstream's reply to the handshake
    let mut response_buf = vec![0u8; 4096];
    let n = match upstream_stream.read(&mut response_buf).await {
        Ok(n) if n > 0 => n,
        Ok(_) => {
            error!(request_id, "Upstream closed connection before replying to upgrade");
            return Ok(json_error_response(
                GatewayErrorCode::UpstreamProtocol,
                "Upstream closed connection during upgrade",
            ));
        }
        Err(e) => {
            error!(request_id, error = %e, "Failed to read upgrade reply from upstream");
            return Ok((ctx.on_upstream_error)(&e));
        }
    };

    let (status, response_headers) = match parse_upgrade_response(&response_buf[..n]) {
        Some(parsed) => parsed,
        None => {
            error!(request_id, "Failed to parse upstream upgrade reply");
            return Ok(json_error_response(
                GatewayErrorCode::UpstreamProtocol,
                "Invalid upgrade reply from upstream",
            ));
        }
    };

    if status != StatusCode::SWITCHING_PROTOCOLS {
        warn!(request_id, status = %status, "Upstream rejected upgrade request");
        // Relay the non-101 reply as-is
        let mut response = Response::builder().status(status);
        for (name, value) in &response_headers {
            if let Ok(hv) = HeaderValue::from_str(value) {
                response = response.header(name.as_str(), hv);
            }
        }
        return Ok(response
            .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
            .expect("valid response builder"));
    }

    debug!(request_id, "WebSocket upgrade relayed");

    // Build the 101 reply for the client, skipping hop-by-hop headers
    // hyper manages itself
    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in &response_headers {
        let name_lower = name.to_lowercase();
        if name_lower == "content-length" || name_lower == "transfer-encoding" {
            continue;
        }
        if let Ok(hv) = HeaderValue::from_str(value) {
            response = response.header(name.as_str(), hv);
        }
    }

    let response = response
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response builder");

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                debug!(request_id, "Client upgrade complete, relaying frames");
                forward_bidirectional(upgraded, upstream_stream, &request_id).await;
            }
            Err(e) => {
                error!(request_id, error = %e, "Failed to upgrade client connection");
            }
        }
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_prefix() {
        assert!(matches_prefix("/api", "/api"));
        assert!(matches_prefix("/api/todos", "/api"));
        assert!(matches_prefix("/api/", "/api"));
        assert!(matches_prefix("/ws/live", "/ws"));

        assert!(!matches_prefix("/apiary", "/api"));
        assert!(!matches_prefix("/", "/api"));
        assert!(!matches_prefix("/wsx", "/ws"));
        assert!(!matches_prefix("/static/api", "/api"));
    }

    #[test]
    fn test_is_upgrade_request() {
        let upgrade = Request::builder()
            .uri("/ws/live")
            .header(hyper::header::CONNECTION, "Upgrade")
            .header(hyper::header::UPGRADE, "websocket")
            .body(())
            .unwrap();
        assert!(is_upgrade_request(&upgrade));

        let keep_alive = Request::builder()
            .uri("/ws/live")
            .header(hyper::header::CONNECTION, "keep-alive")
            .body(())
            .unwrap();
        assert!(!is_upgrade_request(&keep_alive));

        let plain = Request::builder().uri("/ws/live").body(()).unwrap();
        assert!(!is_upgrade_request(&plain));
    }

    #[test]
    fn test_build_upgrade_request_rewrites_host() {
        let req = Request::builder()
            .method("GET")
            .uri("/ws/live?room=7")
            .header(hyper::header::HOST, "gateway.local:3002")
            .header(hyper::header::UPGRADE, "websocket")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap();

        let raw = build_upgrade_request(&req, "localhost:3003");
        let text = String::from_utf8(raw).unwrap();

        assert!(text.starts_with("GET /ws/live?room=7 HTTP/1.1\r\n"));
        assert!(text.contains("Host: localhost:3003\r\n"));
        assert!(!text.contains("gateway.local"));
        assert!(text.contains("sec-websocket-key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_upgrade_response() {
        let reply = b"HTTP/1.1 101 Switching Protocols\r\n\
                      Upgrade: websocket\r\n\
                      Connection: Upgrade\r\n\
                      Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
                      \r\n";
        let (status, headers) = parse_upgrade_response(reply).unwrap();

        assert_eq!(status, StatusCode::SWITCHING_PROTOCOLS);
        assert!(headers
            .iter()
            .any(|(name, value)| name == "Upgrade" && value == "websocket"));

        let rejected = b"HTTP/1.1 400 Bad Request\r\n\r\n";
        let (status, _) = parse_upgrade_response(rejected).unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(parse_upgrade_response(b"garbage").is_none());
    }
}
