//! Plain HTTP requests that arrive on the WebSocket listener.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::state::Shared;
use crate::error::{AppError, AppResult, ServerError};
use crate::metrics::{OperationStatus, PROMETHEUS_CONTENT_TYPE, render_prometheus};

const MAX_HEAD_BYTES: usize = 16 * 1024;
const JSON_CONTENT_TYPE: &str = "application/json";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const INDEX_FILE: &str = "index.html";
const BANNER: &str = "telecast telemetry broadcaster\n\nWebSocket: connect to this address\nMetrics: /metrics\nHealth: /health/live, /health/ready\nContainers: POST /api/container/create, POST /api/container/delete\n";

#[derive(Debug)]
pub(super) struct HttpRequest {
    pub(super) method: String,
    pub(super) path: String,
    pub(super) headers: HashMap<String, String>,
}

impl HttpRequest {
    pub(super) fn is_websocket_upgrade(&self) -> bool {
        self.headers
            .get("upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
    }

    fn route_path(&self) -> &str {
        self.path
            .split_once('?')
            .map_or(self.path.as_str(), |(path, _)| path)
    }
}

#[derive(Debug)]
pub(super) struct HttpError {
    pub(super) status: u16,
    pub(super) message: String,
}

impl HttpError {
    fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Reads up to the end of the request head. Returns the parsed head together
/// with every byte consumed, so an upgrade can replay them.
pub(super) async fn read_request_head(
    socket: &mut TcpStream,
) -> Result<(HttpRequest, Vec<u8>), HttpError> {
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let header_end;

    loop {
        let bytes = socket
            .read(&mut chunk)
            .await
            .map_err(|err| HttpError::new(400, format!("Failed to read request: {}", err)))?;
        if bytes == 0 {
            return Err(HttpError::new(400, "Empty request"));
        }
        let read_slice = chunk
            .get(..bytes)
            .ok_or_else(|| HttpError::new(400, "Invalid read length"))?;
        buffer.extend_from_slice(read_slice);
        if let Some(pos) = find_header_end(&buffer) {
            header_end = pos;
            break;
        }
        if buffer.len() > MAX_HEAD_BYTES {
            return Err(HttpError::new(431, "Request header too large"));
        }
    }

    let header_bytes = buffer
        .get(..header_end)
        .ok_or_else(|| HttpError::new(400, "Malformed request headers"))?;
    let request = parse_head(header_bytes)?;
    Ok((request, buffer))
}

fn parse_head(header_bytes: &[u8]) -> Result<HttpRequest, HttpError> {
    let header_text = std::str::from_utf8(header_bytes)
        .map_err(|err| HttpError::new(400, format!("Invalid request encoding: {}", err)))?;
    let mut lines = header_text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| HttpError::new(400, "Missing request line"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HttpError::new(400, "Missing HTTP method"))?;
    let path = parts
        .next()
        .ok_or_else(|| HttpError::new(400, "Missing request path"))?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(HttpError::new(400, "Malformed header"));
        };
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    Ok(HttpRequest {
        method: method.to_owned(),
        path: path.to_owned(),
        headers,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    route: &'static str,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T, route: &'static str) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        Self {
            status,
            content_type: JSON_CONTENT_TYPE,
            body,
            route,
        }
    }

    fn error(status: u16, message: &str, route: &'static str) -> Self {
        #[derive(Serialize)]
        struct ErrorResponse<'msg> {
            error: &'msg str,
        }
        Self::json(status, &ErrorResponse { error: message }, route)
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ContainerResponse {
    status: &'static str,
    message: &'static str,
}

/// Simulated container actions behind `POST /api/container/*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerAction {
    Create,
    Delete,
}

impl ContainerAction {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            "/api/container/create" => Some(Self::Create),
            "/api/container/delete" => Some(Self::Delete),
            _ => None,
        }
    }

    const fn operation(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }

    const fn route(self) -> &'static str {
        match self {
            Self::Create => "/api/container/create",
            Self::Delete => "/api/container/delete",
        }
    }

    const fn delay(self) -> Duration {
        match self {
            Self::Create => Duration::from_millis(500),
            Self::Delete => Duration::from_millis(200),
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::Create => "Container created successfully",
            Self::Delete => "Container deleted successfully",
        }
    }
}

/// Answers a non-upgrade request, logs it and counts it.
pub(super) async fn respond(
    shared: &Shared,
    socket: &mut TcpStream,
    request: &HttpRequest,
    peer: SocketAddr,
) -> AppResult<()> {
    let started = Instant::now();
    let response = build_response(shared, request).await;
    write_response(socket, &response).await?;

    shared
        .metrics
        .inc_http_request(&request.method, response.route, response.status);
    tracing::info!(
        "{} {} {} from {} in {}ms",
        request.method,
        request.path,
        response.status,
        peer,
        started.elapsed().as_millis()
    );
    Ok(())
}

/// Answers a request whose head could not be read.
pub(super) async fn reject(
    shared: &Shared,
    socket: &mut TcpStream,
    error: &HttpError,
) -> AppResult<()> {
    let response = Response::error(error.status, &error.message, "invalid");
    shared
        .metrics
        .inc_http_request("UNKNOWN", response.route, response.status);
    write_response(socket, &response).await
}

async fn build_response(shared: &Shared, request: &HttpRequest) -> Response {
    let path = request.route_path();
    if let Some(action) = ContainerAction::from_path(path) {
        if request.method != "POST" {
            return Response::error(405, "Method not allowed", action.route());
        }
        return run_container_action(shared, action).await;
    }
    if request.method != "GET" {
        return Response::error(405, "Method not allowed", "unmatched");
    }

    match path {
        "/health/live" => Response::json(200, &HealthResponse { status: "UP" }, "/health/live"),
        "/health/ready" => Response::json(200, &HealthResponse { status: "UP" }, "/health/ready"),
        "/metrics" => Response {
            status: 200,
            content_type: PROMETHEUS_CONTENT_TYPE,
            body: render_prometheus(&shared.metrics).into_bytes(),
            route: "/metrics",
        },
        path => serve_static(&shared.settings.static_dir, path).await,
    }
}

async fn run_container_action(shared: &Shared, action: ContainerAction) -> Response {
    tokio::time::sleep(action.delay()).await;
    shared
        .metrics
        .inc_operation(action.operation(), OperationStatus::Success);
    Response::json(
        200,
        &ContainerResponse {
            status: "success",
            message: action.message(),
        },
        action.route(),
    )
}

async fn serve_static(root: &Path, path: &str) -> Response {
    let Some(relative) = resolve_static_path(path) else {
        return Response::error(403, "Forbidden", "static");
    };
    match tokio::fs::read(root.join(&relative)).await {
        Ok(body) => Response {
            status: 200,
            content_type: content_type_for(&relative),
            body,
            route: "static",
        },
        Err(_) if path == "/" => Response {
            status: 200,
            content_type: TEXT_CONTENT_TYPE,
            body: BANNER.as_bytes().to_vec(),
            route: "/",
        },
        Err(_) => Response::error(404, "Not found", "unmatched"),
    }
}

/// Maps a request path onto a relative file path, rejecting anything that
/// could leave the static root.
fn resolve_static_path(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.contains('\\') || trimmed.contains('\0') {
        return None;
    }
    let mut relative = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if trimmed.is_empty() || trimmed.ends_with('/') {
        relative.push(INDEX_FILE);
    }
    Some(relative)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => JSON_CONTENT_TYPE,
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("txt") => TEXT_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

const fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        431 => "Request Header Fields Too Large",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

async fn write_response(socket: &mut TcpStream, response: &Response) -> AppResult<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        status_text(response.status),
        response.content_type,
        response.body.len()
    );
    socket.write_all(head.as_bytes()).await.map_err(|err| {
        AppError::server(ServerError::Io {
            context: "write http response",
            source: err,
        })
    })?;
    socket.write_all(&response.body).await.map_err(|err| {
        AppError::server(ServerError::Io {
            context: "write http response body",
            source: err,
        })
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_and_headers() -> Result<(), String> {
        let head = b"GET /metrics?x=1 HTTP/1.1\r\nHost: localhost\r\nUpgrade: WebSocket";
        let request = parse_head(head).map_err(|err| err.message)?;
        assert_eq!(request.method, "GET");
        assert_eq!(request.route_path(), "/metrics");
        assert!(request.is_websocket_upgrade());
        Ok(())
    }

    #[test]
    fn static_paths_cannot_escape_root() {
        assert_eq!(resolve_static_path("/"), Some(PathBuf::from(INDEX_FILE)));
        assert_eq!(
            resolve_static_path("/js/app.js"),
            Some(PathBuf::from("js/app.js"))
        );
        assert_eq!(
            resolve_static_path("/docs/"),
            Some(PathBuf::from("docs").join(INDEX_FILE))
        );
        assert_eq!(resolve_static_path("/../etc/passwd"), None);
        assert_eq!(resolve_static_path("/a/../../b"), None);
        assert_eq!(resolve_static_path("/..\\secret"), None);
    }

    #[test]
    fn container_routes_are_recognised() {
        assert_eq!(
            ContainerAction::from_path("/api/container/create"),
            Some(ContainerAction::Create)
        );
        assert_eq!(
            ContainerAction::from_path("/api/container/delete"),
            Some(ContainerAction::Delete)
        );
        assert_eq!(ContainerAction::from_path("/api/container/restart"), None);
        assert_eq!(ContainerAction::Create.delay(), Duration::from_millis(500));
        assert_eq!(ContainerAction::Delete.delay(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn container_create_counts_success() -> Result<(), String> {
        let shared = crate::server::state::test_shared(Duration::from_secs(120))
            .map_err(|err| err.to_string())?;
        let request = parse_head(b"POST /api/container/create HTTP/1.1\r\nHost: x")
            .map_err(|err| err.message)?;

        let started = Instant::now();
        let response = build_response(&shared, &request).await;
        assert!(started.elapsed() >= ContainerAction::Create.delay());
        assert_eq!(response.status, 200);
        assert_eq!(
            String::from_utf8_lossy(&response.body),
            r#"{"status":"success","message":"Container created successfully"}"#
        );
        assert_eq!(
            shared
                .metrics
                .operation_count("create", OperationStatus::Success),
            1
        );

        let wrong_method = parse_head(b"GET /api/container/delete HTTP/1.1\r\nHost: x")
            .map_err(|err| err.message)?;
        assert_eq!(build_response(&shared, &wrong_method).await.status, 405);
        Ok(())
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for(Path::new("a.css")), "text/css");
        assert_eq!(
            content_type_for(Path::new("index.html")),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            content_type_for(Path::new("blob")),
            "application/octet-stream"
        );
    }
}
