//! Loopback REST surface over a shared [`DetectionPipeline`].
//!
//! Plain `std::net` server with a non-blocking accept loop. Mutating and
//! registry endpoints require a random bearer capability token generated at
//! startup.

use crate::config::FusionConfig;
use crate::pipeline::{DetectionBatch, DetectionPipeline};
use anyhow::{anyhow, Result};
use rand::RngCore;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub token_path: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8765".to_string(),
            token_path: None,
        }
    }
}

impl From<&FusionConfig> for ApiConfig {
    fn from(cfg: &FusionConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            token_path: cfg.api_token_path.clone(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    pub token: String,
    pub token_path: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// Random 32-byte bearer token, fixed for the server's lifetime.
#[derive(Clone, Debug)]
pub struct CapabilityToken {
    token: [u8; 32],
}

impl CapabilityToken {
    pub fn generate() -> Self {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        Self { token }
    }

    pub fn token_hex(&self) -> String {
        hex::encode(self.token)
    }

    pub fn validate(&self, presented: &str) -> Result<()> {
        let presented = parse_hex32(presented)?;
        let diff = presented
            .iter()
            .zip(self.token.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff != 0 {
            return Err(anyhow!("capability token invalid"));
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<DetectionPipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<DetectionPipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let capability = CapabilityToken::generate();
        let token = capability.token_hex();
        if let Some(path) = &self.cfg.token_path {
            write_token_file(path, &token)?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let pipeline = self.pipeline;
        let token_path = self.cfg.token_path.clone();
        let join = std::thread::Builder::new()
            .name("fusion-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &pipeline, &capability, shutdown_thread) {
                    log::error!("fusion api stopped: {}", err);
                }
            })
            .map_err(|e| anyhow!("failed to spawn api thread: {}", e))?;

        log::info!("fusion api listening on {}", addr);
        Ok(ApiHandle {
            addr,
            token,
            token_path,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    pipeline: &DetectionPipeline,
    capability: &CapabilityToken,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, pipeline, capability) {
                    log::warn!("fusion api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    pipeline: &DetectionPipeline,
    capability: &CapabilityToken,
) -> Result<()> {
    // Accepted sockets can inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    let route = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => Route::Health,
        ("GET", "/api/detect") => Route::LastDetection,
        ("GET", "/api/objects") => Route::Objects,
        ("POST", "/api/detections") => Route::SubmitBatch,
        (_, "/health" | "/api/detect" | "/api/objects" | "/api/detections") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
            return Ok(());
        }
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };

    match route {
        Route::Health => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        Route::LastDetection => match pipeline.last_confirmed()? {
            Some(det) => {
                let payload = serde_json::to_vec(&det)?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            None => write_json_response(&mut stream, 404, r#"{"error":"no_detections"}"#),
        },
        Route::Objects => {
            authorize(&mut stream, &request, capability)?;
            let payload = serde_json::to_vec(&pipeline.objects()?)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        Route::SubmitBatch => {
            authorize(&mut stream, &request, capability)?;
            let batch: DetectionBatch = match serde_json::from_slice(&request.body) {
                Ok(batch) => batch,
                Err(err) => {
                    write_error(&mut stream, 400, "invalid_json", &err.to_string())?;
                    return Err(anyhow!("invalid detection batch json: {}", err));
                }
            };
            if let Err(err) = batch.validate() {
                write_error(&mut stream, 400, "invalid_batch", &err.to_string())?;
                return Err(err);
            }
            match pipeline.process_batch(&batch) {
                Ok(confirmed) => {
                    let payload = serde_json::to_vec(&confirmed)?;
                    write_response(&mut stream, 200, "application/json", &payload)
                }
                Err(err) => {
                    write_json_response(&mut stream, 500, r#"{"error":"pipeline_failed"}"#)?;
                    Err(err)
                }
            }
        }
    }
}

enum Route {
    Health,
    LastDetection,
    Objects,
    SubmitBatch,
}

/// Writes the rejection response itself and returns an error on failure.
fn authorize(stream: &mut TcpStream, request: &HttpRequest, capability: &CapabilityToken) -> Result<()> {
    if request.has_query_token() {
        write_json_response(stream, 400, r#"{"error":"token_query_param_not_allowed"}"#)?;
        return Err(anyhow!("token passed as query parameter"));
    }
    let Some(token) = request.bearer_token() else {
        write_json_response(stream, 401, r#"{"error":"missing_token"}"#)?;
        return Err(anyhow!("missing bearer token"));
    };
    if let Err(err) = capability.validate(&token) {
        write_json_response(stream, 401, r#"{"error":"invalid_token"}"#)?;
        return Err(err);
    }
    Ok(())
}

fn read_request<R: Read>(stream: &mut R) -> Result<HttpRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        raw_path: raw_path.to_string(),
        body,
    })
}

fn write_error(stream: &mut TcpStream, status: u16, error: &str, detail: &str) -> Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": error, "detail": detail }))?;
    write_response(stream, status, "application/json", &body)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get("authorization") {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
                return Some(parts[1].to_string());
            }
        }
        None
    }

    fn has_query_token(&self) -> bool {
        if let Some(query) = self.raw_path.split('?').nth(1) {
            for pair in query.split('&') {
                if let Some((k, _)) = pair.split_once('=') {
                    if k == "token" {
                        return true;
                    }
                }
            }
        }
        false
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn parse_hex32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)?;
    if bytes.len() != 32 {
        return Err(anyhow!("token must be 32 bytes"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
