use crate::state::{StateStore, DEFAULT_PLACEHOLDER_IMAGE};
use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const DASHBOARD_HTML: &str = include_str!("dashboard.html");
const PLACEHOLDER_SVG: &str = include_str!("placeholder.svg");

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Directory served under `image_prefix`.
    pub image_dir: PathBuf,
    pub image_prefix: String,
    /// URL served in place of any image missing from `image_dir`.
    pub placeholder_image: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            image_dir: PathBuf::from("images"),
            image_prefix: "/images".to_string(),
            placeholder_image: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
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

impl Drop for ApiHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Dashboard HTTP server.
///
/// Reads the shared state for `GET /data` and flips the running flag for
/// `POST /toggle-detection`. It never drives hardware.
pub struct ApiServer {
    cfg: ApiConfig,
    store: StateStore,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, store: StateStore) -> Self {
        Self { cfg, store }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = Arc::new(self.cfg);
        let store = self.store;
        let join = std::thread::Builder::new()
            .name("dashboard-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, cfg, store, shutdown_thread) {
                    log::error!("dashboard api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: Arc<ApiConfig>,
    store: StateStore,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let store = store.clone();
                let spawned = std::thread::Builder::new()
                    .name("dashboard-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &store, &cfg) {
                            log::warn!("dashboard request from {} rejected: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("failed to spawn connection handler: {}", err);
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

fn handle_connection(mut stream: TcpStream, store: &StateStore, cfg: &ApiConfig) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => {
            write_response(
                &mut stream,
                200,
                "text/html; charset=utf-8",
                DASHBOARD_HTML.as_bytes(),
            )?;
        }
        ("GET", "/health") => {
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
        }
        ("GET", "/data") => {
            let payload = serde_json::to_vec(&store.read())?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        ("POST", "/toggle-detection") => {
            let running = parse_toggle(&request.body);
            store.set_running(running);
            log::info!(
                "detection {} by operator",
                if running { "started" } else { "stopped" }
            );
            let state = store.read();
            let payload = serde_json::to_vec(&json!({
                "status": state.status,
                "is_running": state.is_running,
            }))?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        ("GET", path) if image_name(path, &cfg.image_prefix).is_some() => {
            let name = image_name(path, &cfg.image_prefix).unwrap_or_default();
            serve_image(&mut stream, cfg, name)?;
        }
        (_, "/" | "/health" | "/data" | "/toggle-detection") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        }
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
        }
    }
    Ok(())
}

/// `isDetectionRunning` from a toggle body. Anything missing or malformed
/// means "running": the toggle never fails a request.
pub fn parse_toggle(body: &[u8]) -> bool {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("isDetectionRunning").and_then(Value::as_bool))
        .unwrap_or(true)
}

/// File name under the image prefix, if `path` is a plain file in it.
fn image_name<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let name = path.strip_prefix(prefix)?.strip_prefix('/')?;
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(&['/', '\\'][..])
        && !name.contains("..");
    plain.then_some(name)
}

/// Serve `name` from the image directory. A missing image is answered with
/// the configured placeholder file, then with the built-in placeholder.
fn serve_image(stream: &mut TcpStream, cfg: &ApiConfig, name: &str) -> Result<()> {
    match find_image(cfg, name) {
        Ok(Some((served, bytes))) => {
            if served != name {
                log::debug!("{} missing, serving {}", name, served);
            }
            write_response(stream, 200, content_type_for(served), &bytes)
        }
        Ok(None) => {
            log::debug!("{} missing, serving built-in placeholder", name);
            write_response(stream, 200, "image/svg+xml", PLACEHOLDER_SVG.as_bytes())
        }
        Err(err) => {
            write_json_response(stream, 500, r#"{"error":"internal"}"#)?;
            Err(err)
        }
    }
}

/// `name`, else the placeholder file, with the name actually found.
fn find_image<'a>(cfg: &'a ApiConfig, name: &'a str) -> Result<Option<(&'a str, Vec<u8>)>> {
    if let Some(bytes) = read_image(&cfg.image_dir, name)? {
        return Ok(Some((name, bytes)));
    }
    let placeholder = image_name(&cfg.placeholder_image, &cfg.image_prefix);
    match placeholder.filter(|p| *p != name) {
        Some(placeholder) => {
            Ok(read_image(&cfg.image_dir, placeholder)?.map(|bytes| (placeholder, bytes)))
        }
        None => Ok(None),
    }
}

fn read_image(image_dir: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let path = image_dir.join(name);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(anyhow!("failed to read {}: {}", path.display(), err)),
    }
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break None;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break Some(pos);
        }
    };
    let header_end = header_end.ok_or_else(|| anyhow!("incomplete request headers"))?;

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    let body_start = header_end + 4;
    if body_start + content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    let mut body = data[body_start..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
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
    body: Vec<u8>,
}
