//! Blocking HTTP front end: `GET /` and `POST /detect`.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

use crate::delivery::deliver;
use crate::media::MediaKind;
use crate::pipeline::{PipelineError, ProcessOptions, RequestPipeline};
use crate::stats::UsageStats;
use crate::subscribers::SubscriberStore;
use crate::transport::Messenger;

const MAX_REQUEST_BYTES: usize = 8192;
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);
const VIDEO_NOTICE: &str = "Processing video...";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
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

struct DetectService {
    pipeline: RequestPipeline,
    messenger: Arc<dyn Messenger>,
    subscribers: Arc<dyn SubscriberStore>,
    stats: Arc<UsageStats>,
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: DetectService,
}

impl ApiServer {
    pub fn new(
        cfg: ApiConfig,
        pipeline: RequestPipeline,
        messenger: Arc<dyn Messenger>,
        subscribers: Arc<dyn SubscriberStore>,
        stats: Arc<UsageStats>,
    ) -> Self {
        Self {
            cfg,
            service: DetectService {
                pipeline,
                messenger,
                subscribers,
                stats,
            },
        }
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

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let mut service = self.service;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &mut service, shutdown_thread) {
                log::error!("detect api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    service: &mut DetectService,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, service) {
                    log::warn!("detect api request rejected: {}", err);
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

fn handle_connection(mut stream: TcpStream, service: &mut DetectService) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({ "detail": "Forbidden" }))?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(RequestError::Io(err)) => {
            log::debug!("connection from {} dropped: {}", peer, err);
            return Ok(());
        }
        Err(err) => {
            log::warn!("rejected request from {}: {}", peer, err);
            write_json_response(&mut stream, err.status(), &json!({ "detail": err.to_string() }))?;
            return Ok(());
        }
    };
    let (status, body) = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => (
            200,
            json!({ "status": "running", "message": "Pose detection server is active" }),
        ),
        ("POST", "/detect") => service.detect(&request.body),
        (_, "/") | (_, "/detect") => (405, json!({ "detail": "Method Not Allowed" })),
        _ => (404, json!({ "detail": "Not Found" })),
    };
    write_json_response(&mut stream, status, &body)
}

#[derive(Debug, Deserialize)]
struct DetectRequest {
    file_path: String,
}

impl DetectService {
    fn detect(&mut self, body: &[u8]) -> (u16, serde_json::Value) {
        let request: DetectRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("malformed detect request: {}", err);
                return (422, json!({ "detail": format!("invalid request body: {err}") }));
            }
        };
        let path = PathBuf::from(&request.file_path);
        log::info!("detect request for {}", path.display());

        let kind = match RequestPipeline::check(&path) {
            Ok(kind) => kind,
            Err(err) => {
                log::warn!("detect request rejected: {}", err);
                return error_response(&err);
            }
        };

        let recipients = match self.subscribers.list() {
            Ok(recipients) => recipients,
            Err(err) => {
                log::error!("failed to load subscribers: {:#}", err);
                return (500, json!({ "detail": format!("{err:#}") }));
            }
        };
        if kind == MediaKind::Video {
            for &chat_id in &recipients {
                if let Err(err) = self.messenger.send_text(chat_id, VIDEO_NOTICE) {
                    log::warn!("failed to notify chat {}: {:#}", chat_id, err);
                }
            }
        }

        let output = match self
            .pipeline
            .process(&path, ProcessOptions { render_clip: false })
        {
            Ok(output) => output,
            Err(err) => {
                log::error!("detect request for {} failed: {:#}", path.display(), err);
                return match err.downcast_ref::<PipelineError>() {
                    Some(pipeline_err) => error_response(pipeline_err),
                    None => (500, json!({ "detail": format!("{err:#}") })),
                };
            }
        };
        self.stats.record(output.tally());
        let clip_seconds = self.pipeline.renderer().duration_secs();
        let report = deliver(self.messenger.as_ref(), &recipients, &output, clip_seconds);
        log::info!(
            "detect request for {} completed: {} sent, {} failed",
            path.display(),
            report.sent,
            report.failed
        );
        (
            200,
            json!({
                "status": "success",
                "message": format!("Processed and sent to {} subscriber(s)", report.recipients),
            }),
        )
    }
}

fn error_response(err: &PipelineError) -> (u16, serde_json::Value) {
    let status = match err {
        PipelineError::Unsupported(_) => 400,
        PipelineError::NotFound(_) => 404,
        PipelineError::Unreadable { .. } => 500,
    };
    (status, json!({ "detail": err.to_string() }))
}

#[derive(Debug, Error)]
enum RequestError {
    #[error("request too large")]
    TooLarge,
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("timed out reading request")]
    Timeout,
    #[error(transparent)]
    Io(std::io::Error),
}

impl RequestError {
    fn status(&self) -> u16 {
        match self {
            RequestError::TooLarge => 413,
            RequestError::Malformed(_) => 400,
            RequestError::Timeout => 408,
            RequestError::Io(_) => 500,
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        // Read timeouts surface as WouldBlock on Unix and TimedOut on Windows.
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => RequestError::Timeout,
            _ => RequestError::Io(err),
        }
    }
}

struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 && data.is_empty() {
            return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_REQUEST_BYTES {
            return Err(RequestError::TooLarge);
        }
    };
    if header_end > MAX_REQUEST_BYTES {
        return Err(RequestError::TooLarge);
    }

    let text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or(RequestError::Malformed("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or(RequestError::Malformed("missing method"))?;
    let raw_path = parts
        .next()
        .filter(|path| path.starts_with('/'))
        .ok_or(RequestError::Malformed("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .map(|value| value.parse::<usize>())
        .transpose()
        .map_err(|_| RequestError::Malformed("invalid content-length"))?
        .unwrap_or(0);
    if header_end.saturating_add(content_length) > MAX_REQUEST_BYTES {
        return Err(RequestError::TooLarge);
    }
    let mut body = data[header_end.min(data.len())..].to_vec();
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

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
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
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        408 => "HTTP/1.1 408 Request Timeout",
        413 => "HTTP/1.1 413 Payload Too Large",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
