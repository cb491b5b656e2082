//! HTTP server for the identify service.

use anyhow::Result;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{ErrorResponse, HealthResponse, IdentifyBody, IdentifyResponse, ServiceInfo};
use crate::config::{ServerConfig, StoreConfig};
use crate::engine::{IdentifyError, IdentifyRequest};

/// Largest request body accepted.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Largest request line plus headers accepted.
const MAX_HEAD_BYTES: u64 = 8 * 1024;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

const DB_ERROR_MESSAGE: &str = "A database error occurred";
const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred";
const BODY_REQUIRED_MESSAGE: &str = "Request body is required";

/// A fully rendered response: status code plus JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    fn json<T: serde::Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => Self { status, body },
            Err(e) => {
                error!(error = %e, "failed to encode response");
                Self {
                    status: 500,
                    body: format!(r#"{{"error":"{}"}}"#, UNEXPECTED_ERROR_MESSAGE),
                }
            }
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &ErrorResponse::new(message))
    }
}

/// HTTP server for identity reconciliation.
///
/// Each request opens its own database connection, so workers share
/// nothing but the database file.
pub struct IdentityServer {
    store: StoreConfig,
    config: ServerConfig,
    start_time: Instant,
}

impl IdentityServer {
    /// Create a new server, checking the database can be opened.
    pub fn new(store: StoreConfig, config: ServerConfig) -> Result<Self> {
        let db = store.open()?;
        info!(
            path = %store.database_path.display(),
            contacts = db.count_contacts()?,
            "database ready"
        );

        Ok(Self {
            store,
            config,
            start_time: Instant::now(),
        })
    }

    pub fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr())?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    /// Serve until `shutdown` is set (blocking).
    pub fn serve(&self, listener: TcpListener, shutdown: Arc<AtomicBool>) -> Result<()> {
        let workers = self.config.workers.max(1);
        let (tx, rx) = mpsc::sync_channel::<(TcpStream, SocketAddr)>(workers * 4);
        let rx = Mutex::new(rx);

        info!(addr = %listener.local_addr()?, workers, "identify server listening");

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let rx = &rx;
                scope.spawn(move || self.run_worker(worker, rx));
            }

            let result = self.accept_loop(&listener, &tx, &shutdown);
            // Closing the channel lets every worker drain and exit.
            drop(tx);
            result
        })?;

        info!("identify server stopped");
        Ok(())
    }

    fn accept_loop(
        &self,
        listener: &TcpListener,
        tx: &SyncSender<(TcpStream, SocketAddr)>,
        shutdown: &AtomicBool,
    ) -> Result<()> {
        while !shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    stream.set_nonblocking(false)?;
                    if tx.send((stream, peer_addr)).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
        Ok(())
    }

    fn run_worker(&self, worker: usize, rx: &Mutex<Receiver<(TcpStream, SocketAddr)>>) {
        debug!(worker, "worker started");
        loop {
            let next = {
                let guard = rx.lock().unwrap_or_else(|e| e.into_inner());
                guard.recv()
            };
            let Ok((stream, peer_addr)) = next else {
                break;
            };
            if let Err(e) = self.handle_connection(stream, peer_addr) {
                warn!(worker, peer = %peer_addr, error = %e, "request failed");
            }
        }
        debug!(worker, "worker stopped");
    }

    fn handle_connection(&self, mut stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let started = Instant::now();
        stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let (method, path, reply) = match read_request(&mut reader)? {
            Ok(request) => {
                let reply = self.route(&request.method, &request.path, &request.body);
                (request.method, request.path, reply)
            }
            Err(reply) => ("-".to_string(), "-".to_string(), reply),
        };

        self.send_reply(&mut stream, &reply)?;

        info!(
            %method,
            %path,
            status = reply.status,
            peer = %peer_addr,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "request processed"
        );
        Ok(())
    }

    /// Dispatch one request to its handler.
    pub fn route(&self, method: &str, path: &str, body: &[u8]) -> Reply {
        match (method, path) {
            ("POST", "/identify") => self.handle_identify(body),
            ("GET", "/health") => self.handle_health(),
            ("GET", "/") => self.handle_root(),
            (_, "/identify") | (_, "/health") | (_, "/") => {
                Reply::error(405, "Method not allowed")
            }
            _ => Reply::error(404, "Not found"),
        }
    }

    fn handle_identify(&self, body: &[u8]) -> Reply {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Reply::error(400, BODY_REQUIRED_MESSAGE);
        }

        let value: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                return Reply::error(400, format!("Invalid request: {}", e));
            }
        };
        // `null` and `{}` carry no request at all.
        let is_blank = match &value {
            serde_json::Value::Null => true,
            serde_json::Value::Object(fields) => fields.is_empty(),
            _ => false,
        };
        if is_blank {
            return Reply::error(400, BODY_REQUIRED_MESSAGE);
        }

        let body: IdentifyBody = match serde_json::from_value(value) {
            Ok(b) => b,
            Err(e) => {
                return Reply::error(400, format!("Invalid request: {}", e));
            }
        };

        let (email, phone_number) = body.into_parts();
        let request = match IdentifyRequest::new(email.as_deref(), phone_number.as_deref()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "validation error");
                return Reply::error(400, e.to_string());
            }
        };

        let mut db = match self.store.open() {
            Ok(db) => db,
            Err(e) => {
                error!(error = %e, "could not open database");
                return Reply::error(500, DB_ERROR_MESSAGE);
            }
        };

        match db.identify_request(&request) {
            Ok(contact) => Reply::json(200, &IdentifyResponse { contact }),
            Err(IdentifyError::Validation(message)) => {
                warn!(%message, "validation error");
                Reply::error(400, message)
            }
            Err(IdentifyError::Storage(detail)) => {
                error!(%detail, "database error during identify");
                Reply::error(500, DB_ERROR_MESSAGE)
            }
            Err(e @ IdentifyError::NotFound(_)) => {
                error!(error = %e, "inconsistent contact graph");
                Reply::error(500, UNEXPECTED_ERROR_MESSAGE)
            }
        }
    }

    /// Liveness only: the database is not consulted.
    fn handle_health(&self) -> Reply {
        Reply::json(
            200,
            &HealthResponse {
                status: "ok".to_string(),
            },
        )
    }

    fn handle_root(&self) -> Reply {
        let endpoints = BTreeMap::from([
            ("/health".to_string(), "Health check".to_string()),
            (
                "/identify".to_string(),
                "Identity reconciliation (POST)".to_string(),
            ),
        ]);

        Reply::json(
            200,
            &ServiceInfo {
                service: "Identity Reconciliation API".to_string(),
                status: "running".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.start_time.elapsed().as_secs(),
                endpoints,
            },
        )
    }

    fn send_reply(&self, stream: &mut TcpStream, reply: &Reply) -> Result<()> {
        let status_text = match reply.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            _ => "Unknown",
        };

        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply.status,
            status_text,
            reply.body.len(),
            reply.body
        );

        stream.write_all(response.as_bytes())?;
        stream.flush()?;
        Ok(())
    }
}

/// A parsed request: method, path without query, raw body.
#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// Read one request. An `Err(Reply)` inside is a client error to send back
/// as-is; the outer error is an I/O failure on the connection.
fn read_request<R: BufRead>(reader: &mut R) -> Result<std::result::Result<Request, Reply>> {
    let mut head = reader.by_ref().take(MAX_HEAD_BYTES);

    let mut request_line = String::new();
    head.read_line(&mut request_line)?;
    if !request_line.ends_with('\n') && head.limit() == 0 {
        return Ok(Err(Reply::error(431, "Request line too long")));
    }

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Ok(Err(Reply::error(400, "Malformed request line")));
    }
    let method = parts[0].to_string();
    let path = parts[1].split('?').next().unwrap_or("/").to_string();

    // Headers: only the body length matters here
    let mut content_length = 0usize;
    loop {
        let mut header_line = String::new();
        if head.read_line(&mut header_line)? == 0 {
            if head.limit() == 0 {
                return Ok(Err(Reply::error(431, "Request headers too large")));
            }
            break;
        }
        let header_line = header_line.trim();
        if header_line.is_empty() {
            break;
        }
        if let Some((key, value)) = header_line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Ok(Err(Reply::error(413, "Request body too large")));
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body)?;
    }

    Ok(Ok(Request { method, path, body }))
}
