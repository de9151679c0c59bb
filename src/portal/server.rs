//! HTTP server for the provisioning form.
//!
//! Uses `tiny_http` which works on both host and ESP32 (via std::net).
//! The server thread and the control thread share one slot holding the
//! pending submission and the status shown to the operator.
//!
//! # Routes
//!
//! - `GET /` - the form, with the current status
//! - `POST /save` - urlencoded `ssid`/`password`, answered with 303 to `/`
//! - `GET /status` - plain-text status (`waiting`, `connecting:<ssid>`, ...)
//! - any other `GET` - 302 to `/`, so OS captive-portal probes land on the form

use super::form::{parse_credentials, render_page};
use super::PortalStatus;
use crate::config::Credentials;
use log::{debug, error, info, warn};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server};

/// Largest accepted form body.
const MAX_BODY_LEN: u64 = 1024;

/// Receive timeout of the server loop; bounds how long `stop` takes.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// State shared between the server thread and the portal loop.
#[derive(Debug)]
struct Shared {
    status: PortalStatus,
    submission: Option<Credentials>,
}

/// Response produced by [`route`], independent of the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub location: Option<&'static str>,
    pub allow: Option<&'static str>,
    pub body: String,
}

impl Reply {
    fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: Some("text/html; charset=utf-8"),
            location: None,
            allow: None,
            body,
        }
    }

    fn text(body: String) -> Self {
        Self {
            content_type: Some("text/plain; charset=utf-8"),
            ..Self::html(body)
        }
    }

    fn redirect(status: u16, location: &'static str) -> Self {
        Self {
            status,
            content_type: None,
            location: Some(location),
            allow: None,
            body: String::new(),
        }
    }

    fn method_not_allowed() -> Self {
        Self {
            status: 405,
            content_type: None,
            location: None,
            allow: Some("GET, POST"),
            body: "Method Not Allowed".to_string(),
        }
    }
}

/// Route one request. A valid submission is stored in `shared`.
fn route(method: &Method, url: &str, body: &str, portal_name: &str, shared: &Mutex<Shared>) -> Reply {
    let path = url.split('?').next().unwrap_or("/");

    match (method, path) {
        (Method::Get, "/") | (Method::Get, "/index.html") => {
            let status = lock(shared).status.clone();
            Reply::html(render_page(portal_name, &status))
        }
        (Method::Get, "/status") => Reply::text(lock(shared).status.to_string()),
        (Method::Post, "/save") => {
            let mut shared = lock(shared);
            match parse_credentials(body) {
                Ok(creds) => {
                    info!("[Portal] Credentials submitted for '{}'", creds.ssid);
                    shared.status = PortalStatus::Connecting {
                        ssid: creds.ssid.clone(),
                    };
                    shared.submission = Some(creds);
                }
                Err(e) => {
                    warn!("[Portal] Rejected submission: {}", e);
                    shared.status = PortalStatus::Failed {
                        reason: e.to_string(),
                    };
                }
            }
            Reply::redirect(303, "/")
        }
        (Method::Get, _) => {
            debug!("[Portal] Redirecting probe {}", path);
            Reply::redirect(302, "/")
        }
        _ => Reply::method_not_allowed(),
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Provisioning form server.
///
/// Runs in a background thread until stopped or dropped.
pub struct PortalServer {
    /// Server thread handle.
    handle: Option<thread::JoinHandle<()>>,
    /// Flag to signal shutdown.
    shutdown: Arc<AtomicBool>,
    shared: Arc<Mutex<Shared>>,
    local_addr: Option<SocketAddr>,
}

impl PortalServer {
    /// Start serving the form for `portal_name` on `bind_addr`.
    pub fn start(bind_addr: SocketAddr, portal_name: &str) -> Result<Self, io::Error> {
        let server = Server::http(bind_addr)
            .map_err(|e| io::Error::new(io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let local_addr = server.server_addr().to_ip();

        info!(
            "[Portal] Form server listening on http://{}/",
            local_addr.unwrap_or(bind_addr)
        );

        let shared = Arc::new(Mutex::new(Shared {
            status: PortalStatus::Waiting,
            submission: None,
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let shared = shared.clone();
            let shutdown = shutdown.clone();
            let portal_name = portal_name.to_string();
            thread::spawn(move || Self::run_server(server, &portal_name, &shared, &shutdown))
        };

        Ok(Self {
            handle: Some(handle),
            shutdown,
            shared,
            local_addr,
        })
    }

    /// Address the server is bound to (resolves port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Take the pending submission, if any.
    pub fn take_submission(&self) -> Option<Credentials> {
        lock(&self.shared).submission.take()
    }

    /// Update the status shown to the operator.
    pub fn set_status(&self, status: PortalStatus) {
        lock(&self.shared).status = status;
    }

    /// Current status.
    pub fn status(&self) -> PortalStatus {
        lock(&self.shared).status.clone()
    }

    fn run_server(server: Server, portal_name: &str, shared: &Mutex<Shared>, shutdown: &AtomicBool) {
        loop {
            // Acquire pairs with the Release store in stop()
            if shutdown.load(Ordering::Acquire) {
                debug!("[Portal] Form server shutting down");
                break;
            }

            match server.recv_timeout(RECV_TIMEOUT) {
                Ok(Some(request)) => Self::respond(request, portal_name, shared),
                Ok(None) => {}
                Err(e) => {
                    error!("[Portal] Server error: {}", e);
                    break;
                }
            }
        }
    }

    fn respond(mut request: Request, portal_name: &str, shared: &Mutex<Shared>) {
        let mut body = String::new();
        if *request.method() == Method::Post {
            if let Err(e) = request
                .as_reader()
                .take(MAX_BODY_LEN)
                .read_to_string(&mut body)
            {
                warn!("[Portal] Failed to read request body: {}", e);
            }
        }

        let reply = route(request.method(), request.url(), &body, portal_name, shared);

        let mut response = Response::from_string(reply.body).with_status_code(reply.status);
        let headers = [
            ("Content-Type", reply.content_type),
            ("Location", reply.location),
            ("Allow", reply.allow),
            ("Cache-Control", Some("no-store")),
        ];
        for (name, value) in headers {
            if let Some(value) = value {
                match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                    Ok(header) => response.add_header(header),
                    Err(()) => warn!("[Portal] Invalid header {}", name),
                }
            }
        }

        if let Err(e) = request.respond(response) {
            warn!("[Portal] Failed to send response: {}", e);
        }
    }

    /// Stop the server.
    ///
    /// May take up to 100ms due to the receive timeout.
    pub fn stop(&mut self) {
        // Release pairs with the Acquire load in the server loop
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PortalServer {
    fn drop(&mut self) {
        self.stop();
    }
}
