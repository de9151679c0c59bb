//! Captive provisioning portal.
//!
//! When no known network is reachable the device hosts an open access point
//! named after itself. Phones joining it are steered (by the DNS responder
//! and the probe redirects) to a form where the operator enters the network
//! credentials. Each submission is tried while the portal stays up; the
//! first set that joins a network is handed back to the caller.
//!
//! ```text
//! phone ──DNS──▶ DnsResponder ──▶ portal address
//! phone ──HTTP─▶ PortalServer ──▶ submission slot ──▶ CaptivePortal::open
//!                                                      │
//!                                        WifiLink::begin + wait_for_connection
//! ```

use crate::config::{Credentials, POLL_INTERVAL};
use crate::wifi::{wait_for_connection, LinkError, System, WifiLink};
use log::{info, warn};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

mod dns;
mod form;
mod server;

pub use dns::{build_response, DnsResponder};
pub use form::{parse_credentials, render_page, FormError};
pub use server::PortalServer;

/// Address of the device on its own access point (esp-idf default).
pub const DEFAULT_PORTAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 71, 1);

/// How long a submitted network gets to accept the device.
pub const SUBMISSION_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long the success page stays reachable before the AP goes down.
pub const LINGER: Duration = Duration::from_secs(3);

/// What the operator currently sees on the portal page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalStatus {
    /// No submission yet.
    Waiting,
    /// Trying the submitted network.
    Connecting { ssid: String },
    /// Joined the submitted network with the given address.
    Connected { ip: String },
    /// The last submission was rejected or could not connect.
    Failed { reason: String },
}

impl PortalStatus {
    /// Plain-text form served on `/status`.
    pub fn to_status_string(&self) -> String {
        match self {
            Self::Waiting => "waiting".to_string(),
            Self::Connecting { ssid } => format!("connecting:{}", ssid),
            Self::Connected { ip } => format!("connected:{}", ip),
            Self::Failed { reason } => format!("failed:{}", reason),
        }
    }
}

impl fmt::Display for PortalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_status_string())
    }
}

/// Result of a portal session that started successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalOutcome {
    /// The operator supplied credentials that joined a network.
    Configured(Credentials),
    /// The station associated on its own while the portal was up, usually
    /// the driver's reconnect to the last network it was given.
    /// `last_submission` holds the credentials of the last submission that
    /// was tried, if any, since the driver retries those.
    LinkUp { last_submission: Option<Credentials> },
    /// A bounded session ran out of time.
    TimedOut,
}

/// Provisioning portal.
///
/// The radio and clock are borrowed for the session only, so the caller
/// keeps ownership of both between sessions.
pub trait Portal<L: WifiLink, S: System> {
    /// Run one portal session named `portal_name`.
    ///
    /// `timeout` of `None` waits until credentials arrive.
    fn open(
        &mut self,
        link: &mut L,
        system: &S,
        portal_name: &str,
        timeout: Option<Duration>,
    ) -> Result<PortalOutcome, PortalError>;
}

/// Where and how the portal serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSettings {
    pub http_addr: SocketAddr,
    /// Catch-all DNS responder address; `None` disables it.
    pub dns_addr: Option<SocketAddr>,
    /// Address handed out in DNS answers.
    pub portal_ip: Ipv4Addr,
    /// Connect wait per submission, cut short by a bounded window's deadline.
    pub submission_connect_timeout: Duration,
    pub poll_interval: Duration,
    /// Time the success page stays up. A submission that joins just before
    /// the deadline keeps the access point up for this long past it.
    pub linger: Duration,
}

impl PortalSettings {
    /// On-device layout: HTTP on port 80 and DNS on port 53 of every interface.
    pub fn device() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            dns_addr: Some(SocketAddr::from(([0, 0, 0, 0], 53))),
            portal_ip: DEFAULT_PORTAL_IP,
            submission_connect_timeout: SUBMISSION_CONNECT_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            linger: LINGER,
        }
    }

    /// Development layout: loopback HTTP on port 8080, no DNS.
    pub fn host() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            dns_addr: None,
            ..Self::device()
        }
    }
}

/// Access point, form server and DNS responder working together.
#[derive(Debug, Clone)]
pub struct CaptivePortal {
    settings: PortalSettings,
}

impl CaptivePortal {
    pub fn new(settings: PortalSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PortalSettings {
        &self.settings
    }

    /// Try one submission. Updates the page status either way.
    fn try_submission<L: WifiLink, S: System>(
        &self,
        link: &mut L,
        system: &S,
        server: &PortalServer,
        creds: &Credentials,
        wait: Duration,
    ) -> bool {
        info!("[Portal] Trying network '{}'", creds.ssid);
        server.set_status(PortalStatus::Connecting {
            ssid: creds.ssid.clone(),
        });

        if let Err(e) = link.begin(creds) {
            warn!("[Portal] Could not start connection: {}", e);
            server.set_status(PortalStatus::Failed {
                reason: e.to_string(),
            });
            return false;
        }

        if wait_for_connection(link, system, wait, self.settings.poll_interval) {
            let ip = link
                .diagnostics()
                .and_then(|d| d.ip)
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            info!("[Portal] Joined '{}' as {}", creds.ssid, ip);
            server.set_status(PortalStatus::Connected { ip });
            true
        } else {
            warn!("[Portal] Could not join '{}'", creds.ssid);
            server.set_status(PortalStatus::Failed {
                reason: format!("no connection to '{}'", creds.ssid),
            });
            false
        }
    }

    fn tear_down<L: WifiLink>(link: &mut L, mut server: PortalServer, dns: Option<DnsResponder>) {
        server.stop();
        if let Some(mut dns) = dns {
            dns.stop();
        }
        if let Err(e) = link.stop_access_point() {
            warn!("[Portal] Failed to stop access point: {}", e);
        }
        info!("[Portal] Closed (last status: {})", server.status());
    }
}

impl<L: WifiLink, S: System> Portal<L, S> for CaptivePortal {
    fn open(
        &mut self,
        link: &mut L,
        system: &S,
        portal_name: &str,
        timeout: Option<Duration>,
    ) -> Result<PortalOutcome, PortalError> {
        match timeout {
            Some(limit) => info!(
                "[Portal] Opening '{}' for {}s",
                portal_name,
                limit.as_secs()
            ),
            None => info!("[Portal] Opening '{}' until configured", portal_name),
        }

        link.start_access_point(portal_name)
            .map_err(PortalError::AccessPoint)?;

        let server = match PortalServer::start(self.settings.http_addr, portal_name) {
            Ok(server) => server,
            Err(e) => {
                if let Err(stop) = link.stop_access_point() {
                    warn!("[Portal] Failed to stop access point: {}", stop);
                }
                return Err(PortalError::Server(e));
            }
        };

        let dns = self.settings.dns_addr.and_then(|addr| {
            DnsResponder::start(addr, self.settings.portal_ip)
                .map_err(|e| warn!("[Portal] DNS responder unavailable: {}", e))
                .ok()
        });

        let start = system.uptime();
        let mut last_submission = None;
        loop {
            let remaining = timeout.map(|limit| limit.saturating_sub(system.uptime().saturating_sub(start)));
            if remaining == Some(Duration::ZERO) {
                info!(
                    "[Portal] No credentials within {}s",
                    timeout.unwrap_or_default().as_secs()
                );
                Self::tear_down(link, server, dns);
                return Ok(PortalOutcome::TimedOut);
            }

            if link.is_connected() {
                info!("[Portal] Station joined a network on its own");
                Self::tear_down(link, server, dns);
                return Ok(PortalOutcome::LinkUp { last_submission });
            }

            if let Some(creds) = server.take_submission() {
                let wait = remaining.map_or(self.settings.submission_connect_timeout, |left| {
                    left.min(self.settings.submission_connect_timeout)
                });
                if self.try_submission(link, system, &server, &creds, wait) {
                    system.delay(self.settings.linger);
                    Self::tear_down(link, server, dns);
                    return Ok(PortalOutcome::Configured(creds));
                }
                last_submission = Some(creds);
                continue;
            }

            system.delay(self.settings.poll_interval);
        }
    }
}

/// Errors bringing the portal up.
#[derive(Debug)]
pub enum PortalError {
    /// The access point could not be started.
    AccessPoint(LinkError),
    /// The HTTP server could not bind.
    Server(io::Error),
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessPoint(e) => write!(f, "access point failed: {}", e),
            Self::Server(e) => write!(f, "portal server failed: {}", e),
        }
    }
}

impl std::error::Error for PortalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AccessPoint(e) => Some(e),
            Self::Server(e) => Some(e),
        }
    }
}
