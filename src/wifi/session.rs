//! Connection session state.

use std::fmt;

/// State of the network session, owned by the connectivity manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected and no attempt in progress.
    Disconnected,
    /// Joining a network with stored or fallback credentials.
    Connecting,
    /// Associated with an access point and holding an address.
    Connected,
    /// The provisioning portal is up and waiting for an operator.
    PortalActive,
}

impl SessionState {
    /// Short lowercase name for log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::PortalActive => "portal",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which step of the connection algorithm brought the device online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPath {
    /// Last-known credentials from persistent storage.
    Stored,
    /// Credentials submitted through the provisioning portal.
    Portal,
    /// Compile-time fallback credentials.
    Fallback,
}

/// Result of [`ConnectivityManager::initialize`](super::ConnectivityManager::initialize).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The device is online.
    Connected(ConnectPath),
    /// A restart was requested. Only observable where restarting returns,
    /// i.e. with test doubles; on the device the restart never returns.
    Restarting,
}

impl Outcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}
