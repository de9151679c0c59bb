//! Connectivity manager: gets the device online and keeps it there.
//!
//! Connection order on [`initialize`](ConnectivityManager::initialize):
//!
//! 1. stored credentials, bounded wait
//! 2. provisioning portal, bounded window
//! 3. compile-time fallback credentials (if enabled), bounded wait
//! 4. provisioning portal without a time limit
//!
//! The driver keeps retrying the last network it was given, so the link can
//! come up on its own during any of these waits. Every step after the first
//! checks the live link and stops there if it is up.
//!
//! Only a failure to start the last portal restarts the device, so a
//! missing network never turns into a reboot loop.

use super::events::log_link_event;
use super::identity::DeviceIdentity;
use super::session::{ConnectPath, Outcome, SessionState};
use super::{wait_for_connection, CredentialStore, StationOptions, System, WifiLink};
use crate::config::{ConnectivitySettings, Credentials, FallbackCredentials};
use crate::portal::{Portal, PortalOutcome};
use log::{error, info, warn};
use std::time::Duration;

/// Owns the radio and drives the connection algorithm.
pub struct ConnectivityManager<L, P, C, S> {
    link: L,
    portal: P,
    store: C,
    system: S,
    identity: DeviceIdentity,
    settings: ConnectivitySettings,
    fallback: Option<FallbackCredentials>,
    state: SessionState,
    /// Set once the observer is registered and station mode applied.
    prepared: bool,
    last_path: Option<ConnectPath>,
    /// Path of the credentials last handed to the station.
    station_path: Option<ConnectPath>,
}

impl<L, P, C, S> ConnectivityManager<L, P, C, S>
where
    L: WifiLink,
    P: Portal<L, S>,
    C: CredentialStore,
    S: System,
{
    pub fn new(
        link: L,
        portal: P,
        store: C,
        system: S,
        identity: DeviceIdentity,
        settings: ConnectivitySettings,
        fallback: Option<FallbackCredentials>,
    ) -> Self {
        Self {
            link,
            portal,
            store,
            system,
            identity,
            settings,
            fallback,
            state: SessionState::Disconnected,
            prepared: false,
            last_path: None,
            station_path: None,
        }
    }

    /// Bring the device online.
    ///
    /// Blocks until connected. Calling again while connected returns the
    /// previous outcome without touching the radio.
    pub fn initialize(&mut self) -> Outcome {
        if let Some(path) = self.last_path {
            if self.link.is_connected() {
                return Outcome::Connected(path);
            }
        }

        self.prepare();

        let portal_name = self.portal_name();
        info!(
            "[WiFi] Starting connection. AP name: {} (device {})",
            portal_name, self.identity
        );

        if self.try_stored() {
            return self.established(ConnectPath::Stored);
        }

        if let Some(outcome) = self.run_portal(&portal_name, Some(self.settings.portal_timeout)) {
            return outcome;
        }
        info!("[WiFi] Portal timed out.");

        if self.link.is_connected() {
            return self.rejoined();
        }
        if self.try_fallback() {
            return self.established(ConnectPath::Fallback);
        }
        if self.link.is_connected() {
            return self.rejoined();
        }

        info!("[WiFi] No connection. Re-opening portal (no reboot loop).");
        match self.run_portal(&portal_name, None) {
            Some(outcome) => outcome,
            None => {
                error!("[WiFi] CRITICAL: Config portal failed unexpectedly. Rebooting...");
                self.state = SessionState::Disconnected;
                self.system.delay(self.settings.restart_delay);
                self.system.restart();
                Outcome::Restarting
            }
        }
    }

    /// Live association status, asked of the driver on every call.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Log SSID, address and signal strength, or that we are offline.
    pub fn log_status(&self) {
        match self.link.diagnostics().filter(|_| self.link.is_connected()) {
            Some(diag) => {
                info!("--- WiFi Status ---");
                info!("SSID: {}", diag.ssid);
                match diag.ip {
                    Some(ip) => info!("IP Address: {}", ip),
                    None => info!("IP Address: (none)"),
                }
                match diag.rssi {
                    Some(rssi) => info!("Signal Strength (RSSI): {} dBm", rssi),
                    None => info!("Signal Strength (RSSI): unknown"),
                }
                info!("-------------------");
            }
            None => info!("[WiFi] Status: Currently Disconnected"),
        }
    }

    /// Session state. A stored `Connected` reads as `Disconnected` once the
    /// live link is down.
    pub fn state(&self) -> SessionState {
        match self.state {
            SessionState::Connected if !self.link.is_connected() => SessionState::Disconnected,
            state => state,
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// Network name of the provisioning portal.
    pub fn portal_name(&self) -> String {
        self.identity.portal_name(&self.settings.portal_prefix)
    }

    /// One-time radio setup: event observer and station behavior.
    fn prepare(&mut self) {
        if self.prepared {
            return;
        }
        if let Err(e) = self.link.subscribe(log_link_event) {
            warn!("[WiFi] Could not register event observer: {}", e);
        }
        if let Err(e) = self.link.configure_station(StationOptions::default()) {
            warn!("[WiFi] Could not configure station mode: {}", e);
        }
        self.prepared = true;
    }

    /// Begin with `creds` and wait up to `timeout` for the link.
    fn attempt(&mut self, creds: &Credentials, timeout: Duration, path: ConnectPath) -> bool {
        self.state = SessionState::Connecting;
        if let Err(e) = self.link.begin(creds) {
            warn!("[WiFi] Could not start connection to '{}': {}", creds.ssid, e);
            self.state = SessionState::Disconnected;
            return false;
        }
        self.station_path = Some(path);
        let connected =
            wait_for_connection(&self.link, &self.system, timeout, self.settings.poll_interval);
        if !connected {
            self.state = SessionState::Disconnected;
        }
        connected
    }

    fn try_stored(&mut self) -> bool {
        let Some(creds) = self.store.load() else {
            info!("[WiFi] No stored credentials.");
            return false;
        };
        info!("[WiFi] Trying last known network '{}'...", creds.ssid);
        if self.attempt(&creds, self.settings.stored_connect_timeout, ConnectPath::Stored) {
            return true;
        }
        warn!(
            "[WiFi] Stored network '{}' unreachable after {}s.",
            creds.ssid,
            self.settings.stored_connect_timeout.as_secs()
        );
        false
    }

    fn try_fallback(&mut self) -> bool {
        let Some(fallback) = self.fallback else {
            return false;
        };
        if fallback.is_empty() {
            info!("[WiFi] Fallback enabled but SSID is empty. Skipping fallback.");
            return false;
        }
        let creds = match fallback.credentials() {
            Ok(creds) => creds,
            Err(e) => {
                warn!("[WiFi] Fallback credentials invalid ({}). Skipping fallback.", e);
                return false;
            }
        };

        info!("[WiFi] Attempting fallback connection...");
        if self.attempt(&creds, self.settings.fallback_timeout, ConnectPath::Fallback) {
            info!("[WiFi] Fallback connection OK.");
            true
        } else {
            warn!("[WiFi] Fallback connection FAILED.");
            false
        }
    }

    /// One portal session. `None` on timeout or failure to start.
    fn run_portal(&mut self, portal_name: &str, timeout: Option<Duration>) -> Option<Outcome> {
        self.state = SessionState::PortalActive;
        let result = self
            .portal
            .open(&mut self.link, &self.system, portal_name, timeout);
        self.state = SessionState::Disconnected;

        match result {
            Ok(PortalOutcome::Configured(creds))
            | Ok(PortalOutcome::LinkUp {
                last_submission: Some(creds),
            }) => {
                self.remember(&creds);
                Some(self.established(ConnectPath::Portal))
            }
            Ok(PortalOutcome::LinkUp {
                last_submission: None,
            }) => Some(self.rejoined()),
            Ok(PortalOutcome::TimedOut) => None,
            Err(e) => {
                error!("[WiFi] Config portal failed to start: {}", e);
                None
            }
        }
    }

    /// Persist portal credentials as the new last-known network.
    fn remember(&mut self, creds: &Credentials) {
        match self.store.save(creds) {
            Ok(()) => info!("[WiFi] Saved credentials for '{}'.", creds.ssid),
            Err(e) => warn!("[WiFi] Could not save credentials: {}", e),
        }
    }

    /// The station associated without a new attempt from us.
    fn rejoined(&mut self) -> Outcome {
        let path = self.station_path.unwrap_or(ConnectPath::Stored);
        info!("[WiFi] Station rejoined its {:?} network.", path);
        self.established(path)
    }

    fn established(&mut self, path: ConnectPath) -> Outcome {
        self.state = SessionState::Connected;
        self.last_path = Some(path);
        info!("[WiFi] Connection established!");
        self.log_status();
        Outcome::Connected(path)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fakes::{FakeLink, FakePortal, FakeStore, FakeSystem, PortalScript};
    use super::*;
    use terelina_esp32_macros::esp32_test;

    type TestManager = ConnectivityManager<FakeLink, FakePortal, FakeStore, FakeSystem>;

    const MAC: [u8; 6] = [0xA2, 0x3F, 0x11, 0x22, 0x33, 0x44];

    fn creds(ssid: &str, password: &str) -> Credentials {
        Credentials::new(ssid, password).unwrap()
    }

    fn manager(
        link: &FakeLink,
        portal: &FakePortal,
        store: &FakeStore,
        system: &FakeSystem,
        fallback: Option<FallbackCredentials>,
    ) -> TestManager {
        ConnectivityManager::new(
            link.clone(),
            portal.clone(),
            store.clone(),
            system.clone(),
            DeviceIdentity::from_efuse_mac(MAC),
            ConnectivitySettings::default(),
            fallback,
        )
    }

    fn submit(ssid: &str, password: &str) -> PortalScript {
        PortalScript::Submit {
            creds: creds(ssid, password),
            after: Duration::from_secs(42),
        }
    }

    #[esp32_test]
    fn test_stored_credentials_skip_portal() {
        let link = FakeLink::new().with_network("Office", "secret123");
        let portal = FakePortal::new();
        let store = FakeStore::holding(creds("Office", "secret123"));
        let system = FakeSystem::new();
        let mut m = manager(&link, &portal, &store, &system, None);

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Stored));
        assert!(portal.opens().is_empty());
        assert_eq!(link.attempts(), vec!["Office".to_string()]);
        assert_eq!(m.state(), SessionState::Connected);
        assert_eq!(system.restarts(), 0);
    }

    #[esp32_test]
    fn test_setup_applies_station_options() {
        let link = FakeLink::new().with_network("Office", "secret123");
        let store = FakeStore::holding(creds("Office", "secret123"));
        let mut m = manager(&link, &FakePortal::new(), &store, &FakeSystem::new(), None);

        m.initialize();
        assert_eq!(link.subscribe_calls(), 1);
        assert_eq!(
            link.options(),
            Some(StationOptions {
                auto_reconnect: true,
                persistent: true
            })
        );
    }

    #[esp32_test]
    fn test_unreachable_stored_falls_through_to_portal() {
        let link = FakeLink::new().with_network("Lab", "labpass99");
        let portal = FakePortal::new().then(submit("Lab", "labpass99"));
        let store = FakeStore::holding(creds("Office", "secret123"));
        let system = FakeSystem::new();
        let mut m = manager(&link, &portal, &store, &system, None);

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Portal));
        // 30 s stored wait, then 42 s until the operator submitted
        assert_eq!(system.uptime(), Duration::from_secs(72));
        assert_eq!(
            portal.opens(),
            vec![("Terelina-3FA2".to_string(), Some(Duration::from_secs(180)))]
        );
        assert_eq!(store.stored(), Some(creds("Lab", "labpass99")));
        assert_eq!(store.saves(), 1);
    }

    #[esp32_test]
    fn test_portal_timeout_reopens_unbounded_without_restart() {
        let link = FakeLink::new().with_network("Office", "secret123");
        let portal = FakePortal::new()
            .then(PortalScript::NoOperator)
            .then(submit("Office", "secret123"));
        let store = FakeStore::new();
        let system = FakeSystem::new();
        let mut m = manager(&link, &portal, &store, &system, None);

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Portal));
        assert_eq!(
            portal.opens(),
            vec![
                ("Terelina-3FA2".to_string(), Some(Duration::from_secs(180))),
                ("Terelina-3FA2".to_string(), None),
            ]
        );
        assert_eq!(system.restarts(), 0);
        assert_eq!(store.stored(), Some(creds("Office", "secret123")));
    }

    #[esp32_test]
    fn test_fallback_connects_without_second_portal() {
        let link = FakeLink::new().with_network("Plant-Floor", "fallback1");
        let portal = FakePortal::new().then(PortalScript::NoOperator);
        let store = FakeStore::new();
        let system = FakeSystem::new();
        let fallback = FallbackCredentials {
            ssid: "Plant-Floor",
            password: "fallback1",
        };
        let mut m = manager(&link, &portal, &store, &system, Some(fallback));

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Fallback));
        assert_eq!(portal.opens().len(), 1);
        assert_eq!(system.uptime(), Duration::from_secs(180));
        assert!(store.stored().is_none(), "fallback is never persisted");
    }

    #[esp32_test]
    fn test_unreachable_fallback_is_bounded() {
        let link = FakeLink::new().with_network("Office", "secret123");
        let portal = FakePortal::new()
            .then(PortalScript::NoOperator)
            .then(submit("Office", "secret123"));
        let system = FakeSystem::new();
        let fallback = FallbackCredentials {
            ssid: "Plant-Floor",
            password: "fallback1",
        };
        let mut m = manager(&link, &portal, &FakeStore::new(), &system, Some(fallback));

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Portal));
        // 180 s portal + 20 s fallback + 42 s operator
        assert_eq!(system.uptime(), Duration::from_secs(242));
        assert_eq!(
            link.attempts(),
            vec!["Plant-Floor".to_string(), "Office".to_string()]
        );
        assert_eq!(portal.opens()[1].1, None);
    }

    #[esp32_test]
    fn test_empty_or_invalid_fallback_skipped() {
        for fallback in [
            FallbackCredentials {
                ssid: "",
                password: "",
            },
            FallbackCredentials {
                ssid: "Plant-Floor",
                password: "short",
            },
        ] {
            let link = FakeLink::new().with_network("Office", "secret123");
            let portal = FakePortal::new()
                .then(PortalScript::NoOperator)
                .then(submit("Office", "secret123"));
            let mut m = manager(&link, &portal, &FakeStore::new(), &FakeSystem::new(), Some(fallback));

            assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Portal));
            assert_eq!(link.attempts(), vec!["Office".to_string()]);
            assert_eq!(portal.opens().len(), 2);
        }
    }

    #[esp32_test]
    fn test_unbounded_portal_failure_restarts() {
        let link = FakeLink::new();
        let portal = FakePortal::new()
            .then(PortalScript::NoOperator)
            .then(PortalScript::FailToStart);
        let system = FakeSystem::new();
        let mut m = manager(&link, &portal, &FakeStore::new(), &system, None);

        assert_eq!(m.initialize(), Outcome::Restarting);
        assert_eq!(system.restarts(), 1);
        // 180 s bounded portal, then the 3 s pause before the restart
        assert_eq!(system.uptime(), Duration::from_secs(183));
        assert_eq!(m.state(), SessionState::Disconnected);
    }

    #[esp32_test]
    fn test_bounded_portal_failure_does_not_restart() {
        let link = FakeLink::new().with_network("Office", "secret123");
        let portal = FakePortal::new()
            .then(PortalScript::FailToStart)
            .then(submit("Office", "secret123"));
        let system = FakeSystem::new();
        let mut m = manager(&link, &portal, &FakeStore::new(), &system, None);

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Portal));
        assert_eq!(system.restarts(), 0);
        assert_eq!(portal.opens()[1].1, None);
    }

    fn plant_floor() -> FallbackCredentials {
        FallbackCredentials {
            ssid: "Plant-Floor",
            password: "fallback1",
        }
    }

    /// Bring the link up at `at` as the driver's own reconnect would.
    fn link_up_at(link: &FakeLink, system: &FakeSystem, at: u64) {
        let driver = link.clone();
        system.at(Duration::from_secs(at), move || driver.force_connected(true));
    }

    #[esp32_test]
    fn test_link_up_during_stored_wait() {
        let link = FakeLink::new();
        let portal = FakePortal::new();
        let system = FakeSystem::new();
        link_up_at(&link, &system, 10);
        let store = FakeStore::holding(creds("Office", "secret123"));
        let mut m = manager(&link, &portal, &store, &system, None);

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Stored));
        assert!(portal.opens().is_empty());
        assert_eq!(system.uptime(), Duration::from_secs(10));
    }

    #[esp32_test]
    fn test_stored_network_returning_during_portal_window() {
        let link = FakeLink::new().with_network("Plant-Floor", "fallback1");
        let portal = FakePortal::new()
            .then(PortalScript::NoOperator)
            .then(PortalScript::FailToStart);
        let store = FakeStore::holding(creds("Office", "secret123"));
        let system = FakeSystem::new();
        link_up_at(&link, &system, 90);
        let mut m = manager(&link, &portal, &store, &system, Some(plant_floor()));

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Stored));
        assert_eq!(link.attempts(), vec!["Office".to_string()]);
        assert_eq!(portal.opens().len(), 1);
        assert_eq!(system.restarts(), 0);
        assert_eq!(system.uptime(), Duration::from_secs(90));
        assert!(m.is_connected());
        assert_eq!(store.saves(), 0);
    }

    #[esp32_test]
    fn test_link_up_as_portal_window_closes_skips_fallback() {
        let link = FakeLink::new().with_network("Plant-Floor", "fallback1");
        let portal = FakePortal::new()
            .then(PortalScript::NoOperator)
            .then(PortalScript::FailToStart);
        let store = FakeStore::holding(creds("Office", "secret123"));
        let system = FakeSystem::new();
        // 30 s stored wait plus the full 180 s window
        link_up_at(&link, &system, 210);
        let mut m = manager(&link, &portal, &store, &system, Some(plant_floor()));

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Stored));
        assert_eq!(link.attempts(), vec!["Office".to_string()]);
        assert_eq!(portal.opens().len(), 1);
        assert_eq!(system.restarts(), 0);
    }

    #[esp32_test]
    fn test_link_up_during_fallback_wait() {
        let link = FakeLink::new();
        let portal = FakePortal::new().then(PortalScript::NoOperator);
        let system = FakeSystem::new();
        link_up_at(&link, &system, 190);
        let mut m = manager(&link, &portal, &FakeStore::new(), &system, Some(plant_floor()));

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Fallback));
        assert_eq!(link.attempts(), vec!["Plant-Floor".to_string()]);
        assert_eq!(portal.opens().len(), 1);
    }

    #[esp32_test]
    fn test_retried_submission_joining_is_saved() {
        let link = FakeLink::new();
        let portal = FakePortal::new().then(PortalScript::LinkUp {
            last_submission: Some(creds("Lab", "labpass99")),
            after: Duration::from_secs(50),
        });
        let store = FakeStore::new();
        let mut m = manager(&link, &portal, &store, &FakeSystem::new(), None);

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Portal));
        assert_eq!(store.stored(), Some(creds("Lab", "labpass99")));
    }

    #[esp32_test]
    fn test_failed_save_still_connected() {
        let link = FakeLink::new().with_network("Office", "secret123");
        let portal = FakePortal::new().then(submit("Office", "secret123"));
        let store = FakeStore::new().failing_saves();
        let mut m = manager(&link, &portal, &store, &FakeSystem::new(), None);

        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Portal));
        assert!(store.stored().is_none());
    }

    #[esp32_test]
    fn test_is_connected_tracks_live_link() {
        let link = FakeLink::new().with_network("Office", "secret123");
        let store = FakeStore::holding(creds("Office", "secret123"));
        let mut m = manager(&link, &FakePortal::new(), &store, &FakeSystem::new(), None);
        m.initialize();
        assert!(m.is_connected());

        link.force_connected(false);
        assert!(!m.is_connected());
        assert_eq!(m.state(), SessionState::Disconnected);
        m.log_status();

        link.force_connected(true);
        assert!(m.is_connected());
        assert_eq!(m.state(), SessionState::Connected);
        m.log_status();
    }

    #[esp32_test]
    fn test_initialize_is_idempotent() {
        let link = FakeLink::new().with_network("Office", "secret123");
        let portal = FakePortal::new();
        let store = FakeStore::holding(creds("Office", "secret123"));
        let system = FakeSystem::new();
        let mut m = manager(&link, &portal, &store, &system, None);

        let first = m.initialize();
        let delays = system.delay_count();
        assert_eq!(m.initialize(), first);
        assert_eq!(link.attempts().len(), 1);
        assert_eq!(link.subscribe_calls(), 1);
        assert_eq!(system.delay_count(), delays);
    }

    #[esp32_test]
    fn test_reinitialize_after_drop_reconnects() {
        let link = FakeLink::new().with_network("Office", "secret123");
        let store = FakeStore::holding(creds("Office", "secret123"));
        let mut m = manager(&link, &FakePortal::new(), &store, &FakeSystem::new(), None);

        m.initialize();
        link.force_connected(false);
        assert_eq!(m.initialize(), Outcome::Connected(ConnectPath::Stored));
        assert_eq!(link.attempts().len(), 2);
        assert_eq!(link.subscribe_calls(), 1);
    }

    #[esp32_test]
    fn test_accessors() {
        let m = manager(
            &FakeLink::new(),
            &FakePortal::new(),
            &FakeStore::new(),
            &FakeSystem::new(),
            None,
        );
        assert_eq!(m.portal_name(), "Terelina-3FA2");
        assert_eq!(m.identity().mac(), MAC);
        assert_eq!(m.state(), SessionState::Disconnected);
        assert!(!m.is_connected());
    }
}
