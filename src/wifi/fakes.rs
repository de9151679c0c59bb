//! Scripted test doubles for the platform seams.
//!
//! All doubles are cheap handles over shared state, so a test can keep a
//! clone for inspection after moving the original into the manager.

use super::{
    CredentialStore, LinkDiagnostics, LinkError, LinkEvent, LinkObserver, StationOptions,
    StoreError, System, WifiLink,
};
use crate::config::Credentials;
use crate::portal::{Portal, PortalError, PortalOutcome};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

// ==================== Link ====================

#[derive(Default)]
struct LinkState {
    observer: Option<LinkObserver>,
    subscribe_calls: usize,
    options: Option<StationOptions>,
    reachable: Vec<(String, String)>,
    attempts: Vec<String>,
    connected: bool,
    current_ssid: Option<String>,
    access_point: Option<String>,
    access_point_starts: Vec<String>,
    fail_access_point: bool,
}

/// Radio whose reachable networks are declared up front.
///
/// `begin` connects immediately when the SSID/password pair is reachable.
#[derive(Clone, Default)]
pub struct FakeLink {
    state: Rc<RefCell<LinkState>>,
}

impl FakeLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a network that accepts exactly this password.
    pub fn with_network(self, ssid: &str, password: &str) -> Self {
        self.state
            .borrow_mut()
            .reachable
            .push((ssid.to_string(), password.to_string()));
        self
    }

    /// Make `start_access_point` fail.
    pub fn failing_access_point(self) -> Self {
        self.state.borrow_mut().fail_access_point = true;
        self
    }

    /// Simulate the driver gaining or losing the association.
    pub fn force_connected(&self, connected: bool) {
        let event = {
            let mut state = self.state.borrow_mut();
            state.connected = connected;
            if connected {
                LinkEvent::StationConnected
            } else {
                LinkEvent::StationDisconnected { reason: 200 }
            }
        };
        self.emit(event);
    }

    pub fn attempts(&self) -> Vec<String> {
        self.state.borrow().attempts.clone()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.borrow().subscribe_calls
    }

    pub fn options(&self) -> Option<StationOptions> {
        self.state.borrow().options
    }

    pub fn access_point(&self) -> Option<String> {
        self.state.borrow().access_point.clone()
    }

    pub fn access_point_starts(&self) -> Vec<String> {
        self.state.borrow().access_point_starts.clone()
    }

    fn emit(&self, event: LinkEvent) {
        let observer = self.state.borrow().observer;
        if let Some(observer) = observer {
            observer(&event);
        }
    }
}

impl WifiLink for FakeLink {
    fn subscribe(&mut self, observer: LinkObserver) -> Result<(), LinkError> {
        let mut state = self.state.borrow_mut();
        state.observer = Some(observer);
        state.subscribe_calls += 1;
        Ok(())
    }

    fn configure_station(&mut self, options: StationOptions) -> Result<(), LinkError> {
        self.state.borrow_mut().options = Some(options);
        Ok(())
    }

    fn begin(&mut self, creds: &Credentials) -> Result<(), LinkError> {
        let connected = {
            let mut state = self.state.borrow_mut();
            state.attempts.push(creds.ssid.clone());
            state.connected = state
                .reachable
                .iter()
                .any(|(ssid, password)| *ssid == creds.ssid && *password == creds.password);
            state.current_ssid = Some(creds.ssid.clone());
            state.connected
        };
        if connected {
            self.emit(LinkEvent::StationConnected);
            self.emit(LinkEvent::AddressAcquired {
                ip: Ipv4Addr::new(192, 168, 1, 50),
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn diagnostics(&self) -> Option<LinkDiagnostics> {
        let state = self.state.borrow();
        if !state.connected {
            return None;
        }
        Some(LinkDiagnostics {
            ssid: state.current_ssid.clone().unwrap_or_default(),
            ip: Some(Ipv4Addr::new(192, 168, 1, 50)),
            rssi: Some(-61),
        })
    }

    fn start_access_point(&mut self, ssid: &str) -> Result<(), LinkError> {
        let mut state = self.state.borrow_mut();
        state.access_point_starts.push(ssid.to_string());
        if state.fail_access_point {
            return Err(LinkError::Driver("ESP_ERR_WIFI_MODE".into()));
        }
        state.access_point = Some(ssid.to_string());
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), LinkError> {
        self.state.borrow_mut().access_point = None;
        Ok(())
    }
}

// ==================== System ====================

type Scheduled = (Duration, Box<dyn FnMut()>);

#[derive(Default)]
struct SystemState {
    now: Duration,
    delays: usize,
    restarts: usize,
    scheduled: Vec<Scheduled>,
}

/// Virtual clock: `delay` advances time instantly and fires scheduled actions.
#[derive(Clone, Default)]
pub struct FakeSystem {
    state: Rc<RefCell<SystemState>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` once the clock reaches `at`.
    pub fn at(&self, at: Duration, action: impl FnMut() + 'static) {
        self.state
            .borrow_mut()
            .scheduled
            .push((at, Box::new(action)));
    }

    pub fn delay_count(&self) -> usize {
        self.state.borrow().delays
    }

    pub fn restarts(&self) -> usize {
        self.state.borrow().restarts
    }

    fn fire_due(&self) {
        let due: Vec<Scheduled> = {
            let mut state = self.state.borrow_mut();
            let now = state.now;
            let (due, pending): (Vec<Scheduled>, Vec<Scheduled>) = std::mem::take(&mut state.scheduled)
                .into_iter()
                .partition(|(at, _)| *at <= now);
            state.scheduled = pending;
            due
        };
        for (_, mut action) in due {
            action();
        }
    }
}

impl System for FakeSystem {
    fn delay(&self, duration: Duration) {
        {
            let mut state = self.state.borrow_mut();
            state.now += duration;
            state.delays += 1;
        }
        self.fire_due();
    }

    fn uptime(&self) -> Duration {
        self.state.borrow().now
    }

    fn restart(&self) {
        self.state.borrow_mut().restarts += 1;
    }
}

// ==================== Store ====================

#[derive(Default)]
struct StoreState {
    stored: Option<Credentials>,
    saves: usize,
    fail_save: bool,
}

/// In-memory credential store.
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Rc<RefCell<StoreState>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holding(creds: Credentials) -> Self {
        let store = Self::new();
        store.state.borrow_mut().stored = Some(creds);
        store
    }

    pub fn failing_saves(self) -> Self {
        self.state.borrow_mut().fail_save = true;
        self
    }

    pub fn stored(&self) -> Option<Credentials> {
        self.state.borrow().stored.clone()
    }

    pub fn saves(&self) -> usize {
        self.state.borrow().saves
    }
}

impl CredentialStore for FakeStore {
    fn load(&self) -> Option<Credentials> {
        self.stored()
    }

    fn save(&mut self, creds: &Credentials) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        if state.fail_save {
            return Err(StoreError::VerifyFailed);
        }
        state.stored = Some(creds.clone());
        state.saves += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.state.borrow_mut().stored = None;
        Ok(())
    }
}

// ==================== Portal ====================

/// What the next portal session does.
pub enum PortalScript {
    /// An operator submits these credentials after `after` of waiting.
    Submit { creds: Credentials, after: Duration },
    /// Nobody shows up; a bounded portal runs to its timeout, checking the
    /// link once a second like the real portal does.
    NoOperator,
    /// After `after`, report that the station joined on its own.
    LinkUp {
        last_submission: Option<Credentials>,
        after: Duration,
    },
    /// The portal fails to come up.
    FailToStart,
}

#[derive(Default)]
struct PortalState {
    script: VecDeque<PortalScript>,
    opens: Vec<(String, Option<Duration>)>,
}

/// Portal that follows a script instead of serving HTTP.
#[derive(Clone, Default)]
pub struct FakePortal {
    state: Rc<RefCell<PortalState>>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, step: PortalScript) -> Self {
        self.state.borrow_mut().script.push_back(step);
        self
    }

    /// Every `open` call as `(portal name, timeout)`.
    pub fn opens(&self) -> Vec<(String, Option<Duration>)> {
        self.state.borrow().opens.clone()
    }
}

impl<L: WifiLink, S: System> Portal<L, S> for FakePortal {
    fn open(
        &mut self,
        link: &mut L,
        system: &S,
        portal_name: &str,
        timeout: Option<Duration>,
    ) -> Result<PortalOutcome, PortalError> {
        let step = {
            let mut state = self.state.borrow_mut();
            state.opens.push((portal_name.to_string(), timeout));
            state.script.pop_front()
        };

        match step {
            Some(PortalScript::Submit { creds, after }) => {
                system.delay(after);
                link.begin(&creds).map_err(PortalError::AccessPoint)?;
                Ok(PortalOutcome::Configured(creds))
            }
            Some(PortalScript::FailToStart) => Err(PortalError::AccessPoint(LinkError::Driver(
                "ESP_ERR_WIFI_MODE".into(),
            ))),
            Some(PortalScript::LinkUp {
                last_submission,
                after,
            }) => {
                system.delay(after);
                Ok(PortalOutcome::LinkUp { last_submission })
            }
            Some(PortalScript::NoOperator) | None => {
                let start = system.uptime();
                let limit = timeout.unwrap_or_default();
                loop {
                    let elapsed = system.uptime().saturating_sub(start);
                    if elapsed >= limit {
                        return Ok(PortalOutcome::TimedOut);
                    }
                    if link.is_connected() {
                        return Ok(PortalOutcome::LinkUp {
                            last_submission: None,
                        });
                    }
                    system.delay((limit - elapsed).min(Duration::from_secs(1)));
                }
            }
        }
    }
}
