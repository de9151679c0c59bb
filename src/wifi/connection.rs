//! ESP-IDF WiFi driver binding.
//!
//! Wraps the driver for both roles the connectivity manager needs: the
//! station that joins networks and the access point hosting the portal.
//! Connection attempts are non-blocking; callers poll [`WifiLink::is_connected`].

use super::events::{LinkEvent, LinkObserver};
use super::{LinkDiagnostics, LinkError, StationOptions, WifiLink};
use crate::config::Credentials;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System as SysLoop};
use esp_idf_svc::ipv4::Ipv4Addr;
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
    EspWifi, WifiEvent,
};
use esp_idf_sys::{esp, EspError};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Channel of the provisioning access point.
const AP_CHANNEL: u8 = 1;

/// Station and access point on the ESP32 radio.
pub struct EspWifiLink {
    wifi: BlockingWifi<EspWifi<'static>>,
    sysloop: EspSystemEventLoop,
    /// Held for the lifetime of the link; dropping one unsubscribes.
    subscriptions: Vec<EspSubscription<'static, SysLoop>>,
    /// Read from the event task to decide whether to rejoin after a drop.
    auto_reconnect: Arc<AtomicBool>,
    client: ClientConfiguration,
    access_point: Option<AccessPointConfiguration>,
}

impl EspWifiLink {
    /// Take the modem. `nvs` lets the driver keep its own calibration and
    /// station data in flash.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, EspError> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop.clone())?;

        Ok(Self {
            wifi,
            sysloop,
            subscriptions: Vec::new(),
            auto_reconnect: Arc::new(AtomicBool::new(false)),
            client: ClientConfiguration::default(),
            access_point: None,
        })
    }

    fn configuration(&self) -> Configuration {
        match &self.access_point {
            Some(ap) => Configuration::Mixed(self.client.clone(), ap.clone()),
            None => Configuration::Client(self.client.clone()),
        }
    }

    fn apply(&mut self) -> Result<(), LinkError> {
        let configuration = self.configuration();
        self.wifi.set_configuration(&configuration)?;
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl WifiLink for EspWifiLink {
    fn subscribe(&mut self, observer: LinkObserver) -> Result<(), LinkError> {
        let auto_reconnect = self.auto_reconnect.clone();
        let wifi_sub = self.sysloop.subscribe::<WifiEvent, _>(move |event| match event {
            WifiEvent::StaConnected(_) => observer(&LinkEvent::StationConnected),
            WifiEvent::StaDisconnected(info) => {
                let reason = u16::try_from(info.reason()).unwrap_or(u16::MAX);
                observer(&LinkEvent::StationDisconnected { reason });
                if auto_reconnect.load(Ordering::Relaxed) {
                    // SAFETY: plain driver call, valid from the event task.
                    if let Err(e) = esp!(unsafe { esp_idf_sys::esp_wifi_connect() }) {
                        debug!("[WiFi Event] Reconnect request failed: {:?}", e);
                    }
                }
            }
            _ => {}
        })?;

        let ip_sub = self.sysloop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(assignment) = event {
                observer(&LinkEvent::AddressAcquired {
                    ip: assignment.ip(),
                });
            }
        })?;

        self.subscriptions.push(wifi_sub);
        self.subscriptions.push(ip_sub);
        Ok(())
    }

    fn configure_station(&mut self, options: StationOptions) -> Result<(), LinkError> {
        let storage = if options.persistent {
            esp_idf_sys::wifi_storage_t_WIFI_STORAGE_FLASH
        } else {
            esp_idf_sys::wifi_storage_t_WIFI_STORAGE_RAM
        };
        // SAFETY: valid once the driver is initialized, which `new` did.
        esp!(unsafe { esp_idf_sys::esp_wifi_set_storage(storage) })?;

        self.auto_reconnect
            .store(options.auto_reconnect, Ordering::Relaxed);
        self.access_point = None;
        self.apply()?;
        info!(
            "[WiFi] Station mode (auto-reconnect: {}, persistent: {})",
            options.auto_reconnect, options.persistent
        );
        Ok(())
    }

    fn begin(&mut self, creds: &Credentials) -> Result<(), LinkError> {
        info!("[WiFi] Connecting to '{}'", creds.ssid);

        let auth_method = if creds.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        self.client = ClientConfiguration {
            ssid: creds
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| LinkError::InvalidSsid)?,
            password: creds
                .password
                .as_str()
                .try_into()
                .map_err(|_| LinkError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        };
        self.apply()?;

        // A stale association would keep the old network; ignore "not connected".
        if let Err(e) = self.wifi.wifi_mut().disconnect() {
            debug!("[WiFi] Disconnect before connect: {:?}", e);
        }
        self.wifi.wifi_mut().connect()?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn diagnostics(&self) -> Option<LinkDiagnostics> {
        if !self.is_connected() {
            return None;
        }

        let ip: Option<Ipv4Addr> = self
            .wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip);

        let mut record = esp_idf_sys::wifi_ap_record_t::default();
        // SAFETY: `record` is a valid out-parameter for the duration of the call.
        let rssi = esp!(unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut record) })
            .ok()
            .map(|()| record.rssi);

        Some(LinkDiagnostics {
            ssid: self.client.ssid.as_str().to_string(),
            ip,
            rssi,
        })
    }

    fn start_access_point(&mut self, ssid: &str) -> Result<(), LinkError> {
        self.access_point = Some(AccessPointConfiguration {
            ssid: ssid.try_into().map_err(|_| LinkError::InvalidSsid)?,
            auth_method: AuthMethod::None,
            channel: AP_CHANNEL,
            ..Default::default()
        });
        if let Err(e) = self.apply() {
            self.access_point = None;
            return Err(e);
        }
        info!("[WiFi] Access point '{}' up", ssid);
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), LinkError> {
        if self.access_point.take().is_none() {
            return Ok(());
        }
        self.apply()?;
        info!("[WiFi] Access point down");
        Ok(())
    }
}

impl Drop for EspWifiLink {
    fn drop(&mut self) {
        if let Err(e) = self.wifi.stop() {
            warn!("[WiFi] Failed to stop driver: {:?}", e);
        }
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::testing::Skip;
    use crate::wifi::{log_link_event, NvsCredentialStore};
    use crate::wifi::{wait_for_connection, CredentialStore, EspSystem};
    use esp_idf_hal::peripherals::Peripherals;
    use std::time::Duration;
    use terelina_esp32_macros::tap_test;

    /// Joins the network stored by `configure-wifi`, then opens and closes
    /// the portal access point while the station stays up.
    #[tap_test]
    fn station_and_access_point() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(creds) = NvsCredentialStore::open()?.load() else {
            return Err(Skip("no stored credentials, run configure-wifi first").into());
        };

        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs = crate::get_nvs_default_partition()?;
        let mut link = EspWifiLink::new(peripherals.modem, sysloop, Some(nvs))?;

        link.subscribe(log_link_event)?;
        link.configure_station(StationOptions::default())?;
        link.begin(&creds)?;
        let system = EspSystem;
        assert!(wait_for_connection(
            &link,
            &system,
            Duration::from_secs(30),
            Duration::from_millis(500)
        ));

        let diag = link.diagnostics().ok_or("connected without diagnostics")?;
        assert_eq!(diag.ssid, creds.ssid);
        assert!(diag.ip.is_some());

        link.start_access_point("Terelina-TAP0")?;
        link.stop_access_point()?;
        Ok(())
    }
}
