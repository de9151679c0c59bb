//! Static device configuration record.
//!
//! Broker address, topics, sensor wiring and timing for the barrier node.
//! The record is immutable at runtime; the sensor and messaging components
//! read it, the connectivity layer only logs it at boot.

use log::info;
use std::time::Duration;

/// MQTT broker and topic settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttConfig {
    /// IP or hostname of the broker, as reachable from the device's network.
    pub broker_host: &'static str,
    /// Broker TCP port.
    pub broker_port: u16,
    /// Username, empty when the broker allows anonymous clients.
    pub username: &'static str,
    /// Password, empty when the broker allows anonymous clients.
    pub password: &'static str,
    /// Topic carrying barrier state changes. Must match the backend subscription.
    pub state_topic: &'static str,
    /// Topic carrying periodic liveness messages.
    pub heartbeat_topic: &'static str,
    /// Unique client identifier of this device.
    pub client_id: &'static str,
}

/// Electrical wiring of the barrier sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorConfig {
    /// GPIO connected to the sensor output.
    pub pin: u8,
    /// Enable the internal pull-up (switch or contact closing to GND).
    pub use_pullup: bool,
    /// The sensor drives the line LOW when the beam is broken.
    pub active_low: bool,
}

/// Heartbeat and sampling intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Interval between heartbeat publications.
    pub heartbeat_interval: Duration,
    /// Time a new sensor level must be stable before it is accepted.
    pub debounce: Duration,
}

/// Complete device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Default station SSID. Normally empty so the portal is used instead.
    pub wifi_ssid: &'static str,
    /// Default station password.
    pub wifi_password: &'static str,
    pub mqtt: MqttConfig,
    pub sensor: SensorConfig,
    pub timing: TimingConfig,
}

impl DeviceConfig {
    /// Log the non-secret parts of the configuration.
    pub fn log_summary(&self) {
        info!("Device: {}", self.mqtt.client_id);
        info!(
            "Broker: {}:{} (auth: {})",
            self.mqtt.broker_host,
            self.mqtt.broker_port,
            if self.mqtt.username.is_empty() {
                "none"
            } else {
                "user/password"
            }
        );
        info!(
            "Topics: state={} heartbeat={}",
            self.mqtt.state_topic, self.mqtt.heartbeat_topic
        );
        info!(
            "Sensor: GPIO{} pullup={} active_low={} debounce={}ms",
            self.sensor.pin,
            self.sensor.use_pullup,
            self.sensor.active_low,
            self.timing.debounce.as_millis()
        );
        info!(
            "Heartbeat every {}s",
            self.timing.heartbeat_interval.as_secs()
        );
    }
}

/// The configuration compiled into this firmware image.
pub const DEVICE_CONFIG: DeviceConfig = DeviceConfig {
    wifi_ssid: "",
    wifi_password: "",
    mqtt: MqttConfig {
        // Must be an address the ESP32 can reach; Docker service names
        // only resolve inside the Docker network.
        broker_host: "192.168.100.73",
        broker_port: 1883,
        username: "",
        password: "",
        state_topic: "sensors/barrier/state",
        heartbeat_topic: "sensors/barrier/heartbeat",
        client_id: "ESP32_Barrier_001",
    },
    sensor: SensorConfig {
        pin: 27,
        use_pullup: true,
        active_low: true,
    },
    timing: TimingConfig {
        heartbeat_interval: Duration::from_secs(60),
        debounce: Duration::from_millis(50),
    },
};
