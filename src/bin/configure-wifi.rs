//! WiFi provisioning utility for ESP32.
//!
//! Stores credentials to NVS as the node's last-known network, so the next
//! boot of the barrier firmware connects without opening the portal.
//!
//! Usage:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo espflash flash --bin configure-wifi --features esp32 --release --monitor
//!
//! For open networks (no password):
//!   WIFI_SSID="OpenNetwork" WIFI_PASSWORD="" cargo espflash flash --bin configure-wifi --features esp32 --release --monitor
//!
//! Set `WIFI_CLEAR=1` instead to forget the stored network and force the
//! portal on next boot.

/// WiFi SSID - set via WIFI_SSID environment variable at compile time.
#[cfg(feature = "esp32")]
const WIFI_SSID: Option<&str> = option_env!("WIFI_SSID");

/// WiFi password - set via WIFI_PASSWORD environment variable at compile time.
/// Empty string for open networks.
#[cfg(feature = "esp32")]
const WIFI_PASSWORD: Option<&str> = option_env!("WIFI_PASSWORD");

/// Any non-empty value clears the stored credentials.
#[cfg(feature = "esp32")]
const WIFI_CLEAR: Option<&str> = option_env!("WIFI_CLEAR");

/// Print error message and halt. On ESP32, we pause briefly then return
/// so the process terminates cleanly (espflash monitor will show the output).
#[cfg(feature = "esp32")]
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    // Brief pause to ensure serial output is flushed before process exits
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

#[cfg(feature = "esp32")]
fn main() {
    use terelina_esp32::config::{ConfigError, Credentials};
    use terelina_esp32::wifi::{CredentialStore, NvsCredentialStore};

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    println!("\n=== Terelina WiFi Provisioning ===\n");

    let mut store = match NvsCredentialStore::open() {
        Ok(store) => store,
        Err(e) => halt_with_error(&format!("Error initializing NVS: {}", e)),
    };

    if WIFI_CLEAR.is_some_and(|v| !v.is_empty()) {
        match store.clear() {
            Ok(()) => println!("Stored credentials cleared; the portal opens on next boot."),
            Err(e) => halt_with_error(&format!("Error clearing NVS: {}", e)),
        }
        std::thread::sleep(std::time::Duration::from_secs(2));
        return;
    }

    // Check for compile-time credentials
    let ssid = match WIFI_SSID {
        Some(s) if !s.is_empty() => s,
        _ => {
            halt_with_error(
                "Error: WIFI_SSID environment variable not set at compile time.\n\n\
                 Usage:\n  \
                 WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo espflash flash --bin configure-wifi --features esp32 --release --monitor\n\n\
                 For open networks:\n  \
                 WIFI_SSID=\"OpenNetwork\" WIFI_PASSWORD=\"\" cargo espflash flash --bin configure-wifi --features esp32 --release --monitor",
            );
        }
    };

    let password = WIFI_PASSWORD.unwrap_or("");

    println!("SSID: {}", ssid);
    println!(
        "Password: {} ({} chars)",
        if password.is_empty() {
            "(none)"
        } else {
            "****"
        },
        password.len()
    );

    if let Some(previous) = store.load() {
        println!("Replacing stored network '{}'", previous.ssid);
    }

    let creds = match Credentials::new(ssid, password) {
        Ok(creds) => creds,
        Err(e @ ConfigError::PasswordTooShort { .. }) => {
            halt_with_error(&format!("Error: {} (WPA2 needs at least 8)", e));
        }
        Err(e) => {
            halt_with_error(&format!("Error: {}", e));
        }
    };

    match store.save(&creds) {
        Ok(()) => {
            println!("\n=== WiFi credentials saved to NVS ===");
            println!("\nThe barrier firmware will join this network on next boot.");
            println!("Credentials persist across reboots.");
        }
        Err(e) => {
            halt_with_error(&format!("Error saving to NVS: {}", e));
        }
    }

    println!("\n=== Done - you can disconnect the device ===\n");

    // Brief pause to ensure serial output is visible, then exit cleanly
    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    eprintln!("This binary must be built for ESP32.");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo espflash flash --bin configure-wifi --features esp32 --release --monitor");
    eprintln!();
    eprintln!("On the host, credentials live in ~/.terelina/wifi.bin and are");
    eprintln!("written by the portal of `cargo run --bin barrier`.");
    std::process::exit(1);
}
