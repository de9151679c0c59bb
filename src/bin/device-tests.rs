//! On-device test runner.
//!
//! Runs every `#[tap_test]` (radio, NVS, efuse and the host-safe checks)
//! and reports in TAP format over the serial console. Run `configure-wifi`
//! first so the radio test has a network to join; without one it is
//! reported as `SKIP`.
//!
//! # Usage
//!
//! ```bash
//! # Run on host
//! cargo run --bin device-tests --no-default-features --features tap-tests
//!
//! # Flash to hardware
//! cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//!
//! # Only the storage tests
//! TERELINA_TAP_FILTER=storage cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//! ```

#[cfg(feature = "esp32")]
use esp_idf_svc::sys as _;

fn main() {
    #[cfg(feature = "esp32")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }

    let success = terelina_esp32::testing::run_all_tests();

    #[cfg(feature = "esp32")]
    {
        log::info!(
            "Tests complete ({}). Halting.",
            if success { "PASS" } else { "FAIL" }
        );
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    #[cfg(not(feature = "esp32"))]
    std::process::exit(if success { 0 } else { 1 });
}
