/// Build-time inputs baked into the firmware via `option_env!`.
const BAKED_ENV: [&str; 6] = [
    "TERELINA_FALLBACK_WIFI_SSID",
    "TERELINA_FALLBACK_WIFI_PASSWORD",
    "WIFI_SSID",
    "WIFI_PASSWORD",
    "WIFI_CLEAR",
    "TERELINA_TAP_FILTER",
];

fn main() {
    for var in BAKED_ENV {
        println!("cargo:rerun-if-env-changed={}", var);
    }
    println!("cargo:rerun-if-changed=build.rs");

    // ESP-IDF build system only when targeting ESP32 (Xtensa); build scripts
    // run on the host, so check TARGET rather than cfg
    if std::env::var("TARGET").is_ok_and(|target| target.contains("xtensa")) {
        embuild::espidf::sysenv::output();
    }
}
