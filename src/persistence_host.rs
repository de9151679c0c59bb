//! Credential persistence for host (development) builds.
//!
//! Stores the last-known WiFi credentials in a file so they persist across
//! runs, in the same byte format the device keeps in NVS.
//! Uses `~/.terelina/wifi.bin` by default.
//!
//! # Usage
//!
//! ```ignore
//! use terelina_esp32::persistence_host::FileCredentialStore;
//! use terelina_esp32::wifi::CredentialStore;
//!
//! let store = FileCredentialStore::open_default()?;
//! if let Some(creds) = store.load() {
//!     log::info!("Last known network: {}", creds.ssid);
//! }
//! ```

use crate::config::Credentials;
use crate::wifi::{CredentialStore, StoreError};
use log::{debug, error, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default credentials file path.
///
/// Returns `~/.terelina/wifi.bin`
pub fn default_credentials_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".terelina").join("wifi.bin"))
}

/// File-backed [`CredentialStore`].
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`default_credentials_path`].
    pub fn open_default() -> io::Result<Self> {
        Ok(Self::new(default_credentials_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    /// `None` if no file exists or its content is corrupted.
    fn load(&self) -> Option<Credentials> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => zeroize::Zeroizing::new(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("[WiFi] No credentials file at {:?}", self.path);
                return None;
            }
            Err(e) => {
                warn!("[WiFi] Failed to read credentials file: {}", e);
                return None;
            }
        };

        match Credentials::from_bytes(&bytes) {
            Ok(creds) => Some(creds),
            Err(e) => {
                error!("[WiFi] Stored credentials are corrupted: {}", e);
                None
            }
        }
    }

    fn save(&mut self, creds: &Credentials) -> Result<(), StoreError> {
        // Create parent directory if needed
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = creds.to_bytes();
        fs::write(&self.path, bytes.as_slice())?;

        // Verify write by reading back
        let read_back = zeroize::Zeroizing::new(fs::read(&self.path)?);
        if read_back.as_slice() != bytes.as_slice() {
            return Err(StoreError::VerifyFailed);
        }

        info!("[WiFi] Credentials saved to {:?}", self.path);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
