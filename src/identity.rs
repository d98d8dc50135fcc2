//! Client identity derived from a hardware identifier
//!
//! The client id is the lowercase hex encoding of at most
//! [`DEVICE_ID_MAX_SIZE`] bytes of device id, so it is stable across
//! restarts and unique per device.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest device id used for the client id, in bytes
pub const DEVICE_ID_MAX_SIZE: usize = 8;

/// Default location of the Linux machine id
pub const DEFAULT_MACHINE_ID_PATH: &str = "/etc/machine-id";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Failed to read device id from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Device id is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("Device id is empty")]
    Empty,
}

/// Supplier of the raw hardware identifier
pub trait IdentitySource: Send + Sync {
    fn device_id(&self) -> Result<Vec<u8>, IdentityError>;
}

/// Reads the hex machine id maintained by systemd
#[derive(Debug, Clone)]
pub struct MachineIdSource {
    path: PathBuf,
}

impl MachineIdSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for MachineIdSource {
    fn default() -> Self {
        Self::new(DEFAULT_MACHINE_ID_PATH)
    }
}

impl IdentitySource for MachineIdSource {
    fn device_id(&self) -> Result<Vec<u8>, IdentityError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| IdentityError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(hex::decode(content.trim())?)
    }
}

/// A device id fixed at construction (configuration or tests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedIdSource(Vec<u8>);

impl FixedIdSource {
    pub fn new<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        Ok(Self(hex::decode(s.trim())?))
    }
}

impl IdentitySource for FixedIdSource {
    fn device_id(&self) -> Result<Vec<u8>, IdentityError> {
        Ok(self.0.clone())
    }
}

/// Stable MQTT client identifier of this device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    client_id: String,
}

impl ClientIdentity {
    pub fn from_source(source: &dyn IdentitySource) -> Result<Self, IdentityError> {
        Self::from_device_id(&source.device_id()?)
    }

    pub fn from_device_id(device_id: &[u8]) -> Result<Self, IdentityError> {
        if device_id.is_empty() {
            return Err(IdentityError::Empty);
        }

        let len = device_id.len().min(DEVICE_ID_MAX_SIZE);
        Ok(Self {
            client_id: hex::encode(&device_id[..len]),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.client_id)
    }
}
