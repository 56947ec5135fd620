//! Wi-Fi credential data structures.
//!
//! Platform-independent types for saved network credentials that can be
//! tested on the host machine.
//!
//! # Example
//!
//! ```
//! use ble_wifi_provisioner::wifi::{NetworkCredential, Security};
//!
//! let cred = NetworkCredential::new("MyNetwork", "MyPassword", Security::Wpa2).unwrap();
//! let restored = NetworkCredential::from_bytes(&cred.to_bytes()).unwrap();
//! assert_eq!(cred, restored);
//! ```

use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length (WPA2 raw PSK as 64 hex characters).
pub const MAX_PASSWORD_LEN: usize = 64;

/// Length of a BSSID (access point MAC address).
pub const BSSID_LEN: usize = 6;

/// Version byte of the storage blob format.
const BLOB_VERSION: u8 = 1;

/// Blob flag: a BSSID follows the flags byte.
const BLOB_FLAG_BSSID: u8 = 0x01;

/// Access point MAC address.
pub type Bssid = [u8; BSSID_LEN];

/// Wi-Fi security variant.
///
/// The numeric values are the ones carried on the wire and in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Security {
    #[default]
    Open,
    Wep,
    Wpa,
    Wpa2,
}

impl Security {
    /// Wire/storage code for this variant.
    pub fn code(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Wep => 1,
            Self::Wpa => 2,
            Self::Wpa2 => 3,
        }
    }

    /// Parse a wire/storage code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Open),
            1 => Some(Self::Wep),
            2 => Some(Self::Wpa),
            3 => Some(Self::Wpa2),
            _ => None,
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Wep => "wep",
            Self::Wpa => "wpa",
            Self::Wpa2 => "wpa2",
        };
        f.write_str(s)
    }
}

/// Credentials for one saved Wi-Fi network.
///
/// The password is write-only from the client's point of view: it is
/// accepted in requests and persisted, but never serialized into responses.
/// It is zeroed when the credential is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkCredential {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Optional access point to pin the connection to.
    pub bssid: Option<Bssid>,
    /// Network password (empty for open networks).
    pub password: String,
    /// Security variant.
    pub security: Security,
}

impl NetworkCredential {
    /// Create a new credential.
    ///
    /// Returns an error if SSID or password are invalid.
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
        security: Security,
    ) -> Result<Self, CredentialError> {
        let cred = Self {
            ssid: ssid.into(),
            bssid: None,
            password: password.into(),
            security,
        };
        cred.validate()?;
        Ok(cred)
    }

    /// Create a credential for an open network (no password).
    pub fn open(ssid: impl Into<String>) -> Result<Self, CredentialError> {
        Self::new(ssid, String::new(), Security::Open)
    }

    /// Pin this credential to a specific access point.
    pub fn with_bssid(mut self, bssid: Bssid) -> Self {
        self.bssid = Some(bssid);
        self
    }

    /// Validate field limits.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.ssid.is_empty() {
            return Err(CredentialError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(CredentialError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(CredentialError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }
        Ok(())
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    /// Serialize to a storage blob.
    ///
    /// Format:
    /// `[version:1][security:1][flags:1][bssid:6 if flagged][ssid_len:1][ssid:N][pw_len:1][pw:M]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            5 + BSSID_LEN + self.ssid.len() + self.password.len(),
        );
        bytes.push(BLOB_VERSION);
        bytes.push(self.security.code());
        match &self.bssid {
            Some(bssid) => {
                bytes.push(BLOB_FLAG_BSSID);
                bytes.extend_from_slice(bssid);
            }
            None => bytes.push(0),
        }
        bytes.push(self.ssid.len() as u8);
        bytes.extend_from_slice(self.ssid.as_bytes());
        bytes.push(self.password.len() as u8);
        bytes.extend_from_slice(self.password.as_bytes());
        bytes
    }

    /// Deserialize from a storage blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CredentialError> {
        let mut reader = BlobReader { bytes, pos: 0 };

        let version = reader.byte("version")?;
        if version != BLOB_VERSION {
            return Err(CredentialError::InvalidFormat(format!(
                "unsupported blob version {}",
                version
            )));
        }

        let security_code = reader.byte("security")?;
        let security = Security::from_code(security_code as i64).ok_or_else(|| {
            CredentialError::InvalidFormat(format!("unknown security {}", security_code))
        })?;

        let flags = reader.byte("flags")?;
        let bssid = if flags & BLOB_FLAG_BSSID != 0 {
            let raw = reader.take(BSSID_LEN, "bssid")?;
            let mut bssid = [0u8; BSSID_LEN];
            bssid.copy_from_slice(raw);
            Some(bssid)
        } else {
            None
        };

        let ssid_len = reader.byte("ssid length")? as usize;
        let ssid = String::from_utf8(reader.take(ssid_len, "ssid")?.to_vec())
            .map_err(|_| CredentialError::InvalidFormat("invalid SSID UTF-8".into()))?;

        let password_len = reader.byte("password length")? as usize;
        let password = String::from_utf8(reader.take(password_len, "password")?.to_vec())
            .map_err(|_| CredentialError::InvalidFormat("invalid password UTF-8".into()))?;

        let cred = Self {
            ssid,
            bssid,
            password,
            security,
        };
        cred.validate()?;
        Ok(cred)
    }
}

impl fmt::Debug for NetworkCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredential")
            .field("ssid", &self.ssid)
            .field("bssid", &self.bssid.as_ref().map(format_bssid))
            .field("password", &"<redacted>")
            .field("security", &self.security)
            .finish()
    }
}

impl Drop for NetworkCredential {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Format a BSSID as `AA:BB:CC:DD:EE:FF`.
pub fn format_bssid(bssid: &Bssid) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        bssid[0], bssid[1], bssid[2], bssid[3], bssid[4], bssid[5]
    )
}

/// Cursor over a storage blob.
struct BlobReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    fn byte(&mut self, what: &str) -> Result<u8, CredentialError> {
        Ok(self.take(1, what)?[0])
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], CredentialError> {
        let end = self.pos + len;
        if end > self.bytes.len() {
            return Err(CredentialError::InvalidFormat(format!("truncated {}", what)));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// Errors that can occur validating or decoding a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// SSID is empty.
    #[error("SSID cannot be empty")]
    SsidEmpty,
    /// SSID exceeds maximum length.
    #[error("SSID too long: {len} bytes (max {max})")]
    SsidTooLong { len: usize, max: usize },
    /// Password exceeds maximum length.
    #[error("password too long: {len} bytes (max {max})")]
    PasswordTooLong { len: usize, max: usize },
    /// Invalid data format during deserialization.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}
