//! Provisioning message codec.
//!
//! Every message is one compact JSON object with single-character keys:
//!
//! | key | field |
//! |-----|-------|
//! | `w` | message type (request codes 1/3/5/7, response = request + 1) |
//! | `h` | max networks |
//! | `t` | scan timeout in ms |
//! | `q` | security (0 open, 1 WEP, 2 WPA, 3 WPA2) |
//! | `r` | SSID |
//! | `b` | BSSID as an array of 6 bytes |
//! | `p` | RSSI |
//! | `m` | password (requests only) |
//! | `s` | status |
//! | `f` | hidden |
//! | `e` | connected |
//! | `g` | saved index (`-1` = none, or ALL for a delete) |
//! | `j` | new index |
//! | `y` | connect after save (defaults to `true`) |
//!
//! # Example
//!
//! ```
//! use ble_wifi_provisioner::protocol::{decode_request, ProvisioningRequest};
//!
//! let req = decode_request(br#"{"w":5,"g":2,"j":0}"#).unwrap();
//! assert_eq!(req, ProvisioningRequest::EditNetwork { cur: 2, new: 0 });
//! ```

use crate::catalog::{DeleteTarget, MAX_SAVED_NETWORKS};
use crate::wifi::{Bssid, CredentialError, DriverError, NetworkCredential, Security, BSSID_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// RSSI reported for saved entries, which carry no live signal reading.
pub const SAVED_NETWORK_RSSI: i8 = -100;

/// Wire value of `g` meaning "no index" (or ALL in a delete).
const NO_INDEX: i64 = -1;

/// The four request types, one per GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    ListNetworks,
    SaveNetwork,
    EditNetwork,
    DeleteNetwork,
}

impl RequestKind {
    pub const ALL: [RequestKind; 4] = [
        Self::ListNetworks,
        Self::SaveNetwork,
        Self::EditNetwork,
        Self::DeleteNetwork,
    ];

    /// Message type code of the request.
    pub fn request_code(self) -> u8 {
        match self {
            Self::ListNetworks => 1,
            Self::SaveNetwork => 3,
            Self::EditNetwork => 5,
            Self::DeleteNetwork => 7,
        }
    }

    /// Message type code of responses to this request.
    pub fn response_code(self) -> u8 {
        self.request_code() + 1
    }

    fn from_request_code(code: i64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| i64::from(kind.request_code()) == code)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ListNetworks => "ListNetworks",
            Self::SaveNetwork => "SaveNetwork",
            Self::EditNetwork => "EditNetwork",
            Self::DeleteNetwork => "DeleteNetwork",
        };
        f.write_str(s)
    }
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningRequest {
    /// List saved networks followed by scan results.
    ///
    /// `max_networks == 0` means "use the configured limit"; the session
    /// clamps larger values to that limit. A zero `timeout` likewise means
    /// the configured maximum scan timeout.
    ListNetworks { max_networks: usize, timeout: Duration },
    /// Save (and by default connect to) a network.
    SaveNetwork {
        credential: NetworkCredential,
        saved_index: Option<usize>,
        connect: bool,
    },
    /// Move the network at `cur` to priority `new`.
    EditNetwork { cur: usize, new: usize },
    /// Delete one saved network or all of them.
    DeleteNetwork { target: DeleteTarget },
}

impl ProvisioningRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::ListNetworks { .. } => RequestKind::ListNetworks,
            Self::SaveNetwork { .. } => RequestKind::SaveNetwork,
            Self::EditNetwork { .. } => RequestKind::EditNetwork,
            Self::DeleteNetwork { .. } => RequestKind::DeleteNetwork,
        }
    }
}

/// Result status carried in every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Failure,
    Timeout,
    NotSupported,
    /// Another request or a connect attempt holds the service.
    Busy,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Timeout => 2,
            Self::NotSupported => 3,
            Self::Busy => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Failure),
            2 => Some(Self::Timeout),
            3 => Some(Self::NotSupported),
            4 => Some(Self::Busy),
            _ => None,
        }
    }
}

impl From<&DriverError> for Status {
    fn from(e: &DriverError) -> Self {
        match e {
            DriverError::Failure(_) => Self::Failure,
            DriverError::Timeout => Self::Timeout,
            DriverError::NotSupported => Self::NotSupported,
        }
    }
}

/// One network in a ListNetworks response stream. Never carries a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: Status,
    pub ssid: String,
    pub bssid: Option<Bssid>,
    pub security: Security,
    pub rssi: i8,
    pub hidden: bool,
    pub connected: bool,
    /// Priority index for saved entries, `None` for scan results.
    pub saved_index: Option<usize>,
}

/// A response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningResponse {
    Network(NetworkInfo),
    Status(Status),
}

/// Errors from decoding a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message is not a map")]
    NotAMap,
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("unknown request type {0}")]
    UnknownType(i64),
    #[error("request type {got} written to the {expected} characteristic")]
    WrongCharacteristic {
        expected: RequestKind,
        got: RequestKind,
    },
    #[error("unknown security code {0}")]
    UnknownSecurity(i64),
    #[error("bssid must be {BSSID_LEN} bytes, got {0}")]
    InvalidBssid(usize),
    #[error("index {0} out of range")]
    InvalidIndex(i64),
    #[error("negative scan timeout {0}")]
    NegativeTimeout(i64),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// The union of all message fields as they appear on the wire.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "w", skip_serializing_if = "Option::is_none")]
    msg_type: Option<i64>,
    #[serde(rename = "h", skip_serializing_if = "Option::is_none")]
    max_networks: Option<i64>,
    #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<i64>,
    #[serde(rename = "q", skip_serializing_if = "Option::is_none")]
    security: Option<i64>,
    #[serde(rename = "r", skip_serializing_if = "Option::is_none")]
    ssid: Option<String>,
    #[serde(rename = "b", skip_serializing_if = "Option::is_none")]
    bssid: Option<Vec<u8>>,
    #[serde(rename = "p", skip_serializing_if = "Option::is_none")]
    rssi: Option<i64>,
    #[serde(rename = "m", skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    status: Option<u8>,
    #[serde(rename = "f", skip_serializing_if = "Option::is_none")]
    hidden: Option<bool>,
    #[serde(rename = "e", skip_serializing_if = "Option::is_none")]
    connected: Option<bool>,
    #[serde(rename = "g", skip_serializing_if = "Option::is_none")]
    index: Option<i64>,
    #[serde(rename = "j", skip_serializing_if = "Option::is_none")]
    new_index: Option<i64>,
    #[serde(rename = "y", skip_serializing_if = "Option::is_none")]
    connect: Option<bool>,
}

fn required<T>(value: Option<T>, key: &'static str) -> Result<T, ParseError> {
    value.ok_or(ParseError::MissingField(key))
}

fn saved_index(value: i64) -> Result<usize, ParseError> {
    usize::try_from(value)
        .ok()
        .filter(|idx| *idx < MAX_SAVED_NETWORKS)
        .ok_or(ParseError::InvalidIndex(value))
}

fn security(code: i64) -> Result<Security, ParseError> {
    Security::from_code(code).ok_or(ParseError::UnknownSecurity(code))
}

fn bssid(raw: Vec<u8>) -> Result<Bssid, ParseError> {
    let len = raw.len();
    <Bssid>::try_from(raw).map_err(|_| ParseError::InvalidBssid(len))
}

/// Decode one request message.
pub fn decode_request(bytes: &[u8]) -> Result<ProvisioningRequest, ParseError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    if !value.is_object() {
        return Err(ParseError::NotAMap);
    }
    let mut msg: WireMessage = serde_json::from_value(value)?;

    let code = required(msg.msg_type, "w")?;
    let kind = RequestKind::from_request_code(code).ok_or(ParseError::UnknownType(code))?;

    match kind {
        RequestKind::ListNetworks => {
            let max_networks = msg.max_networks.unwrap_or(0).max(0);
            let timeout_ms = msg.timeout_ms.unwrap_or(0);
            if timeout_ms < 0 {
                return Err(ParseError::NegativeTimeout(timeout_ms));
            }
            Ok(ProvisioningRequest::ListNetworks {
                max_networks: usize::try_from(max_networks).unwrap_or(usize::MAX),
                timeout: Duration::from_millis(timeout_ms.unsigned_abs()),
            })
        }
        RequestKind::SaveNetwork => {
            let ssid = required(msg.ssid.take(), "r")?;
            let security = security(required(msg.security, "q")?)?;
            let password = msg.password.take().unwrap_or_default();
            let mut credential = NetworkCredential::new(ssid, password, security)?;
            if let Some(raw) = msg.bssid.take() {
                credential = credential.with_bssid(bssid(raw)?);
            }
            let saved_index = match msg.index {
                None | Some(NO_INDEX) => None,
                Some(idx) => Some(saved_index(idx)?),
            };
            Ok(ProvisioningRequest::SaveNetwork {
                credential,
                saved_index,
                connect: msg.connect.unwrap_or(true),
            })
        }
        RequestKind::EditNetwork => Ok(ProvisioningRequest::EditNetwork {
            cur: saved_index(required(msg.index, "g")?)?,
            new: saved_index(required(msg.new_index, "j")?)?,
        }),
        RequestKind::DeleteNetwork => {
            let target = match required(msg.index, "g")? {
                NO_INDEX => DeleteTarget::All,
                idx => DeleteTarget::Index(saved_index(idx)?),
            };
            Ok(ProvisioningRequest::DeleteNetwork { target })
        }
    }
}

/// Decode a request written to the characteristic for `expected`.
pub fn decode_request_for(
    expected: RequestKind,
    bytes: &[u8],
) -> Result<ProvisioningRequest, ParseError> {
    let request = decode_request(bytes)?;
    let got = request.kind();
    if got != expected {
        return Err(ParseError::WrongCharacteristic { expected, got });
    }
    Ok(request)
}

fn to_vec(msg: &WireMessage) -> Vec<u8> {
    // Every field is a plain integer, bool, string or byte list
    serde_json::to_vec(msg).unwrap_or_default()
}

/// Encode a response to a `kind` request.
pub fn encode_response(kind: RequestKind, response: &ProvisioningResponse) -> Vec<u8> {
    let mut msg = WireMessage {
        msg_type: Some(i64::from(kind.response_code())),
        ..WireMessage::default()
    };
    match response {
        ProvisioningResponse::Status(status) => {
            msg.status = Some(status.code());
        }
        ProvisioningResponse::Network(info) => {
            msg.status = Some(info.status.code());
            msg.ssid = Some(info.ssid.clone());
            msg.bssid = info.bssid.map(|b| b.to_vec());
            msg.security = Some(i64::from(info.security.code()));
            msg.rssi = Some(i64::from(info.rssi));
            msg.hidden = Some(info.hidden);
            msg.connected = Some(info.connected);
            msg.index = Some(info.saved_index.map_or(NO_INDEX, |idx| idx as i64));
        }
    }
    to_vec(&msg)
}

/// Encode a request, as a client would send it.
pub fn encode_request(request: &ProvisioningRequest) -> Vec<u8> {
    let mut msg = WireMessage {
        msg_type: Some(i64::from(request.kind().request_code())),
        ..WireMessage::default()
    };
    match request {
        ProvisioningRequest::ListNetworks {
            max_networks,
            timeout,
        } => {
            msg.max_networks = Some(i64::try_from(*max_networks).unwrap_or(i64::MAX));
            msg.timeout_ms = Some(i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX));
        }
        ProvisioningRequest::SaveNetwork {
            credential,
            saved_index,
            connect,
        } => {
            msg.ssid = Some(credential.ssid.clone());
            msg.bssid = credential.bssid.map(|b| b.to_vec());
            msg.password = Some(credential.password.clone());
            msg.security = Some(i64::from(credential.security.code()));
            msg.index = saved_index.map(|idx| idx as i64);
            msg.connect = Some(*connect);
        }
        ProvisioningRequest::EditNetwork { cur, new } => {
            msg.index = Some(*cur as i64);
            msg.new_index = Some(*new as i64);
        }
        ProvisioningRequest::DeleteNetwork { target } => {
            msg.index = Some(match target {
                DeleteTarget::All => NO_INDEX,
                DeleteTarget::Index(idx) => *idx as i64,
            });
        }
    }
    to_vec(&msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn parse(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    // ==================== Decode Tests ====================

    #[test]
    fn test_decode_list() {
        let req = decode_request(br#"{"w":1,"h":5,"t":3000}"#).unwrap();
        assert_eq!(
            req,
            ProvisioningRequest::ListNetworks {
                max_networks: 5,
                timeout: Duration::from_millis(3000),
            }
        );
    }

    #[test]
    fn test_decode_list_non_positive_max() {
        let req = decode_request(br#"{"w":1,"h":-3}"#).unwrap();
        assert_eq!(
            req,
            ProvisioningRequest::ListNetworks {
                max_networks: 0,
                timeout: Duration::ZERO,
            }
        );
        assert_eq!(
            decode_request(br#"{"w":1,"t":-1}"#),
            Err(ParseError::NegativeTimeout(-1))
        );
    }

    #[test]
    fn test_decode_save_defaults_connect() {
        let req = decode_request(br#"{"w":3,"r":"HomeNet","m":"secret1","q":3}"#).unwrap();
        match req {
            ProvisioningRequest::SaveNetwork {
                credential,
                saved_index,
                connect,
            } => {
                assert_eq!(credential.ssid, "HomeNet");
                assert_eq!(credential.password, "secret1");
                assert_eq!(credential.security, Security::Wpa2);
                assert_eq!(credential.bssid, None);
                assert_eq!(saved_index, None);
                assert!(connect);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_decode_save_full() {
        let req = decode_request(
            br#"{"w":3,"r":"Net","m":"pw","q":2,"b":[1,2,3,4,5,6],"g":4,"y":false}"#,
        )
        .unwrap();
        let ProvisioningRequest::SaveNetwork {
            credential,
            saved_index,
            connect,
        } = req
        else {
            panic!("expected SaveNetwork");
        };
        assert_eq!(credential.bssid, Some([1, 2, 3, 4, 5, 6]));
        assert_eq!(credential.security, Security::Wpa);
        assert_eq!(saved_index, Some(4));
        assert!(!connect);
    }

    #[test]
    fn test_decode_save_invalid_fields() {
        assert_eq!(
            decode_request(br#"{"w":3,"m":"pw","q":3}"#),
            Err(ParseError::MissingField("r"))
        );
        assert_eq!(
            decode_request(br#"{"w":3,"r":"","q":0}"#),
            Err(ParseError::Credential(CredentialError::SsidEmpty))
        );
        let long_ssid = format!(r#"{{"w":3,"r":"{}","q":0}}"#, "x".repeat(33));
        assert!(matches!(
            decode_request(long_ssid.as_bytes()),
            Err(ParseError::Credential(CredentialError::SsidTooLong { .. }))
        ));
        let long_pw = format!(r#"{{"w":3,"r":"a","m":"{}","q":3}}"#, "p".repeat(65));
        assert!(matches!(
            decode_request(long_pw.as_bytes()),
            Err(ParseError::Credential(CredentialError::PasswordTooLong { .. }))
        ));
        assert_eq!(
            decode_request(br#"{"w":3,"r":"a","q":9}"#),
            Err(ParseError::UnknownSecurity(9))
        );
        assert_eq!(
            decode_request(br#"{"w":3,"r":"a","q":0,"b":[1,2,3]}"#),
            Err(ParseError::InvalidBssid(3))
        );
        assert_eq!(
            decode_request(br#"{"w":3,"r":"a","q":0,"g":8}"#),
            Err(ParseError::InvalidIndex(8))
        );
    }

    #[test]
    fn test_decode_edit_and_delete() {
        assert_eq!(
            decode_request(br#"{"w":5,"g":0,"j":7}"#).unwrap(),
            ProvisioningRequest::EditNetwork { cur: 0, new: 7 }
        );
        assert_eq!(
            decode_request(br#"{"w":5,"g":0}"#),
            Err(ParseError::MissingField("j"))
        );
        assert_eq!(
            decode_request(br#"{"w":5,"g":-1,"j":0}"#),
            Err(ParseError::InvalidIndex(-1))
        );
        assert_eq!(
            decode_request(br#"{"w":7,"g":-1}"#).unwrap(),
            ProvisioningRequest::DeleteNetwork {
                target: DeleteTarget::All
            }
        );
        assert_eq!(
            decode_request(br#"{"w":7,"g":2}"#).unwrap(),
            ProvisioningRequest::DeleteNetwork {
                target: DeleteTarget::Index(2)
            }
        );
        assert_eq!(
            decode_request(br#"{"w":7,"g":-2}"#),
            Err(ParseError::InvalidIndex(-2))
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_request(b"\xff\xfe"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            decode_request(b"{\"w\":1"),
            Err(ParseError::Malformed(_))
        ));
        assert_eq!(decode_request(b"[1,5,0]"), Err(ParseError::NotAMap));
        assert_eq!(decode_request(b"{}"), Err(ParseError::MissingField("w")));
        assert_eq!(
            decode_request(br#"{"w":2}"#),
            Err(ParseError::UnknownType(2))
        );
        assert!(matches!(
            decode_request(br#"{"w":"1"}"#),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            decode_request(br#"{"w":3,"r":"a","q":0,"b":[1,2,3,4,5,300]}"#),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_for_characteristic() {
        assert!(decode_request_for(RequestKind::EditNetwork, br#"{"w":5,"g":0,"j":1}"#).is_ok());
        assert_eq!(
            decode_request_for(RequestKind::ListNetworks, br#"{"w":7,"g":1}"#),
            Err(ParseError::WrongCharacteristic {
                expected: RequestKind::ListNetworks,
                got: RequestKind::DeleteNetwork,
            })
        );
    }

    // ==================== Encode Tests ====================

    #[test]
    fn test_encode_status_response() {
        let bytes = encode_response(
            RequestKind::SaveNetwork,
            &ProvisioningResponse::Status(Status::Success),
        );
        assert_eq!(parse(&bytes), json!({"w": 4, "s": 0}));

        let bytes = encode_response(
            RequestKind::DeleteNetwork,
            &ProvisioningResponse::Status(Status::Busy),
        );
        assert_eq!(parse(&bytes), json!({"w": 8, "s": 4}));
    }

    #[test]
    fn test_encode_network_info() {
        let info = NetworkInfo {
            status: Status::Success,
            ssid: "CafeGuest".into(),
            bssid: Some([2, 0xAA, 0, 0, 0, 2]),
            security: Security::Open,
            rssi: -61,
            hidden: false,
            connected: false,
            saved_index: None,
        };
        let bytes = encode_response(RequestKind::ListNetworks, &ProvisioningResponse::Network(info));
        assert_eq!(
            parse(&bytes),
            json!({
                "w": 2, "s": 0, "r": "CafeGuest", "b": [2, 170, 0, 0, 0, 2],
                "q": 0, "p": -61, "f": false, "e": false, "g": -1
            })
        );
    }

    #[test]
    fn test_saved_entry_never_encodes_password() {
        let info = NetworkInfo {
            status: Status::Success,
            ssid: "HomeNet".into(),
            bssid: None,
            security: Security::Wpa2,
            rssi: SAVED_NETWORK_RSSI,
            hidden: false,
            connected: true,
            saved_index: Some(0),
        };
        let bytes = encode_response(RequestKind::ListNetworks, &ProvisioningResponse::Network(info));
        let value = parse(&bytes);
        assert!(value.get("m").is_none());
        assert!(value.get("b").is_none());
        assert_eq!(value["g"], json!(0));
        assert_eq!(value["e"], json!(true));
        assert_eq!(value["p"], json!(-100));
    }

    #[test]
    fn test_encode_request_decodes_back() {
        let credential = NetworkCredential::new("HomeNet", "secret1", Security::Wpa2)
            .unwrap()
            .with_bssid([9, 8, 7, 6, 5, 4]);
        let requests = vec![
            ProvisioningRequest::ListNetworks {
                max_networks: 5,
                timeout: Duration::from_millis(1500),
            },
            ProvisioningRequest::SaveNetwork {
                credential,
                saved_index: Some(1),
                connect: false,
            },
            ProvisioningRequest::EditNetwork { cur: 3, new: 1 },
            ProvisioningRequest::DeleteNetwork {
                target: DeleteTarget::All,
            },
        ];
        for request in requests {
            assert_eq!(decode_request(&encode_request(&request)).unwrap(), request);
        }
    }

    #[test]
    fn test_status_from_driver_error() {
        assert_eq!(Status::from(&DriverError::Timeout), Status::Timeout);
        assert_eq!(Status::from(&DriverError::NotSupported), Status::NotSupported);
        assert_eq!(
            Status::from(&DriverError::Failure("auth".into())),
            Status::Failure
        );
        assert_eq!(Status::from_code(4), Some(Status::Busy));
        assert_eq!(Status::from_code(5), None);
    }
}
