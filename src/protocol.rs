//! # Discovery Wire Protocol
//!
//! Frame types, result-record decoding, and the mapping of channel failures
//! onto [`Error`].
//!
//! ## Exchange
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       TWO-ROUND EXCHANGE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Client                                              Enclave            │
//! │    │                                                    │               │
//! │    │── ClientRequest { token, prev_e164s, new_e164s } ─►│               │
//! │    │◄──────────── ClientResponse { token } ─────────────│               │
//! │    │                                                    │               │
//! │    │── ClientRequest { token_ack: true } ──────────────►│               │
//! │    │◄──── ClientResponse { e164_pni_aci_triples } ──────│  (1..n)       │
//! │    │◄──────────────────── close ────────────────────────│               │
//! │                                                                         │
//! │  Failure closes:                                                        │
//! │    4008  rate limited     body: {"retry_after": <seconds>}              │
//! │    4101  invalid token    body: (none)                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Result Record
//!
//! ```text
//! ┌──────────────┬──────────────────────────┬──────────────────────────┐
//! │  e164 (8 BE) │        PNI (16)          │        ACI (16)          │  40 bytes
//! └──────────────┴──────────────────────────┴──────────────────────────┘
//! ```
//!
//! One record per queried number, in `new_e164s ∥ prev_e164s` order. An
//! all-zero PNI means "not discovered"; an all-zero e164 is padding.

use chrono::{DateTime, Utc};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::connection::ConnectionError;
use crate::e164::{decode_e164, E164, E164_RECORD_LEN};
use crate::error::{Error, Result};

/// Size of one UUID on the wire
pub const UUID_LEN: usize = 16;

/// Size of one `e164 ∥ pni ∥ aci` result record
pub const RESULT_RECORD_LEN: usize = E164_RECORD_LEN + 2 * UUID_LEN;

/// Fallback delay when a rate-limit close carries no usable body
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

// ============================================================================
// FRAMES
// ============================================================================

/// Client-to-enclave frame.
///
/// The first frame carries the token and number sets; the second carries
/// only `token_ack`.
#[derive(Clone, PartialEq, Message)]
pub struct ClientRequest {
    /// Concatenated `ACI (16) ∥ access key (16)` pairs
    #[prost(bytes = "vec", tag = "1")]
    pub aci_uak_pairs: Vec<u8>,
    /// Numbers already synchronized under `token`
    #[prost(bytes = "vec", tag = "2")]
    pub prev_e164s: Vec<u8>,
    /// Numbers the server has not seen under `token`
    #[prost(bytes = "vec", tag = "3")]
    pub new_e164s: Vec<u8>,
    /// Numbers to drop from the server-side set (unused by this client)
    #[prost(bytes = "vec", tag = "4")]
    pub discard_e164s: Vec<u8>,
    /// Resync token from the previous exchange, empty if none
    #[prost(bytes = "vec", tag = "6")]
    pub token: Vec<u8>,
    /// Acknowledges the token from the first response
    #[prost(bool, tag = "7")]
    pub token_ack: bool,
    /// Ask for ACIs even when no matching access key was supplied
    #[prost(bool, tag = "9")]
    pub return_acis_without_uaks: bool,
}

/// Enclave-to-client frame.
#[derive(Clone, PartialEq, Message)]
pub struct ClientResponse {
    /// Concatenated 40-byte result records
    #[prost(bytes = "vec", tag = "1")]
    pub e164_pni_aci_triples: Vec<u8>,
    /// Fresh resync token (first response only)
    #[prost(bytes = "vec", tag = "3")]
    pub token: Vec<u8>,
    /// Quota consumed by this request, for diagnostics
    #[prost(int32, tag = "4")]
    pub debug_permits_used: i32,
}

impl ClientRequest {
    /// The second-round frame acknowledging the token
    pub fn token_ack() -> Self {
        Self {
            token_ack: true,
            ..Default::default()
        }
    }

    /// Protobuf bytes for the transport
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Parse a frame received by a transport
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode(bytes)?)
    }
}

impl ClientResponse {
    /// Protobuf bytes for the transport
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Parse a frame received by a transport
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode(bytes)?)
    }
}

// ============================================================================
// SERVICE IDENTIFIERS
// ============================================================================

/// Account identifier, stable across phone number changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Aci(pub Uuid);

/// Phone-number identity, tied to the number currently registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pni(pub Uuid);

impl Aci {
    /// The 16 raw bytes used in `aci_uak_pairs`
    pub fn service_id_binary(&self) -> [u8; UUID_LEN] {
        *self.0.as_bytes()
    }
}

impl fmt::Display for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Pni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PNI:{}", self.0)
    }
}

/// A number the service reported as registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// The queried number
    pub e164: E164,
    /// Always present for a registered number
    pub pni: Pni,
    /// Present when the server chose to reveal it
    pub aci: Option<Aci>,
}

// ============================================================================
// RESULT DECODING
// ============================================================================

/// Decode a flat buffer of 40-byte records.
///
/// Records whose PNI is all-zero (which covers the all-zero PNI+ACI
/// "not discovered" record) or whose e164 is zero are dropped. A record
/// with a PNI but an unrepresentable e164 is a malformed response.
pub fn decode_results(data: &[u8]) -> Result<Vec<DiscoveryResult>> {
    if data.len() % RESULT_RECORD_LEN != 0 {
        return Err(Error::MalformedResponse(format!(
            "e164/pni/aci triples length {} is not a multiple of {}",
            data.len(),
            RESULT_RECORD_LEN
        )));
    }

    let mut results = Vec::with_capacity(data.len() / RESULT_RECORD_LEN);
    for record in data.chunks_exact(RESULT_RECORD_LEN) {
        if let Some(result) = decode_record(record)? {
            results.push(result);
        }
    }
    Ok(results)
}

fn decode_record(record: &[u8]) -> Result<Option<DiscoveryResult>> {
    let (e164, rest) = record.split_at(E164_RECORD_LEN);
    let (pni, aci) = rest.split_at(UUID_LEN);

    let malformed = || Error::MalformedResponse("malformed e164/pni/aci triple".to_string());
    let e164: [u8; E164_RECORD_LEN] = e164.try_into().map_err(|_| malformed())?;
    let pni = Uuid::from_slice(pni).map_err(|_| malformed())?;
    let aci = Uuid::from_slice(aci).map_err(|_| malformed())?;

    if pni.is_nil() {
        return Ok(None);
    }

    let value = u64::from_be_bytes(e164);
    if value == 0 {
        return Ok(None);
    }
    let e164 = decode_e164(e164)
        .ok_or_else(|| Error::MalformedResponse(format!("malformed e164 value {}", value)))?;

    Ok(Some(DiscoveryResult {
        e164,
        pni: Pni(pni),
        aci: (!aci.is_nil()).then_some(Aci(aci)),
    }))
}

/// Build one result record (used by transports and test servers).
pub fn encode_record(e164: Option<&E164>, pni: Option<&Pni>, aci: Option<&Aci>) -> Vec<u8> {
    let mut out = Vec::with_capacity(RESULT_RECORD_LEN);
    out.extend_from_slice(&e164.map(|e| e.value()).unwrap_or(0).to_be_bytes());
    out.extend_from_slice(pni.map(|p| p.0).unwrap_or_else(Uuid::nil).as_bytes());
    out.extend_from_slice(aci.map(|a| a.0).unwrap_or_else(Uuid::nil).as_bytes());
    out
}

// ============================================================================
// CLOSE CODES & ERROR MAPPING
// ============================================================================

/// Channel close codes with protocol meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Quota exhausted; body carries `retry_after`
    RateLimitExceeded = 4008,
    /// The token sent in the first frame is unknown or stale
    InvalidToken = 4101,
}

impl CloseCode {
    /// Recognize a raw close code
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            4008 => Some(Self::RateLimitExceeded),
            4101 => Some(Self::InvalidToken),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuotaExceededCloseReason {
    retry_after: f64,
}

/// When a rate-limited client may retry, from the close reason body.
pub fn parse_retry_after(
    close_reason: Option<&[u8]>,
    now: DateTime<Utc>,
    default_retry_after: Duration,
) -> DateTime<Utc> {
    match close_reason.map(serde_json::from_slice::<QuotaExceededCloseReason>) {
        Some(Ok(reason)) => crate::time::after_secs_f64(now, reason.retry_after),
        Some(Err(e)) => {
            tracing::debug!("Unparseable rate limit close reason: {}", e);
            crate::time::after(now, default_retry_after)
        }
        None => crate::time::after(now, default_retry_after),
    }
}

/// Map a channel failure onto the discovery error taxonomy.
///
/// Only rate-limit and invalid-token signals are interpreted; everything
/// else passes through as [`Error::Transport`].
pub fn map_connection_error(
    err: ConnectionError,
    now: DateTime<Utc>,
    default_retry_after: Duration,
) -> Error {
    match &err {
        ConnectionError::Closed { code, reason } => match CloseCode::from_u16(*code) {
            Some(CloseCode::RateLimitExceeded) => {
                return Error::RateLimited {
                    retry_after: parse_retry_after(reason.as_deref(), now, default_retry_after),
                }
            }
            Some(CloseCode::InvalidToken) => return Error::InvalidToken,
            None => {}
        },
        // Rate limited before the socket opened, e.g. connecting too often.
        ConnectionError::Http {
            status: 429,
            retry_after,
        } => {
            return Error::RateLimited {
                retry_after: crate::time::after(now, retry_after.unwrap_or(default_retry_after)),
            }
        }
        _ => {}
    }
    Error::Transport(err)
}

// ============================================================================
// TESTS
// ============================================================================
