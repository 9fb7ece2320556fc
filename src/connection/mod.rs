//! # Connection Contract
//!
//! The secure channel to the discovery enclave. Attestation, the Noise/TLS
//! handshake, and frame transport all live behind these traits; the
//! discovery code only sends typed frames and reads typed frames back.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CONNECTION LIFECYCLE                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ConnectionFactory::connect_and_perform_handshake()                    │
//! │     └─► authenticated DiscoveryConnection                               │
//! │                                                                         │
//! │  send_request_and_read_response(request)        one frame back        │
//! │  send_request_and_read_all_responses(request)    frames until close    │
//! │  disconnect(code)                                client-side abort     │
//! │                                                                         │
//! │  A server-initiated close surfaces as ConnectionError::Closed with     │
//! │  the close code and raw close-reason bytes.                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{ClientRequest, ClientResponse};

/// Failures raised by a transport implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// The server closed the channel
    #[error("Connection closed with code {code}")]
    Closed {
        /// WebSocket close code
        code: u16,
        /// Raw close-reason payload, if any
        reason: Option<Vec<u8>>,
    },

    /// The upgrade request failed before a channel existed
    #[error("HTTP error {status}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Server-provided Retry-After
        retry_after: Option<Duration>,
    },

    /// The enclave's attestation could not be verified
    #[error("Attestation failed: {0}")]
    Attestation(String),

    /// Could not reach the service
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No response within the transport's deadline
    #[error("Operation timed out")]
    Timeout,
}

impl ConnectionError {
    /// Whether retrying the same request could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectionError::Timeout | ConnectionError::ConnectionFailed(_) => true,
            ConnectionError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            ConnectionError::Closed { .. } | ConnectionError::Attestation(_) => false,
        }
    }
}

/// An authenticated channel to the discovery enclave
#[async_trait]
pub trait DiscoveryConnection: Send {
    /// Send one frame and wait for exactly one frame back
    async fn send_request_and_read_response(
        &mut self,
        request: ClientRequest,
    ) -> Result<ClientResponse, ConnectionError>;

    /// Send one frame and collect every frame until the server closes normally
    async fn send_request_and_read_all_responses(
        &mut self,
        request: ClientRequest,
    ) -> Result<Vec<ClientResponse>, ConnectionError>;

    /// Close the channel from the client side
    async fn disconnect(&mut self, code: Option<u16>);
}

/// Opens attested channels
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Connect, attest, and complete the handshake
    async fn connect_and_perform_handshake(
        &self,
    ) -> Result<Box<dyn DiscoveryConnection>, ConnectionError>;
}
