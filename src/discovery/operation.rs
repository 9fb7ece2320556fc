//! # Discovery Operation
//!
//! One end-to-end exchange with the enclave.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TWO-ROUND EXCHANGE                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   Client                                            Enclave             │
//! │     │                                                  │                │
//! │     │  ClientRequest { token, prev, new, uak pairs }   │                │
//! │     │ ───────────────────────────────────────────────► │                │
//! │     │                       ClientResponse { token' }  │                │
//! │     │ ◄─────────────────────────────────────────────── │                │
//! │     │  ClientRequest { token_ack: true }               │                │
//! │     │ ───────────────────────────────────────────────► │                │
//! │     │           ClientResponse { triples } × N, close  │                │
//! │     │ ◄─────────────────────────────────────────────── │                │
//! │     │                                                  │                │
//! │   store { token', prev ∪ new }                                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is persisted until the final frame has been read and decoded.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::{encode_aci_uak_pairs, AccessKeyProvider};
use crate::connection::{ConnectionFactory, DiscoveryConnection};
use crate::e164::{encode_e164s, E164};
use crate::error::{Error, Result};
use crate::protocol::{
    decode_results, map_connection_error, ClientRequest, DiscoveryResult, DEFAULT_RETRY_AFTER,
};
use crate::storage::{PersistentState, SyncCursor};

/// A single lookup against the discovery service
pub struct DiscoveryOperation {
    e164s_to_lookup: BTreeSet<E164>,
    persistent_state: Option<Arc<dyn PersistentState>>,
    compatibility_mode: bool,
    access_keys: Option<Arc<dyn AccessKeyProvider>>,
    connection_factory: Arc<dyn ConnectionFactory>,
    default_retry_after: Duration,
}

impl DiscoveryOperation {
    /// A one-off lookup with no sync cursor
    pub fn new(e164s_to_lookup: BTreeSet<E164>, connection_factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            e164s_to_lookup,
            persistent_state: None,
            compatibility_mode: true,
            access_keys: None,
            connection_factory,
            default_retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    /// Resync incrementally against `state`
    pub fn with_persistent_state(mut self, state: Arc<dyn PersistentState>) -> Self {
        self.persistent_state = Some(state);
        self
    }

    /// Set whether ACIs are requested without access keys
    pub fn with_compatibility_mode(mut self, enabled: bool) -> Self {
        self.compatibility_mode = enabled;
        self
    }

    /// Attach access key pairs from `provider` to the request
    pub fn with_access_keys(mut self, provider: Arc<dyn AccessKeyProvider>) -> Self {
        self.access_keys = Some(provider);
        self
    }

    /// Fallback delay for rate-limit closes without a usable body
    pub fn with_default_retry_after(mut self, delay: Duration) -> Self {
        self.default_retry_after = delay;
        self
    }

    /// Run the exchange.
    ///
    /// Returns results only for numbers in `e164s_to_lookup`. Rate-limit and
    /// invalid-token closes come back as [`Error::RateLimited`] and
    /// [`Error::InvalidToken`]; the caller owns any state they imply.
    pub async fn perform(&self) -> Result<Vec<DiscoveryResult>> {
        let cursor = self
            .persistent_state
            .as_ref()
            .and_then(|state| state.load())
            .unwrap_or_default();

        let new_e164s: BTreeSet<E164> = self
            .e164s_to_lookup
            .difference(&cursor.prev_e164s)
            .copied()
            .collect();

        let mut connection = self
            .connection_factory
            .connect_and_perform_handshake()
            .await
            .map_err(|e| self.map_error(e))?;

        match self.exchange(&mut *connection, &cursor, &new_e164s).await {
            Ok(results) => Ok(results),
            Err(e) => {
                connection.disconnect(None).await;
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        connection: &mut dyn DiscoveryConnection,
        cursor: &SyncCursor,
        new_e164s: &BTreeSet<E164>,
    ) -> Result<Vec<DiscoveryResult>> {
        let request = ClientRequest {
            aci_uak_pairs: self
                .access_keys
                .as_ref()
                .map(|provider| encode_aci_uak_pairs(&provider.aci_access_key_pairs()))
                .unwrap_or_default(),
            prev_e164s: encode_e164s(&cursor.prev_e164s),
            new_e164s: encode_e164s(new_e164s),
            token: cursor.token.clone(),
            return_acis_without_uaks: self.compatibility_mode,
            ..Default::default()
        };

        tracing::debug!(
            "Discovery request: {} new, {} previously synced, token {} bytes",
            new_e164s.len(),
            cursor.prev_e164s.len(),
            cursor.token.len()
        );

        let token_response = connection
            .send_request_and_read_response(request)
            .await
            .map_err(|e| self.map_error(e))?;

        if token_response.token.is_empty() {
            return Err(Error::MalformedResponse(
                "server returned an empty token".to_string(),
            ));
        }

        let responses = connection
            .send_request_and_read_all_responses(ClientRequest::token_ack())
            .await
            .map_err(|e| self.map_error(e))?;

        let mut triples = Vec::new();
        for response in &responses {
            tracing::info!("Discovery permits used: {}", response.debug_permits_used);
            triples.extend_from_slice(&response.e164_pni_aci_triples);
        }

        let results: Vec<DiscoveryResult> = decode_results(&triples)?
            .into_iter()
            .filter(|result| self.e164s_to_lookup.contains(&result.e164))
            .collect();

        if let Some(state) = &self.persistent_state {
            let mut prev_e164s = cursor.prev_e164s.clone();
            prev_e164s.extend(new_e164s.iter().copied());
            state.store(&SyncCursor {
                token: token_response.token,
                prev_e164s,
            })?;
        }

        Ok(results)
    }

    fn map_error(&self, err: crate::connection::ConnectionError) -> Error {
        map_connection_error(err, crate::time::now(), self.default_retry_after)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{decode_numbers, MockServer};
    use crate::connection::ConnectionError;
    use crate::protocol::Aci;
    use crate::storage::MemoryPersistentState;
    use uuid::Uuid;

    fn e164(s: &str) -> E164 {
        E164::parse(s).unwrap()
    }

    fn set(numbers: &[&str]) -> BTreeSet<E164> {
        numbers.iter().map(|n| e164(n)).collect()
    }

    struct FixedKeys(Vec<(Aci, [u8; 16])>);

    impl AccessKeyProvider for FixedKeys {
        fn aci_access_key_pairs(&self) -> Vec<(Aci, [u8; 16])> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_one_off_lookup_returns_registered_numbers() {
        let server = MockServer::new();
        let (pni, aci) = server.register(e164("+15550001111"));

        let op = DiscoveryOperation::new(
            set(&["+15550001111", "+15550002222", "+15550003333"]),
            Arc::new(server.clone()),
        );
        let results = op.perform().await.unwrap();

        assert_eq!(
            results,
            vec![DiscoveryResult {
                e164: e164("+15550001111"),
                pni,
                aci: Some(aci),
            }]
        );

        let requests = server.lookup_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].token.is_empty());
        assert!(requests[0].prev_e164s.is_empty());
        assert_eq!(decode_numbers(&requests[0].new_e164s).len(), 3);
        assert!(requests[0].return_acis_without_uaks);
    }

    #[tokio::test]
    async fn test_incremental_resync_sends_only_new_numbers() {
        let server = MockServer::new();
        let state = Arc::new(MemoryPersistentState::new());

        DiscoveryOperation::new(set(&["+15550001111"]), Arc::new(server.clone()))
            .with_persistent_state(state.clone())
            .perform()
            .await
            .unwrap();

        let first_token = server.last_token();
        assert_eq!(
            state.load(),
            Some(SyncCursor {
                token: first_token.clone(),
                prev_e164s: set(&["+15550001111"]),
            })
        );

        DiscoveryOperation::new(set(&["+15550001111", "+15550002222"]), Arc::new(server.clone()))
            .with_persistent_state(state.clone())
            .perform()
            .await
            .unwrap();

        let second = &server.lookup_requests()[1];
        assert_eq!(second.token, first_token);
        assert_eq!(decode_numbers(&second.prev_e164s), vec![e164("+15550001111")]);
        assert_eq!(decode_numbers(&second.new_e164s), vec![e164("+15550002222")]);
        assert_eq!(
            state.load().unwrap().prev_e164s,
            set(&["+15550001111", "+15550002222"])
        );
    }

    #[tokio::test]
    async fn test_results_limited_to_requested_numbers() {
        let server = MockServer::new();
        let state = Arc::new(MemoryPersistentState::new());
        server.register(e164("+15550001111"));
        server.register(e164("+15550002222"));

        DiscoveryOperation::new(set(&["+15550001111"]), Arc::new(server.clone()))
            .with_persistent_state(state.clone())
            .perform()
            .await
            .unwrap();

        let results = DiscoveryOperation::new(set(&["+15550002222"]), Arc::new(server.clone()))
            .with_persistent_state(state)
            .perform()
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].e164, e164("+15550002222"));
    }

    #[tokio::test]
    async fn test_not_discoverable_record_yields_nothing() {
        let server = MockServer::new();
        let results = DiscoveryOperation::new(set(&["+15550001111"]), Arc::new(server))
            .perform()
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_on_token_round_leaves_state_unchanged() {
        let server = MockServer::new();
        let state = Arc::new(MemoryPersistentState::new());
        server.fail_next_token_response(ConnectionError::Closed {
            code: 4008,
            reason: Some(br#"{"retry_after": 120}"#.to_vec()),
        });

        let before = crate::time::now();
        let err = DiscoveryOperation::new(set(&["+15550001111"]), Arc::new(server.clone()))
            .with_persistent_state(state.clone())
            .perform()
            .await
            .unwrap_err();

        let retry_after = err.retry_after().unwrap();
        let delta = (retry_after - before).num_seconds();
        assert!((110..=130).contains(&delta), "delta was {delta}");
        assert!(state.load().is_none());
        assert_eq!(server.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_token_is_reported() {
        let server = MockServer::new();
        server.fail_next_results(ConnectionError::Closed {
            code: 4101,
            reason: None,
        });

        let err = DiscoveryOperation::new(set(&["+15550001111"]), Arc::new(server.clone()))
            .perform()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidToken));
        assert_eq!(server.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_token_is_malformed() {
        let server = MockServer::new();
        server.issue_empty_token();

        let err = DiscoveryOperation::new(set(&["+15550001111"]), Arc::new(server))
            .perform()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        let server = MockServer::new();
        server.fail_next_connect(ConnectionError::Timeout);

        let err = DiscoveryOperation::new(set(&["+15550001111"]), Arc::new(server.clone()))
            .perform()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(ConnectionError::Timeout)));
        assert!(err.is_retryable());
        assert_eq!(server.disconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_access_keys_and_compatibility_mode_are_sent() {
        let server = MockServer::new();
        let aci = Aci(Uuid::from_bytes([1; 16]));

        DiscoveryOperation::new(set(&["+15550001111"]), Arc::new(server.clone()))
            .with_compatibility_mode(false)
            .with_access_keys(Arc::new(FixedKeys(vec![(aci, [2; 16])])))
            .perform()
            .await
            .unwrap();

        let request = &server.lookup_requests()[0];
        assert!(!request.return_acis_without_uaks);
        assert_eq!(request.aci_uak_pairs.len(), 32);
        assert_eq!(&request.aci_uak_pairs[..16], &[1; 16]);
    }

    #[test]
    fn test_perform_on_current_thread_runtime() {
        let server = MockServer::new();
        server.register(e164("+15550001111"));
        let op = DiscoveryOperation::new(set(&["+15550001111"]), Arc::new(server));

        let results = tokio_test::block_on(op.perform()).unwrap();
        assert_eq!(results.len(), 1);
    }
}
