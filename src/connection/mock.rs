//! Scriptable in-process discovery server for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::{ConnectionError, ConnectionFactory, DiscoveryConnection};
use crate::e164::{decode_e164, E164, E164_RECORD_LEN};
use crate::protocol::{encode_record, Aci, ClientRequest, ClientResponse, Pni};

#[derive(Default)]
struct MockState {
    registered: HashMap<E164, (Pni, Option<Aci>)>,
    requests: Vec<ClientRequest>,
    connections: usize,
    disconnects: usize,
    tokens_issued: u8,
    connect_failure: Option<ConnectionError>,
    token_failure: Option<ConnectionError>,
    result_failure: Option<ConnectionError>,
    empty_token: bool,
}

/// A fake enclave. Cloning shares state, so a test can keep a handle while
/// the manager owns another.
#[derive(Clone, Default)]
pub(crate) struct MockServer {
    state: Arc<Mutex<MockState>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockServer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hold every token response until [`MockServer::release`] is called.
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub(crate) fn release(&self, exchanges: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(exchanges);
        }
    }

    /// Register a number with fresh identifiers and return them.
    pub(crate) fn register(&self, e164: E164) -> (Pni, Aci) {
        let pni = Pni(Uuid::new_v4());
        let aci = Aci(Uuid::new_v4());
        self.state.lock().registered.insert(e164, (pni, Some(aci)));
        (pni, aci)
    }

    pub(crate) fn fail_next_connect(&self, err: ConnectionError) {
        self.state.lock().connect_failure = Some(err);
    }

    pub(crate) fn fail_next_token_response(&self, err: ConnectionError) {
        self.state.lock().token_failure = Some(err);
    }

    pub(crate) fn fail_next_results(&self, err: ConnectionError) {
        self.state.lock().result_failure = Some(err);
    }

    pub(crate) fn issue_empty_token(&self) {
        self.state.lock().empty_token = true;
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.state.lock().connections
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.state.lock().disconnects
    }

    /// First-round frames (the ones carrying number sets), in arrival order.
    pub(crate) fn lookup_requests(&self) -> Vec<ClientRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| !r.token_ack)
            .cloned()
            .collect()
    }

    /// The token the mock most recently issued
    pub(crate) fn last_token(&self) -> Vec<u8> {
        vec![self.state.lock().tokens_issued]
    }
}

pub(crate) fn decode_numbers(bytes: &[u8]) -> Vec<E164> {
    bytes
        .chunks_exact(E164_RECORD_LEN)
        .filter_map(|chunk| chunk.try_into().ok().and_then(decode_e164))
        .collect()
}

#[async_trait]
impl ConnectionFactory for MockServer {
    async fn connect_and_perform_handshake(
        &self,
    ) -> Result<Box<dyn DiscoveryConnection>, ConnectionError> {
        let mut state = self.state.lock();
        state.connections += 1;
        if let Some(err) = state.connect_failure.take() {
            return Err(err);
        }
        Ok(Box::new(MockConnection {
            server: self.clone(),
            queried: Vec::new(),
        }))
    }
}

struct MockConnection {
    server: MockServer,
    queried: Vec<E164>,
}

#[async_trait]
impl DiscoveryConnection for MockConnection {
    async fn send_request_and_read_response(
        &mut self,
        request: ClientRequest,
    ) -> Result<ClientResponse, ConnectionError> {
        if let Some(gate) = &self.server.gate {
            gate.acquire()
                .await
                .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?
                .forget();
        }

        let mut state = self.server.state.lock();
        state.requests.push(request.clone());
        if let Some(err) = state.token_failure.take() {
            return Err(err);
        }

        self.queried = decode_numbers(&request.new_e164s);
        self.queried.extend(decode_numbers(&request.prev_e164s));

        let token = if state.empty_token {
            Vec::new()
        } else {
            state.tokens_issued += 1;
            vec![state.tokens_issued]
        };

        Ok(ClientResponse {
            token,
            ..Default::default()
        })
    }

    async fn send_request_and_read_all_responses(
        &mut self,
        request: ClientRequest,
    ) -> Result<Vec<ClientResponse>, ConnectionError> {
        let mut state = self.server.state.lock();
        state.requests.push(request);
        if let Some(err) = state.result_failure.take() {
            return Err(err);
        }

        let records: Vec<Vec<u8>> = self
            .queried
            .iter()
            .map(|e164| match state.registered.get(e164) {
                Some((pni, aci)) => encode_record(Some(e164), Some(pni), aci.as_ref()),
                None => encode_record(Some(e164), None, None),
            })
            .collect();

        // Two records per frame, to exercise multi-frame reassembly.
        Ok(records
            .chunks(2)
            .map(|chunk| ClientResponse {
                e164_pni_aci_triples: chunk.concat(),
                debug_permits_used: chunk.len() as i32,
                ..Default::default()
            })
            .collect())
    }

    async fn disconnect(&mut self, _code: Option<u16>) {
        self.server.state.lock().disconnects += 1;
    }
}
