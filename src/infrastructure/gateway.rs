use crate::domain::money::Amount;
use crate::domain::ports::{AuthorizeRequest, GatewayFailure, PaymentGateway};
use crate::domain::tenant::GatewayConfig;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Which gateway verb a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayVerb {
    Authorize,
    Capture,
    Refund,
}

/// Call counters, useful to assert that idempotent paths skip the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    pub authorize: usize,
    pub capture: usize,
    pub refund: usize,
}

#[derive(Default)]
struct GatewayState {
    authorizations: HashMap<String, String>,
    captures: HashMap<String, String>,
    refunds: HashMap<String, String>,
    scripted: HashMap<GatewayVerb, VecDeque<GatewayFailure>>,
    calls: GatewayCalls,
}

/// An in-process payment gateway.
///
/// Behaves like a real provider with respect to idempotency: repeating a
/// verb with the same key (or reference, for captures) returns the original
/// reference. Failures and latency can be scripted for tests and dry runs.
#[derive(Clone, Default)]
pub struct SimulatedGateway {
    state: Arc<Mutex<GatewayState>>,
    latency: Option<Duration>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queues a failure returned by the next call of `verb`.
    pub async fn fail_next(&self, verb: GatewayVerb, failure: GatewayFailure) {
        self.state
            .lock()
            .await
            .scripted
            .entry(verb)
            .or_default()
            .push_back(failure);
    }

    pub async fn calls(&self) -> GatewayCalls {
        self.state.lock().await.calls
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn authorize(&self, request: AuthorizeRequest<'_>) -> Result<String, GatewayFailure> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.calls.authorize += 1;
        if let Some(failure) = state
            .scripted
            .get_mut(&GatewayVerb::Authorize)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure);
        }
        let reference = state
            .authorizations
            .entry(request.idempotency_key.to_string())
            .or_insert_with(|| format!("auth_{}", Uuid::new_v4().simple()))
            .clone();
        debug!(
            provider = %request.credentials.provider,
            amount = %request.amount.value(),
            currency = %request.currency,
            reference = %reference,
            "Gateway authorized"
        );
        Ok(reference)
    }

    async fn capture(
        &self,
        _credentials: &GatewayConfig,
        gateway_ref: &str,
        _amount: Amount,
    ) -> Result<String, GatewayFailure> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.calls.capture += 1;
        if let Some(failure) = state
            .scripted
            .get_mut(&GatewayVerb::Capture)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure);
        }
        if !state.authorizations.values().any(|r| r == gateway_ref) {
            return Err(GatewayFailure::terminal(format!(
                "unknown authorization {gateway_ref}"
            )));
        }
        Ok(state
            .captures
            .entry(gateway_ref.to_string())
            .or_insert_with(|| format!("cap_{}", Uuid::new_v4().simple()))
            .clone())
    }

    async fn refund(
        &self,
        _credentials: &GatewayConfig,
        gateway_ref: &str,
        _amount: Amount,
        idempotency_key: &str,
    ) -> Result<String, GatewayFailure> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.calls.refund += 1;
        if let Some(failure) = state
            .scripted
            .get_mut(&GatewayVerb::Refund)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure);
        }
        if !state.captures.contains_key(gateway_ref) {
            return Err(GatewayFailure::terminal(format!(
                "nothing captured for {gateway_ref}"
            )));
        }
        Ok(state
            .refunds
            .entry(idempotency_key.to_string())
            .or_insert_with(|| format!("ref_{}", Uuid::new_v4().simple()))
            .clone())
    }
}
