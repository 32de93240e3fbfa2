//! Streaming response sessions.
//!
//! One [`SessionHandle`] per submitted request. A spawned consumer loop owns the
//! connection exclusively; callers observe it through an ordered event channel
//! and a watch over the accumulated [`SessionState`].

mod driver;
pub mod slot;
pub mod state;

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::TokenProvider;
use crate::error::PromptwireError;
use crate::frame::Metrics;
use crate::models::ModelCatalog;
use crate::request::RequestPayload;

pub use slot::SessionSlot;
pub use state::{Outcome, Phase, SessionState};

/// Query parameter carrying the bearer token on the upgrade request.
pub const AUTHORIZATION_PARAM: &str = "Authorization";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Incremental signals, delivered in the order frames arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection is ready and the request is being sent.
    Connected,
    Content(String),
    Reasoning(String),
    /// The model's reasoning was redacted upstream. Informational.
    ReasoningRedacted,
    Metrics(Metrics),
    /// Gateway reported an error. Sent at most once, right before `Finished`.
    Error(String),
    /// Always the last event.
    Finished(Outcome),
}

/// Opens sessions against one gateway endpoint.
pub struct Connector<P> {
    endpoint: Url,
    tokens: P,
    catalog: ModelCatalog,
    connect_timeout: Duration,
}

impl<P: TokenProvider> Connector<P> {
    pub fn new(endpoint: Url, tokens: P) -> Result<Self, PromptwireError> {
        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(PromptwireError::Config(format!(
                    "websocket endpoint must use ws:// or wss://, got {other}://"
                )));
            }
        }
        Ok(Self {
            endpoint,
            tokens,
            catalog: ModelCatalog::builtin(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Validate the payload, obtain a bearer token, and start a session.
    ///
    /// Returns as soon as the session is connecting. Connection and stream
    /// failures are not errors here: they surface as the handle's [`Outcome`].
    pub async fn open(&self, payload: RequestPayload) -> Result<SessionHandle, PromptwireError> {
        payload.validate()?;
        self.catalog.check(&payload)?;
        let request = payload.to_wire()?;

        let token = self.tokens.bearer_token().await?;
        if token.trim().is_empty() {
            return Err(PromptwireError::AuthFailed("empty bearer token".to_string()));
        }

        let mut endpoint = self.endpoint.clone();
        endpoint
            .query_pairs_mut()
            .append_pair(AUTHORIZATION_PARAM, token.trim());

        let session_id = uuid::Uuid::new_v4().to_string();
        let mut state = SessionState::new();
        state.advance(Phase::Connecting);

        let (state_tx, state_rx) = watch::channel(state);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tracing::info!(
            session_id = %session_id,
            action = payload.action.as_str(),
            model = %payload.model_id,
            prompt_bytes = payload.prompt.len(),
            images = payload.image_keys.len(),
            reasoning = payload.reasoning.is_some(),
            "opening session"
        );

        let driver = driver::Driver {
            session_id: session_id.clone(),
            model: payload.model_id.clone(),
            endpoint,
            request,
            connect_timeout: self.connect_timeout,
            state: state_tx,
            events: events_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        Ok(SessionHandle {
            id: session_id,
            payload,
            state: state_rx,
            events: events_rx,
            cancel,
            task: Some(task),
        })
    }
}

/// Owned handle to one in-flight or finished session. Dropping it cancels the session.
///
/// Events queue until read with [`next_event`](Self::next_event). A caller that
/// only polls [`snapshot`](Self::snapshot) should call
/// [`discard_events`](Self::discard_events) so chunks are not held twice;
/// [`wait`](Self::wait) stops queuing on its own.
pub struct SessionHandle {
    id: String,
    payload: RequestPayload,
    state: watch::Receiver<SessionState>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &RequestPayload {
        &self.payload
    }

    /// Copy of the accumulated state. Remains readable after termination.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Next event in arrival order; `None` once `Finished` has been taken.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Stop queuing events. Already queued events can still be read; the
    /// accumulated state is unaffected.
    pub fn discard_events(&mut self) {
        self.events.close();
    }

    /// Close the connection now. Partial output stays readable.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the terminal phase and return the final state. Events not yet
    /// queued are discarded.
    pub async fn wait(&mut self) -> SessionState {
        self.discard_events();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::error!(session_id = %self.id, "session task failed: {e}");
        }
        self.snapshot()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("model", &self.payload.model_id)
            .field("phase", &self.phase())
            .finish()
    }
}
