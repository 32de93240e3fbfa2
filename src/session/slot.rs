use tokio_util::sync::CancellationToken;

use crate::auth::TokenProvider;
use crate::error::PromptwireError;
use crate::request::RequestPayload;
use crate::session::{Connector, SessionHandle};

/// One logical place where sessions are submitted (a playground pane, a chat window).
/// At most one session per slot is live: submitting closes the previous one first.
#[derive(Debug, Default)]
pub struct SessionSlot {
    current: Option<(String, CancellationToken)>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever this slot currently holds, then open a new session.
    /// The prior session is cancelled even if the new one fails validation.
    pub async fn submit<P: TokenProvider>(
        &mut self,
        connector: &Connector<P>,
        payload: RequestPayload,
    ) -> Result<SessionHandle, PromptwireError> {
        self.cancel_current();
        let handle = connector.open(payload).await?;
        self.current = Some((handle.id().to_string(), handle.cancel_token()));
        Ok(handle)
    }

    /// Id of the most recently submitted session, if any.
    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|(id, _)| id.as_str())
    }

    pub fn cancel_current(&mut self) {
        if let Some((id, token)) = self.current.take()
            && !token.is_cancelled()
        {
            tracing::info!(session_id = %id, "cancelling superseded session");
            token.cancel();
        }
    }
}
