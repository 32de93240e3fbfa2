use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::PromptwireError;
use crate::frame::{self, Frame};
use crate::session::SessionEvent;
use crate::session::state::{Applied, Outcome, Phase, SessionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything the consumer loop of one session owns.
pub(crate) struct Driver {
    pub session_id: String,
    pub model: String,
    pub endpoint: Url,
    pub request: String,
    pub connect_timeout: Duration,
    pub state: watch::Sender<SessionState>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub cancel: CancellationToken,
}

enum ConnectError {
    Denied(u16),
    Failed(PromptwireError),
}

impl Driver {
    pub async fn run(self) {
        let start = Instant::now();

        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.finish(Outcome::Cancelled, start);
                return;
            }
            r = connect(&self.endpoint, self.connect_timeout) => r,
        };

        let mut ws = match connected {
            Ok(ws) => ws,
            Err(ConnectError::Denied(status)) => {
                tracing::warn!(session_id = %self.session_id, status, "gateway denied the upgrade");
                self.finish(Outcome::Unauthorized, start);
                return;
            }
            Err(ConnectError::Failed(e)) => {
                tracing::warn!(session_id = %self.session_id, "connect failed: {e}");
                self.finish(Outcome::ConnectFailed(e.to_string()), start);
                return;
            }
        };

        self.advance(Phase::Open);
        let _ = self.events.send(SessionEvent::Connected);

        if let Err(e) = ws.send(Message::Text(self.request.clone())).await {
            tracing::warn!(session_id = %self.session_id, "failed to send request: {e}");
            self.finish(Outcome::Disconnected, start);
            return;
        }
        tracing::debug!(
            session_id = %self.session_id,
            bytes = self.request.len(),
            "request sent"
        );
        self.advance(Phase::Streaming);

        let outcome = self.pump(&mut ws).await;

        // Release the connection. A peer that already went away makes this fail; that's fine.
        if !matches!(outcome, Outcome::Disconnected) {
            let _ = ws.close(None).await;
        }
        self.finish(outcome, start);
    }

    /// Read frames in arrival order until something ends the session.
    async fn pump(&self, ws: &mut WsStream) -> Outcome {
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                msg = ws.next() => msg,
            };

            let text = match msg {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        session_id = %self.session_id,
                        reason = ?frame.map(|f| f.reason.into_owned()),
                        "gateway closed the connection without end-of-stream"
                    );
                    return Outcome::Disconnected;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(session_id = %self.session_id, "transport error: {e}");
                    return Outcome::Disconnected;
                }
                None => {
                    tracing::info!(session_id = %self.session_id, "connection dropped");
                    return Outcome::Disconnected;
                }
            };

            for frame in frame::decode(&text) {
                if let Some(outcome) = self.dispatch(frame) {
                    return outcome;
                }
            }
        }
    }

    /// Apply a frame and forward the matching event. Returns the outcome if the
    /// frame ended the session.
    fn dispatch(&self, frame: Frame) -> Option<Outcome> {
        tracing::debug!(session_id = %self.session_id, kind = frame.kind(), "frame");

        let event = match &frame {
            Frame::Content(text) => Some(SessionEvent::Content(text.clone())),
            Frame::Reasoning(text) => Some(SessionEvent::Reasoning(text.clone())),
            Frame::ReasoningRedacted => Some(SessionEvent::ReasoningRedacted),
            Frame::Metrics(m) => Some(SessionEvent::Metrics(*m)),
            Frame::Error(message) => Some(SessionEvent::Error(message.clone())),
            Frame::EndOfStream => None,
        };

        let mut applied = Applied::Ignored;
        self.state.send_modify(|s| applied = s.apply(frame));

        if applied == Applied::Ignored {
            return None;
        }
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        match applied {
            Applied::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    fn advance(&self, next: Phase) {
        self.state.send_if_modified(|s| s.advance(next));
    }

    fn finish(&self, outcome: Outcome, start: Instant) {
        let finished = self.state.send_if_modified(|s| s.finish(outcome.clone()));
        let state = self.state.borrow();
        // An error or end-of-stream frame may have finished the state already.
        let outcome = state.outcome().cloned().unwrap_or(outcome);

        tracing::info!(
            session_id = %self.session_id,
            model = %self.model,
            outcome = outcome.as_str(),
            output_bytes = state.output().len(),
            reasoning_bytes = state.reasoning().len(),
            frames = state.frames(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "session finished"
        );
        drop(state);

        if !finished {
            tracing::debug!(session_id = %self.session_id, "outcome already recorded");
        }
        let _ = self.events.send(SessionEvent::Finished(outcome));
    }
}

async fn connect(endpoint: &Url, timeout: Duration) -> Result<WsStream, ConnectError> {
    let handshake = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(endpoint.as_str()));

    match handshake.await {
        Err(_) => Err(ConnectError::Failed(PromptwireError::Connect(format!(
            "handshake timed out after {}ms",
            timeout.as_millis()
        )))),
        Ok(Err(tungstenite::Error::Http(resp)))
            if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 =>
        {
            Err(ConnectError::Denied(resp.status().as_u16()))
        }
        Ok(Err(e)) => Err(ConnectError::Failed(e.into())),
        Ok(Ok((ws, _response))) => Ok(ws),
    }
}
