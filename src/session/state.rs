use std::fmt;

use serde::Serialize;

use crate::frame::{Frame, Metrics};

/// `Idle → Connecting → Open → Streaming → Terminal`, with `Connecting → Terminal`
/// on connect failure and `Open → Terminal` if the request cannot be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Connecting,
    Open,
    Streaming,
    Terminal,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Streaming => "streaming",
            Self::Terminal => "terminal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }

    /// True while the caller should show a loading indicator.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Streaming)
    }

    fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Open)
                | (Self::Open, Self::Streaming)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session reached its terminal phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    /// Explicit end-of-stream marker received.
    Completed,
    /// Gateway sent an error frame. Partial output is kept but not complete.
    ServerError(String),
    /// No connection could be established.
    ConnectFailed(String),
    /// The gateway refused the upgrade (authorizer deny).
    Unauthorized,
    /// Connection closed or dropped without an end-of-stream marker.
    Disconnected,
    /// Caller cancelled, or a newer submission replaced this session.
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::ServerError(_) => "server_error",
            Self::ConnectFailed(_) => "connect_failed",
            Self::Unauthorized => "unauthorized",
            Self::Disconnected => "disconnected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Notification text for failures; `None` for completion and cancellation.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Completed | Self::Cancelled => None,
            Self::ServerError(msg) => Some(msg.clone()),
            Self::ConnectFailed(_) => Some("could not connect to the streaming gateway".to_string()),
            Self::Unauthorized => Some("not authorized, please sign in again".to_string()),
            Self::Disconnected => {
                Some("connection closed before the response finished".to_string())
            }
        }
    }
}

/// What the driver should do after applying a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// State changed; keep reading.
    Continue,
    /// Informational only; state unchanged.
    Notice,
    /// Session reached its terminal phase; release the connection.
    Finished(Outcome),
    /// Session was already terminal; frame dropped.
    Ignored,
}

/// Accumulated view of one streamed response. Output and reasoning only grow;
/// metrics are replaced wholesale by each report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    phase: Phase,
    outcome: Option<Outcome>,
    output: String,
    reasoning: String,
    reasoning_redacted: bool,
    metrics: Option<Metrics>,
    frames: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            outcome: None,
            output: String::new(),
            reasoning: String::new(),
            reasoning_redacted: false,
            metrics: None,
            frames: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn reasoning_redacted(&self) -> bool {
        self.reasoning_redacted
    }

    pub fn metrics(&self) -> Option<Metrics> {
        self.metrics
    }

    /// Frames applied so far, excluding those dropped after termination.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Move forward along the happy path. Returns false (and changes nothing)
    /// for any other edge.
    pub fn advance(&mut self, next: Phase) -> bool {
        if !self.phase.can_advance_to(next) {
            tracing::debug!(from = %self.phase, to = %next, "ignored phase transition");
            return false;
        }
        self.phase = next;
        true
    }

    /// Enter the terminal phase. The first outcome wins.
    pub fn finish(&mut self, outcome: Outcome) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = Phase::Terminal;
        self.outcome = Some(outcome);
        true
    }

    /// Dispatch one decoded frame.
    pub fn apply(&mut self, frame: Frame) -> Applied {
        if self.phase.is_terminal() {
            return Applied::Ignored;
        }
        self.frames += 1;

        match frame {
            Frame::Content(text) => {
                self.output.push_str(&text);
                Applied::Continue
            }
            Frame::Reasoning(text) => {
                self.reasoning.push_str(&text);
                Applied::Continue
            }
            Frame::ReasoningRedacted => {
                self.reasoning_redacted = true;
                Applied::Notice
            }
            Frame::Metrics(metrics) => {
                self.metrics = Some(metrics);
                Applied::Continue
            }
            Frame::Error(message) => {
                let outcome = Outcome::ServerError(message);
                self.finish(outcome.clone());
                Applied::Finished(outcome)
            }
            Frame::EndOfStream => {
                self.finish(Outcome::Completed);
                Applied::Finished(Outcome::Completed)
            }
        }
    }
}
