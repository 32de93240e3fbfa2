use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::PromptwireError;

/// Refresh tokens this long before they expire.
pub const REFRESH_SKEW: Duration = Duration::from_secs(30);

/// Max time a token command may run.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Supplies the bearer token for the current user, refreshing it if needed.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> impl Future<Output = Result<String, PromptwireError>> + Send;
}

/// A fixed token, e.g. from `PROMPTWIRE_TOKEN`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken([REDACTED])")
    }
}

impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, PromptwireError> {
        if let Some(exp) = expiry(&self.0)
            && exp <= now_secs()
        {
            return Err(PromptwireError::AuthFailed(
                "static token has expired".to_string(),
            ));
        }
        Ok(self.0.clone())
    }
}

struct Cached {
    token: String,
    expires_at: Option<u64>,
}

impl Cached {
    fn is_fresh(&self, now: u64) -> bool {
        match self.expires_at {
            Some(exp) => now + REFRESH_SKEW.as_secs() < exp,
            // No exp claim: nothing tells us it went stale.
            None => true,
        }
    }
}

/// Obtains tokens by running a shell command that prints one on stdout.
/// The token is cached until it is within [`REFRESH_SKEW`] of its `exp` claim.
pub struct CommandToken {
    command: String,
    cached: Mutex<Option<Cached>>,
}

impl CommandToken {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<String, PromptwireError> {
        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&self.command)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            PromptwireError::AuthFailed(format!(
                "token command timed out after {}s",
                COMMAND_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| PromptwireError::AuthFailed(format!("token command failed to start: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PromptwireError::AuthFailed(format!(
                "token command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(PromptwireError::AuthFailed(
                "token command printed nothing".to_string(),
            ));
        }
        Ok(token)
    }
}

impl std::fmt::Debug for CommandToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandToken")
            .field("command", &self.command)
            .finish()
    }
}

impl TokenProvider for CommandToken {
    async fn bearer_token(&self) -> Result<String, PromptwireError> {
        let mut cached = self.cached.lock().await;
        let now = now_secs();

        if let Some(c) = cached.as_ref()
            && c.is_fresh(now)
        {
            return Ok(c.token.clone());
        }

        tracing::debug!("refreshing bearer token");
        let token = self.fetch().await?;
        let expires_at = expiry(&token);
        if expires_at.is_some_and(|exp| exp <= now) {
            return Err(PromptwireError::AuthFailed(
                "token command returned an expired token".to_string(),
            ));
        }

        *cached = Some(Cached {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

#[derive(Deserialize)]
struct ExpClaim {
    exp: Option<u64>,
}

/// Read the `exp` claim without verifying the signature. Opaque tokens yield `None`.
pub fn expiry(token: &str) -> Option<u64> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<ExpClaim>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .and_then(|data| data.claims.exp)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
