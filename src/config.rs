use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::auth::{CommandToken, StaticToken, TokenProvider};
use crate::authorizer::Authorizer;
use crate::error::PromptwireError;
use crate::models::{DEFAULT_MODEL, ModelCatalog, ModelEntry};
use crate::request::SamplingParams;
use crate::session::DEFAULT_CONNECT_TIMEOUT;

const CONFIG_FILE: &str = "promptwire.toml";

/// Where bearer tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    Static(String),
    Command(String),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static([REDACTED])"),
            Self::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
        }
    }
}

/// Either token provider, chosen at runtime.
#[derive(Debug)]
pub enum AnyToken {
    Static(StaticToken),
    Command(CommandToken),
}

impl TokenProvider for AnyToken {
    async fn bearer_token(&self) -> Result<String, PromptwireError> {
        match self {
            Self::Static(t) => t.bearer_token().await,
            Self::Command(t) => t.bearer_token().await,
        }
    }
}

#[derive(Clone)]
pub enum AuthorizerKey {
    Hs256Secret(String),
    RsaPemPath(PathBuf),
}

#[derive(Clone)]
pub struct AuthorizerSettings {
    pub issuer: String,
    pub audience: String,
    pub key: AuthorizerKey,
}

impl AuthorizerSettings {
    pub fn build(&self) -> Result<Authorizer, PromptwireError> {
        match &self.key {
            AuthorizerKey::Hs256Secret(secret) => Ok(Authorizer::hs256(
                secret.as_bytes(),
                &self.issuer,
                &self.audience,
            )),
            AuthorizerKey::RsaPemPath(path) => {
                let pem = std::fs::read(path)?;
                Authorizer::rs256_pem(&pem, &self.issuer, &self.audience)
            }
        }
    }
}

pub struct Config {
    pub endpoint: Option<Url>,
    pub token: Option<TokenSource>,
    pub connect_timeout: Duration,
    pub default_model: String,
    pub sampling: SamplingParams,
    pub models: ModelCatalog,
    pub authorizer: Option<AuthorizerSettings>,
}

/// Optional TOML overlay.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    websocket_url: Option<String>,
    default_model: Option<String>,
    connect_timeout_secs: Option<u64>,
    sampling: Option<SamplingParams>,
    #[serde(default)]
    models: Vec<ModelEntry>,
}

impl Config {
    pub fn from_env() -> Self {
        let endpoint = match env::var("PROMPTWIRE_WEBSOCKET_URL") {
            Ok(raw) => match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::error!("PROMPTWIRE_WEBSOCKET_URL is not a valid URL: {e}");
                    None
                }
            },
            Err(_) => {
                tracing::warn!("PROMPTWIRE_WEBSOCKET_URL not set, streaming unavailable");
                None
            }
        };

        let token = match (
            non_empty_var("PROMPTWIRE_TOKEN"),
            non_empty_var("PROMPTWIRE_TOKEN_COMMAND"),
        ) {
            (_, Some(cmd)) => Some(TokenSource::Command(cmd)),
            (Some(token), None) => Some(TokenSource::Static(token)),
            (None, None) => None,
        };

        let connect_timeout = non_empty_var("PROMPTWIRE_CONNECT_TIMEOUT_SECS")
            .and_then(|v| match v.parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    tracing::warn!(value = %v, "ignoring invalid PROMPTWIRE_CONNECT_TIMEOUT_SECS");
                    None
                }
            })
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        let default_model =
            non_empty_var("PROMPTWIRE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let authorizer = match (
            non_empty_var("PROMPTWIRE_AUTH_ISSUER"),
            non_empty_var("PROMPTWIRE_AUTH_AUDIENCE"),
        ) {
            (Some(issuer), Some(audience)) => {
                let key = non_empty_var("PROMPTWIRE_AUTH_HS256_SECRET")
                    .map(AuthorizerKey::Hs256Secret)
                    .or_else(|| {
                        non_empty_var("PROMPTWIRE_AUTH_RSA_PEM")
                            .map(|p| AuthorizerKey::RsaPemPath(PathBuf::from(p)))
                    });
                match key {
                    Some(key) => Some(AuthorizerSettings {
                        issuer,
                        audience,
                        key,
                    }),
                    None => {
                        tracing::warn!("authorizer issuer/audience set but no verification key");
                        None
                    }
                }
            }
            _ => None,
        };

        Config {
            endpoint,
            token,
            connect_timeout,
            default_model,
            sampling: SamplingParams::default(),
            models: ModelCatalog::builtin(),
            authorizer,
        }
    }

    /// Environment first, then `PROMPTWIRE_CONFIG` (or `./promptwire.toml` if present) on top.
    pub fn load() -> Result<Self, PromptwireError> {
        let mut config = Self::from_env();

        let path = match non_empty_var("PROMPTWIRE_CONFIG") {
            Some(p) => Some(PathBuf::from(p)),
            None => Some(PathBuf::from(CONFIG_FILE)).filter(|p| p.exists()),
        };
        if let Some(path) = path {
            config.apply_file(&path)?;
        }
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), PromptwireError> {
        let text = std::fs::read_to_string(path)?;
        let file: FileConfig = toml::from_str(&text)
            .map_err(|e| PromptwireError::Config(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), models = file.models.len(), "loaded config file");
        self.merge(file)
    }

    fn merge(&mut self, file: FileConfig) -> Result<(), PromptwireError> {
        if let Some(raw) = file.websocket_url {
            let url = Url::parse(&raw)
                .map_err(|e| PromptwireError::Config(format!("websocket_url: {e}")))?;
            self.endpoint = Some(url);
        }
        if let Some(model) = file.default_model {
            self.default_model = model;
        }
        if let Some(secs) = file.connect_timeout_secs.filter(|s| *s > 0) {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(sampling) = file.sampling {
            sampling.validate()?;
            self.sampling = sampling;
        }
        for entry in file.models {
            self.models.insert(entry);
        }
        Ok(())
    }

    pub fn token_provider(&self) -> Result<AnyToken, PromptwireError> {
        match &self.token {
            Some(TokenSource::Static(t)) => Ok(AnyToken::Static(StaticToken::new(t.clone()))),
            Some(TokenSource::Command(c)) => Ok(AnyToken::Command(CommandToken::new(c.clone()))),
            None => Err(PromptwireError::AuthFailed(
                "set PROMPTWIRE_TOKEN or PROMPTWIRE_TOKEN_COMMAND".to_string(),
            )),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
