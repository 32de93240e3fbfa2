//! Upgrade-time authorization for the streaming gateway.
//!
//! Verifies the identity token carried in the `Authorization` query parameter
//! and answers with an access policy. A `Deny` policy refuses the upgrade.

use std::collections::HashMap;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PromptwireError;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const INVOKE_ACTION: &str = "execute-api:Invoke";

/// Principal reported when a token is rejected.
const ANONYMOUS_PRINCIPAL: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub action: String,
    pub effect: Effect,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub principal_id: String,
    pub policy_document: PolicyDocument,
}

impl Policy {
    fn new(principal_id: &str, effect: Effect, resource: &str) -> Self {
        Self {
            principal_id: principal_id.to_string(),
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: vec![Statement {
                    action: INVOKE_ACTION.to_string(),
                    effect,
                    resource: resource.to_string(),
                }],
            },
        }
    }

    pub fn effect(&self) -> Effect {
        self.policy_document
            .statement
            .first()
            .map(|s| s.effect)
            .unwrap_or(Effect::Deny)
    }

    pub fn is_allowed(&self) -> bool {
        self.effect() == Effect::Allow
    }
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    token_use: Option<String>,
}

/// Verifies identity tokens against one issuer and audience.
pub struct Authorizer {
    key: DecodingKey,
    validation: Validation,
}

impl Authorizer {
    /// HMAC-signed tokens (test and self-hosted issuers).
    pub fn hs256(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256, issuer, audience)
    }

    /// RSA-signed tokens, key given as a PEM public key.
    pub fn rs256_pem(pem: &[u8], issuer: &str, audience: &str) -> Result<Self, PromptwireError> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| PromptwireError::Config(format!("invalid RSA public key: {e}")))?;
        Ok(Self::with_key(key, Algorithm::RS256, issuer, audience))
    }

    fn with_key(key: DecodingKey, alg: Algorithm, issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(alg);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        Self { key, validation }
    }

    /// Verify an identity token. Returns the principal (email, else subject).
    pub fn verify(&self, token: &str) -> Result<String, PromptwireError> {
        let data = jsonwebtoken::decode::<IdentityClaims>(token, &self.key, &self.validation)
            .map_err(|e| PromptwireError::AuthFailed(e.to_string()))?;
        let claims = data.claims;

        if claims.token_use.as_deref() != Some("id") {
            return Err(PromptwireError::AuthFailed(format!(
                "expected an id token, got token_use={}",
                claims.token_use.as_deref().unwrap_or("<missing>")
            )));
        }

        claims
            .email
            .or(claims.sub)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PromptwireError::AuthFailed("token has no principal".to_string()))
    }

    /// Decide on an upgrade given its query parameters.
    pub fn authorize(&self, query: &HashMap<String, String>, resource: &str) -> Policy {
        let token = query
            .get("Authorization")
            .or_else(|| query.get("authorization"))
            .map(String::as_str);

        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::warn!(resource, "authorization failed: no token in query");
            return Policy::new(ANONYMOUS_PRINCIPAL, Effect::Deny, resource);
        };

        match self.verify(token) {
            Ok(principal) => {
                tracing::debug!(principal = %principal, resource, "connection allowed");
                Policy::new(&principal, Effect::Allow, resource)
            }
            Err(e) => {
                tracing::warn!(resource, "authorization failed: {e}");
                Policy::new(ANONYMOUS_PRINCIPAL, Effect::Deny, resource)
            }
        }
    }

    /// Same as [`authorize`](Self::authorize), reading the query from a request URI
    /// such as `/?Authorization=...` or a full `wss://` URL.
    pub fn authorize_uri(&self, uri: &str, resource: &str) -> Policy {
        let parsed = Url::parse(uri).or_else(|_| Url::parse("ws://localhost")?.join(uri));
        let query: HashMap<String, String> = match parsed {
            Ok(url) => url.query_pairs().into_owned().collect(),
            Err(e) => {
                tracing::warn!(resource, "authorization failed: unparseable uri: {e}");
                HashMap::new()
            }
        };
        self.authorize(&query, resource)
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("iss", &self.validation.iss)
            .field("aud", &self.validation.aud)
            .finish()
    }
}
