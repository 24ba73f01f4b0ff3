//! Bearer tokens.
//!
//! A token is `hex(claims_json) "." hex(hmac_sha256(secret, hex(claims_json)))`.
//! The server only verifies tokens; [`TokenCodec::issue`] exists for operator
//! tooling and tests.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use hmac::{Hmac, Mac};
use labcert_core::{Caller, Role};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::ApiError;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Signed identity carried by a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Staff member id
    pub sub: i64,
    pub name: String,
    pub roles: Vec<Role>,
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
}

impl Claims {
    pub fn caller(&self) -> Caller {
        Caller::new(self.sub, self.name.clone(), self.roles.iter().copied())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("could not encode claims: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Issues and verifies HMAC-signed tokens.
pub struct TokenCodec {
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>, ttl_secs: u64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Token for a staff member, valid for the configured lifetime.
    pub fn issue(&self, user_id: i64, name: &str, roles: &[Role]) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id,
            name: name.to_string(),
            roles: roles.to_vec(),
            exp: chrono::Utc::now().timestamp().saturating_add(self.ttl_secs),
        };
        self.encode(&claims)
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        let payload = hex::encode(serde_json::to_vec(claims)?);
        let signature = hex::encode(self.mac(payload.as_bytes())?.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    /// Check signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    fn verify_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        if payload.is_empty() || signature.is_empty() {
            return Err(TokenError::Malformed);
        }
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;
        self.mac(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let json = hex::decode(payload).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::BadSignature)?;
        mac.update(data);
        Ok(mac)
    }
}

/// Extractor yielding the authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Caller);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::unauthorized("authorization header must use the Bearer scheme"))?;

        match state.tokens.verify(token) {
            Ok(claims) => Ok(AuthUser(claims.caller())),
            Err(e) => {
                tracing::warn!(error = %e, path = %parts.uri.path(), "token rejected");
                Err(ApiError::unauthorized(e.to_string()))
            }
        }
    }
}
