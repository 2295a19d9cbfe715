//! Handshake token verification

use barterbay_common::{Participant, UserId};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AuthConfig;

/// JWT claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id as a decimal string
    pub sub: String,
    pub username: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication token missing")]
    MissingToken,

    #[error("Authentication token expired")]
    Expired,

    #[error("Invalid authentication token: {0}")]
    InvalidToken(String),

    #[error("Token subject is not a valid user: {0}")]
    InvalidSubject(String),

    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

impl AuthError {
    /// Machine-readable code for HTTP error bodies
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Expired => "token_expired",
            Self::InvalidToken(_) | Self::InvalidSubject(_) => "authentication_failed",
            Self::UnsupportedAlgorithm(_) | Self::Signing(_) => "auth_misconfigured",
        }
    }
}

/// Resolves a handshake token to the authenticated user
pub trait AuthVerifier: Send + Sync {
    fn verify_token(&self, token: &str) -> Result<Participant, AuthError>;
}

/// HMAC-signed JWT verifier
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
    algorithm: Algorithm,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithm", &self.algorithm)
            .field("keys", &"<redacted>")
            .finish()
    }
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let algorithms = config
            .allowed_algorithms
            .iter()
            .map(|name| match name.parse::<Algorithm>() {
                Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => Ok(alg),
                _ => Err(AuthError::UnsupportedAlgorithm(name.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let algorithm = *algorithms
            .first()
            .ok_or_else(|| AuthError::UnsupportedAlgorithm("none configured".to_string()))?;

        let mut validation = Validation::new(algorithm);
        validation.algorithms = algorithms;
        validation.leeway = config.leeway_seconds;

        let secret = config.jwt_secret.as_bytes();
        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret),
            encoding_key: EncodingKey::from_secret(secret),
            validation,
            algorithm,
        })
    }

    /// Sign a token for `participant` valid for `ttl_seconds`
    pub fn issue_token(
        &self,
        participant: &Participant,
        ttl_seconds: u64,
    ) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp().max(0) as usize;
        let claims = Claims {
            sub: participant.id.to_string(),
            username: participant.username.clone(),
            iat: now,
            exp: now + ttl_seconds as usize,
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Signing(err.to_string()))
    }
}

impl AuthVerifier for JwtVerifier {
    fn verify_token(&self, token: &str) -> Result<Participant, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(err.to_string()),
            })?
            .claims;

        let user_id = claims
            .sub
            .parse::<i64>()
            .map(UserId)
            .map_err(|_| AuthError::InvalidSubject(claims.sub.clone()))?;

        let username = claims.username.trim();
        if username.is_empty() || username.len() > barterbay_common::MAX_USERNAME_LEN {
            return Err(AuthError::InvalidSubject(claims.sub));
        }

        Ok(Participant::new(user_id, username))
    }
}
