//! Identity token verification
//!
//! The session layer treats verification as an opaque async collaborator:
//! given a token and the expected audience it yields a verified identity or
//! fails. [`JwtVerifier`] checks signed ID tokens against a provider's
//! published keys; the static table and the insecure verifier serve tests and
//! local development.

use futures::future::{self, BoxFuture};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.email {
            Some(email) => write!(f, "{} - {}", self.subject, email),
            None => write!(f, "{}", self.subject),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("empty token")]
    EmptyToken,

    #[error("unknown token")]
    UnknownToken,

    #[error("token not issued for audience {expected:?}")]
    AudienceMismatch { expected: String },

    #[error("token has expired")]
    Expired,

    #[error("token signed with unknown key {0:?}")]
    UnknownKey(Option<String>),

    #[error("invalid token: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum KeySetError {
    #[error("failed to read key set {}: {source}", path.display())]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("malformed key set: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unusable key {kid:?}: {source}")]
    Key {
        kid: String,
        source: jsonwebtoken::errors::Error,
    },
}

pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str, audience: &str) -> BoxFuture<'static, Result<Identity, VerifyError>>;
}

/// One entry of the configured token table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenEntry {
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Audience the token was issued for; unrestricted when absent.
    #[serde(default)]
    pub audience: Option<String>,
}

/// Verifies tokens against a fixed table, typically loaded from the config
/// file.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, TokenEntry>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, TokenEntry>) -> Self {
        Self { tokens }
    }

    fn check(&self, token: &str, audience: &str) -> Result<Identity, VerifyError> {
        if token.is_empty() {
            return Err(VerifyError::EmptyToken);
        }
        let entry = self.tokens.get(token).ok_or(VerifyError::UnknownToken)?;
        if let Some(issued_for) = &entry.audience {
            if issued_for != audience {
                return Err(VerifyError::AudienceMismatch {
                    expected: audience.to_string(),
                });
            }
        }
        Ok(Identity {
            subject: entry.subject.clone(),
            email: entry.email.clone(),
        })
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str, audience: &str) -> BoxFuture<'static, Result<Identity, VerifyError>> {
        Box::pin(future::ready(self.check(token, audience)))
    }
}

/// Issuers accepted by default, as used by Google ID tokens.
pub const DEFAULT_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

/// Verifies RS256-signed ID tokens against a JSON Web Key Set.
///
/// The token header's `kid` selects the key. Signature, `exp`, `aud` and,
/// when issuers are configured, `iss` are all checked; `sub` and `email`
/// become the identity.
#[derive(Clone)]
pub struct JwtVerifier {
    keys: HashMap<String, DecodingKey>,
    issuers: Vec<String>,
}

impl JwtVerifier {
    /// Builds a verifier from a JWKS document. Non-RSA keys and keys without
    /// a `kid` are skipped.
    pub fn from_jwks(jwks: &str, issuers: Vec<String>) -> Result<Self, KeySetError> {
        let set: JwkSet = serde_json::from_str(jwks)?;
        let mut keys = HashMap::new();
        for jwk in &set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                warn!("Skipping key without a key ID");
                continue;
            };
            if !matches!(jwk.algorithm, AlgorithmParameters::RSA(_)) {
                warn!("Skipping non-RSA key {:?}", kid);
                continue;
            }
            let key = DecodingKey::from_jwk(jwk).map_err(|source| KeySetError::Key {
                kid: kid.clone(),
                source,
            })?;
            keys.insert(kid, key);
        }
        debug!("Loaded {} signing keys", keys.len());
        Ok(Self { keys, issuers })
    }

    pub fn from_jwks_file(path: &Path, issuers: Vec<String>) -> Result<Self, KeySetError> {
        let content = std::fs::read_to_string(path).map_err(|source| KeySetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_jwks(&content, issuers)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn check(&self, token: &str, audience: &str) -> Result<Identity, VerifyError> {
        if token.is_empty() {
            return Err(VerifyError::EmptyToken);
        }
        let header = decode_header(token).map_err(|e| VerifyError::Invalid(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::Invalid(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let key = header
            .kid
            .as_ref()
            .and_then(|kid| self.keys.get(kid))
            .ok_or_else(|| VerifyError::UnknownKey(header.kid.clone()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);
        if !self.issuers.is_empty() {
            validation.set_issuer(self.issuers.as_slice());
        }

        let data = decode::<IdTokenClaims>(token, key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            ErrorKind::InvalidAudience => VerifyError::AudienceMismatch {
                expected: audience.to_string(),
            },
            _ => VerifyError::Invalid(e.to_string()),
        })?;
        Ok(Identity {
            subject: data.claims.sub,
            email: data.claims.email,
        })
    }
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .field("issuers", &self.issuers)
            .finish()
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str, audience: &str) -> BoxFuture<'static, Result<Identity, VerifyError>> {
        Box::pin(future::ready(self.check(token, audience)))
    }
}

/// Development verifier: any non-empty token is accepted as its own subject.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsecureVerifier;

impl TokenVerifier for InsecureVerifier {
    fn verify(&self, token: &str, _audience: &str) -> BoxFuture<'static, Result<Identity, VerifyError>> {
        let outcome = if token.is_empty() {
            Err(VerifyError::EmptyToken)
        } else {
            Ok(Identity {
                subject: token.to_string(),
                email: None,
            })
        };
        Box::pin(future::ready(outcome))
    }
}
