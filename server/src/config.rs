//! Server configuration
//!
//! Settings come from three layers: built-in defaults, an optional TOML file
//! and command line flags. Later layers override earlier ones.

use crate::auth::{
    InsecureVerifier, JwtVerifier, KeySetError, StaticTokenVerifier, TokenEntry, TokenVerifier,
    DEFAULT_ISSUERS,
};
use clap::Parser;
use log::info;
use serde::Deserialize;
use shared::DEFAULT_MAX_CHAT_CHARS;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Environment variable consulted when no audience is configured.
pub const AUDIENCE_ENV: &str = "GOOGLE_CLIENT_ID";

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[clap(author, version, about)]
pub struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    pub host: Option<String>,
    /// Server port to listen on
    #[clap(short, long)]
    pub port: Option<u16>,
    /// Path to a TOML configuration file
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Expected audience of identity tokens (defaults to $GOOGLE_CLIENT_ID)
    #[clap(long)]
    pub audience: Option<String>,
    /// JSON Web Key Set used to verify signed ID tokens
    #[clap(long)]
    pub jwks: Option<PathBuf>,
    /// Accept any non-empty token as its own identity (development only)
    #[clap(long)]
    pub insecure_auth: bool,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Keys(#[from] KeySetError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Longest chat message in characters.
    pub max_chat_length: usize,
    /// Verified subjects refused at authentication.
    pub banned_subjects: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_chat_length: DEFAULT_MAX_CHAT_CHARS,
            banned_subjects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub audience: Option<String>,
    pub insecure: bool,
    /// Signed ID token verification; takes precedence over `tokens`.
    pub jwt: Option<JwtConfig>,
    pub tokens: HashMap<String, TokenEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JwtConfig {
    pub jwks_file: PathBuf,
    /// Accepted `iss` values; an empty list disables the issuer check.
    #[serde(default = "default_issuers")]
    pub issuers: Vec<String>,
}

fn default_issuers() -> Vec<String> {
    DEFAULT_ISSUERS.iter().map(|issuer| issuer.to_string()).collect()
}

impl ServerConfig {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the effective configuration for a set of parsed arguments.
    pub fn resolve(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args, std::env::var(AUDIENCE_ENV).ok());
        Ok(config)
    }

    fn apply_args(&mut self, args: &Args, audience_env: Option<String>) {
        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(audience) = args.audience.clone() {
            self.auth.audience = Some(audience);
        } else if self.auth.audience.is_none() {
            self.auth.audience = audience_env;
        }
        if let Some(jwks_file) = &args.jwks {
            match &mut self.auth.jwt {
                Some(jwt) => jwt.jwks_file = jwks_file.clone(),
                None => {
                    self.auth.jwt = Some(JwtConfig {
                        jwks_file: jwks_file.clone(),
                        issuers: default_issuers(),
                    })
                }
            }
        }
        if args.insecure_auth {
            self.auth.insecure = true;
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn audience(&self) -> &str {
        self.auth.audience.as_deref().unwrap_or("")
    }

    /// Picks the verifier: insecure, then signed ID tokens, then the static
    /// token table.
    pub fn verifier(&self) -> Result<Arc<dyn TokenVerifier>, ConfigError> {
        if self.auth.insecure {
            return Ok(Arc::new(InsecureVerifier));
        }
        if let Some(jwt) = &self.auth.jwt {
            let verifier = JwtVerifier::from_jwks_file(&jwt.jwks_file, jwt.issuers.clone())?;
            info!(
                "Verifying ID tokens with {} keys from {}",
                verifier.key_count(),
                jwt.jwks_file.display()
            );
            return Ok(Arc::new(verifier));
        }
        Ok(Arc::new(StaticTokenVerifier::new(self.auth.tokens.clone())))
    }
}
