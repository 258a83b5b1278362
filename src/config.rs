// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, default values and the typed configuration
//! loaded once at startup. Engines receive an [`EngineConfig`] at
//! construction and never read the environment themselves.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the redb database | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `TLS_CERT_PATH` | PEM certificate chain; enables HTTPS with `TLS_KEY_PATH` | unset |
//! | `TLS_KEY_PATH` | PEM private key | unset |
//! | `MASTER_DB_ENCRYPTION_KEY` | Base64 32-byte key encrypting server private keys at rest | unset (plain) |
//! | `ACTIVATION_VALIDITY_SECONDS` | Pairing window before an uncommitted activation expires | `120` |
//! | `DEFAULT_MAX_FAILED_ATTEMPTS` | Lockout threshold when the caller gives none | `5` |
//! | `STORE_LOCK_TIMEOUT_MS` | Maximum wait for an activation row lock | `5000` |
//! | `APPLICATION_NAME` | Application ensured at startup | `default` |
//! | `APPLICATION_VERSION` | Version of that application ensured at startup | `default` |
//! | `APPLICATION_KEY` | Base64 application key for a newly created version | generated |
//! | `APPLICATION_SECRET` | Base64 application secret, required with `APPLICATION_KEY` | generated |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::encoding;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

/// Base64 of exactly 32 bytes. Without it server private keys are stored
/// unencrypted.
pub const MASTER_DB_ENCRYPTION_KEY_ENV: &str = "MASTER_DB_ENCRYPTION_KEY";

pub const ACTIVATION_VALIDITY_SECONDS_ENV: &str = "ACTIVATION_VALIDITY_SECONDS";
pub const DEFAULT_MAX_FAILED_ATTEMPTS_ENV: &str = "DEFAULT_MAX_FAILED_ATTEMPTS";
pub const STORE_LOCK_TIMEOUT_MS_ENV: &str = "STORE_LOCK_TIMEOUT_MS";
pub const APPLICATION_NAME_ENV: &str = "APPLICATION_NAME";
pub const APPLICATION_VERSION_ENV: &str = "APPLICATION_VERSION";
pub const APPLICATION_KEY_ENV: &str = "APPLICATION_KEY";
pub const APPLICATION_SECRET_ENV: &str = "APPLICATION_SECRET";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";
pub const DEFAULT_ACTIVATION_VALIDITY_SECONDS: u64 = 120;
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u64 = 5;
pub const DEFAULT_STORE_LOCK_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_APPLICATION_NAME: &str = "default";
pub const DEFAULT_APPLICATION_VERSION: &str = "default";

/// Database file name inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "auth.redb";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("MASTER_DB_ENCRYPTION_KEY must be base64 of exactly 32 bytes")]
    InvalidMasterKey,

    #[error("APPLICATION_KEY and APPLICATION_SECRET must both be set to non-empty base64")]
    InvalidApplicationCredentials,
}

/// Settings the protocol engines depend on.
#[derive(Clone)]
pub struct EngineConfig {
    pub activation_validity: Duration,
    pub default_max_failed_attempts: u64,
    pub master_db_encryption_key: Option<Vec<u8>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            activation_validity: Duration::from_secs(DEFAULT_ACTIVATION_VALIDITY_SECONDS),
            default_max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            master_db_encryption_key: None,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("activation_validity", &self.activation_validity)
            .field("default_max_failed_attempts", &self.default_max_failed_attempts)
            .field(
                "master_db_encryption_key",
                &self.master_db_encryption_key.as_ref().map(|_| "<set>"),
            )
            .finish()
    }
}

/// Fixed credentials for the version created at startup.
#[derive(Clone)]
pub struct ApplicationCredentials {
    pub application_key: String,
    pub application_secret: String,
}

impl std::fmt::Debug for ApplicationCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationCredentials")
            .field("application_key", &self.application_key)
            .field("application_secret", &"<set>")
            .finish()
    }
}

/// Application and version created at startup when missing, so a fresh
/// store can pair devices.
#[derive(Debug, Clone)]
pub struct ApplicationBootstrap {
    pub name: String,
    pub version: String,
    /// Random credentials are generated when unset.
    pub credentials: Option<ApplicationCredentials>,
}

impl Default for ApplicationBootstrap {
    fn default() -> Self {
        Self {
            name: DEFAULT_APPLICATION_NAME.to_string(),
            version: DEFAULT_APPLICATION_VERSION.to_string(),
            credentials: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub json_logs: bool,
    pub tls: Option<TlsPaths>,
    pub store_lock_timeout: Duration,
    pub engine: EngineConfig,
    pub application: ApplicationBootstrap,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let host = lookup(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port: u16 = parse_or(&lookup, PORT_ENV, DEFAULT_PORT)?;
        let bind_addr: SocketAddr =
            format!("{host}:{port}")
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    name: HOST_ENV,
                    value: host.clone(),
                })?;

        let json_logs = lookup(LOG_FORMAT_ENV)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let tls = match (lookup(TLS_CERT_PATH_ENV), lookup(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => None,
        };

        let master_db_encryption_key = match lookup(MASTER_DB_ENCRYPTION_KEY_ENV) {
            Some(value) => {
                let key = encoding::decode(&value).map_err(|_| ConfigError::InvalidMasterKey)?;
                if key.len() != 32 {
                    return Err(ConfigError::InvalidMasterKey);
                }
                Some(key)
            }
            None => None,
        };

        let default_max_failed_attempts: u64 = parse_or(
            &lookup,
            DEFAULT_MAX_FAILED_ATTEMPTS_ENV,
            DEFAULT_MAX_FAILED_ATTEMPTS,
        )?;
        if default_max_failed_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: DEFAULT_MAX_FAILED_ATTEMPTS_ENV,
                value: "0".to_string(),
            });
        }

        let credentials = match (lookup(APPLICATION_KEY_ENV), lookup(APPLICATION_SECRET_ENV)) {
            (Some(application_key), Some(application_secret)) => {
                for value in [&application_key, &application_secret] {
                    if !encoding::decode(value).is_ok_and(|bytes| !bytes.is_empty()) {
                        return Err(ConfigError::InvalidApplicationCredentials);
                    }
                }
                Some(ApplicationCredentials {
                    application_key,
                    application_secret,
                })
            }
            (None, None) => None,
            _ => return Err(ConfigError::InvalidApplicationCredentials),
        };

        Ok(Self {
            data_dir: data_dir.into(),
            bind_addr,
            json_logs,
            tls,
            store_lock_timeout: Duration::from_millis(parse_or(
                &lookup,
                STORE_LOCK_TIMEOUT_MS_ENV,
                DEFAULT_STORE_LOCK_TIMEOUT_MS,
            )?),
            engine: EngineConfig {
                activation_validity: Duration::from_secs(parse_or(
                    &lookup,
                    ACTIVATION_VALIDITY_SECONDS_ENV,
                    DEFAULT_ACTIVATION_VALIDITY_SECONDS,
                )?),
                default_max_failed_attempts,
                master_db_encryption_key,
            },
            application: ApplicationBootstrap {
                name: lookup(APPLICATION_NAME_ENV)
                    .unwrap_or_else(|| DEFAULT_APPLICATION_NAME.to_string()),
                version: lookup(APPLICATION_VERSION_ENV)
                    .unwrap_or_else(|| DEFAULT_APPLICATION_VERSION.to_string()),
                credentials,
            },
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}
