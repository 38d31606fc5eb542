// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, default values and the startup configuration
//! loaded from them.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for stored content | `/data` |
//! | `AUDIO_STORAGE_DIR` | Ciphertext base directory | `$DATA_DIR/audio` |
//! | `METADATA_DB_PATH` | redb metadata database file | `$DATA_DIR/metadata.redb` |
//! | `MASTER_SECRET` | Base64 32-byte master secret | Required |
//! | `PBKDF2_ITERATIONS` | Key derivation rounds (at least 100000) | `100000` |
//! | `DEFAULT_RETENTION_DAYS` | System-wide retention in days (1 to 36500) | Unset (keep forever) |
//! | `DEFAULT_QUOTA_BYTES` | Per-owner quota when none is set | `1073741824` |
//! | `RETENTION_SCAN_INTERVAL_SECS` | Seconds between retention scans | `3600` |
//! | `HOST` | Health server bind address | `0.0.0.0` |
//! | `PORT` | Health server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::{CryptoError, MasterSecret, MIN_PBKDF2_ITERATIONS};
use crate::logging::LogFormat;
use crate::storage::quota::DEFAULT_QUOTA_BYTES;
use crate::storage::validate_retention;

/// Environment variable name for the root data directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const AUDIO_STORAGE_DIR_ENV: &str = "AUDIO_STORAGE_DIR";
pub const METADATA_DB_PATH_ENV: &str = "METADATA_DB_PATH";
/// Never logged; only its decoded length is ever checked.
pub const MASTER_SECRET_ENV: &str = "MASTER_SECRET";
pub const PBKDF2_ITERATIONS_ENV: &str = "PBKDF2_ITERATIONS";
pub const DEFAULT_RETENTION_DAYS_ENV: &str = "DEFAULT_RETENTION_DAYS";
pub const DEFAULT_QUOTA_BYTES_ENV: &str = "DEFAULT_QUOTA_BYTES";
pub const RETENTION_SCAN_INTERVAL_ENV: &str = "RETENTION_SCAN_INTERVAL_SECS";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("invalid master secret: {0}")]
    Secret(#[from] CryptoError),
}

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub metadata_db_path: PathBuf,
    pub master_secret: MasterSecret,
    pub pbkdf2_iterations: u32,
    pub default_retention_days: Option<u32>,
    pub default_quota_bytes: u64,
    pub scan_interval: Duration,
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.into()));
        let audio_dir = get(AUDIO_STORAGE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("audio"));
        let metadata_db_path = get(METADATA_DB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("metadata.redb"));

        let master_secret = MasterSecret::from_base64(
            &get(MASTER_SECRET_ENV).ok_or(ConfigError::Missing(MASTER_SECRET_ENV))?,
        )?;

        let pbkdf2_iterations =
            parse_or(get(PBKDF2_ITERATIONS_ENV), PBKDF2_ITERATIONS_ENV, MIN_PBKDF2_ITERATIONS)?;
        if pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(ConfigError::Invalid {
                name: PBKDF2_ITERATIONS_ENV,
                reason: format!("must be at least {MIN_PBKDF2_ITERATIONS}"),
            });
        }

        let default_retention_days = get(DEFAULT_RETENTION_DAYS_ENV)
            .map(|v| parse::<u32>(&v, DEFAULT_RETENTION_DAYS_ENV))
            .transpose()?;
        validate_retention(default_retention_days).map_err(|e| ConfigError::Invalid {
            name: DEFAULT_RETENTION_DAYS_ENV,
            reason: e.to_string(),
        })?;

        let default_quota_bytes =
            parse_or(get(DEFAULT_QUOTA_BYTES_ENV), DEFAULT_QUOTA_BYTES_ENV, DEFAULT_QUOTA_BYTES)?;

        let scan_secs = parse_or(
            get(RETENTION_SCAN_INTERVAL_ENV),
            RETENTION_SCAN_INTERVAL_ENV,
            DEFAULT_SCAN_INTERVAL_SECS,
        )?;
        if scan_secs == 0 {
            return Err(ConfigError::Invalid {
                name: RETENTION_SCAN_INTERVAL_ENV,
                reason: "must be positive".to_string(),
            });
        }

        let host = get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or(get(PORT_ENV), PORT_ENV, DEFAULT_PORT)?;
        let bind_addr: SocketAddr =
            format!("{host}:{port}")
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                    name: HOST_ENV,
                    reason: e.to_string(),
                })?;

        let log_format = get(LOG_FORMAT_ENV)
            .map(|v| parse::<LogFormat>(&v, LOG_FORMAT_ENV))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            data_dir,
            audio_dir,
            metadata_db_path,
            master_secret,
            pbkdf2_iterations,
            default_retention_days,
            default_quota_bytes,
            scan_interval: Duration::from_secs(scan_secs),
            bind_addr,
            log_format,
        })
    }
}

fn parse<T>(value: &str, name: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_or<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |v| parse(&v, name))
}
