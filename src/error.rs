// src/error.rs
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Malformed scan configuration, detected before anything is persisted
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid CIDR '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("invalid port range '{value}': {reason}")]
    InvalidPortRange { value: String, reason: String },

    #[error("invalid SNI map key '{0}': not an IP address literal")]
    InvalidSniKey(String),

    #[error("invalid job configuration: {0}")]
    InvalidJob(String),
}

/// Why a single TLS probe did not yield a certificate chain
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(#[source] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid SNI hostname '{0}'")]
    InvalidServerName(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("peer presented no certificates")]
    EmptyChain,
}

/// Certificate bytes that could not be decoded
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("failed to parse X.509 certificate {fingerprint}: {reason}")]
    Certificate { fingerprint: String, reason: String },
}
