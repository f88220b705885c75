// src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::error::ProbeError;

/// One scan target: an address, a port and the SNI hostname to send
///
/// An empty `sni_hostname` means the handshake carries no SNI extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub ip: IpAddr,
    pub port: u16,
    pub sni_hostname: String,
}

impl Target {
    pub fn new(ip: IpAddr, port: u16, sni_hostname: impl Into<String>) -> Self {
        Self {
            ip,
            port,
            sni_hostname: sni_hostname.into(),
        }
    }

    pub fn has_sni(&self) -> bool {
        !self.sni_hostname.is_empty()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tls://[{}]:{}", self.ip, self.port)?;
        if self.has_sni() {
            write!(f, " [SNI hostname: {}]", self.sni_hostname)?;
        }
        Ok(())
    }
}

/// Raw DER certificates as returned by the handshake, leaf first
pub type Chain = Vec<Vec<u8>>;

/// Result of one probe, handed from the transport back to the scheduler
#[must_use = "every probe outcome must be recorded"]
#[derive(Debug)]
pub enum ProbeOutcome {
    Succeeded { target: Target, chain: Chain },
    Failed { target: Target, error: ProbeError },
}

impl ProbeOutcome {
    pub fn from_result(target: Target, result: Result<Chain, ProbeError>) -> Self {
        match result {
            Ok(chain) => ProbeOutcome::Succeeded { target, chain },
            Err(error) => ProbeOutcome::Failed { target, error },
        }
    }

    pub fn target(&self) -> &Target {
        match self {
            ProbeOutcome::Succeeded { target, .. } | ProbeOutcome::Failed { target, .. } => target,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Succeeded { .. })
    }
}

/// Public key families tracked in the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicKeyAlgorithm {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "DSA")]
    Dsa,
    #[serde(rename = "DH")]
    Dh,
    #[serde(rename = "EC")]
    Ec,
    #[serde(rename = "unknown")]
    Unknown,
}

impl PublicKeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicKeyAlgorithm::Rsa => "RSA",
            PublicKeyAlgorithm::Dsa => "DSA",
            PublicKeyAlgorithm::Dh => "DH",
            PublicKeyAlgorithm::Ec => "EC",
            PublicKeyAlgorithm::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PublicKeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which distinguished name a component belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnType {
    Issuer,
    Subject,
}

impl DnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnType::Issuer => "issuer",
            DnType::Subject => "subject",
        }
    }
}

/// A single attribute value of an issuer or subject DN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnComponent {
    pub dn_type: DnType,
    pub key: String,
    pub value: String,
    pub order: u32,
}

/// A single entry of the subjectAltName extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAltName {
    pub kind: String,
    pub value: String,
}

/// A certificate normalized for storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// SHA-256 of `der`
    pub fingerprint: Vec<u8>,
    pub der: Vec<u8>,
    /// 1-based X.509 version
    pub version: u32,
    pub public_key_algorithm: PublicKeyAlgorithm,
    pub public_key_bits: u32,
    pub signature_algorithm: String,
    pub signature_hash_algorithm: String,
    /// Unix seconds
    pub valid_from: i64,
    /// Unix seconds
    pub valid_to: i64,
    pub issuer: Vec<DnComponent>,
    pub subject: Vec<DnComponent>,
    pub subject_alt_names: Vec<SubjectAltName>,
}

impl CertificateRecord {
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(&self.fingerprint)
    }

    /// Issuer and subject components in insertion order
    pub fn dn_components(&self) -> impl Iterator<Item = &DnComponent> {
        self.issuer.iter().chain(self.subject.iter())
    }
}

/// Outcome of one job run, reported back to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub job_name: String,
    pub job_run_id: Option<i64>,
    pub total_targets: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl RunSummary {
    /// Summary of a run that had nothing to scan
    pub fn no_targets(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            ..Self::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.total_targets == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            return write!(f, "[{}] no targets", self.job_name);
        }
        write!(
            f,
            "[{}] scanned {} targets ({} with certificates, {} failed)",
            self.job_name, self.total_targets, self.succeeded, self.failed
        )
    }
}
