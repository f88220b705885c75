// src/cert_parser.rs
use sha2::{Digest, Sha256};
use std::net::{Ipv4Addr, Ipv6Addr};
use x509_parser::der_parser::oid::Oid;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::objects::{oid2abbrev, oid_registry};
use x509_parser::prelude::*;

use crate::error::EncodingError;
use crate::types::{CertificateRecord, DnComponent, DnType, PublicKeyAlgorithm, SubjectAltName};

/// Certificate parser producing storage-ready records
pub struct CertificateParser;

impl CertificateParser {
    /// SHA-256 over the raw DER bytes
    pub fn fingerprint(der: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(der);
        hasher.finalize().to_vec()
    }

    /// Parse a DER certificate into a normalized record
    pub fn parse(der: &[u8]) -> Result<CertificateRecord, EncodingError> {
        let fingerprint = Self::fingerprint(der);

        let (_, cert) = X509Certificate::from_der(der).map_err(|e| EncodingError::Certificate {
            fingerprint: hex::encode(&fingerprint),
            reason: format!("{:?}", e),
        })?;

        let (public_key_algorithm, public_key_bits) = Self::public_key(&cert);
        let signature_id = Self::signature_identifier(&cert.signature_algorithm.algorithm);
        let (signature_algorithm, signature_hash_algorithm) = Self::split_signature(&signature_id);

        Ok(CertificateRecord {
            fingerprint,
            der: der.to_vec(),
            version: cert.version().0 + 1,
            public_key_algorithm,
            public_key_bits,
            signature_algorithm,
            signature_hash_algorithm,
            valid_from: cert.validity().not_before.timestamp(),
            valid_to: cert.validity().not_after.timestamp(),
            issuer: Self::dn_components(cert.issuer(), DnType::Issuer),
            subject: Self::dn_components(cert.subject(), DnType::Subject),
            subject_alt_names: Self::subject_alt_names(&cert),
        })
    }

    /// Flatten a DN into one component per attribute value, keeping encoding order
    fn dn_components(name: &X509Name, dn_type: DnType) -> Vec<DnComponent> {
        name.iter()
            .flat_map(|rdn| rdn.iter())
            .enumerate()
            .map(|(order, attr)| {
                let key = oid2abbrev(attr.attr_type(), oid_registry())
                    .map(str::to_string)
                    .unwrap_or_else(|_| attr.attr_type().to_id_string());
                let value = attr
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|_| hex::encode(attr.attr_value().data));
                DnComponent {
                    dn_type,
                    key,
                    value,
                    order: order as u32,
                }
            })
            .collect()
    }

    fn subject_alt_names(cert: &X509Certificate) -> Vec<SubjectAltName> {
        let mut names = Vec::new();

        for ext in cert.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
                for general_name in &san.general_names {
                    let (kind, value) = match general_name {
                        GeneralName::DNSName(name) => ("DNS", name.to_string()),
                        GeneralName::IPAddress(bytes) => ("IP Address", Self::format_ip(bytes)),
                        GeneralName::RFC822Name(mail) => ("email", mail.to_string()),
                        GeneralName::URI(uri) => ("URI", uri.to_string()),
                        GeneralName::DirectoryName(dn) => ("DirName", dn.to_string()),
                        GeneralName::RegisteredID(oid) => ("Registered ID", oid.to_id_string()),
                        GeneralName::OtherName(oid, _) => ("othername", oid.to_id_string()),
                        GeneralName::X400Address(_) => ("X400Name", String::new()),
                        GeneralName::EDIPartyName(_) => ("EdiPartyName", String::new()),
                        #[allow(unreachable_patterns)]
                        _ => continue,
                    };
                    names.push(SubjectAltName {
                        kind: kind.to_string(),
                        value,
                    });
                }
            }
        }

        names
    }

    fn format_ip(bytes: &[u8]) -> String {
        if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
            Ipv4Addr::from(octets).to_string()
        } else if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
            Ipv6Addr::from(octets).to_string()
        } else {
            hex::encode(bytes)
        }
    }

    /// Key family from the SPKI algorithm OID, bit length from the parsed key
    fn public_key(cert: &X509Certificate) -> (PublicKeyAlgorithm, u32) {
        let spki = cert.public_key();
        let algorithm = match spki.algorithm.algorithm.to_id_string().as_str() {
            "1.2.840.113549.1.1.1" | "1.2.840.113549.1.1.10" => PublicKeyAlgorithm::Rsa,
            "1.2.840.10040.4.1" => PublicKeyAlgorithm::Dsa,
            "1.2.840.10046.2.1" | "1.2.840.113549.1.3.1" => PublicKeyAlgorithm::Dh,
            "1.2.840.10045.2.1" => PublicKeyAlgorithm::Ec,
            _ => PublicKeyAlgorithm::Unknown,
        };
        let bits = spki
            .parsed()
            .map(|key| key.key_size() as u32)
            .unwrap_or(0);
        (algorithm, bits)
    }

    /// Combined signature identifier in OpenSSL short-name form
    fn signature_identifier(oid: &Oid) -> String {
        let id = oid.to_id_string();
        let name = match id.as_str() {
            "1.2.840.113549.1.1.4" => "RSA-MD5",
            "1.2.840.113549.1.1.5" => "RSA-SHA1",
            "1.2.840.113549.1.1.14" => "RSA-SHA224",
            "1.2.840.113549.1.1.11" => "RSA-SHA256",
            "1.2.840.113549.1.1.12" => "RSA-SHA384",
            "1.2.840.113549.1.1.13" => "RSA-SHA512",
            "1.2.840.113549.1.1.10" => "RSASSA-PSS",
            "1.2.840.10040.4.3" => "DSA-SHA1",
            "2.16.840.1.101.3.4.3.1" => "DSA-SHA224",
            "2.16.840.1.101.3.4.3.2" => "DSA-SHA256",
            "1.2.840.10045.4.1" => "ecdsa-with-SHA1",
            "1.2.840.10045.4.3.1" => "ecdsa-with-SHA224",
            "1.2.840.10045.4.3.2" => "ecdsa-with-SHA256",
            "1.2.840.10045.4.3.3" => "ecdsa-with-SHA384",
            "1.2.840.10045.4.3.4" => "ecdsa-with-SHA512",
            "1.3.101.112" => "ED25519",
            "1.3.101.113" => "ED448",
            _ => return id,
        };
        name.to_string()
    }

    /// Split a combined identifier into (algorithm, hash); identifiers without a digest keep an empty hash
    pub fn split_signature(identifier: &str) -> (String, String) {
        let split = identifier
            .split_once("-with-")
            .or_else(|| identifier.split_once('-'));

        match split {
            Some((algorithm, hash)) if hash.starts_with("SHA") || hash.starts_with("MD") => {
                (algorithm.to_string(), hash.to_string())
            }
            _ => (identifier.to_string(), String::new()),
        }
    }
}
