// src/targets.rs
//! Scan target enumeration
//!
//! Expands CIDR blocks, port ranges and per-address SNI hostnames into a
//! lazy, deterministic sequence of [`Target`]s. Address blocks are walked
//! with a 128-bit cursor so even very large IPv6 ranges are never
//! materialized.

use ipnet::IpNet;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::types::Target;

/// Split comma-separated list entries, trimming whitespace and dropping blanks
fn split_entries(entries: &[String]) -> impl Iterator<Item = &str> {
    entries
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
}

/// An inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl FromStr for PortRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidPortRange {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let parse_port = |piece: &str| -> Result<u16, ConfigError> {
            let port: u16 = piece
                .trim()
                .parse()
                .map_err(|_| invalid("not a port number between 1 and 65535"))?;
            if port == 0 {
                return Err(invalid("port 0 is not scannable"));
            }
            Ok(port)
        };

        let (start, end) = match s.split_once('-') {
            Some((start, end)) => (parse_port(start)?, parse_port(end)?),
            None => {
                let port = parse_port(s)?;
                (port, port)
            }
        };

        if start > end {
            return Err(invalid("range start is greater than range end"));
        }

        Ok(PortRange { start, end })
    }
}

/// Parse a list of port entries; each entry may hold several comma-separated ranges
pub fn parse_port_ranges(entries: &[String]) -> Result<Vec<PortRange>, ConfigError> {
    split_entries(entries).map(PortRange::from_str).collect()
}

/// A parsed CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressBlock {
    net: IpNet,
}

impl AddressBlock {
    /// Number of addresses in the block, minus one
    fn last_offset(&self) -> u128 {
        let host_bits = u32::from(self.net.max_prefix_len() - self.net.prefix_len());
        if host_bits >= 128 {
            u128::MAX
        } else {
            (1u128 << host_bits) - 1
        }
    }

    /// Number of addresses in the block; `None` when it does not fit in a u128 (`::/0`)
    pub fn address_count(&self) -> Option<u128> {
        self.last_offset().checked_add(1)
    }

    pub fn cursor(&self) -> AddressCursor {
        let (base, v4) = match self.net.network() {
            IpAddr::V4(addr) => (u128::from(u32::from(addr)), true),
            IpAddr::V6(addr) => (u128::from(addr), false),
        };
        AddressCursor {
            base,
            v4,
            last_offset: self.last_offset(),
            next_offset: Some(0),
        }
    }
}

impl FromStr for AddressBlock {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidCidr {
            value: s.to_string(),
            reason,
        };

        let net = if s.contains('/') {
            s.parse::<IpNet>().map_err(|e| invalid(e.to_string()))?
        } else {
            let addr: IpAddr = s.parse().map_err(|e: std::net::AddrParseError| invalid(e.to_string()))?;
            let host_prefix = if addr.is_ipv4() { 32 } else { 128 };
            IpNet::new(addr, host_prefix).map_err(|e| invalid(e.to_string()))?
        };

        Ok(AddressBlock { net: net.trunc() })
    }
}

/// Parse a list of CIDR entries; each entry may hold several comma-separated blocks
pub fn parse_address_blocks(entries: &[String]) -> Result<Vec<AddressBlock>, ConfigError> {
    split_entries(entries).map(AddressBlock::from_str).collect()
}

/// Cursor over the addresses of one block, in increasing order
#[derive(Debug, Clone)]
pub struct AddressCursor {
    base: u128,
    v4: bool,
    last_offset: u128,
    next_offset: Option<u128>,
}

impl AddressCursor {
    pub fn has_next(&self) -> bool {
        self.next_offset.is_some()
    }

    fn address_at(&self, offset: u128) -> IpAddr {
        let value = self.base + offset;
        if self.v4 {
            IpAddr::V4(Ipv4Addr::from(value as u32))
        } else {
            IpAddr::V6(Ipv6Addr::from(value))
        }
    }
}

impl Iterator for AddressCursor {
    type Item = IpAddr;

    fn next(&mut self) -> Option<IpAddr> {
        let offset = self.next_offset?;
        self.next_offset = if offset < self.last_offset {
            Some(offset + 1)
        } else {
            None
        };
        Some(self.address_at(offset))
    }
}

/// Extra SNI hostnames keyed by literal address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SniMap {
    hostnames: HashMap<IpAddr, Vec<String>>,
}

impl SniMap {
    /// Build from configuration, where keys are address literals
    pub fn from_config(raw: &HashMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut hostnames = HashMap::with_capacity(raw.len());
        for (key, names) in raw {
            let ip: IpAddr = key
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidSniKey(key.clone()))?;
            let names: Vec<String> = names.iter().map(|n| n.trim().to_string()).collect();
            hostnames.entry(ip).or_insert_with(Vec::new).extend(names);
        }
        Ok(Self { hostnames })
    }

    pub fn insert(&mut self, ip: IpAddr, names: Vec<String>) {
        self.hostnames.insert(ip, names);
    }

    /// Hostnames to try for `ip`, always ending with exactly one empty (no SNI) entry
    pub fn hostnames_for(&self, ip: &IpAddr) -> Vec<String> {
        let mut names = self.hostnames.get(ip).cloned().unwrap_or_default();
        if !names.iter().any(String::is_empty) {
            names.push(String::new());
        }
        names
    }
}

/// Validated description of what one job scans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescription {
    pub blocks: Vec<AddressBlock>,
    pub ports: Vec<PortRange>,
}

impl JobDescription {
    /// Parse raw CIDR and port entries, failing on the first malformed one
    pub fn parse(cidrs: &[String], ports: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            blocks: parse_address_blocks(cidrs)?,
            ports: parse_port_ranges(ports)?,
        })
    }

    pub fn port_count(&self) -> usize {
        self.ports.iter().map(PortRange::len).sum()
    }
}

/// Single-pass iterator over every target of a job
///
/// Order: block, then address, then port range, then port, then hostname.
/// Two enumerators built from the same inputs yield identical sequences.
pub struct TargetEnumerator<'a> {
    job: &'a JobDescription,
    sni: &'a SniMap,
    block_index: usize,
    addresses: Option<AddressCursor>,
    current_ip: Option<IpAddr>,
    ports: Vec<u16>,
    port_index: usize,
    hostnames: Vec<String>,
    hostname_index: usize,
}

impl<'a> TargetEnumerator<'a> {
    pub fn new(job: &'a JobDescription, sni: &'a SniMap) -> Self {
        let ports = job.ports.iter().flat_map(PortRange::iter).collect();
        Self {
            job,
            sni,
            block_index: 0,
            addresses: None,
            current_ip: None,
            ports,
            port_index: 0,
            hostnames: Vec::new(),
            hostname_index: 0,
        }
    }

    /// Count targets by consuming a fresh pass
    pub fn count_targets(job: &JobDescription, sni: &SniMap) -> u64 {
        TargetEnumerator::new(job, sni).fold(0u64, |count, _| count + 1)
    }

    /// Move to the next address, loading its hostnames; false once every block is done
    fn advance_address(&mut self) -> bool {
        loop {
            if let Some(ip) = self.addresses.as_mut().and_then(Iterator::next) {
                self.current_ip = Some(ip);
                self.hostnames = self.sni.hostnames_for(&ip);
                self.port_index = 0;
                self.hostname_index = 0;
                return true;
            }

            let Some(block) = self.job.blocks.get(self.block_index) else {
                self.current_ip = None;
                return false;
            };
            self.addresses = Some(block.cursor());
            self.block_index += 1;
        }
    }
}

impl Iterator for TargetEnumerator<'_> {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        if self.ports.is_empty() {
            return None;
        }

        loop {
            if let Some(ip) = self.current_ip {
                if self.hostname_index >= self.hostnames.len() {
                    self.hostname_index = 0;
                    self.port_index += 1;
                }
                if self.port_index < self.ports.len() {
                    let target = Target::new(
                        ip,
                        self.ports[self.port_index],
                        self.hostnames[self.hostname_index].clone(),
                    );
                    self.hostname_index += 1;
                    return Some(target);
                }
            }

            if !self.advance_address() {
                return None;
            }
        }
    }
}
