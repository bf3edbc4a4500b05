//! Configuration types for the IPv4LL engine
//!
//! This module defines the configuration a caller hands to
//! [`crate::Ipv4ll::start`], plus the small value types it is built from.

use crate::address::is_usable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Length of an Ethernet hardware address
pub const ETH_ALEN: usize = 6;

/// Engine configuration, fixed for the duration of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4llConfig {
    /// Index of the interface to probe on
    pub ifindex: u32,

    /// Link-layer transport of the interface
    #[serde(default)]
    pub transport: Transport,

    /// Hardware address of the interface
    pub link_address: LinkAddress,

    /// Enumeration seed
    ///
    /// Uniquely determines the sequence of candidate addresses for this
    /// interface. It should stay constant between runs, and no two interfaces
    /// should share a value.
    #[serde(default)]
    pub enumeration: u64,

    /// Probe timeout in milliseconds, handed to the ACD engine as-is
    #[serde(default = "default_timeout_msec")]
    pub timeout_msec: u64,

    /// Address to try first instead of a selected one
    #[serde(default)]
    pub requested_address: Option<Ipv4Addr>,

    /// What to do after losing an announced address
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

impl Ipv4llConfig {
    /// Create a new Ethernet configuration with defaults
    pub fn new(ifindex: u32, link_address: LinkAddress) -> Self {
        Self {
            ifindex,
            transport: Transport::Ethernet,
            link_address,
            enumeration: 0,
            timeout_msec: default_timeout_msec(),
            requested_address: None,
            conflict_policy: ConflictPolicy::default(),
        }
    }

    /// Set the transport
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Set the enumeration seed
    pub fn with_enumeration(mut self, enumeration: u64) -> Self {
        self.enumeration = enumeration;
        self
    }

    /// Set the probe timeout
    pub fn with_timeout_msec(mut self, timeout_msec: u64) -> Self {
        self.timeout_msec = timeout_msec;
        self
    }

    /// Request a specific address for the first probe
    pub fn with_requested_address(mut self, address: Ipv4Addr) -> Self {
        self.requested_address = Some(address);
        self
    }

    /// Set the conflict policy
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Validate the configuration
    ///
    /// Rejects unsupported transports, hardware addresses of the wrong
    /// length, and requested addresses outside 169.254.1.0–169.254.254.255.
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self.transport {
            Transport::Ethernet => {
                if self.link_address.len() != ETH_ALEN {
                    return Err(crate::Error::invalid_argument(format!(
                        "Ethernet link address must be {} bytes, got {}",
                        ETH_ALEN,
                        self.link_address.len()
                    )));
                }
            }
            other => {
                return Err(crate::Error::invalid_argument(format!(
                    "Transport {} is not supported",
                    other
                )));
            }
        }

        if let Some(address) = self.requested_address
            && !is_usable(address)
        {
            return Err(crate::Error::invalid_argument(format!(
                "Requested address {} is outside 169.254.1.0-169.254.254.255",
                address
            )));
        }

        Ok(())
    }
}

fn default_timeout_msec() -> u64 {
    9_000
}

/// Link-layer transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Ethernet (the only transport ARP-based ACD is implemented for)
    #[default]
    Ethernet,
    /// InfiniBand (IPoIB)
    Infiniband,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Ethernet => f.write_str("ethernet"),
            Transport::Infiniband => f.write_str("infiniband"),
        }
    }
}

impl FromStr for Transport {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethernet" => Ok(Transport::Ethernet),
            "infiniband" => Ok(Transport::Infiniband),
            _ => Err(crate::Error::invalid_argument(format!(
                "Unknown transport '{}'",
                s
            ))),
        }
    }
}

/// Behavior after an announced address is lost to another host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Report the conflict, select a fresh candidate and keep probing
    #[default]
    Reselect,
    /// Report the conflict and stop; the caller restarts when it sees fit
    Stop,
}

impl FromStr for ConflictPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reselect" => Ok(ConflictPolicy::Reselect),
            "stop" => Ok(ConflictPolicy::Stop),
            _ => Err(crate::Error::invalid_argument(format!(
                "Unknown conflict policy '{}'",
                s
            ))),
        }
    }
}

/// A link-layer (hardware) address
///
/// Serialized in the usual colon-separated hex form, e.g. `fe:dc:ba:98:76:54`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinkAddress(Vec<u8>);

impl LinkAddress {
    /// Create a link address from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Address length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the address has no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<[u8; ETH_ALEN]> for LinkAddress {
    fn from(bytes: [u8; ETH_ALEN]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&[u8]> for LinkAddress {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkAddress({})", self)
    }
}

impl FromStr for LinkAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(crate::Error::invalid_argument("Link address cannot be empty"));
        }

        s.split(':')
            .map(|octet| {
                if octet.is_empty() || octet.len() > 2 {
                    return Err(crate::Error::invalid_argument(format!(
                        "Malformed link address '{}'",
                        s
                    )));
                }
                u8::from_str_radix(octet, 16).map_err(|_| {
                    crate::Error::invalid_argument(format!("Malformed link address '{}'", s))
                })
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(LinkAddress)
    }
}

impl TryFrom<String> for LinkAddress {
    type Error = crate::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LinkAddress> for String {
    fn from(addr: LinkAddress) -> Self {
        addr.to_string()
    }
}
