//! Object Types and Storage Keys
//!
//! Each object type has a validator; the key normalizer turns a validated
//! (type, value) pair into the canonical object value and its storage key.
//!
//! IPv4-mapped IPv6 addresses collapse to plain IPv4. True IPv6 addresses are
//! masked to the configured prefix width and the width is appended to the key,
//! so changing the width partitions previously stored IPv6 entries.

use ipnet::Ipv6Net;
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

use super::error::{ReputationError, Result};

pub const TYPE_IP: &str = "ip";
pub const TYPE_EMAIL: &str = "email";

/// Default IPv6 prefix width used for masking
pub const DEFAULT_IP6_PREFIX: u8 = 64;

const KEY_SEPARATOR: char = ' ';

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static email regex")
});

/// Object types the service knows how to validate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Ip,
    Email,
}

impl ObjectType {
    pub fn parse(typestr: &str) -> Result<Self> {
        match typestr {
            TYPE_IP => Ok(ObjectType::Ip),
            TYPE_EMAIL => Ok(ObjectType::Email),
            other => Err(ReputationError::UnknownType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Ip => TYPE_IP,
            ObjectType::Email => TYPE_EMAIL,
        }
    }

    /// Check that `value` is well formed for this type
    pub fn validate(&self, value: &str) -> Result<()> {
        match self {
            ObjectType::Ip => value
                .parse::<IpAddr>()
                .map(|_| ())
                .map_err(|_| ReputationError::InvalidAddress(value.to_string())),
            ObjectType::Email => {
                if EMAIL_RE.is_match(value) {
                    Ok(())
                } else {
                    Err(ReputationError::InvalidValue {
                        kind: TYPE_EMAIL,
                        value: value.to_string(),
                    })
                }
            }
        }
    }
}

/// Validate a raw (type, value) pair as received from a caller
pub fn validate_type(typestr: &str, value: &str) -> Result<ObjectType> {
    let object_type = ObjectType::parse(typestr)?;
    object_type.validate(value)?;
    Ok(object_type)
}

/// Derives canonical object values and storage keys
#[derive(Debug, Clone, Copy)]
pub struct KeyNormalizer {
    ip6_prefix: u8,
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_IP6_PREFIX)
    }
}

impl KeyNormalizer {
    pub fn new(ip6_prefix: u8) -> Self {
        Self {
            ip6_prefix: ip6_prefix.min(128),
        }
    }

    pub fn ip6_prefix(&self) -> u8 {
        self.ip6_prefix
    }

    /// Canonical form of `value`; identity for every type but `ip`
    pub fn normalize(&self, typestr: &str, value: &str) -> Result<String> {
        if typestr != TYPE_IP {
            return Ok(value.to_string());
        }
        match parse_ip(value)? {
            IpAddr::V4(v4) => Ok(v4.to_string()),
            IpAddr::V6(v6) => Ipv6Net::new(v6, self.ip6_prefix)
                .map(|net| net.network().to_string())
                .map_err(|_| ReputationError::InvalidAddress(value.to_string())),
        }
    }

    /// Storage key for a (type, value) pair
    pub fn derive_key(&self, typestr: &str, value: &str) -> Result<String> {
        if typestr.is_empty() || value.is_empty() {
            return Err(ReputationError::MissingField(if typestr.is_empty() {
                "type"
            } else {
                "object"
            }));
        }
        let normalized = self.normalize(typestr, value)?;
        if typestr == TYPE_IP && matches!(parse_ip(value)?, IpAddr::V6(_)) {
            return Ok(format!(
                "{typestr}{KEY_SEPARATOR}{normalized}#{}",
                self.ip6_prefix
            ));
        }
        Ok(format!("{typestr}{KEY_SEPARATOR}{normalized}"))
    }
}

/// Parse an address, collapsing IPv4-mapped IPv6 to IPv4
fn parse_ip(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .map(|addr| addr.to_canonical())
        .map_err(|_| ReputationError::InvalidAddress(value.to_string()))
}
