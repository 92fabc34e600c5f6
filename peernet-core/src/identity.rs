//! Peer identity: numeric account ID or network address. Display and parse forms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which variant an [`Identity`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Invalid,
    NumericId,
    NetworkAddress,
}

/// Address of a remote (or the local) peer.
///
/// Equality compares the variant first, then the payload, so a numeric ID never
/// equals a network address even when their textual forms overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    #[default]
    Invalid,
    NumericId(u64),
    NetworkAddress { host: String, port: u16 },
}

impl Identity {
    pub fn numeric(id: u64) -> Self {
        Identity::NumericId(id)
    }

    pub fn network_address(host: impl Into<String>, port: u16) -> Self {
        Identity::NetworkAddress {
            host: host.into(),
            port,
        }
    }

    pub fn invalid() -> Self {
        Identity::Invalid
    }

    /// A network address with an empty host has no textual form and is not valid.
    pub fn is_valid(&self) -> bool {
        match self {
            Identity::Invalid => false,
            Identity::NumericId(_) => true,
            Identity::NetworkAddress { host, .. } => !host.is_empty(),
        }
    }

    pub fn kind(&self) -> IdentityKind {
        match self {
            Identity::Invalid => IdentityKind::Invalid,
            Identity::NumericId(_) => IdentityKind::NumericId,
            Identity::NetworkAddress { .. } => IdentityKind::NetworkAddress,
        }
    }

    /// The numeric ID, if this is a numeric identity.
    pub fn numeric_id(&self) -> Option<u64> {
        match self {
            Identity::NumericId(id) => Some(*id),
            _ => None,
        }
    }

    /// Host and port, if this is a network-address identity.
    pub fn network_address_parts(&self) -> Option<(&str, u16)> {
        match self {
            Identity::NetworkAddress { host, port } => Some((host.as_str(), *port)),
            _ => None,
        }
    }

    /// Parse `id:<u64>` or `addr:<host>:<port>`. Scheme prefixes are case-insensitive,
    /// so the [`Display`](fmt::Display) output parses back to the same identity.
    ///
    /// Fails closed: any malformed input is an error, never a half-filled identity.
    pub fn parse(text: &str) -> Result<Identity, IdentityParseError> {
        let (scheme, rest) = text
            .split_once(':')
            .ok_or_else(|| IdentityParseError::UnknownScheme(text.to_string()))?;
        if scheme.eq_ignore_ascii_case("id") {
            parse_numeric(rest).map(Identity::NumericId)
        } else if scheme.eq_ignore_ascii_case("addr") {
            parse_address(rest)
        } else {
            Err(IdentityParseError::UnknownScheme(text.to_string()))
        }
    }
}

fn parse_numeric(digits: &str) -> Result<u64, IdentityParseError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdentityParseError::InvalidNumericId(digits.to_string()));
    }
    digits
        .parse::<u64>()
        .map_err(|_| IdentityParseError::InvalidNumericId(digits.to_string()))
}

fn parse_address(rest: &str) -> Result<Identity, IdentityParseError> {
    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        bracketed
            .rsplit_once("]:")
            .ok_or_else(|| IdentityParseError::MissingPort(rest.to_string()))?
    } else {
        rest.rsplit_once(':')
            .ok_or_else(|| IdentityParseError::MissingPort(rest.to_string()))?
    };
    if host.is_empty() {
        return Err(IdentityParseError::EmptyHost);
    }
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdentityParseError::InvalidPort(port.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| IdentityParseError::InvalidPort(port.to_string()))?;
    Ok(Identity::network_address(host, port))
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Invalid => f.write_str("Invalid"),
            Identity::NumericId(id) => write!(f, "ID:{}", id),
            Identity::NetworkAddress { host, port } if needs_brackets(host) => {
                write!(f, "Addr:[{}]:{}", host, port)
            }
            Identity::NetworkAddress { host, port } => write!(f, "Addr:{}:{}", host, port),
        }
    }
}

// Parse strips one pair of brackets, so any host that could be misread gets them.
fn needs_brackets(host: &str) -> bool {
    host.contains(':') || host.starts_with('[')
}

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identity::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    #[error("invalid identity format: {0:?} (expected id:<n> or addr:<host>:<port>)")]
    UnknownScheme(String),
    #[error("invalid numeric id: {0:?}")]
    InvalidNumericId(String),
    #[error("address is missing a port: {0:?}")]
    MissingPort(String),
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
    #[error("address has an empty host")]
    EmptyHost,
}
