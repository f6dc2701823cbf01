use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of hex characters following the `0x` prefix.
const ADDRESS_HEX_LEN: usize = 40;

/// A 20-byte account or contract address.
///
/// Parsing is stricter than `alloy_primitives::Address`: `0x` followed by
/// exactly 40 hexadecimal characters. Mixed case is accepted without a
/// checksum check, and comparison is on the decoded bytes. Displays as
/// lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(alloy_primitives::Address);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address must start with 0x")]
    MissingPrefix,

    #[error("expected 40 hex characters after 0x, found {0}")]
    WrongLength(usize),

    #[error("address contains non-hex characters")]
    InvalidHex,
}

impl Address {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(alloy_primitives::Address::new(bytes))
    }
}

impl From<Address> for alloy_primitives::Address {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl From<alloy_primitives::Address> for Address {
    fn from(address: alloy_primitives::Address) -> Self {
        Self(address)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let hex_part = s.strip_prefix("0x").ok_or(AddressError::MissingPrefix)?;
        if hex_part.len() != ADDRESS_HEX_LEN {
            return Err(AddressError::WrongLength(hex_part.len()));
        }
        hex_part
            .parse::<alloy_primitives::Address>()
            .map(Self)
            .map_err(|_| AddressError::InvalidHex)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_slice()))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn test_parse_checksummed_address() {
        let addr: Address = OWNER.parse().unwrap();
        assert_eq!(addr.to_string(), OWNER.to_lowercase());
    }

    #[test]
    fn test_case_insensitive_equality() {
        let a: Address = OWNER.parse().unwrap();
        let b: Address = OWNER.to_lowercase().parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_malformed_addresses() {
        assert_eq!("".parse::<Address>(), Err(AddressError::Empty));
        assert_eq!(
            "not-an-address".parse::<Address>(),
            Err(AddressError::MissingPrefix)
        );
        assert_eq!("0x1234".parse::<Address>(), Err(AddressError::WrongLength(4)));
        assert_eq!(
            "0xzz9fd6e51aad88f6f4ce6ab8827279cfffb92266".parse::<Address>(),
            Err(AddressError::InvalidHex)
        );
    }

    #[test]
    fn test_serde_uses_hex_string() {
        let addr: Address = OWNER.parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", OWNER.to_lowercase()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<Address>("\"0x1234\"").is_err());
    }

    #[test]
    fn test_alloy_conversion_keeps_bytes() {
        let addr: Address = OWNER.parse().unwrap();
        let alloy: alloy_primitives::Address = addr.into();
        assert_eq!(alloy.to_checksum(None), OWNER);
        assert_eq!(Address::from(alloy), addr);
    }
}
