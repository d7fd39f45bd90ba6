use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of a ledger the coordinator drives (e.g. "ethereum-sepolia", "solana-devnet")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Token identifier on a chain: an ERC20 contract address or an SPL mint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Execution environment of a chain, which fixes its address format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Evm,
    Solana,
}

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("{kind:?} address must be {expected}, got {len} characters")]
    InvalidLength {
        kind: ChainKind,
        expected: &'static str,
        len: usize,
    },

    #[error("EVM address must start with 0x")]
    MissingPrefix,

    #[error("invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("zero address is not a valid participant")]
    ZeroAddress,
}

impl ChainKind {
    /// Check that `address` is well-formed for this chain kind
    pub fn validate_address(&self, address: &str) -> Result<(), AddressError> {
        if address.is_empty() {
            return Err(AddressError::Empty);
        }

        match self {
            ChainKind::Evm => {
                let body = address
                    .strip_prefix("0x")
                    .or_else(|| address.strip_prefix("0X"))
                    .ok_or(AddressError::MissingPrefix)?;
                if body.len() != 40 {
                    return Err(AddressError::InvalidLength {
                        kind: *self,
                        expected: "0x followed by 40 hex digits",
                        len: address.len(),
                    });
                }
                if let Some(c) = body.chars().find(|c| !c.is_ascii_hexdigit()) {
                    return Err(AddressError::InvalidCharacter(c));
                }
                if body.chars().all(|c| c == '0') {
                    return Err(AddressError::ZeroAddress);
                }
                Ok(())
            }
            ChainKind::Solana => {
                if !(32..=44).contains(&address.len()) {
                    return Err(AddressError::InvalidLength {
                        kind: *self,
                        expected: "32 to 44 base58 characters",
                        len: address.len(),
                    });
                }
                if let Some(c) = address.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
                    return Err(AddressError::InvalidCharacter(c));
                }
                // The all-ones string is the default (zero) pubkey
                if address.chars().all(|c| c == '1') {
                    return Err(AddressError::ZeroAddress);
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Evm => f.write_str("evm"),
            ChainKind::Solana => f.write_str("solana"),
        }
    }
}
