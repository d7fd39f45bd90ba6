//! Secret/hashlock commitment pairs.
//!
//! Both escrow programs verify `sha256(preimage) == hashlock` over the raw
//! 32-byte preimage, so the digest here must stay SHA-256.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Length in bytes of both the secret and the hashlock
pub const COMMITMENT_LEN: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("invalid commitment length: expected {expected} bytes, got {actual}")]
    InvalidCommitmentLength { expected: usize, actual: usize },

    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),
}

fn to_array(bytes: &[u8]) -> Result<[u8; COMMITMENT_LEN], CommitmentError> {
    bytes
        .try_into()
        .map_err(|_| CommitmentError::InvalidCommitmentLength {
            expected: COMMITMENT_LEN,
            actual: bytes.len(),
        })
}

fn constant_time_eq(a: &[u8; COMMITMENT_LEN], b: &[u8; COMMITMENT_LEN]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    std::hint::black_box(diff) == 0
}

/// Swap preimage. Deliberately has no `Display` or `Serialize`; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; COMMITMENT_LEN]);

impl Secret {
    pub fn from_bytes(bytes: [u8; COMMITMENT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CommitmentError> {
        to_array(bytes).map(Self)
    }

    /// Raw preimage bytes. Only call this when handing the secret to a chain.
    pub fn expose(&self) -> &[u8; COMMITMENT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Public SHA-256 commitment to a [`Secret`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hashlock(#[serde(with = "crate::hex_bytes")] [u8; COMMITMENT_LEN]);

impl Hashlock {
    pub fn from_bytes(bytes: [u8; COMMITMENT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CommitmentError> {
        to_array(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; COMMITMENT_LEN] {
        &self.0
    }
}

impl fmt::Debug for Hashlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hashlock({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hashlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Source of secret bytes
pub trait EntropySource: Send + Sync {
    fn fill(&self, buf: &mut [u8; COMMITMENT_LEN]) -> Result<(), CommitmentError>;
}

/// Operating-system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8; COMMITMENT_LEN]) -> Result<(), CommitmentError> {
        getrandom::getrandom(buf).map_err(|e| CommitmentError::EntropyUnavailable(e.to_string()))
    }
}

/// TEST ONLY: yields the same bytes on every call
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Clone, Copy)]
pub struct FixedEntropy(pub [u8; COMMITMENT_LEN]);

#[cfg(any(test, feature = "testing"))]
impl EntropySource for FixedEntropy {
    fn fill(&self, buf: &mut [u8; COMMITMENT_LEN]) -> Result<(), CommitmentError> {
        buf.copy_from_slice(&self.0);
        Ok(())
    }
}

/// Generates and verifies secret/hashlock pairs
#[derive(Clone)]
pub struct SecretVault {
    entropy: Arc<dyn EntropySource>,
}

impl SecretVault {
    pub fn new() -> Self {
        Self {
            entropy: Arc::new(OsEntropy),
        }
    }

    pub fn with_entropy(entropy: Arc<dyn EntropySource>) -> Self {
        Self { entropy }
    }

    pub fn generate_secret(&self) -> Result<Secret, CommitmentError> {
        let mut buf = [0u8; COMMITMENT_LEN];
        self.entropy.fill(&mut buf)?;
        Ok(Secret(buf))
    }

    pub fn compute_hashlock(secret: &Secret) -> Hashlock {
        Hashlock(Sha256::digest(secret.0).into())
    }

    /// Hash an untyped preimage, rejecting anything that is not 32 bytes
    pub fn hashlock_of(preimage: &[u8]) -> Result<Hashlock, CommitmentError> {
        Secret::from_slice(preimage).map(|s| Self::compute_hashlock(&s))
    }

    /// Fresh secret together with its hashlock
    pub fn generate_commitment(&self) -> Result<(Secret, Hashlock), CommitmentError> {
        let secret = self.generate_secret()?;
        let hashlock = Self::compute_hashlock(&secret);
        Ok((secret, hashlock))
    }

    pub fn verify(secret: &Secret, hashlock: &Hashlock) -> bool {
        constant_time_eq(&Self::compute_hashlock(secret).0, &hashlock.0)
    }

    /// Like [`SecretVault::verify`] over raw bytes. A mismatch is `Ok(false)`;
    /// only malformed lengths are errors.
    pub fn verify_bytes(secret: &[u8], hashlock: &[u8]) -> Result<bool, CommitmentError> {
        let secret = Secret::from_slice(secret)?;
        let hashlock = Hashlock::from_slice(hashlock)?;
        Ok(Self::verify(&secret, &hashlock))
    }
}

impl Default for SecretVault {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVault").finish_non_exhaustive()
    }
}
