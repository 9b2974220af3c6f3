use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BraidError;

/// Amount in base units. u64 covers the full issued supply of 10^15 with
/// room to spare.
pub type Amount = u64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Main chain index. Genesis has MCI 0.
pub type Mci = u64;

/// DAG level: 1 + max(parent levels). Genesis is 0.
pub type Level = u64;

const BASE64_CHARS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/=";
const BASE32_CHARS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

fn is_base64_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| BASE64_CHARS.contains(c))
}

// ── UnitHash ─────────────────────────────────────────────────────────────────

/// 44-character base64 encoding of the SHA-256 of a unit's canonical form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitHash(String);

impl UnitHash {
    pub fn new(s: impl Into<String>) -> Result<Self, BraidError> {
        let s = s.into();
        if !is_base64_of_len(&s, crate::constants::HASH_LENGTH) {
            return Err(BraidError::Structure(format!("invalid unit hash: {s}")));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl TryFrom<String> for UnitHash {
    type Error = BraidError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<UnitHash> for String {
    fn from(h: UnitHash) -> String {
        h.0
    }
}

impl fmt::Display for UnitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UnitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitHash({}…)", &self.0[..8])
    }
}

// ── Ball ─────────────────────────────────────────────────────────────────────

/// 44-character base64 SHA-256 committing to a stable unit's position in
/// history. Balls exist only for stable units.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ball(String);

impl Ball {
    pub fn new(s: impl Into<String>) -> Result<Self, BraidError> {
        let s = s.into();
        if !is_base64_of_len(&s, crate::constants::HASH_LENGTH) {
            return Err(BraidError::Structure(format!("invalid ball: {s}")));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl TryFrom<String> for Ball {
    type Error = BraidError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Ball> for String {
    fn from(b: Ball) -> String {
        b.0
    }
}

impl fmt::Display for Ball {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Ball {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ball({}…)", &self.0[..8])
    }
}

// ── Address ──────────────────────────────────────────────────────────────────

/// 32-character base32 chash160 of an address definition. The charset check
/// here is structural only; checksum verification lives in braid-crypto.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(s: impl Into<String>) -> Result<Self, BraidError> {
        let s = s.into();
        if s.len() != crate::constants::ADDRESS_LENGTH
            || !s.chars().all(|c| BASE32_CHARS.contains(c))
        {
            return Err(BraidError::Structure(format!("invalid address: {s}")));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl TryFrom<String> for Address {
    type Error = BraidError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> String {
        a.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &self.0)
    }
}

// ── PubKey ───────────────────────────────────────────────────────────────────

/// 44-character base64 encoding of a 32-byte ed25519 public key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PubKey(String);

impl PubKey {
    pub fn new(s: impl Into<String>) -> Result<Self, BraidError> {
        let s = s.into();
        if !is_base64_of_len(&s, crate::constants::PUBKEY_LENGTH) {
            return Err(BraidError::Structure(format!("invalid pubkey: {s}")));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PubKey {
    type Error = BraidError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PubKey> for String {
    fn from(p: PubKey) -> String {
        p.0
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({}…)", &self.0[..8])
    }
}

// ── Sequence ─────────────────────────────────────────────────────────────────

/// Serial status of a unit. `TempBad` may resolve either way at
/// stabilization; `Good` and `FinalBad` are frozen once stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sequence {
    Good,
    TempBad,
    FinalBad,
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sequence::Good => "good",
            Sequence::TempBad => "temp-bad",
            Sequence::FinalBad => "final-bad",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_hash_length_enforced() {
        assert!(UnitHash::new("A".repeat(44)).is_ok());
        assert!(UnitHash::new("A".repeat(43)).is_err());
        assert!(UnitHash::new(format!("{}!", "A".repeat(43))).is_err());
    }

    #[test]
    fn address_charset_enforced() {
        assert!(Address::new("A".repeat(32)).is_ok());
        // base32 alphabet excludes 0 and 1
        assert!(Address::new(format!("{}0", "A".repeat(31))).is_err());
        assert!(Address::new("A".repeat(31)).is_err());
    }
}
