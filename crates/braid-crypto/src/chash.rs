use data_encoding::BASE32;
use sha2::{Digest, Sha256};

use braid_core::definition::Definition;
use braid_core::error::BraidError;
use braid_core::types::Address;

use crate::canonical::canonical_json;

/// 160-bit checksummed hash: 128 data bits interleaved with 32 checksum
/// bits at π-derived offsets, base32-encoded to a 32-char address.
const CHASH_BITS: usize = 160;
const DATA_BITS: usize = 128;
const CHECKSUM_BITS: usize = 32;

const PI_DIGITS: &str = "14159265358979323846264338327950288419716939937510";

/// Cumulative sums of the nonzero digits of π give the 32 positions where
/// checksum bits sit inside the 160-bit string.
fn checksum_offsets() -> Vec<usize> {
    let mut offsets = Vec::with_capacity(CHECKSUM_BITS);
    let mut offset = 0usize;
    for c in PI_DIGITS.chars() {
        let digit = c.to_digit(10).unwrap_or(0) as usize;
        if digit == 0 {
            continue;
        }
        offset += digit;
        if offset >= CHASH_BITS {
            break;
        }
        offsets.push(offset);
    }
    debug_assert_eq!(offsets.len(), CHECKSUM_BITS);
    offsets
}

fn bytes_to_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bit_count);
    for i in 0..bit_count {
        bits.push(bytes[i / 8] & (0x80 >> (i % 8)) != 0);
    }
    bits
}

fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 0x80 >> (i % 8);
        }
    }
    bytes
}

fn checksum_of(clean_data: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(clean_data);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// chash160 of arbitrary bytes.
pub fn chash160(data: &[u8]) -> Result<Address, BraidError> {
    let digest = Sha256::digest(data);
    let clean_data = &digest[..DATA_BITS / 8];
    let checksum = checksum_of(clean_data);

    let data_bits = bytes_to_bits(clean_data, DATA_BITS);
    let checksum_bits = bytes_to_bits(&checksum, CHECKSUM_BITS);
    let offsets = checksum_offsets();

    let mut mixed = Vec::with_capacity(CHASH_BITS);
    let mut data_iter = data_bits.into_iter();
    let mut checksum_iter = checksum_bits.into_iter();
    for position in 0..CHASH_BITS {
        let bit = if offsets.contains(&position) {
            checksum_iter.next()
        } else {
            data_iter.next()
        }
        .ok_or_else(|| BraidError::Internal("chash bit streams exhausted".into()))?;
        mixed.push(bit);
    }
    Address::new(BASE32.encode(&bits_to_bytes(&mixed)))
}

/// Verify the interleaved checksum of an externally supplied address.
pub fn is_chash_valid(address: &Address) -> bool {
    let Ok(bytes) = BASE32.decode(address.as_str().as_bytes()) else {
        return false;
    };
    if bytes.len() != CHASH_BITS / 8 {
        return false;
    }
    let mixed = bytes_to_bits(&bytes, CHASH_BITS);
    let offsets = checksum_offsets();
    let mut data_bits = Vec::with_capacity(DATA_BITS);
    let mut checksum_bits = Vec::with_capacity(CHECKSUM_BITS);
    for (position, bit) in mixed.into_iter().enumerate() {
        if offsets.contains(&position) {
            checksum_bits.push(bit);
        } else {
            data_bits.push(bit);
        }
    }
    let clean_data = bits_to_bytes(&data_bits);
    checksum_of(&clean_data) == bits_to_bytes(&checksum_bits)[..4]
}

/// Address of a definition: chash160 of its canonical JSON form.
pub fn address_from_definition(definition: &Definition) -> Result<Address, BraidError> {
    let value = definition.to_value()?;
    chash160(canonical_json(&value)?.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::definition::SigArg;

    #[test]
    fn offsets_are_exactly_32() {
        assert_eq!(checksum_offsets().len(), 32);
    }

    #[test]
    fn derived_address_passes_checksum() {
        let addr = chash160(b"some definition").unwrap();
        assert_eq!(addr.as_str().len(), 32);
        assert!(is_chash_valid(&addr));
    }

    #[test]
    fn corrupted_address_fails_checksum() {
        let addr = chash160(b"some definition").unwrap();
        let mut s = addr.as_str().to_string();
        // flip one char to another base32 char
        let replacement = if s.starts_with('A') { "B" } else { "A" };
        s.replace_range(0..1, replacement);
        let corrupted = Address::new(s).unwrap();
        assert!(!is_chash_valid(&corrupted));
    }

    #[test]
    fn definition_address_is_deterministic() {
        let def = Definition::Sig(SigArg {
            pubkey: "A".repeat(44),
        });
        let a1 = address_from_definition(&def).unwrap();
        let a2 = address_from_definition(&def).unwrap();
        assert_eq!(a1, a2);
    }
}
