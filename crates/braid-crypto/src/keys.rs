use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use braid_core::error::BraidError;
use braid_core::types::PubKey;

/// An ed25519 signing key plus its 44-char base64 public form.
pub struct KeyPair {
    signing_key: SigningKey,
    pub public_key: PubKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = PubKey::new(BASE64.encode(signing_key.verifying_key().as_bytes()))
            .unwrap_or_else(|_| unreachable!("32-byte keys always encode to 44 chars"));
        Self {
            signing_key,
            public_key,
        }
    }

    /// Sign a digest, returning the 88-char base64 signature used as an
    /// authentifier.
    pub fn sign_b64(&self, digest: &[u8]) -> String {
        BASE64.encode(self.signing_key.sign(digest).to_bytes())
    }
}

/// Verify a base64 authentifier over `message` with a base64 public key.
/// Malformed keys are an error (the definition is broken); malformed or
/// non-verifying signatures are Ok(false).
pub fn verify_sig(pubkey_b64: &str, message: &[u8], sig_b64: &str) -> Result<bool, BraidError> {
    let key_bytes = BASE64
        .decode(pubkey_b64)
        .map_err(|e| BraidError::Definition(format!("bad pubkey encoding: {e}")))?;
    let key_arr: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| BraidError::Definition("pubkey must be 32 bytes".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_arr)
        .map_err(|e| BraidError::Definition(format!("bad pubkey: {e}")))?;

    let Ok(sig_bytes) = BASE64.decode(sig_b64) else {
        return Ok(false);
    };
    let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes) else {
        return Ok(false);
    };
    let signature = Signature::from_bytes(&sig_arr);
    Ok(verifying_key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = KeyPair::from_seed([7u8; 32]);
        assert_eq!(kp.public_key.as_str().len(), 44);
        let digest = [42u8; 32];
        let sig = kp.sign_b64(&digest);
        assert_eq!(sig.len(), 88);
        assert!(verify_sig(kp.public_key.as_str(), &digest, &sig).unwrap());
    }

    #[test]
    fn wrong_message_fails() {
        let kp = KeyPair::from_seed([7u8; 32]);
        let sig = kp.sign_b64(&[42u8; 32]);
        assert!(!verify_sig(kp.public_key.as_str(), &[43u8; 32], &sig).unwrap());
    }

    #[test]
    fn garbage_signature_is_false_not_error() {
        let kp = KeyPair::from_seed([7u8; 32]);
        assert!(!verify_sig(kp.public_key.as_str(), &[1u8; 32], "not base64!").unwrap());
    }
}
