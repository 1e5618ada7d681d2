//! Thin facades over the hash, MAC, KDF, and key agreement primitives.
//!
//! Everything here is a direct delegation; the value is a small, typed
//! surface the handshake and record layers can use without repeating
//! construction boilerplate.

use hmac::{Hmac, Mac};
use p521::{PublicKey, ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::SecureConnectionError;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// SHA-256 digest of `data`.
pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// One-shot HMAC-SHA256.
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = new_hmac(key);
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Incremental HMAC-SHA256 keyed with `key`.
///
/// HMAC accepts keys of any length, so construction cannot fail.
pub(crate) fn new_hmac(key: &[u8]) -> HmacSha256 {
    let Ok(mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC accepts keys of any length");
    };
    mac
}

/// PBKDF2-HMAC-SHA256 filling `out` from `secret` and `salt`.
pub(crate) fn pbkdf2_sha256(secret: &[u8], salt: &[u8], rounds: u32, out: &mut [u8]) {
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, rounds, out);
}

/// An ephemeral P-521 key agreement.
///
/// Generated per handshake and consumed by [`agree`](Self::agree); the
/// secret scalar never leaves the type.
pub(crate) struct EphemeralAgreement {
    secret: EphemeralSecret,
}

impl EphemeralAgreement {
    /// Generate a fresh ephemeral keypair.
    pub(crate) fn generate() -> Self {
        Self { secret: EphemeralSecret::random(&mut OsRng) }
    }

    /// This side's public key, SEC1 uncompressed.
    pub(crate) fn public_key_bytes(&self) -> Vec<u8> {
        self.secret.public_key().to_encoded_point(false).as_bytes().to_vec()
    }

    /// Complete the agreement against the peer's SEC1-encoded public key.
    pub(crate) fn agree(
        self,
        peer_public_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, SecureConnectionError> {
        let peer = PublicKey::from_sec1_bytes(peer_public_key)
            .map_err(|_| SecureConnectionError::Malformed { reason: "invalid peer public key" })?;

        let shared = self.secret.diffie_hellman(&peer);
        Ok(Zeroizing::new(shared.raw_secret_bytes().as_slice().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_answer() {
        // SHA-256 of the empty string.
        assert_eq!(
            sha256(b"").to_vec(),
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap()
        );
    }

    #[test]
    fn hmac_known_answer() {
        // RFC 4231 test case 2.
        let tag = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            tag.to_vec(),
            hex::decode("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
                .unwrap()
        );
    }

    #[test]
    fn pbkdf2_known_answer() {
        // RFC 7914 appendix B style vector: PBKDF2-HMAC-SHA256, 1 round.
        let mut out = [0u8; 32];
        pbkdf2_sha256(b"passwd", b"salt", 1, &mut out);
        assert_eq!(
            out.to_vec(),
            hex::decode("55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc")
                .unwrap()
        );
    }

    #[test]
    fn agreement_produces_matching_secrets() {
        let alice = EphemeralAgreement::generate();
        let bob = EphemeralAgreement::generate();

        let alice_public = alice.public_key_bytes();
        let bob_public = bob.public_key_bytes();

        let alice_shared = alice.agree(&bob_public).unwrap();
        let bob_shared = bob.agree(&alice_public).unwrap();

        assert_eq!(alice_shared, bob_shared);
        assert!(!alice_shared.is_empty());
    }

    #[test]
    fn agreement_rejects_garbage_public_key() {
        let agreement = EphemeralAgreement::generate();
        let result = agreement.agree(&[0x42; 7]);
        assert!(matches!(result, Err(SecureConnectionError::Malformed { .. })));
    }
}
