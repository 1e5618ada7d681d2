//! The encrypted record codec.
//!
//! Each record travels inside one base-connection frame:
//!
//! ```text
//! header[8] || iv[16] || ciphertext[m] || mac[32]
//! ```
//!
//! - `header`: big-endian running total of every `iv + ciphertext` byte
//!   the sender has ever produced, including this record.
//! - `ciphertext`: AES-256-CBC with PKCS7 padding; a full padding block
//!   is present even when the plaintext is block-aligned.
//! - `mac`: HMAC-SHA256 over `iv || ciphertext`.
//!
//! The header is not covered by the MAC; ordering protection comes from
//! the receiver comparing the declared total against its own running
//! count before verifying the tag.

use aes::cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7,
    generic_array::GenericArray,
};
use hmac::Mac;
use strand_bytes::{ByteHub, ByteHubError, HubWriter};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{crypto::new_hmac, error::SecureConnectionError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block and padding granularity.
pub(crate) const BLOCK_LEN: usize = 16;
/// Running-total header length.
pub(crate) const HEADER_LEN: usize = 8;
/// IV length.
pub(crate) const IV_LEN: usize = 16;
/// HMAC-SHA256 tag length.
pub(crate) const TAG_LEN: usize = 32;
/// Smallest well-formed record: header, iv, one cipher block, tag.
pub(crate) const MIN_RECORD_LEN: usize = HEADER_LEN + IV_LEN + BLOCK_LEN + TAG_LEN;

/// Session key material derived by the handshake.
///
/// Mirror-imaged across the two peers: this side's `my_*` keys equal the
/// peer's `peer_*` keys. Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct SessionKeys {
    pub(crate) my_crypto_key: [u8; 32],
    pub(crate) peer_crypto_key: [u8; 32],
    pub(crate) my_hmac_key: [u8; 32],
    pub(crate) peer_hmac_key: [u8; 32],
}

/// Ciphertext length (iv included) for a plaintext of `len` bytes.
///
/// Padding is always a full PKCS7 block when the plaintext is aligned.
pub(crate) fn sealed_body_len(len: usize) -> usize {
    let pad = BLOCK_LEN - (len % BLOCK_LEN);
    IV_LEN + len + pad
}

/// Encrypt `plaintext` into `writer` as one complete record.
///
/// `running_total` must already include this record's `iv + ciphertext`
/// bytes. Plaintext blocks stream through the cipher one at a time and
/// feed the MAC as they are produced.
pub(crate) fn seal_into(
    writer: &mut HubWriter<'_>,
    keys: &SessionKeys,
    running_total: u64,
    iv: [u8; IV_LEN],
    plaintext: &mut ByteHub,
) -> Result<(), ByteHubError> {
    writer.put_slice(&running_total.to_be_bytes())?;
    writer.put_slice(&iv)?;

    let mut mac = new_hmac(&keys.my_hmac_key);
    mac.update(&iv);

    let mut cipher = Aes256CbcEnc::new((&keys.my_crypto_key).into(), (&iv).into());

    let mut reader = plaintext.reader();
    let mut remaining = reader.remain_bytes() as usize;
    let mut block = [0u8; BLOCK_LEN];
    let mut encrypted = [0u8; BLOCK_LEN];

    while remaining >= BLOCK_LEN {
        reader.copy_to_slice(&mut block)?;
        cipher.encrypt_block_b2b_mut(
            GenericArray::from_slice(&block),
            GenericArray::from_mut_slice(&mut encrypted),
        );
        writer.put_slice(&encrypted)?;
        mac.update(&encrypted);
        remaining -= BLOCK_LEN;
    }

    // Final block: the sub-block tail plus PKCS7 padding. An aligned
    // plaintext still produces a whole padding block here.
    reader.copy_to_slice(&mut block[..remaining])?;
    let Ok(final_block) = cipher.encrypt_padded_b2b_mut::<Pkcs7>(&block[..remaining], &mut encrypted)
    else {
        unreachable!("one block of output always holds a padded sub-block tail");
    };
    writer.put_slice(final_block)?;
    mac.update(final_block);

    writer.put_slice(mac.finalize().into_bytes().as_slice())?;

    block.zeroize();
    Ok(())
}

/// Verify and decrypt one record into `plaintext`.
///
/// `expected_total` is the receiver's running count after adding this
/// record's `iv + ciphertext` length. Checks run in order: structure,
/// declared total, MAC (constant-time), then decryption.
pub(crate) fn open_into(
    frame: &[u8],
    keys: &SessionKeys,
    expected_total: u64,
    plaintext: &mut ByteHub,
) -> Result<(), SecureConnectionError> {
    debug_assert!(frame.len() >= MIN_RECORD_LEN);
    debug_assert_eq!((frame.len() - HEADER_LEN - TAG_LEN) % BLOCK_LEN, 0);

    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&frame[..HEADER_LEN]);
    let declared = u64::from_be_bytes(header);
    if declared != expected_total {
        return Err(SecureConnectionError::SequenceMismatch {
            declared,
            expected: expected_total,
        });
    }

    let tag_start = frame.len() - TAG_LEN;
    let mut mac = new_hmac(&keys.peer_hmac_key);
    mac.update(&frame[HEADER_LEN..tag_start]);
    mac.verify_slice(&frame[tag_start..])
        .map_err(|_| SecureConnectionError::MacInvalid)?;

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&frame[HEADER_LEN..HEADER_LEN + IV_LEN]);
    let ciphertext = &frame[HEADER_LEN + IV_LEN..tag_start];

    let mut cipher = Aes256CbcDec::new((&keys.peer_crypto_key).into(), (&iv).into());
    let mut decrypted = [0u8; BLOCK_LEN];
    let mut writer = plaintext.writer();

    let (body, last) = ciphertext.split_at(ciphertext.len() - BLOCK_LEN);
    for block in body.chunks_exact(BLOCK_LEN) {
        cipher.decrypt_block_b2b_mut(
            GenericArray::from_slice(block),
            GenericArray::from_mut_slice(&mut decrypted),
        );
        writer.put_slice(&decrypted)?;
    }

    let tail = cipher
        .decrypt_padded_b2b_mut::<Pkcs7>(last, &mut decrypted)
        .map_err(|_| SecureConnectionError::Malformed { reason: "invalid record padding" })?;
    writer.put_slice(tail)?;

    decrypted.zeroize();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strand_bytes::BytesPool;

    use super::*;

    fn test_keys() -> SessionKeys {
        SessionKeys {
            my_crypto_key: [0x11; 32],
            peer_crypto_key: [0x11; 32],
            my_hmac_key: [0x22; 32],
            peer_hmac_key: [0x22; 32],
        }
    }

    fn hub_with(pool: &Arc<BytesPool>, data: &[u8]) -> ByteHub {
        let mut hub = ByteHub::new(Arc::clone(pool));
        hub.writer().put_slice(data).unwrap();
        hub
    }

    fn seal_to_vec(keys: &SessionKeys, total: u64, iv: [u8; 16], data: &[u8]) -> Vec<u8> {
        let pool = BytesPool::shared();
        let mut plaintext = hub_with(&pool, data);
        let mut frame = ByteHub::new(Arc::clone(&pool));
        seal_into(&mut frame.writer(), keys, total, iv, &mut plaintext).unwrap();
        frame.reader().to_vec().unwrap()
    }

    fn open_to_vec(
        keys: &SessionKeys,
        expected_total: u64,
        frame: &[u8],
    ) -> Result<Vec<u8>, SecureConnectionError> {
        let pool = BytesPool::shared();
        let mut plaintext = ByteHub::new(pool);
        open_into(frame, keys, expected_total, &mut plaintext)?;
        Ok(plaintext.reader().to_vec().unwrap())
    }

    #[test]
    fn seal_open_round_trip() {
        let keys = test_keys();
        let frame = seal_to_vec(&keys, 32, [7u8; 16], b"hello");

        // iv(16) + one padded block(16), plus header and tag.
        assert_eq!(frame.len(), 8 + 16 + 16 + 32);
        assert_eq!(open_to_vec(&keys, 32, &frame).unwrap(), b"hello");
    }

    #[test]
    fn empty_plaintext_still_carries_a_padding_block() {
        let keys = test_keys();
        let frame = seal_to_vec(&keys, 32, [1u8; 16], b"");

        assert_eq!(frame.len(), MIN_RECORD_LEN);
        assert_eq!(open_to_vec(&keys, 32, &frame).unwrap(), b"");
    }

    #[test]
    fn aligned_plaintext_gets_a_full_padding_block() {
        let keys = test_keys();
        let data = [0xCD; 32];
        // 32 plaintext bytes -> 48 ciphertext bytes -> body of 64.
        let frame = seal_to_vec(&keys, 64, [2u8; 16], &data);

        assert_eq!(frame.len(), 8 + 16 + 48 + 32);
        assert_eq!(open_to_vec(&keys, 64, &frame).unwrap(), data);
    }

    #[test]
    fn sealed_body_len_always_includes_padding() {
        assert_eq!(sealed_body_len(0), 16 + 16);
        assert_eq!(sealed_body_len(5), 16 + 16);
        assert_eq!(sealed_body_len(16), 16 + 32);
        assert_eq!(sealed_body_len(17), 16 + 32);
    }

    #[test]
    fn wrong_expected_total_is_a_sequence_mismatch() {
        let keys = test_keys();
        let frame = seal_to_vec(&keys, 32, [3u8; 16], b"data");

        let result = open_to_vec(&keys, 64, &frame);
        assert!(matches!(
            result,
            Err(SecureConnectionError::SequenceMismatch { declared: 32, expected: 64 })
        ));
    }

    #[test]
    fn any_body_bit_flip_fails_the_mac() {
        let keys = test_keys();
        let frame = seal_to_vec(&keys, 32, [4u8; 16], b"tamper target");

        // Flip one bit in every iv, ciphertext, and tag position in turn.
        for position in HEADER_LEN..frame.len() {
            let mut corrupted = frame.clone();
            corrupted[position] ^= 0x01;

            let result = open_to_vec(&keys, 32, &corrupted);
            assert!(
                matches!(result, Err(SecureConnectionError::MacInvalid)),
                "bit flip at {position} was not caught"
            );
        }
    }

    #[test]
    fn header_bit_flip_fails_the_sequence_check() {
        let keys = test_keys();
        let frame = seal_to_vec(&keys, 32, [5u8; 16], b"header target");

        for position in 0..HEADER_LEN {
            let mut corrupted = frame.clone();
            corrupted[position] ^= 0x01;

            let result = open_to_vec(&keys, 32, &corrupted);
            assert!(
                matches!(result, Err(SecureConnectionError::SequenceMismatch { .. })),
                "header flip at {position} was not caught"
            );
        }
    }

    #[test]
    fn record_decrypts_only_with_the_sender_keys() {
        let keys = test_keys();
        let frame = seal_to_vec(&keys, 32, [6u8; 16], b"secret");

        let other = SessionKeys {
            my_crypto_key: [0x33; 32],
            peer_crypto_key: [0x33; 32],
            my_hmac_key: [0x44; 32],
            peer_hmac_key: [0x44; 32],
        };
        let result = open_to_vec(&other, 32, &frame);
        assert!(matches!(result, Err(SecureConnectionError::MacInvalid)));
    }

    #[test]
    fn consecutive_records_chain_running_totals() {
        let keys = test_keys();

        let first = seal_to_vec(&keys, 32, [8u8; 16], b"one");
        // Second record's body is another 32 bytes; cumulative total 64.
        let second = seal_to_vec(&keys, 64, [9u8; 16], b"two");

        assert_eq!(open_to_vec(&keys, 32, &first).unwrap(), b"one");
        assert_eq!(open_to_vec(&keys, 64, &second).unwrap(), b"two");

        // Replaying the first record after the second is caught.
        let result = open_to_vec(&keys, 96, &first);
        assert!(matches!(result, Err(SecureConnectionError::SequenceMismatch { .. })));
    }
}
