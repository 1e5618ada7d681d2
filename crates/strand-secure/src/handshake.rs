//! The symmetric connection handshake.
//!
//! Both peers run the same steps; neither side is an initiator. Every
//! step sends and receives concurrently, which is load-bearing: the
//! peers are symmetric, so serializing a step would deadlock with both
//! sides waiting to receive.
//!
//! Steps: profile exchange, algorithm selection (greatest common wire
//! value per family), ephemeral ECDH P-521 agreement with a freshness
//! window on the peer key, optional password proof, and the PBKDF2 key
//! schedule with a role-dependent split.

use std::{
    collections::{BTreeSet, HashSet},
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{RngCore, rngs::OsRng, seq::SliceRandom};
use strand_conn::FramedConnection;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::{
    connection::{SecureConnectionRole, SecureConnectionStatus},
    crypto::{EphemeralAgreement, hmac_sha256, pbkdf2_sha256, sha256},
    error::SecureConnectionError,
    messages::{
        AgreementPublicKey, AuthenticationMessage, AuthenticationType, CryptoAlgorithm,
        HashAlgorithm, KeyDerivationAlgorithm, KeyExchangeAlgorithm, ProfileMessage,
        VerificationMessage,
    },
    record::SessionKeys,
};

/// Session id length generated by this implementation.
const SESSION_ID_LEN: usize = 32;

/// Accepted clock skew on the peer's ephemeral key, either direction.
const KEY_FRESHNESS_WINDOW_SECS: i64 = 30 * 60;

/// PBKDF2 iteration count for the key schedule.
const KEY_SCHEDULE_ROUNDS: u32 = 1024;

/// Cipher and MAC key lengths for the implemented suite.
const CRYPTO_KEY_LEN: usize = 32;
const HMAC_KEY_LEN: usize = 32;

/// Everything the handshake hands back to the connection.
pub(crate) struct HandshakeOutcome {
    pub(crate) keys: SessionKeys,
    pub(crate) status: SecureConnectionStatus,
}

struct NegotiatedAlgorithms {
    key_exchange: KeyExchangeAlgorithm,
    key_derivation: KeyDerivationAlgorithm,
    crypto: CryptoAlgorithm,
    hash: HashAlgorithm,
}

/// Run the handshake over `base`.
pub(crate) async fn run(
    base: &FramedConnection,
    role: SecureConnectionRole,
    passwords: &[String],
    cancel: &CancellationToken,
) -> Result<HandshakeOutcome, SecureConnectionError> {
    let authentication_type = if passwords.is_empty() {
        AuthenticationType::None
    } else {
        AuthenticationType::Password
    };

    // Step 1: profile exchange.
    let my_profile = build_profile(authentication_type);
    let peer_profile =
        ProfileMessage::decode(&exchange(base, my_profile.encode(), cancel).await?)?;

    if peer_profile.authentication_type != my_profile.authentication_type {
        return Err(SecureConnectionError::AuthTypeMismatch);
    }

    // Step 2: algorithm selection.
    let negotiated = select_algorithms(&my_profile, &peer_profile)?;
    tracing::debug!(
        key_exchange = ?negotiated.key_exchange,
        key_derivation = ?negotiated.key_derivation,
        cipher = ?negotiated.crypto,
        hash = ?negotiated.hash,
        "algorithms negotiated"
    );

    // Step 3: ephemeral key agreement.
    let agreement = EphemeralAgreement::generate();
    let my_public = AgreementPublicKey {
        creation_time: unix_now(),
        algorithm_type: negotiated.key_exchange.wire_value(),
        public_key: agreement.public_key_bytes(),
    };
    let peer_public =
        AgreementPublicKey::decode(&exchange(base, my_public.encode(), cancel).await?)?;

    if (unix_now() - peer_public.creation_time).abs() > KEY_FRESHNESS_WINDOW_SECS {
        return Err(SecureConnectionError::StalePublicKey);
    }
    if peer_public.algorithm_type != negotiated.key_exchange.wire_value() {
        return Err(SecureConnectionError::Unsupported);
    }

    let shared_secret = agreement.agree(&peer_public.public_key)?;

    // Step 4: optional password authentication.
    let matched_passwords = if authentication_type == AuthenticationType::Password {
        authenticate(base, passwords, &my_profile, &my_public, &peer_profile, &peer_public, cancel)
            .await?
    } else {
        Vec::new()
    };

    // Step 5: key schedule.
    let keys = derive_keys(
        role,
        &shared_secret,
        &my_profile.session_id,
        &peer_profile.session_id,
    );

    tracing::debug!(?role, "handshake complete");

    Ok(HandshakeOutcome {
        keys,
        status: SecureConnectionStatus {
            key_exchange: negotiated.key_exchange,
            key_derivation: negotiated.key_derivation,
            cipher: negotiated.crypto,
            hash: negotiated.hash,
            matched_passwords,
        },
    })
}

/// Send `outgoing` and receive the peer's message concurrently.
async fn exchange(
    base: &FramedConnection,
    outgoing: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, SecureConnectionError> {
    let send = base.enqueue(|writer| writer.put_slice(&outgoing), cancel);
    let receive = async {
        let mut incoming = Vec::new();
        base.dequeue(
            |reader| {
                incoming = reader.to_vec()?;
                Ok(())
            },
            cancel,
        )
        .await?;
        Ok::<Vec<u8>, SecureConnectionError>(incoming)
    };

    let (sent, received) = tokio::join!(send, receive);
    sent?;
    received
}

fn build_profile(authentication_type: AuthenticationType) -> ProfileMessage {
    let mut session_id = vec![0u8; SESSION_ID_LEN];
    OsRng.fill_bytes(&mut session_id);

    ProfileMessage {
        session_id,
        authentication_type,
        key_exchange_algorithms: vec![KeyExchangeAlgorithm::EcDhP521Sha2_256.wire_value()],
        key_derivation_algorithms: vec![KeyDerivationAlgorithm::Pbkdf2.wire_value()],
        crypto_algorithms: vec![CryptoAlgorithm::Aes256.wire_value()],
        hash_algorithms: vec![HashAlgorithm::Sha2_256.wire_value()],
    }
}

fn select_algorithms(
    mine: &ProfileMessage,
    theirs: &ProfileMessage,
) -> Result<NegotiatedAlgorithms, SecureConnectionError> {
    let key_exchange = select_greatest_common(
        &mine.key_exchange_algorithms,
        &theirs.key_exchange_algorithms,
        "key exchange",
    )?;
    let key_derivation = select_greatest_common(
        &mine.key_derivation_algorithms,
        &theirs.key_derivation_algorithms,
        "key derivation",
    )?;
    let crypto =
        select_greatest_common(&mine.crypto_algorithms, &theirs.crypto_algorithms, "cipher")?;
    let hash = select_greatest_common(&mine.hash_algorithms, &theirs.hash_algorithms, "hash")?;

    Ok(NegotiatedAlgorithms {
        key_exchange: KeyExchangeAlgorithm::from_wire_value(key_exchange)
            .ok_or(SecureConnectionError::Unsupported)?,
        key_derivation: KeyDerivationAlgorithm::from_wire_value(key_derivation)
            .ok_or(SecureConnectionError::Unsupported)?,
        crypto: CryptoAlgorithm::from_wire_value(crypto)
            .ok_or(SecureConnectionError::Unsupported)?,
        hash: HashAlgorithm::from_wire_value(hash).ok_or(SecureConnectionError::Unsupported)?,
    })
}

/// The greatest value both peers advertise, ordering by wire value.
fn select_greatest_common(
    mine: &[u64],
    theirs: &[u64],
    family: &'static str,
) -> Result<u64, SecureConnectionError> {
    mine.iter()
        .filter(|value| theirs.contains(value))
        .max()
        .copied()
        .ok_or(SecureConnectionError::NoCommonAlgorithm { family })
}

/// Exchange password proofs and intersect.
///
/// Each proof commits to the prover's own profile and ephemeral key, so a
/// proof cannot be replayed into another handshake. The password list is
/// de-duplicated before hashing and shuffled before sending so neither
/// the list size nor its order leaks.
async fn authenticate(
    base: &FramedConnection,
    passwords: &[String],
    my_profile: &ProfileMessage,
    my_public: &AgreementPublicKey,
    peer_profile: &ProfileMessage,
    peer_public: &AgreementPublicKey,
    cancel: &CancellationToken,
) -> Result<Vec<String>, SecureConnectionError> {
    let my_digest = sha256(
        &VerificationMessage { profile: my_profile.clone(), public_key: my_public.clone() }
            .encode(),
    );
    let peer_digest = sha256(
        &VerificationMessage { profile: peer_profile.clone(), public_key: peer_public.clone() }
            .encode(),
    );

    let unique: BTreeSet<&str> = passwords.iter().map(String::as_str).collect();

    let mut hashes: Vec<Vec<u8>> =
        unique.iter().map(|password| password_proof(password, &my_digest).to_vec()).collect();
    hashes.shuffle(&mut rand::thread_rng());

    let peer_message = AuthenticationMessage::decode(
        &exchange(base, AuthenticationMessage { hashes }.encode(), cancel).await?,
    )?;
    let peer_hashes: HashSet<Vec<u8>> = peer_message.hashes.into_iter().collect();

    let matched: Vec<String> = unique
        .iter()
        .filter(|password| {
            peer_hashes.contains(password_proof(password, &peer_digest).as_slice())
        })
        .map(|password| (*password).to_owned())
        .collect();

    if matched.is_empty() {
        return Err(SecureConnectionError::PasswordMismatch);
    }
    Ok(matched)
}

fn password_proof(password: &str, commitment_digest: &[u8; 32]) -> [u8; 32] {
    hmac_sha256(&sha256(password.as_bytes()), commitment_digest)
}

/// PBKDF2 key schedule over the shared secret, salted with the XOR of
/// both session ids, split by role so the peers derive mirror images.
fn derive_keys(
    role: SecureConnectionRole,
    shared_secret: &[u8],
    my_session_id: &[u8],
    peer_session_id: &[u8],
) -> SessionKeys {
    // Both session ids are 32 bytes today; the zero-extension of the
    // shorter one is defensive.
    let salt_len = my_session_id.len().max(peer_session_id.len());
    let mut salt = Zeroizing::new(vec![0u8; salt_len]);
    for (i, slot) in salt.iter_mut().enumerate() {
        let mine = my_session_id.get(i).copied().unwrap_or(0);
        let theirs = peer_session_id.get(i).copied().unwrap_or(0);
        *slot = mine ^ theirs;
    }

    let mut schedule = Zeroizing::new([0u8; 2 * (CRYPTO_KEY_LEN + HMAC_KEY_LEN)]);
    pbkdf2_sha256(shared_secret, &salt, KEY_SCHEDULE_ROUNDS, schedule.as_mut());

    let mut first_crypto = [0u8; CRYPTO_KEY_LEN];
    let mut second_crypto = [0u8; CRYPTO_KEY_LEN];
    let mut first_hmac = [0u8; HMAC_KEY_LEN];
    let mut second_hmac = [0u8; HMAC_KEY_LEN];
    first_crypto.copy_from_slice(&schedule[..32]);
    second_crypto.copy_from_slice(&schedule[32..64]);
    first_hmac.copy_from_slice(&schedule[64..96]);
    second_hmac.copy_from_slice(&schedule[96..128]);

    match role {
        SecureConnectionRole::Connected => SessionKeys {
            my_crypto_key: first_crypto,
            peer_crypto_key: second_crypto,
            my_hmac_key: first_hmac,
            peer_hmac_key: second_hmac,
        },
        SecureConnectionRole::Accepted => SessionKeys {
            my_crypto_key: second_crypto,
            peer_crypto_key: first_crypto,
            my_hmac_key: second_hmac,
            peer_hmac_key: first_hmac,
        },
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
