//! The secure connection facade.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU8, AtomicU64, Ordering},
};

use rand::{RngCore, rngs::OsRng};
use strand_bytes::{ByteHub, ByteHubError, BytesPool, HubReader, HubWriter};
use strand_conn::{ConnectionError, FramedConnection};
use tokio_util::sync::CancellationToken;

use crate::{
    error::SecureConnectionError,
    handshake,
    messages::{CryptoAlgorithm, HashAlgorithm, KeyDerivationAlgorithm, KeyExchangeAlgorithm},
    record::{
        self, BLOCK_LEN, HEADER_LEN, IV_LEN, MIN_RECORD_LEN, SessionKeys, TAG_LEN,
        sealed_body_len,
    },
};

/// Which side of the underlying transport this connection took.
///
/// The role only affects the key schedule split; the handshake itself is
/// symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureConnectionRole {
    /// This side dialed out.
    Connected,
    /// This side accepted the dial.
    Accepted,
}

/// Lifecycle of a [`SecureConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureConnectionState {
    /// Constructed; handshake not started.
    New,
    /// Handshake in flight.
    Handshaking,
    /// Handshake complete; records flow.
    Ready,
    /// Terminally closed. Absorbing.
    Closed,
}

const STATE_NEW: u8 = 0;
const STATE_HANDSHAKING: u8 = 1;
const STATE_READY: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// Configuration for a [`SecureConnection`].
#[derive(Debug, Clone)]
pub struct SecureConnectionConfig {
    /// Which side of the transport this connection took.
    pub role: SecureConnectionRole,
    /// Passwords this side holds. Empty means an anonymous handshake;
    /// non-empty requires the peer to prove at least one shared entry.
    pub passwords: Vec<String>,
}

/// Negotiated parameters, available once the handshake completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureConnectionStatus {
    /// Negotiated key exchange algorithm.
    pub key_exchange: KeyExchangeAlgorithm,
    /// Negotiated key derivation algorithm.
    pub key_derivation: KeyDerivationAlgorithm,
    /// Negotiated record cipher.
    pub cipher: CryptoAlgorithm,
    /// Negotiated record MAC hash.
    pub hash: HashAlgorithm,
    /// Passwords both peers proved knowledge of. Empty for anonymous
    /// handshakes.
    pub matched_passwords: Vec<String>,
}

struct Session {
    keys: SessionKeys,
    status: SecureConnectionStatus,
}

/// An authenticated-encryption connection over a [`FramedConnection`].
///
/// After [`handshake`](Self::handshake) succeeds, every
/// [`send`](Self::send) produces one encrypted record and every
/// [`receive`](Self::receive) consumes one, in order, with tampering and
/// reordering detected. Any failure is terminal: the connection records
/// the error, closes the underlying framed connection, and reports the
/// recorded error from every later call.
pub struct SecureConnection {
    base: Arc<FramedConnection>,
    config: SecureConnectionConfig,
    pool: Arc<BytesPool>,
    state: AtomicU8,
    session: OnceLock<Session>,
    terminal: OnceLock<SecureConnectionError>,
    /// Cumulative `iv + ciphertext` bytes this side has produced.
    total_sent_size: AtomicU64,
    /// Cumulative `iv + ciphertext` bytes this side has consumed.
    total_received_size: AtomicU64,
}

impl SecureConnection {
    /// Wrap `base` with the secure record layer.
    ///
    /// The base connection must already be registered with a dispatcher;
    /// the secure layer never pumps it.
    pub fn new(
        base: Arc<FramedConnection>,
        config: SecureConnectionConfig,
        pool: Arc<BytesPool>,
    ) -> Self {
        Self {
            base,
            config,
            pool,
            state: AtomicU8::new(STATE_NEW),
            session: OnceLock::new(),
            terminal: OnceLock::new(),
            total_sent_size: AtomicU64::new(0),
            total_received_size: AtomicU64::new(0),
        }
    }

    /// This connection's role.
    pub fn role(&self) -> SecureConnectionRole {
        self.config.role
    }

    /// The framed connection underneath, for registration and byte
    /// accounting.
    pub fn framed_connection(&self) -> &Arc<FramedConnection> {
        &self.base
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SecureConnectionState {
        match self.state.load(Ordering::Acquire) {
            STATE_NEW => SecureConnectionState::New,
            STATE_HANDSHAKING => SecureConnectionState::Handshaking,
            STATE_READY => SecureConnectionState::Ready,
            _ => SecureConnectionState::Closed,
        }
    }

    /// Negotiated parameters; `None` before the handshake completes.
    pub fn status(&self) -> Option<&SecureConnectionStatus> {
        self.session.get().map(|session| &session.status)
    }

    /// Passwords both peers proved. Empty before the handshake and for
    /// anonymous handshakes.
    pub fn matched_passwords(&self) -> &[String] {
        self.status().map_or(&[], |status| &status.matched_passwords)
    }

    /// Cumulative MAC-covered bytes sent (`iv + ciphertext`).
    pub fn total_sent_size(&self) -> u64 {
        self.total_sent_size.load(Ordering::Acquire)
    }

    /// Cumulative MAC-covered bytes received (`iv + ciphertext`).
    pub fn total_received_size(&self) -> u64 {
        self.total_received_size.load(Ordering::Acquire)
    }

    /// Terminally close the connection and the framed connection under
    /// it.
    pub fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.base.close();
    }

    /// Run the handshake. Must be called exactly once, concurrently with
    /// the peer's call on its side.
    pub async fn handshake(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), SecureConnectionError> {
        if self
            .state
            .compare_exchange(
                STATE_NEW,
                STATE_HANDSHAKING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            if let Some(error) = self.terminal.get() {
                return Err(error.clone());
            }
            return Err(SecureConnectionError::Internal(
                "handshake already started".to_owned(),
            ));
        }

        match handshake::run(&self.base, self.config.role, &self.config.passwords, cancel).await
        {
            Ok(outcome) => {
                let _ = self
                    .session
                    .set(Session { keys: outcome.keys, status: outcome.status });
                self.state.store(STATE_READY, Ordering::Release);
                Ok(())
            },
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Encrypt and send one record.
    ///
    /// `action` produces the plaintext into a scratch hub; the sealed
    /// record is handed to the framed connection as a single frame.
    /// Cancellation before the frame is staged leaves the connection
    /// healthy.
    pub async fn send<F>(
        &self,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<(), SecureConnectionError>
    where
        F: FnOnce(&mut HubWriter<'_>) -> Result<(), ByteHubError>,
    {
        let session = self.ready_session()?;

        let mut plaintext = ByteHub::new(Arc::clone(&self.pool));
        if let Err(error) = action(&mut plaintext.writer()) {
            return Err(self.fail(error.into()));
        }

        let body_len = sealed_body_len(plaintext.written_bytes() as usize) as u64;
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let result = self
            .base
            .enqueue(
                |writer| {
                    // The running total moves only once the frame is
                    // actually staged, so a cancelled wait cannot
                    // desynchronize the counters.
                    let running_total =
                        self.total_sent_size.fetch_add(body_len, Ordering::AcqRel) + body_len;
                    record::seal_into(writer, &session.keys, running_total, iv, &mut plaintext)
                },
                cancel,
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(ConnectionError::Cancelled) => Err(SecureConnectionError::Cancelled),
            Err(error) => Err(self.fail(error.into())),
        }
    }

    /// Receive and decrypt one record.
    ///
    /// `action` observes the plaintext as a read-only sequence.
    /// Cancellation before a frame arrives leaves the connection healthy.
    pub async fn receive<F>(
        &self,
        action: F,
        cancel: &CancellationToken,
    ) -> Result<(), SecureConnectionError>
    where
        F: FnOnce(&mut HubReader<'_>) -> Result<(), ByteHubError>,
    {
        let session = self.ready_session()?;

        let mut frame = Vec::new();
        match self
            .base
            .dequeue(
                |reader| {
                    frame = reader.to_vec()?;
                    Ok(())
                },
                cancel,
            )
            .await
        {
            Ok(()) => {},
            Err(ConnectionError::Cancelled) => return Err(SecureConnectionError::Cancelled),
            Err(error) => return Err(self.fail(error.into())),
        }

        if frame.len() < MIN_RECORD_LEN {
            return Err(self.fail(SecureConnectionError::Malformed {
                reason: "record shorter than minimum",
            }));
        }
        let body_len = frame.len() - HEADER_LEN - TAG_LEN;
        if body_len % BLOCK_LEN != 0 {
            return Err(self.fail(SecureConnectionError::Malformed {
                reason: "ciphertext is not block-aligned",
            }));
        }

        let expected_total =
            self.total_received_size.fetch_add(body_len as u64, Ordering::AcqRel)
                + body_len as u64;

        let mut plaintext = ByteHub::new(Arc::clone(&self.pool));
        if let Err(error) = record::open_into(&frame, &session.keys, expected_total, &mut plaintext)
        {
            return Err(self.fail(error));
        }

        action(&mut plaintext.reader()).map_err(|error| self.fail(error.into()))
    }

    fn ready_session(&self) -> Result<&Session, SecureConnectionError> {
        if let Some(error) = self.terminal.get() {
            return Err(error.clone());
        }
        match self.state() {
            SecureConnectionState::Ready => self
                .session
                .get()
                .ok_or_else(|| SecureConnectionError::Internal("session missing".to_owned())),
            SecureConnectionState::New | SecureConnectionState::Handshaking => {
                Err(SecureConnectionError::NotHandshaked)
            },
            SecureConnectionState::Closed => {
                Err(SecureConnectionError::Connection(ConnectionError::Closed))
            },
        }
    }

    /// Record the first terminal error, close everything, and return the
    /// recorded error.
    fn fail(&self, error: SecureConnectionError) -> SecureConnectionError {
        let _ = self.terminal.set(error.clone());
        self.close();
        self.terminal.get().cloned().unwrap_or(error)
    }
}

#[cfg(test)]
mod tests {
    use strand_conn::{
        ConnectionDispatcher, DispatcherConfig, FramedConnectionConfig, MemoryCap,
    };

    use super::*;

    fn secure_pair(
        connected_passwords: Vec<String>,
        accepted_passwords: Vec<String>,
    ) -> (SecureConnection, SecureConnection, ConnectionDispatcher) {
        let dispatcher = ConnectionDispatcher::start(DispatcherConfig {
            max_send_bytes_per_second: 64 * 1024 * 1024,
            max_receive_bytes_per_second: 64 * 1024 * 1024,
            ticks_per_second: 1000,
        });

        let (cap_a, cap_b) = MemoryCap::pair();
        let pool = BytesPool::shared();
        let base_a =
            FramedConnection::new(Box::new(cap_a), FramedConnectionConfig::default(), &pool)
                .unwrap();
        let base_b =
            FramedConnection::new(Box::new(cap_b), FramedConnectionConfig::default(), &pool)
                .unwrap();
        dispatcher.register(&base_a);
        dispatcher.register(&base_b);

        let connected = SecureConnection::new(
            base_a,
            SecureConnectionConfig {
                role: SecureConnectionRole::Connected,
                passwords: connected_passwords,
            },
            Arc::clone(&pool),
        );
        let accepted = SecureConnection::new(
            base_b,
            SecureConnectionConfig {
                role: SecureConnectionRole::Accepted,
                passwords: accepted_passwords,
            },
            pool,
        );

        (connected, accepted, dispatcher)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handshake_derives_mirror_image_keys() {
        let (connected, accepted, _dispatcher) = secure_pair(Vec::new(), Vec::new());
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(connected.handshake(&cancel), accepted.handshake(&cancel));
        a.unwrap();
        b.unwrap();

        let connected_keys = &connected.session.get().unwrap().keys;
        let accepted_keys = &accepted.session.get().unwrap().keys;

        assert_eq!(connected_keys.my_crypto_key, accepted_keys.peer_crypto_key);
        assert_eq!(connected_keys.peer_crypto_key, accepted_keys.my_crypto_key);
        assert_eq!(connected_keys.my_hmac_key, accepted_keys.peer_hmac_key);
        assert_eq!(connected_keys.peer_hmac_key, accepted_keys.my_hmac_key);

        // Distinct directions use distinct keys.
        assert_ne!(connected_keys.my_crypto_key, connected_keys.peer_crypto_key);
        assert_ne!(connected_keys.my_hmac_key, connected_keys.peer_hmac_key);

        assert_eq!(connected.state(), SecureConnectionState::Ready);
        assert_eq!(accepted.state(), SecureConnectionState::Ready);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_before_handshake_is_rejected() {
        let (connected, _accepted, _dispatcher) = secure_pair(Vec::new(), Vec::new());
        let cancel = CancellationToken::new();

        let result = connected.send(|writer| writer.put_slice(b"early"), &cancel).await;
        assert_eq!(result, Err(SecureConnectionError::NotHandshaked));
    }
}
