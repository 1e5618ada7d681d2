//! End-to-end secure connection tests over in-memory caps.

use std::sync::Arc;

use strand_bytes::BytesPool;
use strand_conn::{
    ConnectionDispatcher, DispatcherConfig, FramedConnection, FramedConnectionConfig, MemoryCap,
};
use strand_secure::{
    SecureConnection, SecureConnectionConfig, SecureConnectionError, SecureConnectionRole,
    SecureConnectionState,
};
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

struct Pair {
    connected: SecureConnection,
    accepted: SecureConnection,
    _dispatcher: ConnectionDispatcher,
}

fn secure_pair(connected_passwords: &[&str], accepted_passwords: &[&str]) -> Pair {
    init_tracing();

    let dispatcher = ConnectionDispatcher::start(DispatcherConfig {
        max_send_bytes_per_second: 64 * 1024 * 1024,
        max_receive_bytes_per_second: 64 * 1024 * 1024,
        ticks_per_second: 1000,
    });

    let (cap_a, cap_b) = MemoryCap::pair();
    let pool = BytesPool::shared();
    let base_a = FramedConnection::new(Box::new(cap_a), FramedConnectionConfig::default(), &pool)
        .expect("valid config");
    let base_b = FramedConnection::new(Box::new(cap_b), FramedConnectionConfig::default(), &pool)
        .expect("valid config");
    dispatcher.register(&base_a);
    dispatcher.register(&base_b);

    let connected = SecureConnection::new(
        base_a,
        SecureConnectionConfig {
            role: SecureConnectionRole::Connected,
            passwords: connected_passwords.iter().map(|p| (*p).to_owned()).collect(),
        },
        Arc::clone(&pool),
    );
    let accepted = SecureConnection::new(
        base_b,
        SecureConnectionConfig {
            role: SecureConnectionRole::Accepted,
            passwords: accepted_passwords.iter().map(|p| (*p).to_owned()).collect(),
        },
        pool,
    );

    Pair { connected, accepted, _dispatcher: dispatcher }
}

async fn handshake_both(pair: &Pair) {
    let cancel = CancellationToken::new();
    let (a, b) =
        tokio::join!(pair.connected.handshake(&cancel), pair.accepted.handshake(&cancel));
    a.expect("connected handshake");
    b.expect("accepted handshake");
}

async fn send_text(from: &SecureConnection, text: &'static [u8]) {
    from.send(|writer| writer.put_slice(text), &CancellationToken::new())
        .await
        .expect("send");
}

async fn receive_text(to: &SecureConnection) -> Vec<u8> {
    let mut received = Vec::new();
    to.receive(
        |reader| {
            received = reader.to_vec()?;
            Ok(())
        },
        &CancellationToken::new(),
    )
    .await
    .expect("receive");
    received
}

#[tokio::test(flavor = "multi_thread")]
async fn anonymous_round_trip() {
    let pair = secure_pair(&[], &[]);
    handshake_both(&pair).await;

    let base_sent_before = pair.connected.framed_connection().sent_byte_count();

    send_text(&pair.connected, b"hello").await;
    assert_eq!(receive_text(&pair.accepted).await, b"hello");

    // 5 plaintext bytes: iv(16) + one padded block(16) = 32 covered
    // bytes; the wire frame is 8 + 32 + 32 = 72 plus the 4-byte frame
    // header.
    assert_eq!(pair.connected.total_sent_size(), 32);
    assert_eq!(pair.accepted.total_received_size(), 32);
    assert_eq!(
        pair.connected.framed_connection().sent_byte_count() - base_sent_before,
        76
    );

    assert!(pair.connected.matched_passwords().is_empty());
    assert!(pair.accepted.matched_passwords().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_and_aligned_payloads_round_trip() {
    let pair = secure_pair(&[], &[]);
    handshake_both(&pair).await;

    send_text(&pair.connected, b"").await;
    assert_eq!(receive_text(&pair.accepted).await, b"");

    send_text(&pair.connected, &[0x5A; 64]).await;
    assert_eq!(receive_text(&pair.accepted).await, vec![0x5A; 64]);
}

#[tokio::test(flavor = "multi_thread")]
async fn both_directions_carry_independent_totals() {
    let pair = secure_pair(&[], &[]);
    handshake_both(&pair).await;

    for round in 0u8..4 {
        send_text(&pair.connected, b"ping").await;
        assert_eq!(receive_text(&pair.accepted).await, b"ping");

        send_text(&pair.accepted, b"pong").await;
        assert_eq!(receive_text(&pair.connected).await, b"pong");

        let expected = u64::from(round + 1) * 32;
        assert_eq!(pair.connected.total_sent_size(), expected);
        assert_eq!(pair.connected.total_received_size(), expected);
        assert_eq!(pair.accepted.total_sent_size(), expected);
        assert_eq!(pair.accepted.total_received_size(), expected);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn large_payload_round_trip() {
    let pair = secure_pair(&[], &[]);
    handshake_both(&pair).await;

    let message: Vec<u8> = (0u8..=255).cycle().take(100_000).collect();
    let staged = message.clone();
    pair.connected
        .send(move |writer| writer.put_slice(&staged), &CancellationToken::new())
        .await
        .expect("send");

    assert_eq!(receive_text(&pair.accepted).await, message);
}

#[tokio::test(flavor = "multi_thread")]
async fn shared_password_is_discovered() {
    let pair = secure_pair(&["x", "y"], &["y", "z"]);
    handshake_both(&pair).await;

    assert_eq!(pair.connected.matched_passwords(), ["y".to_owned()].as_slice());
    assert_eq!(pair.accepted.matched_passwords(), ["y".to_owned()].as_slice());

    // The secured channel works after password authentication.
    send_text(&pair.connected, b"authenticated").await;
    assert_eq!(receive_text(&pair.accepted).await, b"authenticated");
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_passwords_do_not_break_matching() {
    let pair = secure_pair(&["y", "y", "x"], &["y"]);
    handshake_both(&pair).await;

    assert_eq!(pair.connected.matched_passwords(), ["y".to_owned()].as_slice());
}

#[tokio::test(flavor = "multi_thread")]
async fn disjoint_passwords_abort_the_handshake() {
    let pair = secure_pair(&["a"], &["b"]);
    let cancel = CancellationToken::new();

    let (connected_result, accepted_result) =
        tokio::join!(pair.connected.handshake(&cancel), pair.accepted.handshake(&cancel));

    assert_eq!(connected_result, Err(SecureConnectionError::PasswordMismatch));
    assert_eq!(accepted_result, Err(SecureConnectionError::PasswordMismatch));
    assert_eq!(pair.connected.state(), SecureConnectionState::Closed);
    assert_eq!(pair.accepted.state(), SecureConnectionState::Closed);

    // No records flow afterwards; the recorded error is sticky.
    let result = pair
        .connected
        .send(|writer| writer.put_slice(b"nope"), &cancel)
        .await;
    assert_eq!(result, Err(SecureConnectionError::PasswordMismatch));
}

#[tokio::test(flavor = "multi_thread")]
async fn authentication_type_mismatch_aborts() {
    let pair = secure_pair(&["secret"], &[]);
    let cancel = CancellationToken::new();

    let (connected_result, accepted_result) =
        tokio::join!(pair.connected.handshake(&cancel), pair.accepted.handshake(&cancel));

    assert_eq!(connected_result, Err(SecureConnectionError::AuthTypeMismatch));
    assert_eq!(accepted_result, Err(SecureConnectionError::AuthTypeMismatch));
}

#[tokio::test(flavor = "multi_thread")]
async fn receive_before_handshake_is_rejected() {
    let pair = secure_pair(&[], &[]);

    let result = pair
        .connected
        .receive(|_reader| Ok(()), &CancellationToken::new())
        .await;
    assert_eq!(result, Err(SecureConnectionError::NotHandshaked));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_reports_the_negotiated_suite() {
    let pair = secure_pair(&[], &[]);
    handshake_both(&pair).await;

    let status = pair.connected.status().expect("status after handshake");
    assert_eq!(
        status.key_exchange,
        strand_secure::KeyExchangeAlgorithm::EcDhP521Sha2_256
    );
    assert_eq!(status.key_derivation, strand_secure::KeyDerivationAlgorithm::Pbkdf2);
    assert_eq!(status.cipher, strand_secure::CryptoAlgorithm::Aes256);
    assert_eq!(status.hash, strand_secure::HashAlgorithm::Sha2_256);
}
