//! Secure connection layer over framed connections.
//!
//! Wraps a [`strand_conn::FramedConnection`] with a negotiated,
//! authenticated-encryption record layer:
//!
//! 1. **Handshake**: both peers symmetrically exchange profiles, pick the
//!    strongest common algorithms, run an ephemeral ECDH P-521 agreement,
//!    optionally prove knowledge of shared passwords, and derive
//!    mirror-image session keys with PBKDF2.
//! 2. **Records**: each frame carries a running byte-count header, a
//!    random IV, AES-256-CBC ciphertext, and an HMAC-SHA256 tag. The
//!    running count binds records to their order; reordering, dropping,
//!    or replaying a record fails the connection.
//!
//! The connection is terminal on any failure: callers drop it and
//! establish a fresh one.

#![forbid(unsafe_code)]

mod connection;
mod crypto;
mod error;
mod handshake;
mod messages;
mod record;

pub use connection::{
    SecureConnection, SecureConnectionConfig, SecureConnectionRole, SecureConnectionState,
    SecureConnectionStatus,
};
pub use error::{SecureConnectionError, WireError};
pub use messages::{
    AgreementPublicKey, AuthenticationMessage, AuthenticationType, CryptoAlgorithm,
    HashAlgorithm, KeyDerivationAlgorithm, KeyExchangeAlgorithm, ProfileMessage,
    VerificationMessage,
};
