//! Handshake message schemas and their wire codec.
//!
//! Messages travel as tag-value records: a varint field id greater than
//! zero introduces each field, a field id of zero terminates the record.
//! Scalars are varints (signed values zig-zag encoded), byte strings and
//! nested records are varint-length-prefixed, arrays are varint-count
//! prefixed. Unknown field ids are rejected.

use bytes::BufMut;

use crate::error::WireError;

/// Whether the handshake proves knowledge of shared passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticationType {
    /// Anonymous handshake; any peer is accepted.
    None,
    /// Mutual proof of at least one shared password.
    Password,
}

impl AuthenticationType {
    fn to_wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Password => 1,
        }
    }

    fn from_wire(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Password),
            _ => Err(WireError::InvalidValue { name: "authentication_type" }),
        }
    }
}

/// Key exchange algorithms. Negotiation picks the greatest common wire
/// value, so later entries must be strictly stronger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlgorithm {
    /// Ephemeral ECDH on P-521 with SHA-256-based password binding.
    EcDhP521Sha2_256,
}

impl KeyExchangeAlgorithm {
    pub(crate) const fn wire_value(self) -> u64 {
        match self {
            Self::EcDhP521Sha2_256 => 1,
        }
    }

    pub(crate) fn from_wire_value(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::EcDhP521Sha2_256),
            _ => None,
        }
    }
}

/// Key derivation algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDerivationAlgorithm {
    /// PBKDF2-HMAC-SHA256.
    Pbkdf2,
}

impl KeyDerivationAlgorithm {
    pub(crate) const fn wire_value(self) -> u64 {
        match self {
            Self::Pbkdf2 => 1,
        }
    }

    pub(crate) fn from_wire_value(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Pbkdf2),
            _ => None,
        }
    }
}

/// Record ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoAlgorithm {
    /// AES-256-CBC with PKCS7 padding.
    Aes256,
}

impl CryptoAlgorithm {
    pub(crate) const fn wire_value(self) -> u64 {
        match self {
            Self::Aes256 => 1,
        }
    }

    pub(crate) fn from_wire_value(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Aes256),
            _ => None,
        }
    }
}

/// Record MAC hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// HMAC-SHA256.
    Sha2_256,
}

impl HashAlgorithm {
    pub(crate) const fn wire_value(self) -> u64 {
        match self {
            Self::Sha2_256 => 1,
        }
    }

    pub(crate) fn from_wire_value(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Sha2_256),
            _ => None,
        }
    }
}

/// First handshake message: who we are and what we can speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMessage {
    /// Random per-handshake session id, 32 bytes today.
    pub session_id: Vec<u8>,
    /// Authentication this side insists on.
    pub authentication_type: AuthenticationType,
    /// Advertised key exchange algorithm values.
    pub key_exchange_algorithms: Vec<u64>,
    /// Advertised key derivation algorithm values.
    pub key_derivation_algorithms: Vec<u64>,
    /// Advertised record cipher values.
    pub crypto_algorithms: Vec<u64>,
    /// Advertised record hash values.
    pub hash_algorithms: Vec<u64>,
}

impl ProfileMessage {
    /// Encode to the wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_bytes_field(&mut out, 1, &self.session_id);
        put_varint_field(&mut out, 2, u64::from(self.authentication_type.to_wire()));
        put_u64_array_field(&mut out, 3, &self.key_exchange_algorithms);
        put_u64_array_field(&mut out, 4, &self.key_derivation_algorithms);
        put_u64_array_field(&mut out, 5, &self.crypto_algorithms);
        put_u64_array_field(&mut out, 6, &self.hash_algorithms);
        put_varint(&mut out, 0);
        out
    }

    /// Decode from the wire representation.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let mut session_id = None;
        let mut authentication_type = None;
        let mut key_exchange = Vec::new();
        let mut key_derivation = Vec::new();
        let mut crypto = Vec::new();
        let mut hash = Vec::new();

        loop {
            let field = cursor.get_varint()?;
            match field {
                0 => break,
                1 => session_id = Some(cursor.get_bytes()?),
                2 => {
                    let raw = cursor.get_varint()?;
                    let raw = u8::try_from(raw)
                        .map_err(|_| WireError::InvalidValue { name: "authentication_type" })?;
                    authentication_type = Some(AuthenticationType::from_wire(raw)?);
                },
                3 => key_exchange = cursor.get_u64_array()?,
                4 => key_derivation = cursor.get_u64_array()?,
                5 => crypto = cursor.get_u64_array()?,
                6 => hash = cursor.get_u64_array()?,
                id => return Err(WireError::UnknownField { id }),
            }
        }

        Ok(Self {
            session_id: session_id.ok_or(WireError::MissingField { name: "session_id" })?,
            authentication_type: authentication_type
                .ok_or(WireError::MissingField { name: "authentication_type" })?,
            key_exchange_algorithms: key_exchange,
            key_derivation_algorithms: key_derivation,
            crypto_algorithms: crypto,
            hash_algorithms: hash,
        })
    }
}

/// Second handshake message: an ephemeral public key bound to its
/// creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementPublicKey {
    /// Unix seconds when the keypair was generated.
    pub creation_time: i64,
    /// Wire value of the key exchange algorithm this key belongs to.
    pub algorithm_type: u64,
    /// SEC1-encoded public key.
    pub public_key: Vec<u8>,
}

impl AgreementPublicKey {
    /// Encode to the wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_varint_field(&mut out, 1, zigzag_encode(self.creation_time));
        put_varint_field(&mut out, 2, self.algorithm_type);
        put_bytes_field(&mut out, 3, &self.public_key);
        put_varint(&mut out, 0);
        out
    }

    /// Decode from the wire representation.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let mut creation_time = None;
        let mut algorithm_type = None;
        let mut public_key = None;

        loop {
            let field = cursor.get_varint()?;
            match field {
                0 => break,
                1 => creation_time = Some(zigzag_decode(cursor.get_varint()?)),
                2 => algorithm_type = Some(cursor.get_varint()?),
                3 => public_key = Some(cursor.get_bytes()?),
                id => return Err(WireError::UnknownField { id }),
            }
        }

        Ok(Self {
            creation_time: creation_time
                .ok_or(WireError::MissingField { name: "creation_time" })?,
            algorithm_type: algorithm_type
                .ok_or(WireError::MissingField { name: "algorithm_type" })?,
            public_key: public_key.ok_or(WireError::MissingField { name: "public_key" })?,
        })
    }
}

/// Third handshake message: the shuffled password proof hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationMessage {
    /// One HMAC per password this side knows, in shuffled order.
    pub hashes: Vec<Vec<u8>>,
}

impl AuthenticationMessage {
    /// Encode to the wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_varint(&mut out, 1);
        put_varint(&mut out, self.hashes.len() as u64);
        for hash in &self.hashes {
            put_varint(&mut out, hash.len() as u64);
            out.put_slice(hash);
        }
        put_varint(&mut out, 0);
        out
    }

    /// Decode from the wire representation.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let mut hashes = Vec::new();

        loop {
            let field = cursor.get_varint()?;
            match field {
                0 => break,
                1 => {
                    let count = cursor.get_varint()?;
                    for _ in 0..count {
                        hashes.push(cursor.get_bytes()?);
                    }
                },
                id => return Err(WireError::UnknownField { id }),
            }
        }

        Ok(Self { hashes })
    }
}

/// The structure each password proof commits to: the sender's own profile
/// and ephemeral public key. Never sent directly; only its serialization
/// is hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationMessage {
    /// The committing side's profile.
    pub profile: ProfileMessage,
    /// The committing side's ephemeral public key.
    pub public_key: AgreementPublicKey,
}

impl VerificationMessage {
    /// Encode to the wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_bytes_field(&mut out, 1, &self.profile.encode());
        put_bytes_field(&mut out, 2, &self.public_key.encode());
        put_varint(&mut out, 0);
        out
    }

    /// Decode from the wire representation.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let mut profile = None;
        let mut public_key = None;

        loop {
            let field = cursor.get_varint()?;
            match field {
                0 => break,
                1 => profile = Some(ProfileMessage::decode(&cursor.get_bytes()?)?),
                2 => public_key = Some(AgreementPublicKey::decode(&cursor.get_bytes()?)?),
                id => return Err(WireError::UnknownField { id }),
            }
        }

        Ok(Self {
            profile: profile.ok_or(WireError::MissingField { name: "profile" })?,
            public_key: public_key.ok_or(WireError::MissingField { name: "public_key" })?,
        })
    }
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.put_u8(byte);
            break;
        }
        out.put_u8(byte | 0x80);
    }
}

fn put_varint_field(out: &mut Vec<u8>, field: u64, value: u64) {
    put_varint(out, field);
    put_varint(out, value);
}

fn put_bytes_field(out: &mut Vec<u8>, field: u64, value: &[u8]) {
    put_varint(out, field);
    put_varint(out, value.len() as u64);
    out.put_slice(value);
}

fn put_u64_array_field(out: &mut Vec<u8>, field: u64, values: &[u64]) {
    put_varint(out, field);
    put_varint(out, values.len() as u64);
    for &value in values {
        put_varint(out, value);
    }
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn get_u8(&mut self) -> Result<u8, WireError> {
        let (&first, rest) = self.bytes.split_first().ok_or(WireError::Truncated)?;
        self.bytes = rest;
        Ok(first)
    }

    fn get_varint(&mut self) -> Result<u64, WireError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.get_u8()?;
            if shift == 63 && byte > 1 {
                return Err(WireError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::VarintOverflow)
    }

    fn get_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let declared = self.get_varint()?;
        let len = usize::try_from(declared).map_err(|_| WireError::LengthOverrun {
            declared,
            remaining: self.bytes.len(),
        })?;
        if len > self.bytes.len() {
            return Err(WireError::LengthOverrun { declared, remaining: self.bytes.len() });
        }
        let (taken, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(taken.to_vec())
    }

    fn get_u64_array(&mut self) -> Result<Vec<u64>, WireError> {
        let count = self.get_varint()?;
        // Each element takes at least one byte; an impossible count is a
        // length overrun, not an allocation request.
        if count > self.bytes.len() as u64 {
            return Err(WireError::LengthOverrun { declared: count, remaining: self.bytes.len() });
        }
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(self.get_varint()?);
        }
        Ok(values)
    }
}
