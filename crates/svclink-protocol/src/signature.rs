/// Pluggable event signing.
///
/// A signature travels as a typed packet `<type:1><len:1><raw bytes>` so
/// multiple schemes can coexist on the wire. Type 0 is reserved as invalid;
/// unknown types are rejected, not ignored.
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::RngCore;

use crate::error::ProtocolError;

/// Raw Ed25519 public key scheme.
pub const SIG_TYPE_ED25519: u8 = 1;
/// X.509 certificate scheme (reserved, no in-tree implementation).
pub const SIG_TYPE_X509: u8 = 2;

/// Read-only signature checking capability.
pub trait Verifier: Send + Sync {
    /// Verify `signature` over `data` with the configured public key.
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
    /// Wire type byte of this scheme.
    fn sig_type(&self) -> u8;
    /// The public key material.
    fn public_key(&self) -> Vec<u8>;
}

/// Full signing capability — everything a [`Verifier`] does, plus signing.
pub trait Signer: Verifier {
    fn sign(&self, data: &[u8]) -> Vec<u8>;
    /// The private key material, in the scheme's keypair encoding.
    fn private_key(&self) -> Vec<u8>;
}

/// Ed25519 signer, wire type [`SIG_TYPE_ED25519`].
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Generate a fresh keypair from the system CSPRNG.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Ed25519Signer {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Construct from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, ProtocolError> {
        let seed: [u8; 32] = seed.try_into().map_err(|_| ProtocolError::KeySize {
            len: seed.len(),
            want: 32,
        })?;
        Ok(Ed25519Signer {
            key: SigningKey::from_bytes(&seed),
        })
    }

    /// Construct from the 64-byte `seed || public key` keypair encoding.
    /// Fails if the embedded public key does not match the seed.
    pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; 64] = bytes.try_into().map_err(|_| ProtocolError::KeySize {
            len: bytes.len(),
            want: 64,
        })?;
        let key = SigningKey::from_keypair_bytes(&bytes)
            .map_err(|_| ProtocolError::KeySize { len: 64, want: 64 })?;
        Ok(Ed25519Signer { key })
    }
}

impl Verifier for Ed25519Signer {
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        verify_ed25519(&self.key.verifying_key(), data, signature)
    }

    fn sig_type(&self) -> u8 {
        SIG_TYPE_ED25519
    }

    fn public_key(&self) -> Vec<u8> {
        self.key.verifying_key().to_bytes().to_vec()
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.key.sign(data).to_bytes().to_vec()
    }

    fn private_key(&self) -> Vec<u8> {
        self.key.to_keypair_bytes().to_vec()
    }
}

/// Verify-only Ed25519 key, for checking peers' signatures.
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    /// Construct from 32 public key bytes.
    pub fn from_public_key(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| ProtocolError::KeySize {
            len: bytes.len(),
            want: 32,
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|_| ProtocolError::KeySize { len: 32, want: 32 })?;
        Ok(Ed25519Verifier { key })
    }
}

impl Verifier for Ed25519Verifier {
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        verify_ed25519(&self.key, data, signature)
    }

    fn sig_type(&self) -> u8 {
        SIG_TYPE_ED25519
    }

    fn public_key(&self) -> Vec<u8> {
        self.key.to_bytes().to_vec()
    }
}

/// Strict verification: non-canonical signatures are rejected.
fn verify_ed25519(key: &VerifyingKey, data: &[u8], signature: &[u8]) -> bool {
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    key.verify_strict(data, &sig).is_ok()
}

/// Encode a typed packet `<type:1><len:1><data>`. Shared by wire signatures
/// and the heartbeat's public-key announcement.
pub fn encode_packet(packet_type: u8, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if data.len() > u8::MAX as usize {
        return Err(ProtocolError::SignatureLengthMismatch {
            declared: u8::MAX as usize,
            actual: data.len(),
        });
    }
    let mut out = Vec::with_capacity(2 + data.len());
    out.push(packet_type);
    out.push(data.len() as u8);
    out.extend_from_slice(data);
    Ok(out)
}

/// Parse a typed packet, validating the embedded length.
pub fn parse_packet(packet: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
    if packet.len() < 2 {
        return Err(ProtocolError::SignaturePacketTooShort { len: packet.len() });
    }
    let declared = packet[1] as usize;
    let data = &packet[2..];
    if declared != data.len() {
        return Err(ProtocolError::SignatureLengthMismatch {
            declared,
            actual: data.len(),
        });
    }
    Ok((packet[0], data))
}
