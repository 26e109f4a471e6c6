//! End-to-end encryption for the data channel.
//!
//! Each side generates an ephemeral X25519 key pair when its channel is
//! attached and sends the 32-byte public key as the first frame. The shared
//! secret is expanded with HKDF-SHA256 into two directional
//! ChaCha20-Poly1305 keys, picked deterministically by public-key order, so
//! both peers agree on which key seals and which opens.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Nonce},
    ChaCha20Poly1305, Key,
};
use hkdf::Hkdf;
use ring::{agreement, rand as ring_rand};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ChannelError, NegotiationError};
use crate::logger::log;

/// ChaCha20-Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;

const HKDF_INFO: &[u8] = b"pairlink-chat";

/// Key wrapper that wipes its memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct ZeroizedKey {
    key: [u8; 32],
}

/// Ephemeral key pair held between channel attach and key exchange.
pub struct KeyPair {
    secret: agreement::EphemeralPrivateKey,
    public: [u8; 32],
}

impl KeyPair {
    pub fn generate() -> Result<Self, NegotiationError> {
        let rng = ring_rand::SystemRandom::new();
        let secret = agreement::EphemeralPrivateKey::generate(&agreement::X25519, &rng)
            .map_err(|_| NegotiationError::Platform("key generation failed".into()))?;
        let public_key = secret
            .compute_public_key()
            .map_err(|_| NegotiationError::Platform("public key derivation failed".into()))?;
        let public = <[u8; 32]>::try_from(public_key.as_ref())
            .map_err(|_| NegotiationError::Platform("unexpected public key length".into()))?;
        Ok(Self { secret, public })
    }

    pub fn public(&self) -> [u8; 32] {
        self.public
    }

    /// Consumes the pair and the peer's public key into a ready crypto
    /// context. The ephemeral private key is gone after this call.
    pub fn into_ctx(self, peer_pub: &[u8; 32]) -> Result<CryptoCtx, NegotiationError> {
        let KeyPair { secret, public } = self;

        let peer_key = agreement::UnparsedPublicKey::new(&agreement::X25519, peer_pub);
        let mut shared = agreement::agree_ephemeral(secret, &peer_key, |s| s.to_vec())
            .map_err(|_| NegotiationError::Platform("key agreement failed".into()))?;

        // Two directional keys out of one shared secret
        let hk = Hkdf::<Sha256>::new(None, &shared);
        let mut okm = [0u8; 64];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|_| NegotiationError::Platform("key derivation failed".into()))?;
        shared.zeroize();

        let (k1, k2) = okm.split_at(32);

        // Deterministic direction assignment based on public key order
        let (send_slice, recv_slice) = if public < *peer_pub { (k1, k2) } else { (k2, k1) };

        let mut send_key = [0u8; 32];
        let mut recv_key = [0u8; 32];
        send_key.copy_from_slice(send_slice);
        recv_key.copy_from_slice(recv_slice);

        // SAS over the first derived key: 48 bits, 12 hex chars
        let fp_raw = Sha256::digest(k1);
        let sas = hex::encode(&fp_raw[..6]);

        okm.zeroize();

        let sealing = ChaCha20Poly1305::new(&Key::from(send_key));
        let opening = ChaCha20Poly1305::new(&Key::from(recv_key));

        let ctx = CryptoCtx {
            sealing,
            opening,
            send_n: 1,
            recv_n: 1,
            last_accepted_recv: 0,
            sas,
            _send_key: ZeroizedKey { key: send_key },
            _recv_key: ZeroizedKey { key: recv_key },
        };

        send_key.zeroize();
        recv_key.zeroize();

        Ok(ctx)
    }
}

/// Established encryption context for one channel.
pub struct CryptoCtx {
    sealing: ChaCha20Poly1305,
    opening: ChaCha20Poly1305,
    send_n: u64,
    recv_n: u64,
    // Replay guard: last accepted receive sequence number
    last_accepted_recv: u64,
    sas: String,
    _send_key: ZeroizedKey,
    _recv_key: ZeroizedKey,
}

impl CryptoCtx {
    /// Short authentication string for out-of-band verification.
    pub fn sas(&self) -> &str {
        &self.sas
    }

    /// Encrypts one outbound frame, bumping the send counter.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let nonce = u64_to_nonce(self.send_n);
        let ciphertext = self
            .sealing
            .encrypt(&nonce, plaintext)
            .map_err(|_| ChannelError::Send("encryption failed".into()))?;
        self.send_n += 1;
        Ok(ciphertext)
    }

    /// Decrypts one inbound frame. Returns `None` for frames that are too
    /// short, fail authentication, or replay an already-accepted sequence.
    pub fn open(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < TAG_LEN {
            log(&format!("inbound frame too short: {} bytes", frame.len()));
            return None;
        }

        let nonce = u64_to_nonce(self.recv_n);
        match self.opening.decrypt(&nonce, frame) {
            Ok(plaintext) => {
                if self.recv_n > self.last_accepted_recv {
                    self.last_accepted_recv = self.recv_n;
                    self.recv_n += 1;
                    Some(plaintext)
                } else {
                    log(&format!(
                        "replay detected: seq {} <= last accepted {}",
                        self.recv_n, self.last_accepted_recv
                    ));
                    None
                }
            }
            Err(_) => {
                log(&format!("failed to decrypt frame with seq {}", self.recv_n));
                None
            }
        }
    }
}

impl Drop for CryptoCtx {
    fn drop(&mut self) {
        self.send_n.zeroize();
        self.recv_n.zeroize();
        self.last_accepted_recv.zeroize();
        self.sas.zeroize();
        // ZeroizedKey fields wipe themselves
    }
}

fn u64_to_nonce(v: u64) -> Nonce<ChaCha20Poly1305> {
    let mut b = [0u8; 12];
    b[4..].copy_from_slice(&v.to_be_bytes());
    *Nonce::<ChaCha20Poly1305>::from_slice(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_of_contexts() -> (CryptoCtx, CryptoCtx) {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        let a_pub = a.public();
        let b_pub = b.public();
        (a.into_ctx(&b_pub).unwrap(), b.into_ctx(&a_pub).unwrap())
    }

    #[test]
    fn both_sides_derive_the_same_sas() {
        let (a, b) = pair_of_contexts();
        assert_eq!(a.sas(), b.sas());
        assert_eq!(a.sas().len(), 12);
    }

    #[test]
    fn sealed_frames_open_on_the_other_side() {
        let (mut a, mut b) = pair_of_contexts();

        for text in ["first", "second", "third"] {
            let frame = a.seal(text.as_bytes()).unwrap();
            assert_eq!(b.open(&frame).unwrap(), text.as_bytes());
        }

        // and the reverse direction
        let frame = b.seal(b"reply").unwrap();
        assert_eq!(a.open(&frame).unwrap(), b"reply");
    }

    #[test]
    fn replayed_frame_is_dropped() {
        let (mut a, mut b) = pair_of_contexts();

        let frame = a.seal(b"once").unwrap();
        assert!(b.open(&frame).is_some());
        assert!(b.open(&frame).is_none());
    }

    #[test]
    fn short_and_tampered_frames_are_rejected() {
        let (mut a, mut b) = pair_of_contexts();

        assert!(b.open(&[0u8; 4]).is_none());

        let mut frame = a.seal(b"payload").unwrap();
        frame[0] ^= 0xff;
        assert!(b.open(&frame).is_none());
    }
}
