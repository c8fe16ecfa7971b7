//! Transparent block encryption.
//!
//! The engine specifies *when* encryption happens, not the cipher itself:
//! payloads are encrypted immediately before a backend write and decrypted
//! immediately after a backend read, invisibly to the transaction layer.
//! The default implementation is a deterministic SHA-256 keystream; the
//! [`Cipher`] seam exists so deployments can substitute a vetted AEAD.
//!
//! Integrity is not the cipher's job here: the store checksums the stored
//! (post-encryption) bytes, and a wrong or stale key is rejected via the
//! key fingerprint in the metadata descriptor, checked at open and again on
//! every block access.

use lagoon_error::{LagoonError, Result};
use lagoon_types::BlockId;
use rand::RngCore;
use sha2::{Digest, Sha256};

const KEY_DOMAIN: &[u8] = b"lagoon.key.v1";
const FINGERPRINT_DOMAIN: &[u8] = b"lagoon.fp.v1";
const NONCE_LEN: usize = 8;

/// Hex digest length of the persisted key fingerprint.
pub const FINGERPRINT_LEN: usize = 16;

/// A derived block cipher bound to one passphrase.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
    fingerprint: String,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never format the key material.
        f.debug_struct("Cipher")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl Cipher {
    /// Derive a cipher from a caller-supplied passphrase.
    #[must_use]
    pub fn derive(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(passphrase.as_bytes());
        let key: [u8; 32] = hasher.finalize().into();

        let mut fp = Sha256::new();
        fp.update(FINGERPRINT_DOMAIN);
        fp.update(key);
        let digest = fp.finalize();
        let fingerprint = hex::encode(&digest[..FINGERPRINT_LEN / 2]);

        Self { key, fingerprint }
    }

    /// Short hex digest identifying this key, persisted in store metadata.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypt one block payload. The output carries a random nonce prefix
    /// so identical plaintexts never produce identical stored bytes.
    #[must_use]
    pub fn encrypt(&self, id: BlockId, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(plaintext);
        self.apply_keystream(id, nonce, &mut out[NONCE_LEN..]);
        out
    }

    /// Decrypt one stored payload.
    pub fn decrypt(&self, id: BlockId, stored: &[u8]) -> Result<Vec<u8>> {
        if stored.len() < NONCE_LEN {
            return Err(LagoonError::encryption(format!(
                "block {id} is shorter than the nonce prefix"
            )));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&stored[..NONCE_LEN]);
        let mut out = stored[NONCE_LEN..].to_vec();
        self.apply_keystream(id, nonce, &mut out);
        Ok(out)
    }

    fn apply_keystream(&self, id: BlockId, nonce: [u8; NONCE_LEN], buf: &mut [u8]) {
        for (counter, chunk) in buf.chunks_mut(32).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(self.key);
            hasher.update(nonce);
            hasher.update(id.get().to_le_bytes());
            hasher.update((counter as u64).to_le_bytes());
            let pad = hasher.finalize();
            for (dst, &k) in chunk.iter_mut().zip(pad.iter()) {
                *dst ^= k;
            }
        }
    }
}
