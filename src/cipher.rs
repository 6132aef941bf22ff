//! Payload encryption.
//!
//! Payloads are sealed with AES-256-GCM-SIV. The 256-bit key is derived from
//! the configured credential with HKDF-SHA256 and a per-payload salt:
//!
//! ```text
//! "PUE1" | salt (16 bytes) | nonce (12 bytes) | ciphertext + tag
//! ```
//!
//! A wrong credential or a damaged blob fails authentication, so a bad
//! decrypt never produces a plaintext file.

use crate::config::Credential;
use crate::error::{Error, Result};
use aes_gcm_siv::aead::rand_core::RngCore;
use aes_gcm_siv::aead::{Aead, KeyInit, OsRng};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use async_trait::async_trait;
use hkdf::Hkdf;
use sha2::Sha256;
use std::path::Path;
use tracing::debug;

/// Leading bytes of every sealed payload.
pub const MAGIC: &[u8; 4] = b"PUE1";

/// HKDF info string for domain separation.
const KDF_INFO: &[u8] = b"payload-updater-payload-v1";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

/// Decrypts a ciphertext file into a plaintext file.
#[async_trait]
pub trait Cipher: Send + Sync {
    /// Decrypt `src` into `dest` using `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decryption`] for a wrong key or corrupt input and
    /// [`Error::Io`] for filesystem failures. `dest` is not written on error.
    async fn decrypt_file(&self, src: &Path, dest: &Path, key: &Credential) -> Result<()>;
}

/// AES-256-GCM-SIV payload cipher.
#[derive(Debug, Clone, Copy, Default)]
pub struct SivCipher;

#[async_trait]
impl Cipher for SivCipher {
    async fn decrypt_file(&self, src: &Path, dest: &Path, key: &Credential) -> Result<()> {
        let sealed = tokio::fs::read(src).await?;
        let plaintext = open(&sealed, key)?;
        tokio::fs::write(dest, plaintext).await?;
        debug!("Decrypted {} into {}", src.display(), dest.display());
        Ok(())
    }
}

fn derive_cipher(key: &Credential, salt: &[u8]) -> Result<Aes256GcmSiv> {
    let hk = Hkdf::<Sha256>::new(Some(salt), key.expose());
    let mut okm = [0u8; 32];
    hk.expand(KDF_INFO, &mut okm)
        .map_err(|e| Error::Decryption(format!("Key derivation failed: {e}")))?;
    Aes256GcmSiv::new_from_slice(&okm)
        .map_err(|e| Error::Decryption(format!("Invalid key length: {e}")))
}

/// Seal `plaintext` into the payload format.
///
/// # Errors
///
/// Returns [`Error::Decryption`] if the cipher cannot be initialised.
pub fn seal(plaintext: &[u8], key: &Credential) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let cipher = derive_cipher(key, &salt)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Decryption("Encryption failed".into()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed payload.
///
/// # Errors
///
/// Returns [`Error::Decryption`] if the header is wrong, the key is wrong or
/// the ciphertext was modified.
pub fn open(sealed: &[u8], key: &Credential) -> Result<Vec<u8>> {
    if sealed.len() < HEADER_LEN || &sealed[..MAGIC.len()] != MAGIC {
        return Err(Error::Decryption("Not a sealed payload".into()));
    }
    let salt = &sealed[MAGIC.len()..MAGIC.len() + SALT_LEN];
    let nonce = &sealed[MAGIC.len() + SALT_LEN..HEADER_LEN];

    let cipher = derive_cipher(key, salt)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), &sealed[HEADER_LEN..])
        .map_err(|_| Error::Decryption("Authentication failed: wrong key or corrupt payload".into()))
}
