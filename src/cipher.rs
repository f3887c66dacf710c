/*
    cipher - At-rest encryption for stored envelopes

    Encrypts serialized envelopes using AES-256-GCM.
    Keys are derived from the caller secret with Argon2id and a fresh salt.

    Layout of a salted ciphertext:
        [nonce: 12][ciphertext + tag][salt: 32]
*/

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{KvError, Result};

/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Salt length appended to salted ciphertexts
pub const SALT_LEN: usize = 32;

/// Derived and raw key length (AES-256)
pub const KEY_LEN: usize = 32;

/// GCM authentication tag length
const TAG_LEN: usize = 16;

/// Symmetric cipher collaborator used by the store.
pub trait Cipher: Send + Sync {
    /// Seals `data`. With `salted`, a key is derived from `key` and a new salt.
    fn encrypt(&self, key: &[u8], data: &[u8], salted: bool) -> Result<Vec<u8>>;

    /// Opens data produced by `encrypt` with the same `salted` flag.
    fn decrypt(&self, key: &[u8], data: &[u8], salted: bool) -> Result<Vec<u8>>;

    /// Derives a key from a secret and salt.
    fn derive_key(&self, secret: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// AES-256-GCM with Argon2id key derivation.
#[derive(Debug, Clone)]
pub struct AesGcmCipher {
    params: Params,
}

impl AesGcmCipher {
    /// Creates a cipher with the default work factor (19 MiB, 2 passes).
    pub fn new() -> Result<Self> {
        Self::with_cost(19 * 1024, 2)
    }

    /// Creates a cipher with an explicit Argon2 memory cost (KiB) and pass count.
    pub fn with_cost(memory_kib: u32, passes: u32) -> Result<Self> {
        let params = Params::new(memory_kib, passes, 1, Some(KEY_LEN))
            .map_err(|e| KvError::KeyDerivation(format!("Invalid Argon2 params: {}", e)))?;
        Ok(Self { params })
    }

    fn seal(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| KvError::Encryption(format!("Invalid key: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, data)
            .map_err(|e| KvError::Encryption(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len() + SALT_LEN);
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn open(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(KvError::InvalidCiphertext(format!(
                "{} bytes is shorter than nonce and tag",
                data.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| KvError::Decryption(format!("Invalid key: {}", e)))?;
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| KvError::Decryption("authentication failed".to_string()))
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, key: &[u8], data: &[u8], salted: bool) -> Result<Vec<u8>> {
        if !salted {
            return Self::seal(raw_key(key)?, data);
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let derived = self.derive_key(key, &salt)?;

        let mut result = Self::seal(&derived, data)?;
        result.extend_from_slice(&salt);
        Ok(result)
    }

    fn decrypt(&self, key: &[u8], data: &[u8], salted: bool) -> Result<Vec<u8>> {
        if !salted {
            return Self::open(raw_key(key)?, data);
        }

        if data.len() < NONCE_LEN + TAG_LEN + SALT_LEN {
            return Err(KvError::InvalidCiphertext(format!(
                "{} bytes is shorter than nonce, tag and salt",
                data.len()
            )));
        }

        let (sealed, salt) = data.split_at(data.len() - SALT_LEN);
        let derived = self.derive_key(key, salt)?;
        Self::open(&derived, sealed)
    }

    fn derive_key(&self, secret: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());

        let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
        argon2
            .hash_password_into(secret, salt, &mut key)
            .map_err(|e| KvError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }
}

fn raw_key(key: &[u8]) -> Result<&[u8]> {
    if key.len() != KEY_LEN {
        return Err(KvError::KeyDerivation(format!(
            "unsalted mode needs a {}-byte key, got {}",
            KEY_LEN,
            key.len()
        )));
    }
    Ok(key)
}
