// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AES-256-GCM primitives shared by the root key providers and the data key.
//!
//! A root key wraps data keys; the data key seals database columns. Both
//! layers use the same `nonce ‖ ciphertext` framing.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{SecretsError, SecretsResult};

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the key identifier derived from a wrapped key.
pub const KEY_ID_SIZE: usize = 4;

/// Encrypted data with nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
	pub ciphertext: Vec<u8>,
	pub nonce: [u8; NONCE_SIZE],
}

impl EncryptedData {
	/// Serialize as `nonce ‖ ciphertext`.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
		out.extend_from_slice(&self.nonce);
		out.extend_from_slice(&self.ciphertext);
		out
	}

	pub fn from_bytes(bytes: &[u8]) -> SecretsResult<Self> {
		if bytes.len() <= NONCE_SIZE {
			return Err(SecretsError::CorruptedData(format!(
				"sealed value is {} bytes, shorter than its nonce",
				bytes.len()
			)));
		}
		let mut nonce = [0u8; NONCE_SIZE];
		nonce.copy_from_slice(&bytes[..NONCE_SIZE]);
		Ok(Self {
			ciphertext: bytes[NONCE_SIZE..].to_vec(),
			nonce,
		})
	}
}

/// Generate a random encryption key.
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
	let mut key = Zeroizing::new([0u8; KEY_SIZE]);
	OsRng.fill_bytes(key.as_mut());
	key
}

/// Generate a random nonce.
///
/// 96-bit random nonces from OsRng. The same (key, nonce) pair must never be
/// reused.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
	let mut nonce = [0u8; NONCE_SIZE];
	OsRng.fill_bytes(&mut nonce);
	nonce
}

/// Copy key material into a fixed-size key, rejecting other lengths.
pub fn key_from_slice(bytes: &[u8]) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>> {
	if bytes.len() != KEY_SIZE {
		return Err(SecretsError::InvalidKeySize {
			expected: KEY_SIZE,
			actual: bytes.len(),
		});
	}
	let mut key = Zeroizing::new([0u8; KEY_SIZE]);
	key.copy_from_slice(bytes);
	Ok(key)
}

/// Encrypt `plaintext` under `key`.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> SecretsResult<EncryptedData> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

	let nonce_bytes = generate_nonce();
	let nonce = Nonce::from_slice(&nonce_bytes);

	let ciphertext = cipher
		.encrypt(nonce, plaintext)
		.map_err(|e| SecretsError::Encryption(format!("seal failed: {e}")))?;

	Ok(EncryptedData {
		ciphertext,
		nonce: nonce_bytes,
	})
}

/// Decrypt a value sealed by [`encrypt`].
pub fn decrypt(key: &[u8; KEY_SIZE], encrypted: &EncryptedData) -> SecretsResult<Zeroizing<Vec<u8>>> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
	let nonce = Nonce::from_slice(&encrypted.nonce);

	let plaintext = cipher
		.decrypt(nonce, encrypted.ciphertext.as_slice())
		.map_err(|e| SecretsError::Decryption(format!("opening seal: {e}")))?;

	Ok(Zeroizing::new(plaintext))
}

/// Wrap a data key with a root key.
pub fn wrap_key(root: &[u8; KEY_SIZE], data_key: &[u8; KEY_SIZE]) -> SecretsResult<Vec<u8>> {
	Ok(encrypt(root, data_key.as_slice())?.to_bytes())
}

/// Unwrap a data key produced by [`wrap_key`].
pub fn unwrap_key(root: &[u8; KEY_SIZE], wrapped: &[u8]) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>> {
	let mut plaintext = decrypt(root, &EncryptedData::from_bytes(wrapped)?)?;
	let key = key_from_slice(&plaintext)?;
	plaintext.zeroize();
	Ok(key)
}

/// Identifier of a wrapped key: the leading bytes of its SHA-256.
pub fn key_checksum(wrapped: &[u8]) -> [u8; KEY_ID_SIZE] {
	let digest = Sha256::digest(wrapped);
	let mut id = [0u8; KEY_ID_SIZE];
	id.copy_from_slice(&digest[..KEY_ID_SIZE]);
	id
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn key_generation_produces_unique_keys() {
		let key1 = generate_key();
		let key2 = generate_key();
		assert_ne!(key1.as_slice(), key2.as_slice());
	}

	#[test]
	fn wrap_roundtrip() {
		let root = generate_key();
		let dek = generate_key();

		let wrapped = wrap_key(&root, &dek).unwrap();
		let unwrapped = unwrap_key(&root, &wrapped).unwrap();

		assert_eq!(dek.as_slice(), unwrapped.as_slice());
	}

	#[test]
	fn wrong_root_fails_unwrap() {
		let root1 = generate_key();
		let root2 = generate_key();
		let dek = generate_key();

		let wrapped = wrap_key(&root1, &dek).unwrap();
		assert!(matches!(
			unwrap_key(&root2, &wrapped),
			Err(SecretsError::Decryption(_))
		));
	}

	#[test]
	fn tampered_ciphertext_fails() {
		let key = generate_key();
		let mut encrypted = encrypt(&key, b"secret").unwrap();
		encrypted.ciphertext[0] ^= 0xFF;
		assert!(decrypt(&key, &encrypted).is_err());
	}

	#[test]
	fn truncated_bytes_are_corrupt() {
		assert!(matches!(
			EncryptedData::from_bytes(&[0u8; NONCE_SIZE]),
			Err(SecretsError::CorruptedData(_))
		));
	}

	#[test]
	fn short_key_is_rejected() {
		assert!(matches!(
			key_from_slice(&[1u8; 16]),
			Err(SecretsError::InvalidKeySize {
				expected: 32,
				actual: 16
			})
		));
	}

	#[test]
	fn checksum_depends_on_wrapped_bytes() {
		assert_eq!(key_checksum(b"abc"), key_checksum(b"abc"));
		assert_ne!(key_checksum(b"abc"), key_checksum(b"abd"));
	}

	proptest! {
		#[test]
		fn encrypt_then_decrypt_is_identity(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
			let key = generate_key();
			let encrypted = encrypt(&key, &plaintext).unwrap();
			let framed = EncryptedData::from_bytes(&encrypted.to_bytes()).unwrap();
			let decrypted = decrypt(&key, &framed).unwrap();
			prop_assert_eq!(decrypted.as_slice(), plaintext.as_slice());
		}
	}
}
