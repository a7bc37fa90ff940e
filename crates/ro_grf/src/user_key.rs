//! Passphrase based encryption of payloads and file tables.

use std::fmt;

use cipher::generic_array::GenericArray;
use cipher::{KeyIvInit, StreamCipher};
use md5::{Digest, Md5};
use salsa20::Salsa20;

use crate::cipher::{sealed, Cipher};
use crate::compression::looks_encrypted;
use crate::error::{Error, Result};

/// Path of the entry holding the key checksum
pub const KEY_MARKER_PATH: &str = "__grf_key.checksum";

const MARKER_MAGIC: &[u8; 4] = b"GRFK";

const CHECKSUM: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_BZIP2);

/// A key derived from a user passphrase
///
/// The key only lives in memory, it is never written to a container.
#[derive(Clone, PartialEq, Eq)]
pub struct UserKey {
    bytes: [u8; 32],
}

impl fmt::Debug for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserKey(checksum={:08X})", self.checksum())
    }
}

impl UserKey {
    /// Derives the key from a passphrase
    pub fn derive(passphrase: impl AsRef<[u8]>) -> Self {
        let passphrase = passphrase.as_ref();
        let first = Md5::digest(passphrase);

        let mut hasher = Md5::new();
        hasher.update(first);
        hasher.update(passphrase);
        let second = hasher.finalize();

        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(&first);
        bytes[16..].copy_from_slice(&second);
        UserKey { bytes }
    }

    /// Checksum stored in the marker entry
    pub fn checksum(&self) -> u32 {
        CHECKSUM.checksum(&self.bytes)
    }

    /// Content of the marker entry for this key
    pub fn marker(&self) -> Vec<u8> {
        let mut marker = MARKER_MAGIC.to_vec();
        marker.extend_from_slice(&self.checksum().to_le_bytes());
        marker
    }

    /// Whether a marker entry was written for this key
    pub fn matches_marker(&self, marker: &[u8]) -> bool {
        marker.len() == 8 && marker.starts_with(MARKER_MAGIC) && marker[4..] == self.checksum().to_le_bytes()
    }

    fn apply(&self, buffer: &mut [u8]) {
        let mut stream = Salsa20::new(
            GenericArray::from_slice(&self.bytes),
            GenericArray::from_slice(&[0u8; 8]),
        );
        stream.apply_keystream(buffer);
    }
}

/// Symmetric payload cipher keyed by a [`UserKey`]
#[derive(Debug, Default, Clone, Copy)]
pub struct UserKeyCipher;

impl sealed::Sealed for UserKeyCipher {}

impl Cipher for UserKeyCipher {
    type Key = UserKey;

    fn encrypt(&self, key: &UserKey, buffer: &mut [u8], len: usize) -> Result<()> {
        let len = len.min(buffer.len());
        key.apply(&mut buffer[..len]);
        Ok(())
    }

    fn decrypt(&self, key: &UserKey, buffer: &mut [u8], len: usize) -> Result<()> {
        let len = len.min(buffer.len());
        key.apply(&mut buffer[..len]);
        Ok(())
    }
}

impl UserKeyCipher {
    /// Encrypts a compressed payload, rolling back when the result would pass for plaintext
    ///
    /// Returns whether the payload is now encrypted.
    pub fn encrypt_probed(&self, key: &UserKey, buffer: &mut [u8], len: usize) -> Result<bool> {
        let len = len.min(buffer.len());
        self.encrypt(key, buffer, len)?;
        if looks_encrypted(&buffer[..len]) {
            return Ok(true);
        }

        self.decrypt(key, buffer, len)?;
        Ok(false)
    }

    /// Decrypts a compressed payload, rolling back when the result is still unreadable
    ///
    /// Returns whether anything was decrypted; payloads that already look like plaintext are left alone.
    pub fn decrypt_probed(&self, key: &UserKey, buffer: &mut [u8], len: usize) -> Result<bool> {
        let len = len.min(buffer.len());
        if !looks_encrypted(&buffer[..len]) {
            return Ok(false);
        }

        self.decrypt(key, buffer, len)?;
        if !looks_encrypted(&buffer[..len]) {
            return Ok(true);
        }

        self.encrypt(key, buffer, len)?;
        Err(Error::WrongKey)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{UserKey, UserKeyCipher};
    use crate::cipher::Cipher;
    use crate::compression::CodecConfig;
    use crate::error::Result;

    #[test]
    fn round_trip() -> Result<()> {
        let key = UserKey::derive("secret");
        let original = b"some payload bytes".to_vec();
        let mut data = original.clone();

        UserKeyCipher.encrypt(&key, &mut data, original.len())?;
        assert_ne!(data, original);
        UserKeyCipher.decrypt(&key, &mut data, original.len())?;
        assert_eq!(data, original);
        Ok(())
    }

    #[test]
    fn logical_length_limits_the_transform() -> Result<()> {
        let key = UserKey::derive("secret");
        let mut data = vec![0u8; 16];
        UserKeyCipher.encrypt(&key, &mut data, 4)?;
        assert_eq!(data[4..], [0u8; 12]);
        Ok(())
    }

    #[test]
    fn probed_round_trip_law() -> Result<()> {
        let key = UserKey::derive("secret");
        let original = CodecConfig::default().compress(b"hello hello hello hello")?;
        let mut data = original.clone();
        let len = data.len();

        // decrypt(encrypt(decrypt(encrypt(data))))
        let encrypted = UserKeyCipher.encrypt_probed(&key, &mut data, len)?;
        if encrypted {
            assert!(UserKeyCipher.decrypt_probed(&key, &mut data, len)?);
        }
        let encrypted = UserKeyCipher.encrypt_probed(&key, &mut data, len)?;
        if encrypted {
            UserKeyCipher.decrypt_probed(&key, &mut data, len)?;
        }
        assert_eq!(data, original);
        Ok(())
    }

    #[test]
    fn plaintext_is_not_decrypted_twice() -> Result<()> {
        let key = UserKey::derive("secret");
        let original = CodecConfig::default().compress(b"plain")?;
        let mut data = original.clone();
        let len = data.len();
        assert!(!UserKeyCipher.decrypt_probed(&key, &mut data, len)?);
        assert_eq!(data, original);
        Ok(())
    }

    #[test]
    fn marker_checks_the_key() {
        let key = UserKey::derive("secret");
        let marker = key.marker();
        assert!(key.matches_marker(&marker));
        assert!(!UserKey::derive("other").matches_marker(&marker));
    }
}
