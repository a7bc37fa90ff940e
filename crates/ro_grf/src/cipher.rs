//! Uniform in-place encryption over the two cipher layers of a container.
//!
//! - [`crate::des::LegacyCipher`] obfuscates single entries, keyed by their cycle.
//! - [`crate::user_key::UserKeyCipher`] encrypts payloads and the file table with a passphrase.
//!
//! Both layers compose: on write the legacy layer runs first, on read it runs last.

use crate::error::Result;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// An in-place cipher over the first `len` bytes of a buffer
pub trait Cipher: sealed::Sealed {
    /// What selects the transform
    type Key: ?Sized;

    /// Encrypts `buffer[..len]` in place
    fn encrypt(&self, key: &Self::Key, buffer: &mut [u8], len: usize) -> Result<()>;

    /// Decrypts `buffer[..len]` in place
    fn decrypt(&self, key: &Self::Key, buffer: &mut [u8], len: usize) -> Result<()>;
}
