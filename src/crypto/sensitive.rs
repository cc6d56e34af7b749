/// Wrappers for sensitive key material that is automatically zeroized on drop.
///
/// All long-lived key material in the agent lives in a [`SecretBuffer`].
/// Access goes through a scoped [`SecretBuffer::open`] that yields a borrow,
/// so raw bytes are only reachable while a caller is actively using them and
/// platform-specific protection (locked pages, enclaves) can be added behind
/// the same interface without touching callers.
use std::marker::PhantomData;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Result;

/// Owned key material, zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBuffer(Vec<u8>);

impl SecretBuffer {
    /// Seal a copy of `source` into a new buffer and zeroize the source.
    pub fn seal(source: &mut [u8]) -> Self {
        let buffer = Self(source.to_vec());
        source.zeroize();
        buffer
    }

    /// Seal an owned byte vector without copying.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Scoped access to the stored bytes. The view cannot outlive the
    /// buffer and is not sendable across task boundaries.
    pub fn open(&self) -> Result<SecretView<'_>> {
        Ok(SecretView {
            data: &self.0,
            _not_send: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A scoped borrow of a [`SecretBuffer`].
pub struct SecretView<'a> {
    data: &'a [u8],
    _not_send: PhantomData<*const u8>,
}

impl SecretView<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        self.data
    }
}

impl AsRef<[u8]> for SecretView<'_> {
    fn as_ref(&self) -> &[u8] {
        self.data
    }
}
