//! # Key Store
//!
//! Raw certificate bytes live in fixed-capacity buffers owned by their
//! certificate slot. Every overwrite and every reset zeroes the old content
//! first.

use core::sync::atomic::{compiler_fence, Ordering};

use heapless::Vec;

use crate::error::{KeyError, KeyResult};
use crate::hal::HalResult;

/// Certificate byte buffer of capacity `CAP`, limited to `max_len` bytes
#[derive(Debug, Clone)]
pub struct Key<const CAP: usize> {
    data: Vec<u8, CAP>,
    max_len: usize,
}

impl<const CAP: usize> Key<CAP> {
    /// Create an empty buffer accepting at most `max_len` bytes
    pub fn new(max_len: usize) -> Self {
        Self {
            data: Vec::new(),
            max_len: max_len.min(CAP),
        }
    }

    /// Configured maximum length
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Stored length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stored bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Replace the content with `bytes`
    ///
    /// Fails with `SizeMismatch`, leaving the content untouched, when
    /// `bytes` exceeds the maximum length.
    pub fn store(&mut self, bytes: &[u8]) -> KeyResult<()> {
        if bytes.len() > self.max_len {
            return Err(KeyError::SizeMismatch);
        }
        self.zeroize();
        self.data
            .extend_from_slice(bytes)
            .map_err(|_| KeyError::SizeMismatch)
    }

    /// Fill the buffer from `read`, which returns the number of bytes written
    ///
    /// On error the buffer is left zeroed and empty.
    pub fn load_with<F>(&mut self, read: F) -> HalResult<usize>
    where
        F: FnOnce(&mut [u8]) -> HalResult<usize>,
    {
        self.zeroize();
        self.data
            .resize_default(self.max_len)
            .map_err(|_| crate::hal::HalError::BufferTooSmall)?;
        match read(&mut self.data) {
            Ok(len) if len <= self.max_len => {
                self.data.truncate(len);
                Ok(len)
            }
            Ok(_) => {
                self.zeroize();
                Err(crate::hal::HalError::BufferTooSmall)
            }
            Err(e) => {
                self.zeroize();
                Err(e)
            }
        }
    }

    /// Copy the content into `buf`, returning the copied length
    pub fn copy_to(&self, buf: &mut [u8]) -> KeyResult<usize> {
        let dst = buf
            .get_mut(..self.data.len())
            .ok_or(KeyError::SizeMismatch)?;
        dst.copy_from_slice(&self.data);
        Ok(self.data.len())
    }

    /// Overwrite the content with zeros and empty the buffer
    pub fn zeroize(&mut self) {
        for byte in self.data.iter_mut() {
            *byte = 0;
        }
        compiler_fence(Ordering::SeqCst);
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::HalError;

    #[test]
    fn test_store_and_copy() {
        let mut key = Key::<16>::new(8);
        key.store(b"abc").unwrap();
        assert_eq!(key.as_bytes(), b"abc");

        let mut buf = [0u8; 3];
        assert_eq!(key.copy_to(&mut buf), Ok(3));
        assert_eq!(&buf, b"abc");

        let mut small = [0u8; 2];
        assert_eq!(key.copy_to(&mut small), Err(KeyError::SizeMismatch));
    }

    #[test]
    fn test_oversized_store_keeps_content() {
        let mut key = Key::<16>::new(4);
        key.store(b"abcd").unwrap();
        assert_eq!(key.store(b"abcde"), Err(KeyError::SizeMismatch));
        assert_eq!(key.as_bytes(), b"abcd");
    }

    #[test]
    fn test_max_len_clamped_to_capacity() {
        let key = Key::<4>::new(100);
        assert_eq!(key.max_len(), 4);
    }

    #[test]
    fn test_load_with() {
        let mut key = Key::<8>::new(8);
        let len = key
            .load_with(|buf| {
                buf[..2].copy_from_slice(b"hi");
                Ok(2)
            })
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(key.as_bytes(), b"hi");

        assert_eq!(key.load_with(|_| Err(HalError::HardwareError)), Err(HalError::HardwareError));
        assert!(key.is_empty());
    }

    #[test]
    fn test_load_with_offers_full_capacity() {
        let mut key = Key::<4>::new(100);
        let offered = key
            .load_with(|buf| {
                buf.fill(0xAA);
                Ok(buf.len())
            })
            .unwrap();
        assert_eq!(offered, 4);
        assert_eq!(key.as_bytes(), &[0xAA; 4]);

        assert_eq!(key.load_with(|buf| Ok(buf.len() + 1)), Err(HalError::BufferTooSmall));
        assert!(key.is_empty());
    }
}
