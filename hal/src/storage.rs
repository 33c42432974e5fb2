//! # Block Storage Contract
//!
//! Persistent certificates are mirrored verbatim into one block each.
//! Reads happen once at start-up and complete synchronously. Writes are
//! requested and then polled until the block reports a final status.

use crate::HalResult;

/// Durable storage block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BlockId(pub u16);

impl BlockId {
    /// Block as an array index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Status of the last write request for a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Write still in progress
    Pending,
    /// Write committed
    Ok,
    /// Write failed
    NotOk,
}

/// Durable block storage
pub trait BlockStore {
    /// Read a block into `buf`, returning the stored length
    ///
    /// A block that was never written reads as length 0.
    fn read_block(&mut self, block: BlockId, buf: &mut [u8]) -> HalResult<usize>;

    /// Request a write of `data` into a block
    fn write_block(&mut self, block: BlockId, data: &[u8]) -> HalResult<()>;

    /// Poll the status of the last write request for a block
    fn poll_status(&mut self, block: BlockId) -> WriteStatus;
}
