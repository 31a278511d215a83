//! Lock-free shared-memory broadcast ring.
//!
//! One or more producers append fixed-size frames into a memory-mapped
//! ring; any number of consumers independently replay the stream from
//! their own join point (fan-out, not competing consumers). Slots carry a
//! version tag so readers detect overwritten or in-flight data without
//! locks; a consumer that falls behind resynchronizes forward instead of
//! reading garbage.
//!
//! The region mapping itself is delegated to `basalt-shm`; this crate only
//! requires "map this path, give me a stable pointer".

use thiserror::Error;

mod broadcast;
mod layout;
mod slot;

pub use broadcast::{Consumer, Producer};
pub use layout::{
    ControlBlock, HEADER_BYTES, LAYOUT_VERSION, RING_MAGIC, RingVariant, SUPPORTED_ELEMENT_SIZES,
    bytes_for_ring, ring_footprint, slot_footprint,
};
pub use slot::{VersionedSlot, claim_tag, commit_tag, tag_in_progress, tag_sequence};

/// Steady-state poll outcomes a caller must branch on. Both are
/// recoverable; ignoring them loses liveness awareness, never safety.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The producer has been more than a full ring ahead since the last
    /// read; the cursor has been resynchronized to the current window.
    #[error("got sped past")]
    SpedPast,
    /// No publish has reached the consumer's cursor yet.
    #[error("queue empty")]
    Empty,
}

/// Setup-time attach failures. Fatal to the attach attempt; the core never
/// retries them on its own.
#[derive(Error, Debug)]
pub enum AttachError {
    /// Requested element size is not a supported template, or does not
    /// match what the region was configured with.
    #[error("unsupported element size {0}")]
    UnsupportedElementSize(u32),
    /// Ring capacity must be a nonzero power of two.
    #[error("ring capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(u64),
    /// The region is mapped but no producer has completed first-time
    /// setup. Callers decide whether to poll again.
    #[error("queue not initialized")]
    QueueUninitialized,
    /// The backing path could not be mapped.
    #[error("backing region unavailable")]
    RegionUnavailable(#[from] std::io::Error),
    /// The mapped bytes do not hold a compatible ring layout (bad magic,
    /// layout version, or a region too small for its own header).
    #[error("region does not contain a compatible ring layout")]
    IncompatibleLayout,
}
