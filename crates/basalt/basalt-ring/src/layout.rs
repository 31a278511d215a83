//! Shared-memory layout of the ring: control block and sizing math.
//!
//! The mapped region starts with one [`ControlBlock`] followed immediately
//! by `capacity` fixed-stride versioned slots:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ ControlBlock (128 B, two cache lines)                        │
//! │   magic │ layout_version │ element_size │ capacity_mask │ …  │
//! │   state (atomic)                                             │
//! │   published_count (atomic, own cache line)                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ VersionedSlot[0]   tag (8 B atomic) │ payload (element_size) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ …                                                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ VersionedSlot[capacity − 1]                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capacity is always a power of two so `index = seq & capacity_mask`.

use crate::AttachError;
use crate::slot::VersionedSlot;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64};

/// Identifies a valid ring region: ASCII "BASALTRG".
pub const RING_MAGIC: u64 = 0x4241_5341_4C54_5247;

/// Bumped on incompatible layout changes; attach rejects mismatches.
pub const LAYOUT_VERSION: u32 = 1;

/// The closed set of payload sizes the protocol is parameterized by.
/// Together with the 8-byte version tag and 64-byte slot alignment these
/// give 64- and 128-byte slot strides.
pub const SUPPORTED_ELEMENT_SIZES: [u32; 2] = [56, 120];

pub(crate) const VERSION_TAG_BYTES: usize = 8;
pub(crate) const SLOT_ALIGN: usize = 64;

/// `ControlBlock::state` values: the one-shot initialization transition.
pub(crate) const STATE_UNINIT: u32 = 0;
pub(crate) const STATE_INITIALIZING: u32 = 1;
pub(crate) const STATE_READY: u32 = 2;

/// Concurrency variant a region is initialized with; immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RingVariant {
    /// Exactly one writer; publishes claim sequence numbers without an
    /// atomic ticket race.
    SinglePublisherBroadcast = 1,
    /// Any number of writers; each claims a unique ticket by atomically
    /// incrementing the publish counter.
    MultiPublisherBroadcast = 2,
}

impl TryFrom<u8> for RingVariant {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(RingVariant::SinglePublisherBroadcast),
            2 => Ok(RingVariant::MultiPublisherBroadcast),
            _ => Err(()),
        }
    }
}

/// Shared header at offset 0 of every ring region.
///
/// `#[repr(C)]` with explicit padding so the layout is identical across
/// processes and languages. Everything except `state` and
/// `published_count` is written exactly once during first-time setup and
/// read-only afterwards. `published_count` sits on its own cache line so
/// producer traffic does not collide with the immutable fields consumers
/// re-read at attach time.
#[repr(C, align(64))]
pub struct ControlBlock {
    /// Must equal [`RING_MAGIC`].
    pub magic: u64,
    /// Must equal [`LAYOUT_VERSION`].
    pub layout_version: u32,
    /// Payload bytes per element; every attach must match exactly.
    pub element_size: u32,
    /// Capacity − 1; capacity is a power of two.
    pub capacity_mask: u64,
    /// Encoded [`RingVariant`]; 0 only while uninitialized.
    pub variant: u8,
    _pad0: [u8; 7],
    /// Uninit(0) → initializing(1) → ready(2), written exactly once in
    /// that order. Attachers never observe a partially built slot array.
    pub state: AtomicU32,
    _pad1: [u8; 28],
    /// Monotonic publish counter; also the ticket source for
    /// multi-publisher claims.
    pub published_count: AtomicU64,
    _pad2: [u8; 56],
}

/// Control block size in bytes; the slot array starts at this offset.
pub const HEADER_BYTES: usize = size_of::<ControlBlock>();

impl ControlBlock {
    /// Reinterpret the start of a mapped region as the control block.
    ///
    /// # Safety
    /// `ptr` must point at a mapping of at least [`HEADER_BYTES`] bytes
    /// that stays valid for `'static` (or for as long as the reference is
    /// actually used).
    pub unsafe fn from_ptr(ptr: *const u8) -> &'static Self {
        unsafe { &*(ptr as *const Self) }
    }

    /// Number of slots in the ring.
    pub fn n_slots(&self) -> u64 {
        self.capacity_mask.wrapping_add(1)
    }

    /// Whether first-time setup has completed.
    pub fn is_ready(&self) -> bool {
        self.state.load(std::sync::atomic::Ordering::Acquire) == STATE_READY
    }

    /// Decoded variant, `None` while uninitialized or corrupt.
    pub fn ring_variant(&self) -> Option<RingVariant> {
        RingVariant::try_from(self.variant).ok()
    }
}

/// Stride in bytes of one versioned slot for a supported element size:
/// version tag + payload, rounded up to the slot alignment.
///
/// Exposed so external allocators can pre-size backing regions.
pub fn slot_footprint(element_size: u32) -> Result<usize, AttachError> {
    if !SUPPORTED_ELEMENT_SIZES.contains(&element_size) {
        return Err(AttachError::UnsupportedElementSize(element_size));
    }
    Ok((VERSION_TAG_BYTES + element_size as usize).next_multiple_of(SLOT_ALIGN))
}

/// Total byte footprint of a ring with `capacity` slots of
/// `element_size`-byte payloads. Deterministic and strictly increasing in
/// capacity.
pub fn ring_footprint(element_size: u32, capacity: usize) -> Result<usize, AttachError> {
    let stride = slot_footprint(element_size)?;
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(AttachError::CapacityNotPowerOfTwo(capacity as u64));
    }
    Ok(HEADER_BYTES + capacity * stride)
}

/// Typed counterpart of [`ring_footprint`], used by attach and tests.
/// Performs no capacity validation; callers check the power-of-two rule.
pub fn bytes_for_ring<T: Copy>(capacity: usize) -> usize {
    HEADER_BYTES + capacity * size_of::<VersionedSlot<T>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_frames::{Frame56, Frame120};

    #[test]
    fn control_block_is_two_cache_lines() {
        assert_eq!(size_of::<ControlBlock>(), 128);
        assert_eq!(std::mem::align_of::<ControlBlock>(), 64);
    }

    #[test]
    fn slot_strides() {
        assert_eq!(slot_footprint(56).unwrap(), 64);
        assert_eq!(slot_footprint(120).unwrap(), 128);
    }

    #[test]
    fn unsupported_element_sizes_rejected() {
        for bad in [0u32, 8, 57, 64, 128, 1024] {
            assert!(matches!(
                slot_footprint(bad),
                Err(AttachError::UnsupportedElementSize(_))
            ));
            assert!(matches!(
                ring_footprint(bad, 16),
                Err(AttachError::UnsupportedElementSize(_))
            ));
        }
    }

    #[test]
    fn footprint_rejects_non_power_of_two_capacity() {
        for &elem in &SUPPORTED_ELEMENT_SIZES {
            for cap in [0usize, 3, 6, 12, 1000, 65535] {
                assert!(matches!(
                    ring_footprint(elem, cap),
                    Err(AttachError::CapacityNotPowerOfTwo(_))
                ));
            }
        }
    }

    #[test]
    fn footprint_deterministic_and_strictly_increasing() {
        for &elem in &SUPPORTED_ELEMENT_SIZES {
            let mut prev = 0usize;
            for shift in 0..=16 {
                let cap = 1usize << shift;
                let a = ring_footprint(elem, cap).unwrap();
                let b = ring_footprint(elem, cap).unwrap();
                assert_eq!(a, b);
                assert!(a > prev);
                prev = a;
            }
        }
    }

    #[test]
    fn typed_and_numeric_footprints_agree() {
        for shift in 0..=10 {
            let cap = 1usize << shift;
            assert_eq!(bytes_for_ring::<Frame56>(cap), ring_footprint(56, cap).unwrap());
            assert_eq!(bytes_for_ring::<Frame120>(cap), ring_footprint(120, cap).unwrap());
        }
    }

    #[test]
    fn variant_encoding_round_trips() {
        assert_eq!(
            RingVariant::try_from(RingVariant::SinglePublisherBroadcast as u8),
            Ok(RingVariant::SinglePublisherBroadcast)
        );
        assert_eq!(
            RingVariant::try_from(RingVariant::MultiPublisherBroadcast as u8),
            Ok(RingVariant::MultiPublisherBroadcast)
        );
        assert_eq!(RingVariant::try_from(0), Err(()));
        assert_eq!(RingVariant::try_from(3), Err(()));
    }
}
