//! Versioned slots: the seqlock-style primitive under the ring.
//!
//! Each slot pairs an atomic version tag with an opaque payload. Tags are
//! strictly monotone per slot across wraps, so a reader can order any
//! observed tag against its own cursor: lower means not yet published,
//! equal means readable, higher means the slot has cycled past.
//!
//! # Protocol
//!
//! **Writer** (publishing sequence `s`):
//! 1. Store the claim tag `2s` (write in progress)
//! 2. Copy the payload in
//! 3. Store the commit tag `2s + 1` (write complete)
//!
//! **Reader** (expecting sequence `s`):
//! 1. Load the tag; below `2s + 1` means not yet published, above means
//!    the slot cycled past
//! 2. Copy the payload out
//! 3. Load the tag again; any change means the copy may be torn and must
//!    be discarded
//!
//! The claim store is what makes the reader's post-copy re-check airtight:
//! any overwrite in flight during a copy has already changed the tag.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering, compiler_fence};

/// Tag stored before the payload copy of a publish with sequence `seq`.
#[inline(always)]
pub const fn claim_tag(seq: u64) -> u64 {
    seq << 1
}

/// Tag stored after the payload copy of a publish with sequence `seq`.
#[inline(always)]
pub const fn commit_tag(seq: u64) -> u64 {
    (seq << 1) | 1
}

/// Sequence number encoded in a tag (claim or commit).
#[inline(always)]
pub const fn tag_sequence(tag: u64) -> u64 {
    tag >> 1
}

/// Whether a tag marks a claimed-but-uncommitted publish. A zero tag is
/// indistinguishable from a never-written slot and reported as idle.
#[inline(always)]
pub const fn tag_in_progress(tag: u64) -> bool {
    tag != 0 && tag & 1 == 0
}

/// Cursor a lapped consumer realigns to after observing `tag`: the
/// sequence just past the newest publish seen in the slot.
#[inline(always)]
pub(crate) const fn resync_cursor(tag: u64) -> u64 {
    (tag >> 1) + (tag & 1)
}

/// One ring slot: version tag plus `element_size` payload bytes.
///
/// 64-byte aligned so slots never straddle or share cache lines; with the
/// supported payload sizes the strides come out to exactly one or two
/// lines. The payload is only meaningful together with a commit tag that
/// is stable across the copy.
#[repr(C, align(64))]
pub struct VersionedSlot<T> {
    version: AtomicU64,
    payload: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send + Copy> Send for VersionedSlot<T> {}
unsafe impl<T: Send + Copy> Sync for VersionedSlot<T> {}

impl<T: Copy> VersionedSlot<T> {
    #[cfg(test)]
    fn idle() -> Self {
        VersionedSlot {
            version: AtomicU64::new(0),
            payload: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Reset to the never-written state. Only called during first-time
    /// region setup, behind the control block's initializing state.
    #[inline]
    pub(crate) fn reset(&self) {
        self.version.store(0, Ordering::Relaxed);
    }

    /// Current tag. Acquire pairs with the publisher's release stores so a
    /// commit tag guarantees the payload bytes it covers are visible.
    #[inline(always)]
    pub(crate) fn tag(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Publish `value` as sequence `seq`: claim, copy, commit.
    ///
    /// Never blocks. Concurrent writers on the same slot only happen when
    /// in-flight multi-publisher tickets outnumber the capacity; that
    /// overwrites unpublished data, which is the ring's documented lossy
    /// bound, not an error.
    ///
    /// # Memory Ordering
    /// Both tag stores are `Release`, pairing with the reader's `Acquire`
    /// loads: a reader that observes the commit tag also observes every
    /// payload byte it covers.
    #[inline(always)]
    pub(crate) fn write(&self, seq: u64, value: &T) {
        self.version.store(claim_tag(seq), Ordering::Release);
        // Keep the payload copy between the two tag stores.
        compiler_fence(Ordering::AcqRel);
        unsafe {
            (self.payload.get() as *mut T).copy_from(value as *const T, 1);
        }
        compiler_fence(Ordering::AcqRel);
        self.version.store(commit_tag(seq), Ordering::Release);
    }

    /// Copy the payload out without interpreting the tag. The caller must
    /// sandwich this between two [`tag`] loads and discard the copy if
    /// they disagree.
    ///
    /// [`tag`]: VersionedSlot::tag
    #[inline(always)]
    pub(crate) fn copy_payload(&self, out: &mut T) {
        compiler_fence(Ordering::AcqRel);
        unsafe {
            (out as *mut T).copy_from(self.payload.get() as *const T, 1);
        }
        compiler_fence(Ordering::AcqRel);
    }

    /// Seqlock read of sequence `seq`: the full compare/copy/re-check.
    #[inline(always)]
    pub(crate) fn read(&self, seq: u64, out: &mut T) -> Result<(), SlotRead> {
        let expected = commit_tag(seq);
        let v1 = self.tag();
        if v1 < expected {
            return Err(SlotRead::NotYetPublished);
        }
        if v1 > expected {
            return Err(SlotRead::Overwritten(v1));
        }
        self.copy_payload(out);
        let v2 = self.tag();
        if v2 != v1 {
            // Overwritten mid-copy; the copy may be torn, drop it.
            return Err(SlotRead::Overwritten(v2));
        }
        Ok(())
    }
}

/// Internal read outcome; the consumer maps it onto
/// [`PollError`](crate::PollError) after applying its resynchronization
/// policy.
pub(crate) enum SlotRead {
    NotYetPublished,
    /// Carries the observed tag so the consumer can realign its cursor.
    Overwritten(u64),
}
