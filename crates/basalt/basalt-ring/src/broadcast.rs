//! Producer/consumer handles over a shared ring region.
//!
//! The mapped region is the only shared mutable state. Handles are thin
//! views: a producer borrows the read-write mapping it attached through, a
//! consumer owns its private read-only mapping of the same path. Neither
//! owns the region's lifetime.
//!
//! # Thread safety
//! - `Producer` is `Send` but not `Sync`. With the multi-publisher variant,
//!   spin up one handle per writer instead of sharing one.
//! - `Consumer` is `Send` but not `Sync`; every reader tracks its own
//!   cursor and never mutates shared state.

use crate::layout::{
    ControlBlock, HEADER_BYTES, LAYOUT_VERSION, RING_MAGIC, RingVariant, STATE_INITIALIZING,
    STATE_READY, STATE_UNINIT, bytes_for_ring,
};
use crate::slot::{SlotRead, VersionedSlot, resync_cursor};
use crate::{AttachError, PollError};
use basalt_shm::{ShmRegion, ShmRegionMut};
use std::marker::PhantomData;
use std::mem::size_of;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

/// Pointers into a validated region: control block plus slot array base.
/// Slot access is always `slots + (seq & mask)`, never a stored pointer.
struct RingView<T: Copy> {
    header: NonNull<ControlBlock>,
    slots: NonNull<VersionedSlot<T>>,
}

impl<T: Copy> Clone for RingView<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: Copy> Copy for RingView<T> {}

impl<T: Copy> RingView<T> {
    /// # Safety
    /// `base` must point at a region whose header has been (or is being)
    /// validated and whose mapping outlives every use of the view.
    unsafe fn from_base(base: *mut u8) -> Self {
        unsafe {
            Self {
                header: NonNull::new_unchecked(base as *mut ControlBlock),
                slots: NonNull::new_unchecked(base.add(HEADER_BYTES) as *mut VersionedSlot<T>),
            }
        }
    }

    #[inline(always)]
    fn header(&self) -> &ControlBlock {
        unsafe { self.header.as_ref() }
    }

    #[inline(always)]
    fn slot(&self, idx: u64) -> &VersionedSlot<T> {
        // idx is always masked to capacity by the caller.
        unsafe { &*self.slots.as_ptr().add(idx as usize) }
    }
}

/// Shared validation for attaching to an already-ready region.
fn validate_ready<T: Copy>(header: &ControlBlock, len: usize) -> Result<u64, AttachError> {
    if header.magic != RING_MAGIC || header.layout_version != LAYOUT_VERSION {
        return Err(AttachError::IncompatibleLayout);
    }
    if header.element_size as usize != size_of::<T>() {
        return Err(AttachError::UnsupportedElementSize(header.element_size));
    }
    let capacity = header.capacity_mask.wrapping_add(1);
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(AttachError::CapacityNotPowerOfTwo(capacity));
    }
    if len < bytes_for_ring::<T>(capacity as usize) {
        return Err(AttachError::IncompatibleLayout);
    }
    Ok(header.capacity_mask)
}

/// The writer side of a broadcast ring.
///
/// 64-byte aligned so handles used by different threads never share a
/// cache line.
#[repr(C, align(64))]
pub struct Producer<'a, T: Copy> {
    ring: RingView<T>,
    mask: u64,
    variant: RingVariant,
    did_init: bool,
    _region: PhantomData<&'a ShmRegionMut>,
}

unsafe impl<'a, T: Send + Copy> Send for Producer<'a, T> {}

impl<'a, T: Copy> Producer<'a, T> {
    /// Attach to (and lazily initialize) the ring inside `region`.
    ///
    /// If no attacher has set the region up yet, this call wins or loses
    /// the one-shot initialization race; the winner derives the capacity
    /// from the region length, zeroes the slot array and publishes the
    /// header before anyone else can observe it. Attaching to an already
    /// initialized region validates that `variant` and the element size
    /// match what the region was configured with.
    pub fn attach(region: &'a ShmRegionMut, variant: RingVariant) -> Result<Self, AttachError> {
        unsafe { Self::attach_raw(region.base_ptr(), region.len(), variant) }
    }

    /// Raw-pointer form of [`attach`], used by the ABI layer.
    ///
    /// # Safety
    /// `base..base+len` must be a live read-write mapping that stays valid
    /// for `'a`.
    ///
    /// [`attach`]: Producer::attach
    pub unsafe fn attach_raw(
        base: *mut u8,
        len: usize,
        variant: RingVariant,
    ) -> Result<Self, AttachError> {
        if base.is_null() || len < HEADER_BYTES {
            return Err(AttachError::IncompatibleLayout);
        }
        let header = unsafe { &*(base as *const ControlBlock) };
        loop {
            match header.state.compare_exchange(
                STATE_UNINIT,
                STATE_INITIALIZING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return unsafe { Self::first_time_init(base, len, variant) },
                // A racing attacher is mid-setup; the transition is a few
                // header writes plus zeroing the tags, so spin through it.
                Err(STATE_INITIALIZING) => std::hint::spin_loop(),
                Err(STATE_READY) => {
                    let mask = validate_ready::<T>(header, len)?;
                    if header.variant != variant as u8 {
                        return Err(AttachError::UnsupportedElementSize(header.element_size));
                    }
                    return Ok(Producer {
                        ring: unsafe { RingView::from_base(base) },
                        mask,
                        variant,
                        did_init: false,
                        _region: PhantomData,
                    });
                }
                Err(_) => return Err(AttachError::IncompatibleLayout),
            }
        }
    }

    /// First-time setup, performed by the winner of the state transition.
    /// On failure the state is put back so a later attacher can retry
    /// against a corrected region.
    unsafe fn first_time_init(
        base: *mut u8,
        len: usize,
        variant: RingVariant,
    ) -> Result<Self, AttachError> {
        let header_ptr = base as *mut ControlBlock;

        let stride = size_of::<VersionedSlot<T>>();
        let body = len - HEADER_BYTES;
        if body == 0 || body % stride != 0 {
            unsafe { &(*header_ptr).state }.store(STATE_UNINIT, Ordering::Release);
            return Err(AttachError::IncompatibleLayout);
        }
        let capacity = body / stride;
        if !capacity.is_power_of_two() {
            unsafe { &(*header_ptr).state }.store(STATE_UNINIT, Ordering::Release);
            return Err(AttachError::CapacityNotPowerOfTwo(capacity as u64));
        }

        unsafe {
            ptr::addr_of_mut!((*header_ptr).magic).write(RING_MAGIC);
            ptr::addr_of_mut!((*header_ptr).layout_version).write(LAYOUT_VERSION);
            ptr::addr_of_mut!((*header_ptr).element_size).write(size_of::<T>() as u32);
            ptr::addr_of_mut!((*header_ptr).capacity_mask).write((capacity - 1) as u64);
            ptr::addr_of_mut!((*header_ptr).variant).write(variant as u8);
        }
        let ring = unsafe { RingView::<T>::from_base(base) };
        for i in 0..capacity as u64 {
            ring.slot(i).reset();
        }
        // Immutable fields are all written; reference the finished header.
        let header = unsafe { &*header_ptr };
        header.published_count.store(0, Ordering::Relaxed);
        // Release pairs with the acquire load of READY in every other
        // attacher: nobody observes a half-built slot array.
        header.state.store(STATE_READY, Ordering::Release);

        Ok(Producer {
            ring,
            mask: (capacity - 1) as u64,
            variant,
            did_init: true,
            _region: PhantomData,
        })
    }

    /// Publish one frame. Never blocks and never fails on a well-formed
    /// handle; the ring is lossy by design — once it wraps, unread data is
    /// overwritten and no backpressure signal exists.
    #[inline(always)]
    pub fn publish(&mut self, frame: &T) {
        let header = self.ring.header();
        match self.variant {
            RingVariant::SinglePublisherBroadcast => {
                // Counter is exclusively owned by this writer: plain
                // load/store, no claim race.
                let seq = header.published_count.load(Ordering::Relaxed);
                self.ring.slot(seq & self.mask).write(seq, frame);
                header.published_count.store(seq + 1, Ordering::Release);
            }
            RingVariant::MultiPublisherBroadcast => {
                // Relaxed ticket claim; the slot tags carry all payload
                // ordering. Distinct tickets hit distinct slots unless
                // in-flight publishers outnumber the capacity.
                let seq = header.published_count.fetch_add(1, Ordering::Relaxed);
                self.ring.slot(seq & self.mask).write(seq, frame);
            }
        }
    }

    /// Whether this handle won the first-time initialization race.
    pub fn performed_init(&self) -> bool {
        self.did_init
    }

    pub fn capacity(&self) -> u64 {
        self.mask + 1
    }
}

/// The reader side of a broadcast ring.
///
/// Opens its own read-only mapping of the ring path and replays the stream
/// from its join point at its own pace. Readers that fall behind by more
/// than a full ring detect it and realign forward; they are never starved
/// into reading garbage.
///
/// 64-byte aligned so the cursor-bearing line of one consumer never
/// false-shares with another handle.
#[repr(C, align(64))]
pub struct Consumer<T: Copy> {
    cursor: u64,
    mask: u64,
    overruns: u64,
    running: u8,
    _pad: [u8; 7],
    ring: RingView<T>,
    /// Owns the mapping lifetime; not accessed after attach.
    _region: ShmRegion,
}

unsafe impl<T: Send + Copy> Send for Consumer<T> {}

impl<T: Copy> Consumer<T> {
    /// Attach to the ring at `path`.
    ///
    /// Fails with `RegionUnavailable` if the path cannot be mapped and
    /// with `QueueUninitialized` if no producer has completed first-time
    /// setup yet — this never blocks or retries, and it never mutates the
    /// region; the caller decides whether to poll again. On success the
    /// consumer joins live: only publishes after this point are observed.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self, AttachError> {
        let region = ShmRegion::open_ro(path)?;
        if region.len() < HEADER_BYTES {
            return Err(AttachError::IncompatibleLayout);
        }
        let base = region.as_ptr();
        let header = unsafe { ControlBlock::from_ptr(base) };
        if header.state.load(Ordering::Acquire) != STATE_READY {
            return Err(AttachError::QueueUninitialized);
        }
        let mask = validate_ready::<T>(header, region.len())?;
        let cursor = header.published_count.load(Ordering::Acquire);
        Ok(Consumer {
            cursor,
            mask,
            overruns: 0,
            running: 1,
            _pad: [0; 7],
            ring: unsafe { RingView::from_base(base as *mut u8) },
            _region: region,
        })
    }

    /// Non-blocking read of the next frame into `out`.
    ///
    /// `Empty` leaves the cursor untouched. `SpedPast` means the expected
    /// slot was overwritten one or more full cycles ago (or mid-copy); the
    /// cursor has already been realigned to the producer's current window
    /// and the unread gap is gone for good.
    #[inline(always)]
    pub fn poll(&mut self, out: &mut T) -> Result<(), PollError> {
        match self.ring.slot(self.cursor & self.mask).read(self.cursor, out) {
            Ok(()) => {
                self.cursor += 1;
                Ok(())
            }
            Err(SlotRead::NotYetPublished) => Err(PollError::Empty),
            Err(SlotRead::Overwritten(tag)) => {
                self.cursor = resync_cursor(tag);
                self.overruns += 1;
                Err(PollError::SpedPast)
            }
        }
    }

    /// Blocking read: spins over `Empty` and absorbs overrun resyncs.
    /// Callers that need cancellation should drive [`poll`] from their own
    /// loop instead, checking [`is_running`] or whatever else they like.
    ///
    /// [`poll`]: Consumer::poll
    /// [`is_running`]: Consumer::is_running
    pub fn consume(&mut self, out: &mut T) {
        loop {
            match self.poll(out) {
                Ok(()) => return,
                Err(PollError::Empty) => std::hint::spin_loop(),
                Err(PollError::SpedPast) => {}
            }
        }
    }

    /// Next sequence number this consumer expects to read.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of resync events since attach (messages were lost each time).
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Producer-side publish counter, for lag estimation.
    pub fn published_count(&self) -> u64 {
        self.ring.header().published_count.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u64 {
        self.mask + 1
    }

    /// Advisory liveness flag for caller-driven polling loops. The core
    /// never checks it.
    pub fn is_running(&self) -> bool {
        self.running != 0
    }

    pub fn stop(&mut self) {
        self.running = 0;
    }
}
