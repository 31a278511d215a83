//! C ABI over the broadcast ring.
//!
//! Every entry point returns an [`AbiCode`] and writes results through out
//! parameters; nothing unwinds across the boundary. The protocol is
//! implemented once, generically, in `basalt-ring`; the two supported
//! element sizes each get their own thin `publish_<size>`/`poll_<size>`
//! wrapper family generated below. The matching declarations ship in
//! `include/basalt.h`.
//!
//! Regions mapped through [`region_create`]/[`region_open`] stay mapped
//! for the lifetime of the process, which is what keeps the `'static`
//! producer handles sound.

use basalt_frames::{Frame56, Frame120};
use basalt_ring::{
    AttachError, Consumer, PollError, Producer, RingVariant, ring_footprint, slot_footprint,
};
use basalt_shm::ShmRegionMut;
use std::ffi::{CStr, c_char};
use thiserror::Error;

/// Discriminated result code crossing the ABI.
///
/// `Empty` and `SpedPast` are steady-state poll outcomes, not failures;
/// callers branch on them exactly as Rust callers branch on `PollError`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AbiCode {
    #[error("success")]
    Success = 0,
    #[error("unsupported element size")]
    UnsupportedElementSize = 1,
    #[error("ring capacity is not a power of two")]
    CapacityNotPowerOfTwo = 2,
    #[error("queue was not initialized; attach a producer first")]
    QueueUninitialized = 3,
    #[error("queue is empty")]
    Empty = 4,
    #[error("got sped past")]
    SpedPast = 5,
    #[error("backing region unavailable")]
    RegionUnavailable = 6,
    #[error("region does not contain a compatible ring layout")]
    IncompatibleLayout = 7,
}

impl From<PollError> for AbiCode {
    fn from(value: PollError) -> Self {
        match value {
            PollError::Empty => Self::Empty,
            PollError::SpedPast => Self::SpedPast,
        }
    }
}

impl From<AttachError> for AbiCode {
    fn from(value: AttachError) -> Self {
        match value {
            AttachError::UnsupportedElementSize(_) => Self::UnsupportedElementSize,
            AttachError::CapacityNotPowerOfTwo(_) => Self::CapacityNotPowerOfTwo,
            AttachError::QueueUninitialized => Self::QueueUninitialized,
            AttachError::RegionUnavailable(_) => Self::RegionUnavailable,
            AttachError::IncompatibleLayout => Self::IncompatibleLayout,
        }
    }
}

fn cstr_path<'a>(path: *const c_char) -> Result<&'a str, AbiCode> {
    if path.is_null() {
        return Err(AbiCode::RegionUnavailable);
    }
    unsafe { CStr::from_ptr(path) }
        .to_str()
        .map_err(|_| AbiCode::RegionUnavailable)
}

/// Total bytes an external allocator must reserve for a ring.
#[unsafe(no_mangle)]
pub extern "C" fn ring_footprint_bytes(
    element_size: u32,
    capacity: u64,
    size_out: &mut usize,
) -> AbiCode {
    match ring_footprint(element_size, capacity as usize) {
        Ok(bytes) => {
            *size_out = bytes;
            AbiCode::Success
        }
        Err(e) => e.into(),
    }
}

/// Stride of one versioned slot for a supported element size.
#[unsafe(no_mangle)]
pub extern "C" fn slot_footprint_bytes(element_size: u32, size_out: &mut usize) -> AbiCode {
    match slot_footprint(element_size) {
        Ok(bytes) => {
            *size_out = bytes;
            AbiCode::Success
        }
        Err(e) => e.into(),
    }
}

/// Create and map a ring region of `size_bytes` at `path`, read-write.
/// The mapping is never unmapped; the base pointer stays valid for the
/// process lifetime.
#[unsafe(no_mangle)]
pub extern "C" fn region_create(
    path: *const c_char,
    size_bytes: u64,
    base_out: &mut *mut u8,
) -> AbiCode {
    let path = match cstr_path(path) {
        Ok(p) => p,
        Err(code) => return code,
    };
    match ShmRegionMut::create_rw(path, size_bytes) {
        Ok(region) => {
            let region: &'static ShmRegionMut = Box::leak(Box::new(region));
            *base_out = region.base_ptr();
            AbiCode::Success
        }
        Err(_) => AbiCode::RegionUnavailable,
    }
}

/// Map an existing ring region at `path`, read-write, for the process
/// lifetime.
#[unsafe(no_mangle)]
pub extern "C" fn region_open(
    path: *const c_char,
    base_out: &mut *mut u8,
    len_out: &mut usize,
) -> AbiCode {
    let path = match cstr_path(path) {
        Ok(p) => p,
        Err(code) => return code,
    };
    match ShmRegionMut::open_rw(path) {
        Ok(region) => {
            let region: &'static ShmRegionMut = Box::leak(Box::new(region));
            *base_out = region.base_ptr();
            *len_out = region.len();
            AbiCode::Success
        }
        Err(_) => AbiCode::RegionUnavailable,
    }
}

/// Generates the size-specialized wrapper family for one frame template.
macro_rules! abi_ring {
    ($frame:ty,
     $attach_producer:ident, $attach_consumer:ident,
     $publish:ident, $poll:ident,
     $detach_producer:ident, $detach_consumer:ident,
     $stop:ident, $is_running:ident) => {
        /// Attach (and lazily initialize) a producer over a mapped region.
        /// `variant` is 1 for single-publisher, 2 for multi-publisher.
        #[unsafe(no_mangle)]
        pub extern "C" fn $attach_producer(
            base: *mut u8,
            region_len: usize,
            variant: u8,
            producer_out: &mut *mut Producer<'static, $frame>,
        ) -> AbiCode {
            let Ok(variant) = RingVariant::try_from(variant) else {
                return AbiCode::IncompatibleLayout;
            };
            match unsafe { Producer::<$frame>::attach_raw(base, region_len, variant) } {
                Ok(p) => {
                    *producer_out = Box::into_raw(Box::new(p));
                    AbiCode::Success
                }
                Err(e) => e.into(),
            }
        }

        /// Attach a consumer by path; joins live, never blocks.
        #[unsafe(no_mangle)]
        pub extern "C" fn $attach_consumer(
            path: *const c_char,
            consumer_out: &mut *mut Consumer<$frame>,
        ) -> AbiCode {
            let path = match cstr_path(path) {
                Ok(p) => p,
                Err(code) => return code,
            };
            match Consumer::<$frame>::attach(path) {
                Ok(c) => {
                    *consumer_out = Box::into_raw(Box::new(c));
                    AbiCode::Success
                }
                Err(e) => e.into(),
            }
        }

        /// Publish one frame; never blocks, always `Success` on a live
        /// handle.
        #[unsafe(no_mangle)]
        pub extern "C" fn $publish(
            producer: *mut Producer<'static, $frame>,
            frame: &$frame,
        ) -> AbiCode {
            unsafe { &mut *producer }.publish(frame);
            AbiCode::Success
        }

        /// Poll the next frame into `frame_out`; `Empty` and `SpedPast`
        /// are expected steady-state codes.
        #[unsafe(no_mangle)]
        pub extern "C" fn $poll(
            consumer: *mut Consumer<$frame>,
            frame_out: &mut $frame,
        ) -> AbiCode {
            match unsafe { &mut *consumer }.poll(frame_out) {
                Ok(()) => AbiCode::Success,
                Err(e) => e.into(),
            }
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $detach_producer(producer: *mut Producer<'static, $frame>) {
            if !producer.is_null() {
                drop(unsafe { Box::from_raw(producer) });
            }
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $detach_consumer(consumer: *mut Consumer<$frame>) {
            if !consumer.is_null() {
                drop(unsafe { Box::from_raw(consumer) });
            }
        }

        /// Request the owning poll loop to wind down; advisory only.
        #[unsafe(no_mangle)]
        pub extern "C" fn $stop(consumer: *mut Consumer<$frame>) {
            unsafe { &mut *consumer }.stop();
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $is_running(consumer: *const Consumer<$frame>) -> bool {
            unsafe { &*consumer }.is_running()
        }
    };
}

abi_ring!(
    Frame56,
    attach_producer_56,
    attach_consumer_56,
    publish_56,
    poll_56,
    detach_producer_56,
    detach_consumer_56,
    consumer_stop_56,
    consumer_is_running_56
);

abi_ring!(
    Frame120,
    attach_producer_120,
    attach_consumer_120,
    publish_120,
    poll_120,
    detach_producer_120,
    detach_consumer_120,
    consumer_stop_120,
    consumer_is_running_120
);
