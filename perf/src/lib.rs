//! Shared helpers for the broadcast ring benchmarks.

use basalt_frames::Frame56;

/// Unique per-process path for a benchmark's ring region.
pub fn temp_bus_path(tag: &str) -> String {
    format!("/tmp/basalt_perf_{}_{}", tag, std::process::id())
}

/// A recognizable, fully initialized frame for publish benchmarks.
pub fn make_frame56() -> Frame56 {
    let mut f = Frame56::default();
    f.data[..8].copy_from_slice(&0xDEAD_BEEF_u64.to_le_bytes());
    f.data[8..].fill(0x5A);
    f
}
