//! Ring inspector: dumps the control block of an existing ring region and
//! scans the slot tags for protocol invariant violations.
//!
//! The scan is untyped — it walks the slot array by stride, so it works
//! against any supported element size without knowing the payload layout.
//!
//! ```bash
//! basalt-probe /dev/shm/md_bus
//! basalt-probe            # bus path taken from basalt.toml, if present
//! ```

use basalt_config::BusConfig;
use basalt_ring::{
    ControlBlock, HEADER_BYTES, RING_MAGIC, slot_footprint, tag_in_progress, tag_sequence,
};
use basalt_shm::ShmRegion;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> BusConfig {
    match BusConfig::load("basalt.toml") {
        Ok(cfg) => cfg,
        Err(_) => BusConfig::default(),
    }
}

fn main() -> ExitCode {
    let config = load_config();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    // A path on the command line is an ad-hoc probe; without one the
    // configured bus is probed and cross-checked against the config.
    let (path, from_config) = match std::env::args().nth(1) {
        Some(p) => (p, false),
        None => (config.bus_path.clone(), true),
    };

    let region = match ShmRegion::open_ro(&path) {
        Ok(r) => r,
        Err(e) => {
            error!(path = %path, %e, "unable to map region");
            return ExitCode::FAILURE;
        }
    };
    if region.len() < HEADER_BYTES {
        error!(path = %path, len = region.len(), "region smaller than a control block");
        return ExitCode::FAILURE;
    }

    let header = unsafe { ControlBlock::from_ptr(region.as_ptr()) };
    if header.magic != RING_MAGIC {
        error!(path = %path, magic = format_args!("{:#018x}", header.magic), "bad magic");
        return ExitCode::FAILURE;
    }
    if !header.is_ready() {
        error!(path = %path, "ring present but not initialized");
        return ExitCode::FAILURE;
    }

    let published = header.published_count.load(Ordering::Acquire);
    info!(
        path = %path,
        layout_version = header.layout_version,
        variant = ?header.ring_variant(),
        element_size = header.element_size,
        capacity = header.n_slots(),
        published,
        "control block"
    );

    if from_config {
        if header.element_size != config.element_size {
            warn!(
                configured = config.element_size,
                actual = header.element_size,
                "bus element size differs from basalt.toml"
            );
        }
        if header.n_slots() != config.capacity as u64 {
            warn!(
                configured = config.capacity,
                actual = header.n_slots(),
                "bus capacity differs from basalt.toml"
            );
        }
    }

    let stride = match slot_footprint(header.element_size) {
        Ok(s) => s,
        Err(e) => {
            error!(element_size = header.element_size, %e, "header carries an unknown element size");
            return ExitCode::FAILURE;
        }
    };

    let mut in_progress = 0u64;
    let mut idle = 0u64;
    let mut newest_seq = 0u64;
    let mut drops = 0u64;
    let mut prev_tag: Option<u64> = None;

    let base = region.as_ptr();
    for i in 0..header.n_slots() {
        // Tags are the first word of every slot; read them atomically,
        // the writer may be live.
        let tag = unsafe {
            (*(base.add(HEADER_BYTES + i as usize * stride) as *const AtomicU64))
                .load(Ordering::Relaxed)
        };

        if tag == 0 {
            idle += 1;
        } else if tag_in_progress(tag) {
            in_progress += 1;
        }
        newest_seq = newest_seq.max(tag_sequence(tag));

        // Around the ring, tags rise slot to slot except at the single
        // point where the producer's current lap ends.
        if let Some(prev) = prev_tag {
            if tag < prev {
                drops += 1;
            }
        }
        prev_tag = Some(tag);
    }

    info!(idle, in_progress, newest_seq, wrap_boundaries = drops, "slot scan");

    let mut healthy = true;
    if drops > 1 {
        error!(drops, "more than one wrap boundary: slot tags are inconsistent");
        healthy = false;
    }
    if published > 0 && newest_seq >= published {
        // The single-publisher path tags the slot before advancing the
        // counter, so this is transient under a live writer; persistent
        // means a writer died between tagging and counting.
        warn!(newest_seq, published, "newest slot tag is ahead of the publish counter");
    }
    if in_progress > 0 {
        warn!(in_progress, "claimed slots observed; a writer is mid-publish (or died there)");
    }

    if healthy {
        info!("ring is consistent");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
