//! Two-process concurrent end-to-end test for the broadcast ring.
//!
//! The same test executable is re-spawned with role environment variables:
//! a writer process creates and initializes the ring region while a reader
//! process attaches by path and consumes the stream live. Both run
//! simultaneously, so the seqlock protocol, the attach/init handshake and
//! overrun recovery are all exercised across a real process boundary.
//!
//! ```bash
//! cargo test -p basalt-ring --test e2e_mmap -- --nocapture
//! ```

use basalt_frames::Frame56;
use basalt_ring::{
    AttachError, Consumer, PollError, Producer, RingVariant, bytes_for_ring,
};
use basalt_shm::ShmRegionMut;
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Writes to stderr with an immediate flush so output survives the test
/// harness capture.
macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "BASALT_E2E_ROLE";
const ENV_PATH: &str = "BASALT_E2E_PATH";
const ROLE_WRITER: &str = "writer";
const ROLE_READER: &str = "reader";

const FRAME_COUNT: u64 = 100_000;
const RING_CAPACITY: usize = 1 << 14;

/// Writer batches are paced so the reader genuinely runs concurrently
/// instead of joining a finished ring.
const WRITER_BATCH_SIZE: u64 = 500;
const WRITER_BATCH_DELAY_US: u64 = 500;

fn test_path() -> String {
    format!("/tmp/basalt_e2e_bus_{}", std::process::id())
}

fn frame_with(seq: u64) -> Frame56 {
    let mut f = Frame56::default();
    f.data[..8].copy_from_slice(&seq.to_le_bytes());
    f.data[8..].fill((seq & 0xFF) as u8);
    f
}

fn run_writer(path: &str) {
    log!("[WRITER] creating ring at {path} ({RING_CAPACITY} slots, {FRAME_COUNT} frames)");

    let region = ShmRegionMut::create_rw(path, bytes_for_ring::<Frame56>(RING_CAPACITY) as u64)
        .expect("writer: failed to create region");
    let mut producer =
        Producer::<Frame56>::attach(&region, RingVariant::SinglePublisherBroadcast)
            .expect("writer: failed to attach");
    assert!(producer.performed_init());

    let start = Instant::now();
    for i in 0..FRAME_COUNT {
        producer.publish(&frame_with(i));
        if (i + 1) % WRITER_BATCH_SIZE == 0 {
            std::thread::sleep(Duration::from_micros(WRITER_BATCH_DELAY_US));
        }
    }

    let elapsed = start.elapsed();
    log!(
        "[WRITER] done: {FRAME_COUNT} frames in {elapsed:?} ({:.0} frames/s)",
        FRAME_COUNT as f64 / elapsed.as_secs_f64()
    );
}

fn run_reader(path: &str) {
    log!("[READER] waiting for ring at {path}");

    // The writer may not have created or initialized the region yet;
    // attach never blocks, so the retry loop lives here in the caller.
    let open_deadline = Instant::now() + Duration::from_secs(5);
    let mut consumer = loop {
        match Consumer::<Frame56>::attach(path) {
            Ok(c) => break c,
            Err(AttachError::RegionUnavailable(_)) | Err(AttachError::QueueUninitialized)
                if Instant::now() < open_deadline =>
            {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("[READER] failed to attach: {e}"),
        }
    };
    log!("[READER] attached live at sequence {}", consumer.cursor());

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut out = Frame56::default();
    let mut frames_read: u64 = 0;
    let mut last_seq: Option<u64> = None;
    let mut idle_polls: u32 = 0;

    while Instant::now() < deadline {
        match consumer.poll(&mut out) {
            Ok(()) => {
                let seq = u64::from_le_bytes(out.data[..8].try_into().unwrap());
                assert!(out.data[8..].iter().all(|&b| b == (seq & 0xFF) as u8));
                if let Some(prev) = last_seq {
                    assert!(seq > prev, "sequence must be monotone");
                }
                last_seq = Some(seq);
                frames_read += 1;
                idle_polls = 0;
            }
            Err(PollError::Empty) => {
                idle_polls += 1;
                // Writer finished and we drained everything it published.
                if frames_read > 0
                    && idle_polls > 10_000
                    && consumer.cursor() == consumer.published_count()
                {
                    break;
                }
                std::hint::spin_loop();
            }
            Err(PollError::SpedPast) => {}
        }
    }

    log!(
        "[READER] done: {frames_read} frames read, {} overruns, last seq {last_seq:?}",
        consumer.overruns()
    );
    assert!(frames_read > 0, "reader received no frames");
}

#[test]
fn e2e_two_process_broadcast() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let path = env::var(ENV_PATH).expect("BASALT_E2E_PATH not set");
        match role.as_str() {
            ROLE_WRITER => run_writer(&path),
            ROLE_READER => run_reader(&path),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let path = test_path();
    let exe = env::current_exe().expect("failed to get current executable");

    log!("[ORCHESTRATOR] spawning concurrent writer + reader over {path}");

    let mut writer = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_broadcast")
        .env(ENV_ROLE, ROLE_WRITER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn writer");

    // Give the writer a head start at creating the region; the reader
    // retries attach anyway.
    std::thread::sleep(Duration::from_millis(5));

    let mut reader = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_broadcast")
        .env(ENV_ROLE, ROLE_READER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn reader");

    let writer_status = writer.wait().expect("failed to wait for writer");
    let reader_status = reader.wait().expect("failed to wait for reader");

    let _ = std::fs::remove_file(&path);

    assert!(writer_status.success(), "writer failed: {writer_status}");
    assert!(reader_status.success(), "reader failed: {reader_status}");
}
