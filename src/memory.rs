//! Cached available-memory reading used to flush batches early under pressure.

use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use sysinfo::{System, SystemExt};

const REFRESH_EVERY: Duration = Duration::from_millis(500);

struct MemoryReading {
    sys: System,
    checked_at: Instant,
    available: f64, // available / total, 0.0..=1.0
}

static READING: OnceLock<Mutex<MemoryReading>> = OnceLock::new();

/// Recent estimate of the available fraction of physical memory.
/// Refreshes at most every `REFRESH_EVERY`, so it is cheap to call per document.
pub fn available_memory_fraction() -> f64 {
    let reading = READING.get_or_init(|| {
        Mutex::new(MemoryReading {
            sys: System::new(),
            checked_at: Instant::now().checked_sub(REFRESH_EVERY * 2).unwrap_or_else(Instant::now),
            available: 1.0,
        })
    });
    let mut p = reading.lock();
    if p.checked_at.elapsed() >= REFRESH_EVERY {
        p.sys.refresh_memory();
        let total = p.sys.total_memory() as f64;
        let avail = p.sys.available_memory() as f64;
        p.available = if total > 0.0 { (avail / total).clamp(0.0, 1.0) } else { 1.0 };
        p.checked_at = Instant::now();
    }
    p.available
}

/// True when less than `threshold` (e.g. 0.05) of memory is available.
/// A threshold of 0.0 disables the check.
pub fn is_low_memory(threshold: f64) -> bool {
    threshold > 0.0 && available_memory_fraction() < threshold
}
