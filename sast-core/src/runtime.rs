//! Shared protocol timing constants and the cooperative shutdown handle.
//!
//! Grounded on `original_source/config.py`'s `SPAN_*`/`AMB_*` module
//! constants and on `frame::{GATE_ADDR, GATE_CHANNEL, BCAST_ADDR,
//! NODE_CHANNEL}`. `Runtime` replaces the Python module's bare globals with
//! a value every thread holds a clone of.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gateway cloud uplink period.
pub const SPAN_SEND_CLOUD: Duration = Duration::from_secs(2 * 60);
/// Cloud config re-pull period.
pub const SPAN_CONFIG_UPDATE: Duration = Duration::from_secs(60 * 60);
/// Gateway beacon transmit period.
pub const SPAN_BEACON: Duration = Duration::from_secs(60);
/// Node sensor sampling period.
pub const SPAN_SENSOR: Duration = Duration::from_secs(60);

/// Beacon sequence the Node's own uplink slot is keyed off: `NodeNo * 10s`
/// after the seq==1 beacon.
pub const BEACON_COUNT_SLOT_SEQ: u8 = 1;
pub const SLOT_SPACING_SECS: u64 = 10;

/// Whether an Ambient uplink still POSTs when there is no fresh data.
pub const AMB_SEND_NODATA: bool = false;

/// Notify debounce window (libSQLite.py `IsIntervalWarn`).
pub const NOTIFY_DEBOUNCE: Duration = Duration::from_secs(5 * 60);

/// Daily battery-check time of day, supplementing `SAST_observer.py`'s
/// `_checkBattery`.
pub const BATTERY_CHECK_HOUR: u32 = 8;

/// Cooperative shutdown flag shared by every worker thread.
///
/// A `tokio::select!`-on-`ctrl_c` shutdown generalised to a polled flag for
/// a thread-based runtime with no async executor to select against.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        ShutdownHandle(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps in small increments so a shutdown request interrupts promptly.
    pub fn sleep_interruptible(&self, total: Duration) {
        const TICK: Duration = Duration::from_millis(200);
        let mut remaining = total;
        while remaining > Duration::ZERO && !self.is_triggered() {
            let step = remaining.min(TICK);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_handle_starts_clear_and_latches() {
        let h = ShutdownHandle::new();
        assert!(!h.is_triggered());
        h.trigger();
        assert!(h.is_triggered());
    }

    #[test]
    fn shutdown_handle_clone_shares_state() {
        let h = ShutdownHandle::new();
        let clone = h.clone();
        clone.trigger();
        assert!(h.is_triggered());
    }

    #[test]
    fn interruptible_sleep_returns_early_on_trigger() {
        let h = ShutdownHandle::new();
        let h2 = h.clone();
        let handle = std::thread::spawn(move || {
            h2.sleep_interruptible(Duration::from_secs(30));
        });
        std::thread::sleep(Duration::from_millis(50));
        h.trigger();
        handle.join().unwrap();
    }
}
