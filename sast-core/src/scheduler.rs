//! Single-process cooperative periodic task driver.
//!
//! The original drives its loop with the `schedule` package
//! (`original_source/SAST_recorder.py`: `schedule.every().minute.at(sec)`).
//! No crate in this workspace's stack offers that library's exact
//! non-reentrant-per-task semantics (a tick is dropped, not queued, if the
//! previous run of that same task is still executing), so `Scheduler` is a
//! small hand-rolled driver instead of a generic cron dependency — see
//! DESIGN.md for the tradeoff.

use crate::runtime::ShutdownHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One periodic task: runs on its own thread, ticking every `period`.
pub struct Task {
    handle: JoinHandle<()>,
}

impl Task {
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

/// Spawns `f` on its own thread, calling it every `period` until
/// `shutdown` is triggered. If `f` is still running when the next tick
/// arrives, that tick is skipped rather than queued or run concurrently.
pub fn spawn_periodic<F>(label: &'static str, period: Duration, shutdown: ShutdownHandle, mut f: F) -> Task
where
    F: FnMut() + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));
    let handle = std::thread::Builder::new()
        .name(label.to_string())
        .spawn(move || {
            let mut next_tick = Instant::now() + period;
            while !shutdown.is_triggered() {
                let now = Instant::now();
                if now >= next_tick {
                    next_tick = now + period;
                    if running
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        f();
                        running.store(false, Ordering::SeqCst);
                    } else {
                        tracing::warn!(task = label, "tick skipped: previous run still in flight");
                    }
                }
                shutdown.sleep_interruptible(Duration::from_millis(200));
            }
        })
        .expect("failed to spawn scheduler thread");
    Task { handle }
}

/// Spawns a task that runs once per calendar day at `hour:00` local time.
pub fn spawn_daily_at<F>(label: &'static str, hour: u32, shutdown: ShutdownHandle, mut f: F) -> Task
where
    F: FnMut() + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name(label.to_string())
        .spawn(move || {
            let mut last_run_date = None;
            while !shutdown.is_triggered() {
                let now = chrono::Local::now();
                if now.naive_local().time().hour_matches(hour) && last_run_date != Some(now.date_naive()) {
                    f();
                    last_run_date = Some(now.date_naive());
                }
                shutdown.sleep_interruptible(Duration::from_secs(30));
            }
        })
        .expect("failed to spawn scheduler thread");
    Task { handle }
}

trait HourMatch {
    fn hour_matches(&self, hour: u32) -> bool;
}

impl HourMatch for chrono::NaiveTime {
    fn hour_matches(&self, hour: u32) -> bool {
        use chrono::Timelike;
        self.hour() == hour
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn periodic_task_skips_overlapping_ticks() {
        let shutdown = ShutdownHandle::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let ticks_clone = ticks.clone();
        let task = spawn_periodic("test-tick", Duration::from_millis(50), shutdown.clone(), move || {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
        });
        std::thread::sleep(Duration::from_millis(500));
        shutdown.trigger();
        task.join();
        // Overlapping 50ms ticks against a 300ms task body should collapse
        // to a small number of actual invocations, never one per tick.
        assert!(ticks.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn periodic_task_stops_on_shutdown() {
        let shutdown = ShutdownHandle::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let ticks_clone = ticks.clone();
        let task = spawn_periodic("test-stop", Duration::from_millis(10), shutdown.clone(), move || {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
        task.join();
        let count_at_stop = ticks.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), count_at_stop);
    }
}
