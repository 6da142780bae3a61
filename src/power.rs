//! Battery and charger monitoring
//!
//! Optional background worker that samples battery capacity and charger
//! presence from sysfs so the UI can show them while a reset is running.
//! Strictly read-only with respect to the recovery pipeline: it only
//! publishes a [`PowerStatus`] snapshot that the render tick reads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Battery capacity file exposed by the kernel.
const BATTERY_CAPACITY: &str = "/sys/class/power_supply/battery/capacity";

/// Charger online flag. `usb` covers every Droidian target we ship.
const CHARGER_ONLINE: &str = "/sys/class/power_supply/usb/online";

/// Snapshot published by the monitor thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerStatus {
    /// Battery percentage, if the node exists and parses.
    pub battery_percent: Option<u8>,
    /// True while a charger is attached.
    pub charger_online: bool,
}

/// Handle to the sampling thread. Dropping it stops the thread.
pub struct PowerMonitor {
    status: Arc<Mutex<PowerStatus>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PowerMonitor {
    /// Start sampling the production sysfs nodes every `interval`.
    pub fn start(interval: Duration) -> Self {
        Self::start_with_paths(
            PathBuf::from(BATTERY_CAPACITY),
            PathBuf::from(CHARGER_ONLINE),
            interval,
        )
    }

    /// Start sampling explicit paths (tests point these at temp files).
    pub fn start_with_paths(capacity: PathBuf, online: PathBuf, interval: Duration) -> Self {
        let status = Arc::new(Mutex::new(sample(&capacity, &online)));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_status = status.clone();
        let thread_stop = stop.clone();
        let handle = std::thread::spawn(move || {
            log::debug!("power monitor started");
            while !thread_stop.load(Ordering::Relaxed) {
                let snapshot = sample(&capacity, &online);
                if let Ok(mut status) = thread_status.lock() {
                    *status = snapshot;
                }
                // Sleep in short slices so stop() returns promptly.
                let mut slept = Duration::ZERO;
                while slept < interval && !thread_stop.load(Ordering::Relaxed) {
                    let slice = Duration::from_millis(50).min(interval - slept);
                    std::thread::sleep(slice);
                    slept += slice;
                }
            }
            log::debug!("power monitor stopped");
        });

        Self {
            status,
            stop,
            handle: Some(handle),
        }
    }

    /// Latest snapshot.
    pub fn status(&self) -> PowerStatus {
        self.status.lock().map(|s| *s).unwrap_or_default()
    }

    /// Stop the sampling thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PowerMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sample(capacity: &Path, online: &Path) -> PowerStatus {
    PowerStatus {
        battery_percent: read_u8(capacity),
        charger_online: read_u8(online) == Some(1),
    }
}

fn read_u8(path: &Path) -> Option<u8> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u8>().ok())
}
