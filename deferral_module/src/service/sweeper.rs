use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info};

use crate::deferral::Deferrals;

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(200);

pub struct SweeperControl {
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl SweeperControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_and_join(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Runs a sweep immediately and then once per `interval` until stopped.
pub fn start_sweeper(deferrals: Deferrals, interval: Duration) -> SweeperControl {
    let stop = Arc::new(AtomicBool::new(false));
    let sweeper_stop = stop.clone();
    let handle = thread::spawn(move || {
        while !sweeper_stop.load(Ordering::Relaxed) {
            match deferrals.sweep(Utc::now()) {
                Ok(report) if report.users > 0 => info!(
                    "deferral sweep restored {} deferral(s) across {} user(s), {} failed",
                    report.processed,
                    report.users,
                    report.failed_users.len()
                ),
                Ok(_) => {}
                Err(err) => error!("deferral sweep failed: {}", err),
            }

            let started = Instant::now();
            while started.elapsed() < interval && !sweeper_stop.load(Ordering::Relaxed) {
                thread::sleep(STOP_CHECK_INTERVAL.min(interval));
            }
        }
    });

    SweeperControl {
        stop,
        handles: vec![handle],
    }
}
