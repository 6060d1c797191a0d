//! Asynchronous scan workflow
//!
//! Locating and instantiating a unit can take seconds, so it runs on a
//! background thread. The result comes back to the control domain as a
//! one-shot message; nothing else is shared with the scanning thread.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use super::unit::{ScanResult, UnitProvider};

/// Parameters the scan instantiates the unit with
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest {
    pub sample_rate: f64,
    pub block_size: usize,
    /// Wait before scanning, so a "scanning" notice can be shown first
    pub delay: Duration,
}

/// A scan in flight
pub struct PendingScan {
    receiver: oneshot::Receiver<ScanResult>,
    request: ScanRequest,
}

impl PendingScan {
    pub fn request(&self) -> ScanRequest {
        self.request
    }

    /// Non-blocking poll. `Some` once the scan has finished.
    pub fn try_take(&mut self) -> Option<ScanResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(scan_thread_lost()),
        }
    }

    /// Wait for the result from async code
    pub async fn completed(self) -> ScanResult {
        self.receiver.await.unwrap_or_else(|_| scan_thread_lost())
    }

    /// Wait for the result from synchronous code (not inside a runtime)
    pub fn wait(self) -> ScanResult {
        self.receiver.blocking_recv().unwrap_or_else(|_| scan_thread_lost())
    }
}

fn scan_thread_lost() -> ScanResult {
    ScanResult::InstantiationFailed(crate::error::UnitError::InstantiationFailed {
        name: "scan".to_string(),
        reason: "scan thread exited without a result".to_string(),
    })
}

/// Start scanning on a background thread
pub fn begin_scan(provider: Arc<dyn UnitProvider>, request: ScanRequest) -> PendingScan {
    let (sender, receiver) = oneshot::channel();

    let spawned = std::thread::Builder::new()
        .name("unit-scan".to_string())
        .spawn(move || {
            if !request.delay.is_zero() {
                std::thread::sleep(request.delay);
            }
            log::info!("Scanning for processing unit");
            let result = provider.scan(request.sample_rate, request.block_size);
            log::info!("Scan finished: {}", result.describe());
            if sender.send(result).is_err() {
                log::debug!("Scan result dropped, nobody is waiting for it");
            }
        });

    if let Err(e) = spawned {
        // The sender was moved into the closure and dropped, so the
        // receiver reports the scan as lost
        log::error!("Failed to spawn scan thread: {}", e);
    }

    PendingScan { receiver, request }
}
