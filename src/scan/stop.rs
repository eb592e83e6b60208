//! Cooperative stop flag shared between a scan and whoever may cancel it.
//!
//! The scan controller owns the authoritative `running` flag; a [`StopHandle`]
//! is a cheap clone of it that can be moved into a UI task, a signal handler
//! or another thread. Stop requests are only observed at sweep boundaries
//! (`ScanController::has_more_work`), never in the middle of a line scan.
//!
//! # Example
//!
//! ```rust,ignore
//! let handle = controller.stop_handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.request_stop();
//! });
//! run_scan(&mut controller).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to a scan's running flag
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Ask the scan to end at the next sweep boundary
    pub fn request_stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Scan stop requested");
        }
    }

    /// Whether the scan is currently marked as running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let handle = StopHandle::new();
        let remote = handle.clone();

        handle.set_running(true);
        assert!(remote.is_running());

        remote.request_stop();
        assert!(!handle.is_running());

        // Redundant requests are harmless
        remote.request_stop();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_stop_from_other_thread() {
        let handle = StopHandle::new();
        handle.set_running(true);

        let remote = handle.clone();
        std::thread::spawn(move || remote.request_stop())
            .join()
            .unwrap();

        assert!(!handle.is_running());
    }
}
