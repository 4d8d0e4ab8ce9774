//! Background maintenance
//!
//! A [`Refresher`] wakes every interval, reloads mapping files whose mtime
//! changed and reclaims expired leases. Mapping calls never wait on it
//! beyond a snapshot pointer swap.

use crate::mapper::AccountMapper;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub account_map_reloaded: bool,
    pub group_map_reloaded: bool,
    pub leases_reclaimed: usize,
}

/// Run one maintenance pass, logging rather than returning failures
pub fn refresh_once(mapper: &AccountMapper) -> RefreshReport {
    let mut report = RefreshReport::default();

    match mapper.account_map().reload_if_modified() {
        Ok(reloaded) => report.account_map_reloaded = reloaded,
        Err(e) => warn!("Account map refresh failed: {}", e),
    }
    match mapper.group_map().reload_if_modified() {
        Ok(reloaded) => report.group_map_reloaded = reloaded,
        Err(e) => warn!("Group map refresh failed: {}", e),
    }
    match mapper.pools().reclaim_expired() {
        Ok(count) => report.leases_reclaimed = count,
        Err(e) => warn!("Lease reclaim failed: {}", e),
    }

    debug!("Refresh pass: {:?}", report);
    report
}

/// Periodic maintenance thread; stops when dropped
pub struct Refresher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    pub fn start(mapper: Arc<AccountMapper>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let handle = thread::spawn(move || {
            info!("Refresher started, interval {:?}", interval);
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        refresh_once(&mapper);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("Refresher stopped");
        });

        Refresher {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        self.stop();
    }
}
