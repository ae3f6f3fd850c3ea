//! Deadlines for store calls.
//!
//! A local libSQL statement runs to completion inside a single poll, so an
//! async timer alone never fires while one is executing. A watchdog thread
//! interrupts the connection instead once the deadline passes.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use libsql::Connection;
use medgraph_shared::{MedGraphError, Result};
use tracing::{debug, warn};

use crate::Storage;

struct Watchdog {
    // Dropping the sender disarms the watchdog.
    _disarm: mpsc::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(conn: Connection, limit: Duration) -> Result<Self> {
        let (disarm, wait) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        thread::Builder::new()
            .name("medgraph-store-deadline".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = wait.recv_timeout(limit) {
                    flag.store(true, Ordering::SeqCst);
                    if let Err(e) = conn.interrupt() {
                        warn!(error = %e, "failed to interrupt store query");
                    }
                }
            })
            .map_err(|e| MedGraphError::Storage(format!("failed to start store deadline: {e}")))?;

        Ok(Self {
            _disarm: disarm,
            fired,
        })
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Storage {
    /// Run `call` against this store, interrupting it once `limit` passes.
    ///
    /// An interrupted call fails with [`MedGraphError::Timeout`] for `stage`.
    pub async fn within<T, F>(&self, stage: &str, limit: Duration, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let watchdog = Watchdog::arm(self.conn.clone(), limit)?;
        match tokio::time::timeout(limit, call).await {
            Ok(Err(e)) if watchdog.fired() => {
                debug!(stage, error = %e, "store call interrupted at deadline");
                Err(MedGraphError::timeout(stage, limit.as_secs()))
            }
            Ok(result) => result,
            Err(_) => Err(MedGraphError::timeout(stage, limit.as_secs())),
        }
    }
}
