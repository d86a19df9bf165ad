//! Idle eviction: the eligibility rule and the background sweep thread

use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::connection::ConnectionFactory;
use crate::engine::PoolEngine;

/// Whether a connection last active at `last_active` may be evicted
pub(crate) fn is_evictable(last_active: Instant, min_idle: Duration) -> bool {
    last_active.elapsed() > min_idle
}

/// Periodic idle sweep running on its own thread.
///
/// The thread holds only a weak reference to the engine and exits when the
/// engine is gone or the evictor is stopped or dropped.
pub(crate) struct Evictor {
    stop: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Evictor {
    pub fn start<F: ConnectionFactory>(
        engine: Weak<PoolEngine<F>>,
        name: &str,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name(format!("hostpool-evictor-{}", name))
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let Some(engine) = engine.upgrade() else {
                                break;
                            };
                            let evicted = engine.evict_idle();
                            trace!(host = %engine.config().address, evicted, "Eviction sweep finished");
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Eviction thread stopped");
            })?;

        Ok(Self {
            stop: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the sweep and wait for the thread, unless called from it
    pub fn stop(&self) {
        drop(self.stop.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Evictor {
    fn drop(&mut self) {
        // Disconnecting is enough; the thread may be the one dropping us.
        drop(self.stop.lock().take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_connection_is_not_evictable() {
        assert!(!is_evictable(Instant::now(), Duration::from_secs(60)));
    }

    #[test]
    fn test_old_connection_is_evictable() {
        let last_active = Instant::now() - Duration::from_millis(50);
        assert!(is_evictable(last_active, Duration::from_millis(10)));
    }
}
