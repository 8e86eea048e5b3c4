//! Named background threads with a bounded join
//!
//! `std::thread::JoinHandle::join` waits forever. Teardown must not, so each
//! worker signals its own exit over a channel and the owner waits on that
//! with a deadline. A worker that misses the deadline is detached.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Worker {
    name: String,
    handle: JoinHandle<()>,
    exited: Receiver<()>,
}

impl Worker {
    /// Spawn `f` on a thread called `name`
    pub fn spawn<F>(name: &str, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (exit_tx, exited) = bounded::<()>(1);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            f();
            let _ = exit_tx.send(());
        })?;

        Ok(Self {
            name: name.to_string(),
            handle,
            exited,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for the thread to finish.
    ///
    /// Returns false if the thread was abandoned still running.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        match self.exited.recv_timeout(timeout) {
            // Disconnected means the closure panicked and dropped the sender
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    tracing::error!("Worker {} panicked", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Worker {} did not stop within {:?}, abandoning it",
                    self.name,
                    timeout
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_join_finished_worker() {
        let worker = Worker::spawn("quick", || {}).unwrap();
        assert_eq!(worker.name(), "quick");
        assert!(worker.join_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn test_join_gives_up_on_stuck_worker() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let worker = Worker::spawn("stuck", move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();

        let started = Instant::now();
        assert!(!worker.join_timeout(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(1));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_join_panicked_worker() {
        let worker = Worker::spawn("panics", || panic!("boom")).unwrap();
        assert!(worker.join_timeout(Duration::from_secs(1)));
    }
}
