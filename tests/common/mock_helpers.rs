//! Spawner doubles

use imgpipe_rs::pipeline::{OsSpawner, Spawner, WorkerBody};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

/// Spawns real threads but refuses the worker with the given name
pub struct FailingSpawner {
    fail_on: String,
    attempts: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl FailingSpawner {
    pub fn new(fail_on: &str) -> Self {
        Self {
            fail_on: fail_on.to_string(),
            attempts: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Spawn calls seen, the refused one included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Names of the threads actually started, in spawn order
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

impl Spawner for FailingSpawner {
    fn spawn(&self, name: &str, body: WorkerBody) -> std::io::Result<JoinHandle<()>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if name == self.fail_on {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                format!("thread limit reached for {}", name),
            ));
        }
        let handle = OsSpawner.spawn(name, body)?;
        self.started.lock().unwrap().push(name.to_string());
        Ok(handle)
    }
}
