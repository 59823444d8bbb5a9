//! Background thread flushing a [`ConfigManager`] on a fixed schedule.
use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender, after, bounded, select};
use tracing::debug;

use crate::manager::ConfigManager;

enum Signal {
    Flush,
    Stop,
}

/// Calls [`ConfigManager::send_config`] after the configured initial delay
/// and then every flush interval.
///
/// Dropping the scheduler stops the thread and runs one last flush.
pub struct FlushScheduler {
    signals: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    pub fn start(manager: Arc<ConfigManager>) -> io::Result<Self> {
        let (signals, rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("config-flush".to_string())
            .spawn(move || flush_worker(manager, rx))?;
        Ok(Self {
            signals,
            handle: Some(handle),
        })
    }

    /// Stops the thread after a final flush. Same as dropping.
    pub fn shutdown(self) {}

    /// Flushes now without waiting for the next tick.
    pub fn flush_now(&self) {
        let _ = self.signals.try_send(Signal::Flush);
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        let _ = self.signals.send(Signal::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn flush_worker(manager: Arc<ConfigManager>, rx: Receiver<Signal>) {
    let interval = manager.settings().flush_interval;
    let mut next_flush = after(manager.settings().flush_initial_delay);

    loop {
        select! {
            recv(rx) -> signal => {
                match signal {
                    Ok(Signal::Flush) => manager.send_config(),
                    Ok(Signal::Stop) | Err(_) => break,
                }
            }
            recv(next_flush) -> _ => {
                manager.send_config();
                next_flush = after(interval);
            }
        }
    }

    debug!("flush thread stopping");
    manager.send_config();
}
