//! Append-only diagnostic trail.
//!
//! Every interesting transition the coordinator makes lands here as one
//! timestamped line. The whole line list is re-published on each append
//! so observers always see a consistent snapshot, and each line is
//! mirrored to the `log` facade for normal process logging.

use chrono::Local;
use log::info;
use tokio::sync::watch;

pub struct EventLog {
    lines: Vec<String>,
    tx: watch::Sender<Vec<String>>,
}

impl EventLog {
    pub fn new() -> (Self, watch::Receiver<Vec<String>>) {
        let (tx, rx) = watch::channel(Vec::new());
        (
            Self {
                lines: Vec::new(),
                tx,
            },
            rx,
        )
    }

    /// Append one line, timestamp-prefixed, and publish the new list.
    pub fn append(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        info!("{}", line);
        let stamped = format!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), line);
        self.lines.push(stamped);
        self.tx.send_replace(self.lines.clone());
    }

    /// Drop all recorded lines and publish the empty list.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.tx.send_replace(Vec::new());
    }
}
