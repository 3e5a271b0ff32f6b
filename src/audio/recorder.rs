//! # Outbound Stream Recorder
//!
//! Optional per-call recording of exactly the frames sent to the telephony
//! leg, written as headerless 16-bit PCM (`.raw`).
//!
//! Recording is best-effort. The pacing tick must never wait on disk, so
//! frames are handed to a dedicated writer task over an unbounded channel:
//! - enqueueing is synchronous and never blocks
//! - the single writer keeps file order identical to frame order
//! - every I/O error is logged and swallowed

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running recording writer.
pub struct Recorder {
    /// Where the artifact lives
    path: PathBuf,

    /// Frames waiting to be written
    tx: mpsc::UnboundedSender<Vec<u8>>,

    /// Writer task, kept so tests and shutdown can wait for it
    writer: JoinHandle<()>,
}

impl Recorder {
    /// Deterministic artifact name for a call.
    ///
    /// ## Format:
    /// `<call_id>_rec_to_vg_<YYYY_MM_DD_HH_mm_ss_SSS>.raw` using local time at
    /// session start, e.g. `abc-123_rec_to_vg_2024_05_01_09_30_12_045.raw`
    pub fn file_name(call_id: &str, started_at: DateTime<Local>) -> String {
        format!(
            "{}_rec_to_vg_{}.raw",
            call_id,
            started_at.format("%Y_%m_%d_%H_%M_%S_%3f")
        )
    }

    /// Start recording a call into `directory`.
    ///
    /// The file is created (empty) by the writer task itself, so this returns
    /// immediately. A failure to create the file disables recording for the
    /// call but never affects audio delivery.
    pub fn start(directory: &Path, call_id: &str, started_at: DateTime<Local>) -> Self {
        let path = directory.join(Self::file_name(call_id, started_at));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_frames(directory.to_path_buf(), path.clone(), rx));

        Self { path, tx, writer }
    }

    /// Queue a delivered frame for writing. Never blocks.
    pub fn record(&self, frame: &[u8]) {
        if self.tx.send(frame.to_vec()).is_err() {
            debug!(path = %self.path.display(), "Recorder writer has stopped, frame not recorded");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting frames and wait until everything queued is on disk.
    pub async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            warn!(path = %self.path.display(), error = %e, "Recorder writer task failed");
        }
    }
}

/// Writer loop: create the artifact, then append frames until the channel
/// closes.
async fn write_frames(directory: PathBuf, path: PathBuf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    if let Err(e) = tokio::fs::create_dir_all(&directory).await {
        warn!(directory = %directory.display(), error = %e, "Error creating recordings directory");
    }

    let mut file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
        .await
    {
        Ok(file) => {
            info!(path = %path.display(), "Recording file created");
            file
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Error creating recording file");
            // Drain so senders never notice
            while rx.recv().await.is_some() {}
            return;
        }
    };

    let mut written = 0usize;
    while let Some(frame) = rx.recv().await {
        match file.write_all(&frame).await {
            Ok(()) => written += frame.len(),
            Err(e) => warn!(path = %path.display(), error = %e, "Error writing to recording file"),
        }
    }

    if let Err(e) = file.flush().await {
        warn!(path = %path.display(), error = %e, "Error flushing recording file");
    }
    debug!(path = %path.display(), bytes = written, "Recording closed");
}
