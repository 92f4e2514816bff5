//! Export job execution
//!
//! Runs one ffmpeg subprocess per job on its own thread and reports
//! progress over an mpsc channel. Jobs are independent; one failing never
//! cancels the others.

use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use crate::ffmpeg::{run_with_timeout, ToolLocator};

use super::builder::ExportJob;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(60);
const STDERR_PREVIEW_BYTES: usize = 400;

/// Progress messages emitted while an export batch runs
#[derive(Debug)]
pub enum ExportProgress {
    /// The batch was accepted; `total` jobs will report back
    Started { total: usize },
    /// One job finished, successfully or not
    JobFinished {
        index: usize,
        output: PathBuf,
        result: Result<(), String>,
    },
    /// The final job of the batch completed successfully
    AllDone { total: usize },
}

/// Runs export jobs as detached ffmpeg subprocesses
pub struct ExportRunner {
    ffmpeg: Option<PathBuf>,
}

impl ExportRunner {
    pub fn new(locator: &ToolLocator) -> Self {
        Self {
            ffmpeg: locator.ffmpeg_path().map(|p| p.to_path_buf()),
        }
    }

    /// Start every job and return the progress channel
    ///
    /// Returns immediately; each job runs on its own thread. The receiver
    /// sees `Started` first, then one `JobFinished` per job in completion
    /// order, and `AllDone` after the last-indexed job succeeds.
    pub fn run(&self, jobs: Vec<ExportJob>) -> Receiver<ExportProgress> {
        let (tx, rx) = mpsc::channel();
        let total = jobs.len();
        let _ = tx.send(ExportProgress::Started { total });

        let Some(ffmpeg) = self.ffmpeg.clone() else {
            log::error!("export requested but ffmpeg is not available");
            for (index, job) in jobs.into_iter().enumerate() {
                let _ = tx.send(ExportProgress::JobFinished {
                    index,
                    output: job.output,
                    result: Err("ffmpeg not found; install FFmpeg to export".to_string()),
                });
            }
            return rx;
        };

        for (index, job) in jobs.into_iter().enumerate() {
            let ffmpeg = ffmpeg.clone();
            let tx = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("export-{}", index))
                .spawn(move || run_job(&ffmpeg, index, total, job, &tx));
            if let Err(e) = spawned {
                log::error!("failed to spawn export thread {}: {}", index, e);
            }
        }
        rx
    }
}

fn run_job(
    ffmpeg: &PathBuf,
    index: usize,
    total: usize,
    job: ExportJob,
    tx: &Sender<ExportProgress>,
) {
    log::info!("export job {}: writing {:?}", index, job.output);
    let mut cmd = Command::new(ffmpeg);
    cmd.args(&job.args);

    let result = match run_with_timeout(&mut cmd, EXPORT_TIMEOUT) {
        Err(e) => Err(format!("failed to start ffmpeg: {}", e)),
        Ok(out) if out.timed_out => Err("ffmpeg timed out".to_string()),
        Ok(out) if !out.success() => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            log::error!("export job {} failed: {}", index, stderr.trim());
            let code = out
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Err(format!("ffmpeg exited with {}: {}", code, preview(&stderr)))
        }
        Ok(_) => Ok(()),
    };

    let succeeded = result.is_ok();
    let _ = tx.send(ExportProgress::JobFinished {
        index,
        output: job.output,
        result,
    });
    if succeeded && index + 1 == total {
        let _ = tx.send(ExportProgress::AllDone { total });
    }
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_PREVIEW_BYTES {
        return trimmed.to_string();
    }
    let mut end = STDERR_PREVIEW_BYTES;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
