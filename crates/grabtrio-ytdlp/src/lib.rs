//! yt-dlp adapter.
//!
//! Implements `grabtrio_core::download::Downloader` by spawning the `yt-dlp`
//! binary once per job.

use std::{collections::VecDeque, path::PathBuf, process::Stdio, sync::Arc};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::Mutex,
};
use tracing::{debug, info};

use grabtrio_core::download::{DownloadJob, Downloader, FetchError};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

/// A concrete `yt-dlp` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CliInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Build the argument list for one job.
pub fn build_invocation(program: PathBuf, job: &DownloadJob) -> CliInvocation {
    let mut args: Vec<String> = vec![
        "-f".to_string(),
        job.format_selector.to_string(),
        "--merge-output-format".to_string(),
        job.merge_output_format.to_string(),
        "-o".to_string(),
        job.output_path.display().to_string(),
        "--no-progress".to_string(),
        "--no-update".to_string(),
    ];
    if job.no_playlist {
        args.push("--no-playlist".to_string());
    }
    if let Some(cookies) = &job.cookies {
        args.push("--cookies".to_string());
        args.push(cookies.display().to_string());
    }

    // URL last, after `--` so it is never parsed as an option.
    args.push("--".to_string());
    args.push(job.url.clone());

    CliInvocation { program, args }
}

#[derive(Clone, Debug)]
pub struct YtDlpClient {
    program: PathBuf,
}

impl YtDlpClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            if let Some(front) = self.lines.pop_front() {
                self.bytes = self.bytes.saturating_sub(front.len() + 1);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// yt-dlp prints the reason for a failure as `ERROR: ...`; prefer the last one.
    fn last_error(&self) -> Option<String> {
        self.lines
            .iter()
            .rev()
            .find_map(|l| l.trim().strip_prefix("ERROR:"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl Downloader for YtDlpClient {
    async fn download(&self, job: &DownloadJob) -> Result<(), FetchError> {
        let inv = build_invocation(self.program.clone(), job);
        info!(program = %inv.program.display(), url = %job.url, "spawning yt-dlp");

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out download drops this future; take the process with it.
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            FetchError::new(format!(
                "failed to start {}: {e}",
                inv.program.display()
            ))
        })?;

        let stderr_tail = Arc::new(Mutex::new(StderrTail::default()));

        // Drain both pipes in background to avoid blocking on a full pipe.
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    tail.lock().await.push_line(line);
                }
            })
        });
        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut r = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    debug!(target: "yt-dlp", "{line}");
                }
            })
        });

        let status = child
            .wait()
            .await
            .map_err(|e| FetchError::new(format!("yt-dlp wait failed: {e}")))?;

        for task in [stderr_task, stdout_task].into_iter().flatten() {
            let _ = task.await;
        }

        if status.success() {
            return Ok(());
        }

        let tail = stderr_tail.lock().await;
        if let Some(err) = tail.last_error() {
            return Err(FetchError::new(err));
        }
        let stderr = tail.snapshot();
        if !stderr.trim().is_empty() {
            return Err(FetchError::new(format!(
                "yt-dlp exited with {status}\n{stderr}"
            )));
        }
        Err(FetchError::new(format!("yt-dlp exited with {status}")))
    }
}
