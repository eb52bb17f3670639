//! ffmpeg transcodes written to a cache file that range requests read
//! while it grows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Ceiling for every container except flac.
pub const MAX_LOSSY_KBPS: u32 = 320;

const COPY_BUFFER: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Container {
    Mp3,
    Aac,
    Flac,
    Webm,
    Ogg,
}

impl Container {
    pub fn parse(value: Option<&str>) -> Result<Self, String> {
        let value = value.unwrap_or("mp3").trim().to_ascii_lowercase();
        match value.as_str() {
            "mp3" => Ok(Container::Mp3),
            "aac" => Ok(Container::Aac),
            "flac" => Ok(Container::Flac),
            "webm" => Ok(Container::Webm),
            "ogg" => Ok(Container::Ogg),
            other => Err(format!("invalid container: {}", other)),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp3 => "mp3",
            Container::Aac => "aac",
            Container::Flac => "flac",
            Container::Webm => "webm",
            Container::Ogg => "ogg",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Container::Mp3 => "audio/mpeg",
            Container::Aac => "audio/aac",
            Container::Flac => "audio/flac",
            Container::Webm => "audio/webm",
            Container::Ogg => "audio/ogg",
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, Container::Flac)
    }

    /// Encoder and muxer names.
    fn codec(&self) -> (&'static str, &'static str) {
        match self {
            Container::Mp3 => ("libmp3lame", "mp3"),
            Container::Aac => ("aac", "adts"),
            Container::Flac => ("flac", "flac"),
            Container::Webm => ("libopus", "webm"),
            Container::Ogg => ("libvorbis", "ogg"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quality {
    Original,
    Kbps(u32),
}

pub fn parse_quality(value: Option<&str>) -> Result<Quality, String> {
    let value = value.unwrap_or("original").trim().to_ascii_lowercase();
    if value == "original" {
        return Ok(Quality::Original);
    }
    match value.trim_end_matches('k').parse::<u32>() {
        Ok(kbps) if kbps > 0 => Ok(Quality::Kbps(kbps)),
        _ => Err(format!("invalid quality: {}", value)),
    }
}

/// Output bitrate in kbps. Never above the source when its bitrate is
/// known, and never above 320 for lossy containers.
pub fn target_bitrate(container: Container, requested_kbps: u32, source_kbps: u32) -> u32 {
    let mut kbps = requested_kbps;
    if !container.is_lossless() {
        kbps = kbps.min(MAX_LOSSY_KBPS);
    }
    if source_kbps > 0 {
        kbps = kbps.min(source_kbps);
    }
    kbps
}

pub fn ffmpeg_args(input: &Path, container: Container, kbps: u32) -> Vec<String> {
    let (codec, format) = container.codec();
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostdin",
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(input.to_string_lossy().to_string());
    args.extend(["-map", "0:a:0", "-vn", "-c:a", codec].iter().map(|s| s.to_string()));
    if !container.is_lossless() {
        args.push("-b:a".to_string());
        args.push(format!("{}k", kbps));
    }
    args.extend(["-f", format, "pipe:1"].iter().map(|s| s.to_string()));
    args
}

#[derive(Debug)]
pub enum TranscodeError {
    Io(std::io::Error),
    Spawn(std::io::Error),
    NoOutput,
    Exit { code: Option<i32>, stderr: String },
    TimedOut(Duration),
}

impl std::fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscodeError::Io(err) => write!(f, "io error: {}", err),
            TranscodeError::Spawn(err) => write!(f, "failed to start ffmpeg: {}", err),
            TranscodeError::NoOutput => write!(f, "ffmpeg stdout unavailable"),
            TranscodeError::Exit { code, stderr } => match code {
                Some(code) => write!(f, "ffmpeg exited with {}: {}", code, stderr),
                None => write!(f, "ffmpeg killed by signal: {}", stderr),
            },
            TranscodeError::TimedOut(limit) => {
                write!(f, "ffmpeg timed out after {}s", limit.as_secs())
            }
        }
    }
}

impl std::error::Error for TranscodeError {}

impl From<std::io::Error> for TranscodeError {
    fn from(err: std::io::Error) -> Self {
        TranscodeError::Io(err)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Running { written: u64 },
    Finished { size: u64 },
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TranscodeKey {
    pub trackhash: String,
    pub kbps: u32,
    pub container: Container,
}

impl TranscodeKey {
    fn file_name(&self) -> String {
        format!(
            "{}-{}k.{}",
            self.trackhash,
            self.kbps,
            self.container.extension()
        )
    }
}

pub struct TranscodeRequest {
    pub key: TranscodeKey,
    pub source: PathBuf,
    pub duration_secs: u32,
    pub source_kbps: u32,
}

pub struct TranscodeJob {
    pub key: TranscodeKey,
    pub output: PathBuf,
    estimated_size: u64,
    progress: watch::Receiver<JobState>,
}

impl TranscodeJob {
    pub fn state(&self) -> JobState {
        *self.progress.borrow()
    }

    /// Resolves once `target` bytes exist or the job stopped running.
    pub async fn wait_until(&self, target: u64) -> JobState {
        let mut rx = self.progress.clone();
        let result = rx
            .wait_for(|state| match state {
                JobState::Running { written } => *written >= target,
                _ => true,
            })
            .await
            .map(|state| *state);
        match result {
            Ok(state) => state,
            Err(_) => *rx.borrow(),
        }
    }

    /// Size reported in `Content-Range`: the estimate while running, the
    /// real size once done.
    pub fn total_size(&self, state: JobState) -> u64 {
        match state {
            JobState::Running { written } => written.max(self.estimated_size),
            JobState::Finished { size } => size,
            JobState::Failed => 0,
        }
    }
}

fn estimate_size(request: &TranscodeRequest) -> u64 {
    let kbps = if request.key.container.is_lossless() && request.source_kbps > 0 {
        request.source_kbps
    } else {
        request.key.kbps
    };
    u64::from(request.duration_secs) * u64::from(kbps) * 1000 / 8
}

/// In-flight and finished transcodes, one per track, bitrate and
/// container.
#[derive(Clone)]
pub struct TranscodeRegistry {
    inner: Arc<RwLock<HashMap<TranscodeKey, Arc<TranscodeJob>>>>,
    dir: PathBuf,
    ffmpeg: String,
    timeout: Duration,
}

impl TranscodeRegistry {
    pub fn new(dir: PathBuf, ffmpeg: String, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            dir,
            ffmpeg,
            timeout,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Reuses a running or finished job for the same key, otherwise spawns
    /// ffmpeg.
    pub fn get_or_start(&self, request: TranscodeRequest) -> Result<Arc<TranscodeJob>, TranscodeError> {
        let mut guard = self.inner.write();
        if let Some(job) = guard.get(&request.key) {
            let reusable = match job.state() {
                JobState::Running { .. } => true,
                JobState::Finished { .. } => job.output.exists(),
                JobState::Failed => false,
            };
            if reusable {
                return Ok(Arc::clone(job));
            }
        }

        std::fs::create_dir_all(&self.dir)?;
        let output = self.dir.join(request.key.file_name());
        let args = ffmpeg_args(&request.source, request.key.container, request.key.kbps);
        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscodeError::Spawn)?;
        let stdout = child.stdout.take().ok_or(TranscodeError::NoOutput)?;

        let (tx, rx) = watch::channel(JobState::Running { written: 0 });
        let job = Arc::new(TranscodeJob {
            key: request.key.clone(),
            output: output.clone(),
            estimated_size: estimate_size(&request),
            progress: rx,
        });
        guard.insert(request.key.clone(), Arc::clone(&job));
        drop(guard);

        info!(
            "Transcoding {:?} to {} at {}k",
            request.source,
            request.key.container.extension(),
            request.key.kbps
        );
        let registry = self.clone();
        let timeout = self.timeout;
        let spawned = Arc::clone(&job);
        tokio::spawn(async move {
            match run_job(child, stdout, &output, &tx, timeout).await {
                Ok(size) => {
                    debug!("Transcode {:?} finished ({} bytes)", output, size);
                    tx.send_replace(JobState::Finished { size });
                }
                Err(err) => {
                    warn!("Transcode {:?} failed: {}", output, err);
                    tx.send_replace(JobState::Failed);
                    registry.forget(&spawned);
                    let _ = tokio::fs::remove_file(&output).await;
                }
            }
        });
        Ok(job)
    }

    fn forget(&self, job: &Arc<TranscodeJob>) {
        let mut guard = self.inner.write();
        if guard.get(&job.key).map_or(false, |current| Arc::ptr_eq(current, job)) {
            guard.remove(&job.key);
        }
    }

    /// Drops every finished job and its file. Running jobs are kept.
    pub fn clear_finished(&self) -> usize {
        let mut guard = self.inner.write();
        let before = guard.len();
        guard.retain(|_, job| {
            if matches!(job.state(), JobState::Finished { .. }) {
                let _ = std::fs::remove_file(&job.output);
                false
            } else {
                true
            }
        });
        before - guard.len()
    }
}

async fn run_job(
    mut child: tokio::process::Child,
    mut stdout: tokio::process::ChildStdout,
    output: &Path,
    tx: &watch::Sender<JobState>,
    timeout: Duration,
) -> Result<u64, TranscodeError> {
    let deadline = Instant::now() + timeout;
    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        })
    });

    let mut file = tokio::fs::File::create(output).await?;
    let copy = async {
        let mut buf = vec![0u8; COPY_BUFFER];
        let mut written = 0u64;
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            file.flush().await?;
            written += n as u64;
            tx.send_replace(JobState::Running { written });
        }
        Ok::<u64, std::io::Error>(written)
    };

    let written = match tokio::time::timeout_at(deadline, copy).await {
        Ok(result) => result?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(TranscodeError::TimedOut(timeout));
        }
    };
    let status = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(TranscodeError::TimedOut(timeout));
        }
    };
    if !status.success() {
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        return Err(TranscodeError::Exit {
            code: status.code(),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(written)
}
