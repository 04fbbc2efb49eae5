use crate::config::FfmpegConfig;
use crate::error::{Result, Stage, VideoError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One transcoder invocation: stage-attributed arguments plus the file it writes.
///
/// Jobs are plain data, so filter graphs can be checked without running ffmpeg.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegJob {
    pub stage: Stage,
    pub scene: Option<usize>,
    pub args: Vec<String>,
    pub output: PathBuf,
}

impl FfmpegJob {
    pub fn new(stage: Stage, output: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            scene: None,
            args: Vec::new(),
            output: output.into(),
        }
    }

    pub fn scene(mut self, index: usize) -> Self {
        self.scene = Some(index);
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn input(self, path: &Path) -> Self {
        self.arg("-i").arg(path.to_string_lossy())
    }

    /// Silent H.264 output in the player-safe pixel format.
    pub fn silent_h264(self, preset: &str, crf: u32) -> Self {
        self.args(["-c:v", "libx264", "-preset", preset])
            .args(["-crf".to_string(), crf.to_string()])
            .args(["-pix_fmt", "yuv420p", "-an"])
    }

    /// Full argument list: overwrite flag, job arguments, output path.
    pub fn command_line(&self) -> Vec<String> {
        let mut line = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];
        line.extend(self.args.iter().cloned());
        line.push(self.output.to_string_lossy().into_owned());
        line
    }

    /// Value following the first occurrence of `flag`.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Every path passed with `-i`, in order.
    pub fn inputs(&self) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|w| w[0] == "-i")
            .map(|w| w[1].as_str())
            .collect()
    }
}

/// The external transcoding engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Fails with `ConfigurationMissing` when the engine cannot run at all.
    async fn ensure_available(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Runs `job`; on any failure no output file is left behind.
    async fn run(&self, job: &FfmpegJob, cancel: &CancellationToken) -> Result<()>;

    /// Container duration in seconds.
    async fn probe_duration(&self, path: &Path, cancel: &CancellationToken) -> Result<f64>;
}

/// Runs the system `ffmpeg`/`ffprobe` binaries as child processes.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    binary: String,
    probe_binary: String,
    timeout: Duration,
}

impl FfmpegEngine {
    pub fn new(config: &FfmpegConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            probe_binary: config.probe_binary.clone(),
            timeout: Duration::from_secs(config.timeout_sec),
        }
    }

    async fn tool_runs(binary: &str, cancel: &CancellationToken) -> Result<bool> {
        let mut command = Command::new(binary);
        command.arg("-version");
        match bounded_output(command, HELPER_TIMEOUT, Stage::Config, cancel).await {
            Ok(output) => Ok(output.status.success()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                debug!("{} -version failed: {}", binary, e);
                Ok(false)
            }
        }
    }
}

/// Upper bound for short helper calls (`-version`, ffprobe).
const HELPER_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a short helper command to completion, bounded by `limit` and the
/// run's cancellation. The child is killed when either fires.
async fn bounded_output(
    mut command: Command,
    limit: Duration,
    stage: Stage,
    cancel: &CancellationToken,
) -> Result<Output> {
    if cancel.is_cancelled() {
        return Err(VideoError::Cancelled);
    }
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VideoError::Cancelled),
        waited = tokio::time::timeout(limit, child.wait_with_output()) => match waited {
            Err(_) => Err(VideoError::Timeout { stage, secs: limit.as_secs() }),
            Ok(output) => Ok(output?),
        },
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn ensure_available(&self, cancel: &CancellationToken) -> Result<()> {
        for binary in [&self.binary, &self.probe_binary] {
            if !Self::tool_runs(binary, cancel).await? {
                return Err(VideoError::ConfigurationMissing(format!(
                    "{} is required but was not found on PATH",
                    binary
                )));
            }
        }
        Ok(())
    }

    async fn run(&self, job: &FfmpegJob, cancel: &CancellationToken) -> Result<()> {
        let line = job.command_line();
        debug!(stage = %job.stage, scene = ?job.scene, "{} {}", self.binary, line.join(" "));

        let child = Command::new(&self.binary)
            .args(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VideoError::transform(job.stage, job.scene, format!("failed to run {}: {}", self.binary, e))
            })?;

        // Dropping the wait future drops the child, which kills it.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(VideoError::Cancelled),
            waited = tokio::time::timeout(self.timeout, child.wait_with_output()) => match waited {
                Err(_) => Err(VideoError::Timeout { stage: job.stage, secs: self.timeout.as_secs() }),
                Ok(Err(e)) => Err(VideoError::transform(job.stage, job.scene, e.to_string())),
                Ok(Ok(output)) if output.status.success() => Ok(()),
                Ok(Ok(output)) => Err(VideoError::transform(
                    job.stage,
                    job.scene,
                    format!("ffmpeg exited with {}: {}", output.status, stderr_tail(&output.stderr)),
                )),
            },
        };

        if outcome.is_err() {
            tokio::fs::remove_file(&job.output).await.ok();
        } else {
            info!(stage = %job.stage, scene = ?job.scene, "Wrote {}", job.output.display());
        }
        outcome
    }

    async fn probe_duration(&self, path: &Path, cancel: &CancellationToken) -> Result<f64> {
        let mut command = Command::new(&self.probe_binary);
        command
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path);
        let output = bounded_output(command, HELPER_TIMEOUT, Stage::Transform, cancel).await?;
        if !output.status.success() {
            return Err(VideoError::transform(
                Stage::Transform,
                None,
                format!("ffprobe failed on {}: {}", path.display(), stderr_tail(&output.stderr)),
            ));
        }
        parse_duration(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            VideoError::transform(Stage::Transform, None, format!("no duration for {}", path.display()))
        })
    }
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(5)..].join(" | ")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_wraps_args_with_output() {
        let job = FfmpegJob::new(Stage::Mux, "/tmp/out.mp4")
            .input(Path::new("/tmp/v.mp4"))
            .input(Path::new("/tmp/a.mp3"))
            .args(["-c:v", "copy"]);
        let line = job.command_line();
        assert_eq!(line.first().unwrap(), "-y");
        assert_eq!(line.last().unwrap(), "/tmp/out.mp4");
        assert_eq!(job.inputs(), vec!["/tmp/v.mp4", "/tmp/a.mp3"]);
        assert_eq!(job.value_of("-c:v"), Some("copy"));
        assert_eq!(job.value_of("-t"), None);
    }

    #[test]
    fn probe_output_parsing() {
        assert_eq!(parse_duration("12.480000\n"), Some(12.48));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("0.000"), None);
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr = b"a\nb\n\nc\nd\ne\nf\ng\n";
        assert_eq!(stderr_tail(stderr), "c | d | e | f | g");
    }

    #[tokio::test]
    async fn missing_binary_is_configuration_missing() {
        let engine = FfmpegEngine::new(&FfmpegConfig {
            binary: "definitely-not-ffmpeg-xyz".to_string(),
            ..FfmpegConfig::default()
        });
        let err = engine.ensure_available(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, VideoError::ConfigurationMissing(_)));
    }

    #[tokio::test]
    async fn helper_calls_honour_cancellation() {
        let engine = FfmpegEngine::new(&FfmpegConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine.probe_duration(Path::new("clip.mp4"), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        let err = engine.ensure_available(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_calls_are_time_bounded() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 5"]);
        let err = bounded_output(command, Duration::from_millis(100), Stage::Transform, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::Timeout { stage: Stage::Transform, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_interrupts_a_running_helper() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 5"]);
        let started = std::time::Instant::now();
        let err = bounded_output(command, HELPER_TIMEOUT, Stage::Transform, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn spawn_failure_is_stage_attributed() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let engine = FfmpegEngine::new(&FfmpegConfig {
            binary: "definitely-not-ffmpeg-xyz".to_string(),
            ..FfmpegConfig::default()
        });
        let err = engine
            .run(&FfmpegJob::new(Stage::Concat, &out), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Concat));
        assert!(!out.exists());
    }
}
