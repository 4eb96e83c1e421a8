use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub duration: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// Rectangle cut out of the source picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// A frame-aligned slice of a longer video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub start: f64,
    pub duration: f64,
    pub frames: u64,
}

#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub background: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
    /// Number of times the background is played back to back.
    pub loops: u32,
    pub duration: f64,
    pub crop: Crop,
}

/// Container/codec collaborator. Implementations do raw muxing only; every
/// timing decision is made by the caller.
#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError>;
    async fn compose(&self, request: &ComposeRequest) -> Result<(), MediaError>;
    async fn cut(&self, input: &Path, span: Span, output: &Path) -> Result<(), MediaError>;
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError>;
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl Ffmpeg {
    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>, MediaError> {
        debug!("{} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                program: program.to_string(),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(MediaError::Tool {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: tail,
            });
        }
        Ok(output.stdout)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((n, d)) => (n.parse::<f64>().ok()?, d.parse::<f64>().ok()?),
        None => (rate.parse::<f64>().ok()?, 1.0),
    };
    if num <= 0.0 || den <= 0.0 {
        None
    } else {
        Some(num / den)
    }
}

fn parse_probe(path: &Path, json: &[u8]) -> Result<MediaInfo, MediaError> {
    let probe_err = |reason: String| MediaError::Probe {
        path: path.to_path_buf(),
        reason,
    };
    let parsed: ProbeOutput =
        serde_json::from_slice(json).map_err(|err| probe_err(err.to_string()))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| probe_err("no video stream".into()))?;
    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| probe_err("unknown frame rate".into()))?;
    let duration = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    Ok(MediaInfo {
        duration,
        fps,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
    })
}

#[async_trait]
impl MediaTool for Ffmpeg {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            path_arg(path),
        ];
        let stdout = self.run(&self.ffprobe, &args).await?;
        parse_probe(path, &stdout)
    }

    async fn compose(&self, request: &ComposeRequest) -> Result<(), MediaError> {
        let crop = request.crop;
        let args: Vec<String> = vec![
            "-y".into(),
            "-stream_loop".into(),
            request.loops.saturating_sub(1).to_string(),
            "-i".into(),
            path_arg(&request.background),
            "-i".into(),
            path_arg(&request.audio),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            "-vf".into(),
            format!("crop={}:{}:{}:{},setsar=1", crop.width, crop.height, crop.x, crop.y),
            "-t".into(),
            format!("{:.6}", request.duration),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "medium".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "192k".into(),
            "-movflags".into(),
            "+faststart".into(),
            path_arg(&request.output),
        ];
        self.run(&self.ffmpeg, &args).await.map(|_| ())
    }

    async fn cut(&self, input: &Path, span: Span, output: &Path) -> Result<(), MediaError> {
        let args: Vec<String> = vec![
            "-y".into(),
            "-ss".into(),
            format!("{:.6}", span.start),
            "-i".into(),
            path_arg(input),
            "-frames:v".into(),
            span.frames.to_string(),
            "-t".into(),
            format!("{:.6}", span.duration),
            "-c:v".into(),
            "libx264".into(),
            "-c:a".into(),
            "aac".into(),
            "-avoid_negative_ts".into(),
            "make_zero".into(),
            path_arg(output),
        ];
        self.run(&self.ffmpeg, &args).await.map(|_| ())
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        let list_path = output.with_extension("concat.txt");
        let mut list = String::new();
        for input in inputs {
            let absolute = std::path::absolute(input).unwrap_or_else(|_| input.clone());
            let escaped = absolute.to_string_lossy().replace('\'', r"'\''");
            list.push_str(&format!("file '{}'\n", escaped));
        }
        tokio::fs::write(&list_path, list)
            .await
            .map_err(|source| MediaError::Io {
                source,
                path: list_path.clone(),
            })?;

        let base = |codec: &[&str]| -> Vec<String> {
            let mut args: Vec<String> = ["-y", "-f", "concat", "-safe", "0", "-i"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            args.push(path_arg(&list_path));
            args.extend(codec.iter().map(|s| s.to_string()));
            args.push(path_arg(output));
            args
        };
        let result = match self.run(&self.ffmpeg, &base(&["-c", "copy"])).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, "ffmpeg concat with copy failed; retrying with re-encode");
                self.run(&self.ffmpeg, &base(&["-c:v", "libx264", "-c:a", "aac"]))
                    .await
                    .map(|_| ())
            }
        };
        if let Err(err) = tokio::fs::remove_file(&list_path).await {
            warn!(path = %list_path.display(), error = %err, "failed to remove concat list");
        }
        result
    }
}
