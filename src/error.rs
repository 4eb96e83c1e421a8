use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::job::Stage;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid post url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("post not found at {0}")]
    NotFound(String),
    #[error("rate limited by content source")]
    RateLimited,
    #[error("unexpected post structure: {0}")]
    Malformed(String),
    #[error("content source request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited => true,
            FetchError::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum TextServiceError {
    #[error("text service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("text service timed out after {0:?}")]
    Timeout(Duration),
    #[error("text service returned no usable content")]
    Empty,
    #[error("text service reply was cut off by the {0}-token limit")]
    Truncated(u32),
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech quota exceeded or credential rejected: {0}")]
    QuotaExceeded(String),
    #[error("invalid voice configuration: {0}")]
    InvalidVoice(String),
    #[error("speech service rejected text: {0}")]
    InvalidText(String),
    #[error("speech service rate limited")]
    RateLimited,
    #[error("speech request timed out after {0:?}")]
    Timeout(Duration),
    #[error("speech service unavailable: {0}")]
    Unavailable(String),
    #[error("speech engine failed: {0}")]
    Engine(String),
    #[error("audio chunks disagree on format: {0}")]
    FormatMismatch(String),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

impl SynthesisError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SynthesisError::RateLimited
                | SynthesisError::Timeout(_)
                | SynthesisError::Unavailable(_)
        )
    }
}

impl From<reqwest::Error> for SynthesisError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            SynthesisError::Timeout(Duration::ZERO)
        } else {
            SynthesisError::Unavailable(error.to_string())
        }
    }
}

/// Failures of the container/codec collaborator (ffmpeg and ffprobe).
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to launch {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} exited with {status}: {stderr}")]
    Tool {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("could not probe {path}: {reason}")]
    Probe { path: PathBuf, reason: String },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("background video not found: {0}")]
    MissingBackground(PathBuf),
    #[error("background video unreadable: {0}")]
    UnreadableBackground(#[source] MediaError),
    #[error("background video {0} has zero duration")]
    ZeroDuration(PathBuf),
    #[error("narration track has zero duration")]
    EmptyNarration,
    #[error("muxing failed: {0}")]
    Mux(#[from] MediaError),
}

#[derive(Debug, Error)]
pub enum CaptionServiceError {
    #[error("captioning service rejected media: {0}")]
    InvalidMedia(String),
    #[error("captioning service does not support this duration: {0}")]
    UnsupportedDuration(String),
    #[error("captioning quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("captioning job failed: {0}")]
    JobFailed(String),
    #[error("captioning job did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("captioning service unavailable: {0}")]
    Unavailable(String),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

impl CaptionServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptionServiceError::Unavailable(_))
    }
}

impl From<reqwest::Error> for CaptionServiceError {
    fn from(error: reqwest::Error) -> Self {
        CaptionServiceError::Unavailable(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("segment {index} failed: {source}")]
    Segment {
        index: usize,
        #[source]
        source: CaptionServiceError,
    },
    #[error("could not probe composed video: {0}")]
    Probe(#[source] MediaError),
    #[error("could not cut segment {index}: {source}")]
    Split {
        index: usize,
        #[source]
        source: MediaError,
    },
    #[error("could not reassemble captioned segments: {0}")]
    Reassembly(#[source] MediaError),
    #[error("captioned video lasts {actual:.3}s, composed video lasts {expected:.3}s")]
    Drift { expected: f64, actual: f64 },
    #[error("segment worker for {index} stopped unexpectedly: {reason}")]
    Worker { index: usize, reason: String },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

impl CaptionError {
    pub fn segment_index(&self) -> Option<usize> {
        match self {
            CaptionError::Segment { index, .. }
            | CaptionError::Split { index, .. }
            | CaptionError::Worker { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing credential {0}")]
    MissingCredential(&'static str),
    #[error("background video not found: {0}")]
    MissingBackground(PathBuf),
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("could not build {name} client: {reason}")]
    Client { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("no free output name for {0}")]
    Exhausted(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("fetch stage failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("normalization produced no narration text")]
    EmptyNarration,
    #[error("synthesis stage failed: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error("composition stage failed: {0}")]
    Composition(#[from] CompositionError),
    #[error("caption stage failed: {0}")]
    Caption(#[from] CaptionError),
    #[error("publishing failed: {0}")]
    Output(#[from] OutputError),
    #[error("working directory {path}: {source}")]
    Workspace { source: io::Error, path: PathBuf },
    #[error("job cancelled during {0}")]
    Cancelled(Stage),
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Fetch(err) => err.is_transient(),
            PipelineError::Synthesis(err) => err.is_transient(),
            PipelineError::Caption(CaptionError::Segment { source, .. }) => source.is_transient(),
            _ => false,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
