#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use storyreel::audio::PcmAudio;
use storyreel::caption::{CaptionService, CaptionSettings, CaptionStatus, CaptionStyle};
use storyreel::error::{CaptionServiceError, FetchError, MediaError, SynthesisError};
use storyreel::media::{ComposeRequest, MediaInfo, MediaTool, Span};
use storyreel::reddit::{ContentPayload, ContentSource};
use storyreel::retry::RetryPolicy;
use storyreel::tts::{SpeechService, VoiceConfig};

/// Fake media files carry their own description, so renames and copies keep
/// them probeable.
pub fn write_media(path: &Path, info: MediaInfo) {
    let text = format!(
        "duration={} fps={} width={} height={}",
        info.duration, info.fps, info.width, info.height
    );
    std::fs::write(path, text).unwrap();
}

pub fn read_media(path: &Path) -> Option<MediaInfo> {
    let text = std::fs::read_to_string(path).ok()?;
    let mut fields = HashMap::new();
    for pair in text.split_whitespace() {
        let (key, value) = pair.split_once('=')?;
        fields.insert(key.to_string(), value.to_string());
    }
    Some(MediaInfo {
        duration: fields.get("duration")?.parse().ok()?,
        fps: fields.get("fps")?.parse().ok()?,
        width: fields.get("width")?.parse().ok()?,
        height: fields.get("height")?.parse().ok()?,
    })
}

pub fn landscape(duration: f64) -> MediaInfo {
    MediaInfo {
        duration,
        fps: 30.0,
        width: 1920,
        height: 1080,
    }
}

pub fn payload(title: &str, body: &str) -> ContentPayload {
    ContentPayload {
        title: title.to_string(),
        body: body.to_string(),
        source_id: "t3_abc".to_string(),
        subreddit: Some("AITAH".to_string()),
        author: Some("someone".to_string()),
        permalink: None,
    }
}

pub struct FakeSource {
    payload: ContentPayload,
    failures: Mutex<Vec<FetchError>>,
}

impl FakeSource {
    pub fn new(payload: ContentPayload) -> Self {
        Self {
            payload,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next calls with `errors`, in order, before succeeding.
    pub fn failing_first(payload: ContentPayload, errors: Vec<FetchError>) -> Self {
        let mut errors = errors;
        errors.reverse();
        Self {
            payload,
            failures: Mutex::new(errors),
        }
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch(&self, _url: &str) -> Result<ContentPayload, FetchError> {
        if let Some(err) = self.failures.lock().unwrap().pop() {
            return Err(err);
        }
        Ok(self.payload.clone())
    }
}

/// Returns `seconds` of silence per request at a 1 kHz sample rate.
pub struct FakeSpeech {
    pub seconds: f64,
    pub requests: AtomicUsize,
    /// Returned instead of audio on the next request.
    pub failure: Mutex<Option<SynthesisError>>,
    /// Deleted when the first request arrives.
    pub remove_on_request: Mutex<Option<PathBuf>>,
}

impl FakeSpeech {
    pub fn new(seconds: f64) -> Self {
        Self {
            seconds,
            requests: AtomicUsize::new(0),
            failure: Mutex::new(None),
            remove_on_request: Mutex::new(None),
        }
    }

    pub fn failing(err: SynthesisError) -> Self {
        let speech = Self::new(1.0);
        *speech.failure.lock().unwrap() = Some(err);
        speech
    }

    pub fn removing(seconds: f64, path: PathBuf) -> Self {
        let speech = Self::new(seconds);
        *speech.remove_on_request.lock().unwrap() = Some(path);
        speech
    }
}

#[async_trait]
impl SpeechService for FakeSpeech {
    async fn synthesize(&self, _text: &str, _voice: &VoiceConfig) -> Result<PcmAudio, SynthesisError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(path) = self.remove_on_request.lock().unwrap().take() {
            std::fs::remove_file(path).unwrap();
        }
        if let Some(err) = self.failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(PcmAudio {
            sample_rate: 1000,
            channels: 1,
            samples: vec![0; (self.seconds * 1000.0).round() as usize],
        })
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub composed: Mutex<Vec<ComposeRequest>>,
    pub cuts: Mutex<Vec<(PathBuf, Span)>>,
    pub concats: Mutex<Vec<Vec<PathBuf>>>,
    /// Seconds added to every concatenated output.
    pub concat_drift: f64,
}

fn missing(path: &Path) -> MediaError {
    MediaError::Probe {
        path: path.to_path_buf(),
        reason: "not a fake media file".into(),
    }
}

#[async_trait]
impl MediaTool for FakeMedia {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        read_media(path).ok_or_else(|| missing(path))
    }

    async fn compose(&self, request: &ComposeRequest) -> Result<(), MediaError> {
        let background = read_media(&request.background).ok_or_else(|| missing(&request.background))?;
        write_media(
            &request.output,
            MediaInfo {
                duration: request.duration,
                fps: background.fps,
                width: request.crop.width,
                height: request.crop.height,
            },
        );
        self.composed.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn cut(&self, input: &Path, span: Span, output: &Path) -> Result<(), MediaError> {
        let info = read_media(input).ok_or_else(|| missing(input))?;
        write_media(
            output,
            MediaInfo {
                duration: span.duration,
                ..info
            },
        );
        self.cuts.lock().unwrap().push((output.to_path_buf(), span));
        Ok(())
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        let mut total = 0.0;
        let mut first = None;
        for input in inputs {
            let info = read_media(input).ok_or_else(|| missing(input))?;
            total += info.duration;
            first.get_or_insert(info);
        }
        let info = first.ok_or_else(|| missing(output))?;
        write_media(
            output,
            MediaInfo {
                duration: total + self.concat_drift,
                ..info
            },
        );
        self.concats.lock().unwrap().push(inputs.to_vec());
        Ok(())
    }
}

/// Segment index encoded in a cut file name; a whole video counts as 0.
pub fn segment_index(path: &Path) -> usize {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("segment_"))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

pub struct FakeJob {
    pub input: PathBuf,
    pub polls: u32,
    pub needed: u32,
    pub hang: bool,
    pub fail: bool,
}

/// In-process captioning service. Captioning copies the input unchanged.
pub struct FakeCaptioner {
    pub jobs: Mutex<HashMap<String, FakeJob>>,
    pub next_id: AtomicUsize,
    pub submissions: Mutex<Vec<PathBuf>>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    /// Polls before a job reports done.
    pub polls_needed: u32,
    /// Later segments finish first when set.
    pub reverse_finish: bool,
    /// Segment whose job reports a failure.
    pub fail_segment: Option<usize>,
    /// Number of initial submissions that never finish.
    pub hang_submissions: usize,
}

impl Default for FakeCaptioner {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            polls_needed: 2,
            reverse_finish: false,
            fail_segment: None,
            hang_submissions: 0,
        }
    }
}

impl FakeCaptioner {
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaptionService for FakeCaptioner {
    async fn submit(&self, segment: &Path, _style: &CaptionStyle) -> Result<String, CaptionServiceError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let index = segment_index(segment);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.submissions.lock().unwrap().push(segment.to_path_buf());

        let needed = if self.reverse_finish {
            self.polls_needed + (10 - index.min(10)) as u32
        } else {
            self.polls_needed
        };
        let id = format!("job-{n}");
        self.jobs.lock().unwrap().insert(
            id.clone(),
            FakeJob {
                input: segment.to_path_buf(),
                polls: 0,
                needed,
                hang: n < self.hang_submissions,
                fail: self.fail_segment == Some(index),
            },
        );
        Ok(id)
    }

    async fn status(&self, job_id: &str) -> Result<CaptionStatus, CaptionServiceError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| CaptionServiceError::JobFailed(format!("unknown job {job_id}")))?;
        job.polls += 1;
        if job.hang || job.polls < job.needed {
            return Ok(CaptionStatus::Processing);
        }
        if job.fail {
            drop(jobs);
            self.finish();
            return Ok(CaptionStatus::Failed {
                reason: "transcription failed".into(),
            });
        }
        Ok(CaptionStatus::Done {
            output: job.input.to_string_lossy().to_string(),
        })
    }

    async fn download(&self, output: &str, dest: &Path) -> Result<(), CaptionServiceError> {
        std::fs::copy(output, dest).map_err(|source| CaptionServiceError::Io {
            source,
            path: dest.to_path_buf(),
        })?;
        self.finish();
        Ok(())
    }
}

/// Caption settings fast enough for tests.
pub fn quick_captions() -> CaptionSettings {
    CaptionSettings {
        poll_interval: Duration::from_millis(2),
        timeout_floor: Duration::from_secs(5),
        timeout_per_second: 0.0,
        request_retry: RetryPolicy::none(),
        ..CaptionSettings::default()
    }
}
