use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{AudioTrack, PcmAudio, write_concatenated};
use crate::error::SynthesisError;
use crate::retry::RetryPolicy;
use crate::utils::chunk_text;

const ELEVENLABS_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Hosted voice id, or the model path for a local engine.
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: "JBFqnCBsd6RMkjVDRZzb".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            stability: 0.75,
            similarity_boost: 0.75,
            style: 0.4,
            use_speaker_boost: true,
        }
    }
}

#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<PcmAudio, SynthesisError>;
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

pub struct ElevenLabsSpeech {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ElevenLabsSpeech {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: "https://api.elevenlabs.io".to_string(),
        })
    }
}

#[async_trait]
impl SpeechService for ElevenLabsSpeech {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<PcmAudio, SynthesisError> {
        let url = format!(
            "{}/v1/text-to-speech/{}?output_format=pcm_{}",
            self.base_url, voice.voice_id, ELEVENLABS_SAMPLE_RATE
        );
        let body = SpeechRequest {
            text,
            model_id: &voice.model_id,
            voice_settings: VoiceSettings {
                stability: voice.stability,
                similarity_boost: voice.similarity_boost,
                style: voice.style,
                use_speaker_boost: voice.use_speaker_boost,
            },
        };
        let response = self
            .client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::PAYMENT_REQUIRED | StatusCode::FORBIDDEN => {
                    SynthesisError::QuotaExceeded(detail)
                }
                StatusCode::NOT_FOUND => SynthesisError::InvalidVoice(voice.voice_id.clone()),
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    SynthesisError::InvalidText(detail)
                }
                StatusCode::TOO_MANY_REQUESTS => SynthesisError::RateLimited,
                other => SynthesisError::Unavailable(format!("{other}: {detail}")),
            });
        }
        let bytes = response.bytes().await?;
        Ok(PcmAudio::from_le_bytes(&bytes, ELEVENLABS_SAMPLE_RATE, 1))
    }
}

/// Local Piper process; the voice id is the path of the `.onnx` model.
pub struct PiperSpeech {
    program: PathBuf,
    scratch_dir: PathBuf,
}

impl PiperSpeech {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self::with_program("piper", scratch_dir)
    }

    /// Runs `program` instead of the `piper` found on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    async fn run_piper(&self, text: &str, voice: &VoiceConfig, out_path: &Path) -> Result<PcmAudio, SynthesisError> {
        let mut child = Command::new(&self.program)
            .arg("--model")
            .arg(&voice.voice_id)
            .arg("--output_file")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SynthesisError::Engine(format!("failed to spawn piper: {err}")))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| SynthesisError::Engine("failed to open piper stdin".into()))?;
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|source| SynthesisError::Io {
                    source,
                    path: out_path.to_path_buf(),
                })?;
        }

        let status = child
            .wait()
            .await
            .map_err(|err| SynthesisError::Engine(err.to_string()))?;
        if !status.success() {
            error!("Piper TTS command failed for chunk: {}", out_path.display());
            return Err(SynthesisError::Engine(format!("piper exited with {status}")));
        }
        PcmAudio::read_wav(out_path)
    }
}

/// Removes a per-request output file however the request ends, including
/// when the request future is dropped.
struct ScratchFile(PathBuf);

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.0.display(), error = %err, "failed to remove piper output"),
        }
    }
}

#[async_trait]
impl SpeechService for PiperSpeech {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<PcmAudio, SynthesisError> {
        if !Path::new(&voice.voice_id).exists() {
            return Err(SynthesisError::InvalidVoice(format!(
                "piper model {} not found",
                voice.voice_id
            )));
        }
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|source| SynthesisError::Io {
                source,
                path: self.scratch_dir.clone(),
            })?;
        let scratch = ScratchFile(self.scratch_dir.join(format!("piper-{}.wav", Uuid::new_v4().simple())));
        debug!("Calling Piper TTS for output file {}", scratch.0.display());
        self.run_piper(text, voice, &scratch.0).await
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    /// Largest text a single request may carry.
    pub max_request_chars: usize,
    /// Minimum spacing between consecutive requests.
    pub request_interval: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

pub struct Synthesizer {
    service: Arc<dyn SpeechService>,
    voice: VoiceConfig,
    settings: SynthesisSettings,
}

impl Synthesizer {
    pub fn new(service: Arc<dyn SpeechService>, voice: VoiceConfig, settings: SynthesisSettings) -> Self {
        Self {
            service,
            voice,
            settings,
        }
    }

    /// Synthesizes `text` in order-preserving sub-requests and writes the
    /// spliced narration to `out_path`.
    pub async fn synthesize(&self, text: &str, out_path: &Path) -> Result<AudioTrack, SynthesisError> {
        if self.voice.voice_id.trim().is_empty() {
            return Err(SynthesisError::InvalidVoice("voice id is empty".into()));
        }
        let chunks = chunk_text(text, self.settings.max_request_chars);
        if chunks.is_empty() {
            return Err(SynthesisError::InvalidText("narration text is empty".into()));
        }
        info!(
            "Synthesizing {} chars in {} request(s)",
            text.chars().count(),
            chunks.len()
        );

        let mut parts = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 && !self.settings.request_interval.is_zero() {
                sleep(self.settings.request_interval).await;
            }
            let label = format!("speech chunk {}/{}", i + 1, chunks.len());
            let audio = self
                .settings
                .retry
                .run(&label, || async {
                    timeout(
                        self.settings.request_timeout,
                        self.service.synthesize(chunk, &self.voice),
                    )
                    .await
                    .map_err(|_| SynthesisError::Timeout(self.settings.request_timeout))?
                })
                .await?;
            debug!("Finished TTS chunk {} ({:.2}s)", i, audio.duration_seconds());
            parts.push(audio);
        }

        let path = out_path.to_path_buf();
        let track = tokio::task::spawn_blocking(move || write_concatenated(&parts, &path))
            .await
            .map_err(|err| SynthesisError::Engine(format!("audio writer panicked: {err}")))??;
        info!("Narration written to {} ({:.2}s)", track.path.display(), track.duration);
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        calls: Mutex<Vec<String>>,
        fail_first: Mutex<Option<SynthesisError>>,
    }

    #[async_trait]
    impl SpeechService for Recording {
        async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> Result<PcmAudio, SynthesisError> {
            if let Some(err) = self.fail_first.lock().unwrap().take() {
                return Err(err);
            }
            self.calls.lock().unwrap().push(text.to_string());
            Ok(PcmAudio {
                sample_rate: 1000,
                channels: 1,
                samples: vec![1; text.len() * 10],
            })
        }
    }

    fn settings(retries: u32) -> SynthesisSettings {
        SynthesisSettings {
            max_request_chars: 20,
            request_interval: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(retries, Duration::ZERO, Duration::ZERO),
        }
    }

    fn service(fail_first: Option<SynthesisError>) -> Arc<Recording> {
        Arc::new(Recording {
            calls: Mutex::new(Vec::new()),
            fail_first: Mutex::new(fail_first),
        })
    }

    #[tokio::test]
    async fn splits_and_splices_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let speech = service(None);
        let synth = Synthesizer::new(speech.clone(), VoiceConfig::default(), settings(0));
        let text = "One fish. Two fish! Red fish? Blue fish.";
        let track = synth.synthesize(text, &dir.path().join("n.wav")).await.unwrap();
        let calls = speech.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["One fish. Two fish!", "Red fish? Blue fish."]);
        let expected: usize = calls.iter().map(|c| c.len() * 10).sum();
        assert!((track.duration - expected as f64 / 1000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rate_limits_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let speech = service(Some(SynthesisError::RateLimited));
        let synth = Synthesizer::new(speech.clone(), VoiceConfig::default(), settings(1));
        synth.synthesize("Hello.", &dir.path().join("n.wav")).await.unwrap();
        assert_eq!(speech.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn quota_errors_are_reported_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let speech = service(Some(SynthesisError::QuotaExceeded("out of credits".into())));
        let synth = Synthesizer::new(speech.clone(), VoiceConfig::default(), settings(3));
        let result = synth.synthesize("Hello.", &dir.path().join("n.wav")).await;
        assert!(matches!(result, Err(SynthesisError::QuotaExceeded(_))));
        assert!(speech.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_voice_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let voice = VoiceConfig {
            voice_id: " ".into(),
            ..VoiceConfig::default()
        };
        let synth = Synthesizer::new(service(None), voice, settings(0));
        let result = synth.synthesize("Hello.", &dir.path().join("n.wav")).await;
        assert!(matches!(result, Err(SynthesisError::InvalidVoice(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_piper_run_leaves_no_scratch_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("piper");
        std::fs::write(
            &program,
            "#!/bin/sh\nwhile [ \"$#\" -gt 0 ]; do\n  if [ \"$1\" = \"--output_file\" ]; then echo partial > \"$2\"; fi\n  shift\ndone\ncat > /dev/null\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        let model = dir.path().join("voice.onnx");
        std::fs::write(&model, b"model").unwrap();
        let scratch = dir.path().join("scratch");

        let piper = PiperSpeech::with_program(&program, &scratch);
        let voice = VoiceConfig {
            voice_id: model.to_string_lossy().to_string(),
            ..VoiceConfig::default()
        };
        let result = piper.synthesize("Hello there.", &voice).await;

        assert!(matches!(result, Err(SynthesisError::Engine(_))));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }
}
