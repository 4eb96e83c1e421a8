use std::path::PathBuf;
use std::time::Duration;

use crate::caption::CaptionSettings;
use crate::error::ConfigurationError;
use crate::retry::RetryPolicy;
use crate::tts::{SynthesisSettings, VoiceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEngine {
    /// Hosted speech API; needs `ELEVENLABS_API_KEY`.
    ElevenLabs,
    /// Local piper binary; the voice id is the model path.
    Piper,
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub elevenlabs: Option<String>,
    pub openai: Option<String>,
    pub zapcap: Option<String>,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl Credentials {
    pub fn has_text_service(&self) -> bool {
        present(&self.openai)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_root: PathBuf,
    pub output_dir: PathBuf,
    pub background: PathBuf,
    pub speech_engine: SpeechEngine,
    pub voice: VoiceConfig,
    pub credentials: Credentials,
    pub text_model: String,
    pub rewrite: bool,
    pub captions: bool,
    pub metadata: bool,
    /// Per-request timeout for fetch, text, speech and caption calls.
    pub request_timeout: Duration,
    pub fetch_retry: RetryPolicy,
    pub speech_chars: usize,
    pub speech_interval: Duration,
    pub speech_retry: RetryPolicy,
    pub caption: CaptionSettings,
    /// Whole-job reruns after a transient failure.
    pub job_retries: u32,
    pub job_retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("storyreel_tmp"),
            output_dir: PathBuf::from("output"),
            background: PathBuf::from("./res/bg.mp4"),
            speech_engine: SpeechEngine::ElevenLabs,
            voice: VoiceConfig::default(),
            credentials: Credentials::default(),
            text_model: "gpt-4".to_string(),
            rewrite: true,
            captions: true,
            metadata: true,
            request_timeout: Duration::from_secs(60),
            fetch_retry: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)),
            speech_chars: 5000,
            speech_interval: Duration::from_millis(150),
            speech_retry: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(20)),
            caption: CaptionSettings::default(),
            job_retries: 0,
            job_retry_delay: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    pub fn synthesis_settings(&self) -> SynthesisSettings {
        SynthesisSettings {
            max_request_chars: self.speech_chars,
            request_interval: self.speech_interval,
            request_timeout: self.request_timeout,
            retry: self.speech_retry.clone(),
        }
    }

    /// Rejects settings no job could run with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |name, reason: &str| {
            Err(ConfigurationError::Invalid {
                name,
                reason: reason.to_string(),
            })
        };
        let caption = &self.caption;
        if !(caption.long_video_threshold > 0.0) {
            return invalid("long_video_threshold", "must be positive");
        }
        if !(caption.target_segment > 0.0) {
            return invalid("target_segment", "must be positive");
        }
        if caption.target_segment > caption.long_video_threshold {
            return invalid("target_segment", "must not exceed the long-video threshold");
        }
        if caption.max_in_flight == 0 {
            return invalid("max_in_flight", "at least one segment job must be allowed");
        }
        if caption.poll_interval.is_zero() {
            return invalid("poll_interval", "must be positive");
        }
        if !caption.timeout_per_second.is_finite() || caption.timeout_per_second < 0.0 {
            return invalid("timeout_per_second", "must be a non-negative number");
        }
        if self.speech_chars < 50 {
            return invalid("speech_chars", "must allow at least 50 characters per request");
        }
        if self.request_timeout.is_zero() {
            return invalid("request_timeout", "must be positive");
        }
        if self.voice.voice_id.trim().is_empty() {
            return invalid("voice", "must not be empty");
        }
        Ok(())
    }

    /// Credentials the selected capabilities cannot run without.
    pub fn check_credentials(&self) -> Result<(), ConfigurationError> {
        if self.speech_engine == SpeechEngine::ElevenLabs && !present(&self.credentials.elevenlabs) {
            return Err(ConfigurationError::MissingCredential("ELEVENLABS_API_KEY"));
        }
        if self.captions && !present(&self.credentials.zapcap) {
            return Err(ConfigurationError::MissingCredential("ZAPCAP_API_KEY"));
        }
        Ok(())
    }

    /// Full startup check: settings, credentials and local inputs.
    pub fn preflight(&self) -> Result<(), ConfigurationError> {
        self.validate()?;
        self.check_credentials()?;
        if !self.background.is_file() {
            return Err(ConfigurationError::MissingBackground(self.background.clone()));
        }
        if self.speech_engine == SpeechEngine::Piper && !PathBuf::from(&self.voice.voice_id).is_file() {
            return Err(ConfigurationError::Invalid {
                name: "piper_model",
                reason: format!("model {} not found", self.voice.voice_id),
            });
        }
        Ok(())
    }
}
