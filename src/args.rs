use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::caption::{CaptionSettings, CaptionStyle};
use crate::config::{Credentials, PipelineConfig, SpeechEngine};
use crate::retry::RetryPolicy;
use crate::tts::VoiceConfig;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineArg {
    Elevenlabs,
    Piper,
}

/// Turn a Reddit post into a narrated, captioned vertical video.
#[derive(Parser, Debug)]
#[clap(version)]
pub struct Args {
    /// Post URL.
    pub url: String,

    #[clap(long, default_value = "./res/bg.mp4")]
    pub background: PathBuf,

    #[clap(long, default_value = "output")]
    pub out_dir: PathBuf,

    #[clap(long, default_value = "storyreel_tmp")]
    pub work_dir: PathBuf,

    #[clap(long, value_enum, default_value_t = EngineArg::Elevenlabs)]
    pub speech_engine: EngineArg,

    /// Hosted voice id.
    #[clap(long, default_value = "JBFqnCBsd6RMkjVDRZzb")]
    pub voice: String,

    #[clap(long, default_value = "./tts/en_US-hfc_male-medium.onnx")]
    pub piper_model: String,

    #[clap(long, default_value_t = 5000)]
    pub chunk_chars: usize,

    /// Pause between speech requests, in milliseconds.
    #[clap(long, default_value_t = 150)]
    pub speech_interval_ms: u64,

    #[clap(long, default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Videos longer than this many seconds are captioned in segments.
    #[clap(long, default_value_t = 300.0)]
    pub long_video_secs: f64,

    #[clap(long, default_value_t = 180.0)]
    pub segment_secs: f64,

    #[clap(long, default_value_t = 2)]
    pub max_in_flight: usize,

    #[clap(long, default_value_t = 120)]
    pub caption_timeout_floor_secs: u64,

    #[clap(long, default_value_t = 3.0)]
    pub caption_timeout_per_sec: f64,

    #[clap(long, default_value_t = 2)]
    pub caption_resubmissions: u32,

    #[clap(long, default_value = "6255949c-4a52-4255-8a67-39ebccfaa3ef")]
    pub caption_template: String,

    #[clap(long, default_value = "en")]
    pub caption_language: String,

    #[clap(long, default_value_t = 2)]
    pub retries: u32,

    /// Whole-job reruns after a transient failure.
    #[clap(long, default_value_t = 0)]
    pub job_retries: u32,

    #[clap(long, default_value = "gpt-4")]
    pub text_model: String,

    #[clap(long)]
    pub no_rewrite: bool,

    #[clap(long)]
    pub no_captions: bool,

    #[clap(long)]
    pub no_metadata: bool,

    #[clap(long, env = "ELEVENLABS_API_KEY", hide_env_values = true)]
    pub elevenlabs_api_key: Option<String>,

    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[clap(long, env = "ZAPCAP_API_KEY", hide_env_values = true)]
    pub zapcap_api_key: Option<String>,
}

impl Args {
    pub fn into_config(self) -> PipelineConfig {
        let base = PipelineConfig::default();
        let speech_engine = match self.speech_engine {
            EngineArg::Elevenlabs => SpeechEngine::ElevenLabs,
            EngineArg::Piper => SpeechEngine::Piper,
        };
        let voice = match speech_engine {
            SpeechEngine::ElevenLabs => VoiceConfig {
                voice_id: self.voice,
                ..VoiceConfig::default()
            },
            SpeechEngine::Piper => VoiceConfig {
                voice_id: self.piper_model,
                ..VoiceConfig::default()
            },
        };
        let backoff = |retries| RetryPolicy::new(retries, Duration::from_secs(1), Duration::from_secs(20));
        PipelineConfig {
            work_root: self.work_dir,
            output_dir: self.out_dir,
            background: self.background,
            speech_engine,
            voice,
            credentials: Credentials {
                elevenlabs: self.elevenlabs_api_key,
                openai: self.openai_api_key,
                zapcap: self.zapcap_api_key,
            },
            text_model: self.text_model,
            rewrite: !self.no_rewrite,
            captions: !self.no_captions,
            metadata: !self.no_metadata,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            fetch_retry: backoff(self.retries),
            speech_chars: self.chunk_chars,
            speech_interval: Duration::from_millis(self.speech_interval_ms),
            speech_retry: backoff(self.retries),
            caption: CaptionSettings {
                long_video_threshold: self.long_video_secs,
                target_segment: self.segment_secs,
                max_in_flight: self.max_in_flight,
                timeout_floor: Duration::from_secs(self.caption_timeout_floor_secs),
                timeout_per_second: self.caption_timeout_per_sec,
                timeout_resubmissions: self.caption_resubmissions,
                request_retry: backoff(self.retries),
                style: CaptionStyle {
                    template_id: self.caption_template,
                    language: self.caption_language,
                    ..CaptionStyle::default()
                },
                ..base.caption
            },
            job_retries: self.job_retries,
            ..base
        }
    }
}
