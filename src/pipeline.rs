use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span, warn};

use crate::caption::CaptionEngine;
use crate::compose::Composer;
use crate::config::{PipelineConfig, SpeechEngine};
use crate::error::{ConfigurationError, PipelineError, PipelineResult};
use crate::job::{Job, JobStatus, Stage};
use crate::llm::{OpenAiClient, TextService};
use crate::media::MediaTool;
use crate::metadata::{GeneratedTags, MetadataGenerator};
use crate::output::{OutputArtifact, Publisher};
use crate::reddit::{ContentSource, RedditSource};
use crate::retry::RetryPolicy;
use crate::text::{Normalizer, SpokenRewriter};
use crate::tts::{ElevenLabsSpeech, PiperSpeech, SpeechService, Synthesizer};
use crate::zapcap::ZapCap;

/// The stage implementations one orchestrator drives.
pub struct Stages {
    pub source: Arc<dyn ContentSource>,
    pub normalizer: Normalizer,
    pub synthesizer: Synthesizer,
    pub composer: Composer,
    pub captions: CaptionEngine,
    pub metadata: MetadataGenerator,
    pub publisher: Publisher,
}

impl Stages {
    /// Wires the production collaborators. Optional capabilities fall back to
    /// their local defaults when disabled or when no credential is present.
    pub fn from_config(config: &PipelineConfig, media: Arc<dyn MediaTool>) -> Result<Self, ConfigurationError> {
        let source = RedditSource::new(config.request_timeout).map_err(|e| client_error("reddit", e))?;

        let text_service: Option<Arc<dyn TextService>> = match &config.credentials.openai {
            Some(key) if config.credentials.has_text_service() && (config.rewrite || config.metadata) => {
                let client = OpenAiClient::new(key.clone(), config.text_model.clone(), config.request_timeout)
                    .map_err(|e| client_error("text", e))?;
                let service: Arc<dyn TextService> = Arc::new(client);
                Some(service)
            }
            _ => None,
        };
        let normalizer = match (&text_service, config.rewrite) {
            (Some(service), true) => Normalizer::new(Arc::new(SpokenRewriter::new(service.clone()))),
            _ => Normalizer::local(),
        };
        let metadata = match (&text_service, config.metadata) {
            (Some(service), true) => MetadataGenerator::new(Arc::new(GeneratedTags::new(service.clone()))),
            _ => MetadataGenerator::fixed(),
        };

        let speech: Arc<dyn SpeechService> = match config.speech_engine {
            SpeechEngine::ElevenLabs => {
                let key = config
                    .credentials
                    .elevenlabs
                    .clone()
                    .ok_or(ConfigurationError::MissingCredential("ELEVENLABS_API_KEY"))?;
                Arc::new(ElevenLabsSpeech::new(key).map_err(|e| client_error("speech", e))?)
            }
            SpeechEngine::Piper => Arc::new(PiperSpeech::new(config.work_root.clone())),
        };
        let synthesizer = Synthesizer::new(speech, config.voice.clone(), config.synthesis_settings());

        let captions = if config.captions {
            let key = config
                .credentials
                .zapcap
                .clone()
                .ok_or(ConfigurationError::MissingCredential("ZAPCAP_API_KEY"))?;
            let service = ZapCap::new(key, config.request_timeout).map_err(|e| client_error("caption", e))?;
            CaptionEngine::new(Arc::new(service), media.clone(), config.caption.clone())
        } else {
            CaptionEngine::disabled(media.clone())
        };

        Ok(Self {
            source: Arc::new(source),
            normalizer,
            synthesizer,
            composer: Composer::new(media, config.background.clone()),
            captions,
            metadata,
            publisher: Publisher::new(config.output_dir.clone()),
        })
    }
}

fn client_error(name: &'static str, err: impl std::fmt::Display) -> ConfigurationError {
    ConfigurationError::Client {
        name,
        reason: err.to_string(),
    }
}

/// Terminal summary of one submitted URL.
#[derive(Debug)]
pub struct JobReport {
    pub job: Job,
    /// Runs of the whole job, including whole-job retries.
    pub attempts: u32,
    pub outcome: PipelineResult<OutputArtifact>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.job.status == JobStatus::Succeeded && self.outcome.is_ok()
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.job.failure.as_ref().map(|f| f.stage)
    }
}

pub struct Orchestrator {
    config: PipelineConfig,
    stages: Stages,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, stages: Stages) -> Self {
        Self { config, stages }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one URL to a terminal state. Transient failures rerun the whole
    /// job up to `job_retries` times; every run starts from a fresh working
    /// directory.
    pub async fn run(&self, url: &str, cancel: watch::Receiver<bool>) -> JobReport {
        let backoff = RetryPolicy::new(
            self.config.job_retries,
            self.config.job_retry_delay,
            Duration::from_secs(60),
        );
        let mut attempt = 0;
        loop {
            let mut report = self.run_once(url, cancel.clone()).await;
            report.attempts = attempt + 1;
            let retry = match &report.outcome {
                Err(err) => err.is_transient() && attempt < self.config.job_retries && !*cancel.borrow(),
                Ok(_) => false,
            };
            if !retry {
                return report;
            }
            let delay = backoff.compute_delay(attempt);
            warn!(
                job = %report.job.id,
                attempt = attempt + 1,
                wait = ?delay,
                "job failed with a transient error; starting over"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn run_once(&self, url: &str, mut cancel: watch::Receiver<bool>) -> JobReport {
        let mut job = Job::new(url, &self.config.work_root);
        let span = info_span!("job", id = %job.id);
        let outcome = self.drive(&mut job, &mut cancel).instrument(span).await;
        match &outcome {
            Ok(artifact) => {
                job.succeed();
                info!(job = %job.id, output = %artifact.video.display(), "job succeeded");
            }
            Err(err) => {
                let stage = match err {
                    PipelineError::Cancelled(stage) => *stage,
                    _ => job.stage,
                };
                job.fail(stage, err.to_string());
                error!(job = %job.id, %stage, error = %err, "job failed");
            }
        }
        job.cleanup().await;
        JobReport {
            job,
            attempts: 1,
            outcome,
        }
    }

    async fn drive(&self, job: &mut Job, cancel: &mut watch::Receiver<bool>) -> PipelineResult<OutputArtifact> {
        let stages = &self.stages;
        info!(url = %job.source_url, "job started");

        job.enter(Stage::Preflight);
        self.config.validate()?;
        let background = stages.composer.background();
        if !tokio::fs::try_exists(background).await.unwrap_or(false) {
            return Err(ConfigurationError::MissingBackground(background.to_path_buf()).into());
        }
        tokio::fs::create_dir_all(&job.workdir)
            .await
            .map_err(|source| PipelineError::Workspace {
                source,
                path: job.workdir.clone(),
            })?;

        job.enter(Stage::Fetch);
        let url = job.source_url.clone();
        let payload = guarded(Stage::Fetch, cancel, async {
            self.config
                .fetch_retry
                .run("fetch post", || stages.source.fetch(&url))
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        job.enter(Stage::Normalize);
        let narration = guarded(Stage::Normalize, cancel, async {
            Ok::<_, PipelineError>(stages.normalizer.normalize(&payload).await)
        })
        .await?;
        if narration.trim().is_empty() {
            return Err(PipelineError::EmptyNarration);
        }
        info!("Narration text ready ({} chars)", narration.chars().count());

        job.enter(Stage::Synthesize);
        let audio_path = job.workdir.join("narration.wav");
        job.track(&audio_path, Stage::Synthesize);
        let audio = guarded(Stage::Synthesize, cancel, async {
            stages
                .synthesizer
                .synthesize(&narration, &audio_path)
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        job.enter(Stage::Compose);
        let composed_path = job.workdir.join("composed.mp4");
        job.track(&composed_path, Stage::Compose);
        let composed = guarded(Stage::Compose, cancel, async {
            stages
                .composer
                .compose(audio, &composed_path)
                .await
                .map_err(PipelineError::from)
        })
        .await;
        // The composer deletes the narration whether or not muxing worked.
        job.release(&audio_path);
        let composed = composed?;

        job.enter(Stage::Caption);
        let captioned = guarded(Stage::Caption, cancel, async {
            stages
                .captions
                .caption(&composed, &job.workdir)
                .await
                .map_err(PipelineError::from)
        })
        .await?;
        if captioned.path != composed.path {
            job.track(&captioned.path, Stage::Caption);
            if let Err(err) = tokio::fs::remove_file(&composed.path).await {
                warn!(path = %composed.path.display(), error = %err, "failed to remove composed video");
            }
            job.release(&composed.path);
        }
        if captioned.segments > 0 {
            info!("Captions burned in across {} segment(s)", captioned.segments);
        }

        job.enter(Stage::Metadata);
        let metadata = guarded(Stage::Metadata, cancel, async {
            Ok::<_, PipelineError>(stages.metadata.generate(&payload).await)
        })
        .await?;

        // Publishing is not interruptible; a half-moved artifact would be worse
        // than finishing the move.
        job.enter(Stage::Publish);
        let artifact = stages.publisher.publish(&captioned.path, &metadata).await?;
        job.release(&captioned.path);
        Ok(artifact)
    }
}

/// Runs `work` unless the job is cancelled first. A dropped sender means
/// nobody can cancel any more.
async fn guarded<T, F>(stage: Stage, cancel: &mut watch::Receiver<bool>, work: F) -> PipelineResult<T>
where
    F: Future<Output = PipelineResult<T>>,
{
    if *cancel.borrow() {
        return Err(PipelineError::Cancelled(stage));
    }
    tokio::select! {
        result = work => result,
        _ = cancelled(cancel) => {
            warn!(%stage, "cancellation requested; abandoning stage");
            Err(PipelineError::Cancelled(stage))
        }
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
