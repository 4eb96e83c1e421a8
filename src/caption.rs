use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::compose::ComposedVideo;
use crate::error::{CaptionError, CaptionServiceError};
use crate::media::MediaTool;
use crate::retry::RetryPolicy;
use crate::segment::{SegmentPlan, frame_grid, plan_segments, poll_timeout};

#[derive(Debug, Clone)]
pub struct CaptionStyle {
    pub template_id: String,
    pub language: String,
    pub auto_approve: bool,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            template_id: "6255949c-4a52-4255-8a67-39ebccfaa3ef".to_string(),
            language: "en".to_string(),
            auto_approve: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptionStatus {
    Processing,
    Done { output: String },
    Failed { reason: String },
}

/// Remote captioning collaborator: submit a clip, poll its job, fetch the
/// captioned result.
#[async_trait]
pub trait CaptionService: Send + Sync {
    async fn submit(&self, segment: &Path, style: &CaptionStyle) -> Result<String, CaptionServiceError>;
    async fn status(&self, job_id: &str) -> Result<CaptionStatus, CaptionServiceError>;
    async fn download(&self, output: &str, dest: &Path) -> Result<(), CaptionServiceError>;
}

#[derive(Debug, Clone)]
pub struct CaptionJobHandle {
    pub job_id: String,
    pub submitted_at: Instant,
    pub expected_within: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    Submitted,
    Polling,
    Captioned,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct CaptionSettings {
    /// Videos up to this many seconds are captioned whole.
    pub long_video_threshold: f64,
    pub target_segment: f64,
    pub max_in_flight: usize,
    pub poll_interval: Duration,
    pub timeout_floor: Duration,
    /// Extra poll budget per second of segment.
    pub timeout_per_second: f64,
    /// Fresh submissions allowed after a segment times out.
    pub timeout_resubmissions: u32,
    pub request_retry: RetryPolicy,
    pub style: CaptionStyle,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            long_video_threshold: 300.0,
            target_segment: 180.0,
            max_in_flight: 2,
            poll_interval: Duration::from_secs(2),
            timeout_floor: Duration::from_secs(120),
            timeout_per_second: 3.0,
            timeout_resubmissions: 2,
            request_retry: RetryPolicy::new(2, Duration::from_secs(2), Duration::from_secs(30)),
            style: CaptionStyle::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionOutcome {
    pub path: PathBuf,
    /// Segments sent to the service; zero when captioning is disabled.
    pub segments: usize,
}

pub struct CaptionEngine {
    service: Option<Arc<dyn CaptionService>>,
    media: Arc<dyn MediaTool>,
    settings: Arc<CaptionSettings>,
}

impl CaptionEngine {
    pub fn new(
        service: Arc<dyn CaptionService>,
        media: Arc<dyn MediaTool>,
        settings: CaptionSettings,
    ) -> Self {
        Self {
            service: Some(service),
            media,
            settings: Arc::new(settings),
        }
    }

    /// Engine without a captioning capability: returns its input untouched.
    pub fn disabled(media: Arc<dyn MediaTool>) -> Self {
        Self {
            service: None,
            media,
            settings: Arc::new(CaptionSettings::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.service.is_some()
    }

    pub async fn caption(
        &self,
        composed: &ComposedVideo,
        workdir: &Path,
    ) -> Result<CaptionOutcome, CaptionError> {
        let Some(service) = self.service.clone() else {
            debug!("No captioning capability configured; passing video through");
            return Ok(CaptionOutcome {
                path: composed.path.clone(),
                segments: 0,
            });
        };

        let segment_dir = workdir.join("segments");
        tokio::fs::create_dir_all(&segment_dir)
            .await
            .map_err(|source| CaptionError::Io {
                source,
                path: segment_dir.clone(),
            })?;
        let result = self.caption_pass(service, composed, workdir, &segment_dir).await;
        if let Err(err) = tokio::fs::remove_dir_all(&segment_dir).await {
            warn!(path = %segment_dir.display(), error = %err, "failed to remove segment directory");
        }
        result
    }

    async fn caption_pass(
        &self,
        service: Arc<dyn CaptionService>,
        composed: &ComposedVideo,
        workdir: &Path,
        segment_dir: &Path,
    ) -> Result<CaptionOutcome, CaptionError> {
        let info = self
            .media
            .probe(&composed.path)
            .await
            .map_err(CaptionError::Probe)?;
        let total = if info.duration > 0.0 {
            info.duration
        } else {
            composed.duration
        };
        let plans = plan_segments(
            total,
            info.fps,
            self.settings.long_video_threshold,
            self.settings.target_segment,
        );
        info!(
            "Captioning {:.2}s video in {} segment(s), at most {} in flight",
            total,
            plans.len(),
            self.settings.max_in_flight
        );

        let inputs = self.split(composed, &plans, segment_dir).await?;
        let captioned = self.run_segments(service, &plans, inputs, segment_dir).await?;

        let output = workdir.join("captioned.mp4");
        if captioned.len() == 1 {
            tokio::fs::rename(&captioned[0], &output)
                .await
                .map_err(|source| CaptionError::Io {
                    source,
                    path: output.clone(),
                })?;
        } else {
            self.media
                .concat(&captioned, &output)
                .await
                .map_err(CaptionError::Reassembly)?;
        }

        let result = self
            .media
            .probe(&output)
            .await
            .map_err(CaptionError::Reassembly)?;
        let tolerance = 1.0 / frame_grid(info.fps) + 1e-3;
        if (result.duration - total).abs() > tolerance {
            return Err(CaptionError::Drift {
                expected: total,
                actual: result.duration,
            });
        }
        info!("Captioned video reassembled at {}", output.display());
        Ok(CaptionOutcome {
            path: output,
            segments: plans.len(),
        })
    }

    /// Cuts the composed video along the plan. A single-segment plan reuses
    /// the composed file as is.
    async fn split(
        &self,
        composed: &ComposedVideo,
        plans: &[SegmentPlan],
        segment_dir: &Path,
    ) -> Result<Vec<PathBuf>, CaptionError> {
        if plans.len() <= 1 {
            return Ok(vec![composed.path.clone()]);
        }
        let mut inputs = Vec::with_capacity(plans.len());
        for plan in plans {
            let path = segment_dir.join(format!("segment_{:03}.mp4", plan.index));
            debug!(
                segment = plan.index,
                start = plan.span.start,
                duration = plan.span.duration,
                "cutting segment"
            );
            self.media
                .cut(&composed.path, plan.span, &path)
                .await
                .map_err(|source| CaptionError::Split {
                    index: plan.index,
                    source,
                })?;
            inputs.push(path);
        }
        Ok(inputs)
    }

    async fn run_segments(
        &self,
        service: Arc<dyn CaptionService>,
        plans: &[SegmentPlan],
        inputs: Vec<PathBuf>,
        segment_dir: &Path,
    ) -> Result<Vec<PathBuf>, CaptionError> {
        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        let mut workers = JoinSet::new();
        let mut task_index = HashMap::new();

        for (plan, input) in plans.iter().zip(inputs) {
            let worker = SegmentWorker {
                index: plan.index,
                service: service.clone(),
                settings: self.settings.clone(),
                state: SegmentState::Pending,
            };
            let permits = permits.clone();
            let duration = plan.span.duration;
            let dest = segment_dir.join(format!("captioned_{:03}.mp4", plan.index));
            let index = plan.index;
            let handle = workers.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| CaptionServiceError::Unavailable("worker pool closed".into()))?;
                worker.run(&input, duration, &dest).await
            });
            task_index.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<PathBuf>> = vec![None; plans.len()];
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((id, Ok(path))) => {
                    if let Some(&index) = task_index.get(&id) {
                        slots[index] = Some(path);
                    }
                }
                Ok((id, Err(source))) => {
                    let index = task_index.get(&id).copied().unwrap_or_default();
                    workers.shutdown().await;
                    return Err(CaptionError::Segment { index, source });
                }
                Err(err) => {
                    let index = task_index.get(&err.id()).copied().unwrap_or_default();
                    workers.shutdown().await;
                    return Err(CaptionError::Worker {
                        index,
                        reason: err.to_string(),
                    });
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| CaptionError::Worker {
                    index,
                    reason: "segment produced no output".into(),
                })
            })
            .collect()
    }
}

struct SegmentWorker {
    index: usize,
    service: Arc<dyn CaptionService>,
    settings: Arc<CaptionSettings>,
    state: SegmentState,
}

impl SegmentWorker {
    fn advance(&mut self, next: SegmentState) {
        debug!(segment = self.index, from = ?self.state, to = ?next, "segment state");
        self.state = next;
    }

    async fn run(
        mut self,
        input: &Path,
        duration: f64,
        dest: &Path,
    ) -> Result<PathBuf, CaptionServiceError> {
        let budget = poll_timeout(
            duration,
            self.settings.timeout_floor,
            self.settings.timeout_per_second,
        );
        let mut timeouts = 0u32;
        loop {
            let label = format!("caption submit segment {}", self.index);
            let submitted = self
                .settings
                .request_retry
                .run(&label, || self.service.submit(input, &self.settings.style))
                .await;
            let job_id = match submitted {
                Ok(id) => id,
                Err(err) => {
                    self.advance(SegmentState::Failed);
                    return Err(err);
                }
            };
            let handle = CaptionJobHandle {
                job_id,
                submitted_at: Instant::now(),
                expected_within: budget,
            };
            self.advance(SegmentState::Submitted);
            info!(segment = self.index, job = %handle.job_id, budget = ?budget, "segment submitted");

            self.advance(SegmentState::Polling);
            match timeout(handle.expected_within, self.poll(&handle)).await {
                Ok(Ok(output)) => {
                    let label = format!("caption download segment {}", self.index);
                    let downloaded = self
                        .settings
                        .request_retry
                        .run(&label, || self.service.download(&output, dest))
                        .await;
                    if let Err(err) = downloaded {
                        self.advance(SegmentState::Failed);
                        return Err(err);
                    }
                    self.advance(SegmentState::Captioned);
                    info!(
                        segment = self.index,
                        elapsed = ?handle.submitted_at.elapsed(),
                        "segment captioned"
                    );
                    return Ok(dest.to_path_buf());
                }
                Ok(Err(err)) => {
                    self.advance(SegmentState::Failed);
                    return Err(err);
                }
                Err(_) => {
                    self.advance(SegmentState::TimedOut);
                    timeouts += 1;
                    if timeouts > self.settings.timeout_resubmissions {
                        self.advance(SegmentState::Failed);
                        return Err(CaptionServiceError::TimedOut(budget));
                    }
                    warn!(
                        segment = self.index,
                        attempt = timeouts,
                        "segment timed out; submitting again"
                    );
                }
            }
        }
    }

    async fn poll(&self, handle: &CaptionJobHandle) -> Result<String, CaptionServiceError> {
        loop {
            match self.service.status(&handle.job_id).await {
                Ok(CaptionStatus::Done { output }) => return Ok(output),
                Ok(CaptionStatus::Failed { reason }) => {
                    return Err(CaptionServiceError::JobFailed(reason));
                }
                Ok(CaptionStatus::Processing) => {}
                Err(err) if err.is_transient() => {
                    warn!(segment = self.index, error = %err, "status check failed; polling again");
                }
                Err(err) => return Err(err),
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}
