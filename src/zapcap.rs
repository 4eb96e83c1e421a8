use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::caption::{CaptionService, CaptionStatus, CaptionStyle};
use crate::error::CaptionServiceError;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskRequest<'a> {
    template_id: &'a str,
    auto_approve: bool,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskState {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Floor for moving a whole segment in either direction.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Hosted caption burner. Job ids have the form `<video id>/<task id>`.
pub struct ZapCap {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    /// Task creation and status checks.
    request_timeout: Duration,
    /// Segment upload and captioned download.
    transfer_timeout: Duration,
}

impl ZapCap {
    pub fn new(api_key: impl Into<String>, request_timeout: Duration) -> Result<Self, CaptionServiceError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: "https://api.zapcap.ai".to_string(),
            request_timeout,
            transfer_timeout: request_timeout.max(TRANSFER_TIMEOUT),
        })
    }

    fn upload_request(&self, form: Form) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/videos", self.base_url))
            .header("x-api-key", &self.api_key)
            .timeout(self.transfer_timeout)
            .multipart(form)
    }

    fn task_request(&self, video_id: &str, request: &TaskRequest<'_>) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/videos/{}/task", self.base_url, video_id))
            .header("x-api-key", &self.api_key)
            .timeout(self.request_timeout)
            .json(request)
    }

    fn status_request(&self, video_id: &str, task_id: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/videos/{}/task/{}", self.base_url, video_id, task_id))
            .header("x-api-key", &self.api_key)
            .timeout(self.request_timeout)
    }

    fn download_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.get(url).timeout(self.transfer_timeout)
    }

    async fn upload(&self, segment: &Path) -> Result<String, CaptionServiceError> {
        let bytes = tokio::fs::read(segment)
            .await
            .map_err(|source| CaptionServiceError::Io {
                source,
                path: segment.to_path_buf(),
            })?;
        let name = segment
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "segment.mp4".to_string());
        let part = Part::bytes(bytes)
            .file_name(name)
            .mime_str("video/mp4")
            .map_err(|err| CaptionServiceError::InvalidMedia(err.to_string()))?;
        let response = self
            .upload_request(Form::new().part("file", part))
            .send()
            .await?;
        let uploaded: UploadResponse = check(response).await?.json().await?;
        debug!("Uploaded {} as video {}", segment.display(), uploaded.id);
        Ok(uploaded.id)
    }
}

/// Maps an unsuccessful response onto the service error taxonomy.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, CaptionServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(classify(status, detail))
}

fn classify(status: StatusCode, detail: String) -> CaptionServiceError {
    match status {
        StatusCode::PAYMENT_REQUIRED | StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            CaptionServiceError::QuotaExceeded(detail)
        }
        StatusCode::PAYLOAD_TOO_LARGE => CaptionServiceError::UnsupportedDuration(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::UNSUPPORTED_MEDIA_TYPE
            if detail.to_lowercase().contains("duration") =>
        {
            CaptionServiceError::UnsupportedDuration(detail)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::UNSUPPORTED_MEDIA_TYPE => {
            CaptionServiceError::InvalidMedia(detail)
        }
        other => CaptionServiceError::Unavailable(format!("{other}: {detail}")),
    }
}

fn interpret(state: TaskState) -> CaptionStatus {
    match state.status.as_deref() {
        Some("completed") => match state.download_url {
            Some(url) => CaptionStatus::Done { output: url },
            None => CaptionStatus::Failed {
                reason: "task completed without a download url".into(),
            },
        },
        Some("failed") => CaptionStatus::Failed {
            reason: state.error.unwrap_or_else(|| "unknown error".into()),
        },
        _ => CaptionStatus::Processing,
    }
}

#[async_trait]
impl CaptionService for ZapCap {
    async fn submit(&self, segment: &Path, style: &CaptionStyle) -> Result<String, CaptionServiceError> {
        let video_id = self.upload(segment).await?;
        let request = TaskRequest {
            template_id: &style.template_id,
            auto_approve: style.auto_approve,
            language: &style.language,
        };
        let response = self.task_request(&video_id, &request).send().await?;
        let task: TaskResponse = check(response).await?.json().await?;
        info!("Caption task {} created for video {}", task.task_id, video_id);
        Ok(format!("{}/{}", video_id, task.task_id))
    }

    async fn status(&self, job_id: &str) -> Result<CaptionStatus, CaptionServiceError> {
        let (video_id, task_id) = job_id
            .split_once('/')
            .ok_or_else(|| CaptionServiceError::JobFailed(format!("malformed job id {job_id}")))?;
        let response = self.status_request(video_id, task_id).send().await?;
        let state: TaskState = check(response).await?.json().await?;
        debug!("Caption task {} status {:?}", job_id, state.status);
        Ok(interpret(state))
    }

    async fn download(&self, output: &str, dest: &Path) -> Result<(), CaptionServiceError> {
        let response = self.download_request(output).send().await?;
        let mut stream = check(response).await?.bytes_stream();
        let io_err = |source| CaptionServiceError::Io {
            source,
            path: dest.to_path_buf(),
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        Ok(())
    }
}
