use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::TextServiceError;
use crate::llm::{Completion, TextService};
use crate::reddit::ContentPayload;

/// Upper bound on hashtags, mandatory ones included.
pub const MAX_TAGS: usize = 10;
pub const MANDATORY_TAGS: [&str; 2] = ["reddit", "redditstory"];
const FALLBACK_TAGS: [&str; 2] = ["storytime", "storytelling"];
const TITLE_LIMIT: usize = 95;
const DESCRIPTION_LIMIT: usize = 2200;
const DEFAULT_DESCRIPTION: &str = "A story from Reddit.";

const TAG_SYSTEM: &str = "You write hashtags for short vertical story videos.";

/// Everything published next to the video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub title: String,
    pub description: String,
    pub hashtags: Vec<String>,
}

impl Metadata {
    pub fn hashtag_line(&self) -> String {
        self.hashtags
            .iter()
            .map(|t| format!("#{t}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Sidecar text: title, description and hashtag line, each separated by
    /// a blank line. The description is cut so the whole post fits the
    /// upload limit.
    pub fn sidecar(&self) -> String {
        let tags = self.hashtag_line();
        let room = DESCRIPTION_LIMIT.saturating_sub(tags.chars().count() + 5);
        let description = if self.description.chars().count() > room {
            let cut: String = self.description.chars().take(room).collect();
            format!("{}...", cut.trim_end())
        } else {
            self.description.clone()
        };
        format!("{}\n\n{}\n\n{}\n", self.title, description, tags)
    }
}

/// Produces raw hashtag suggestions for a post.
#[async_trait]
pub trait TagSource: Send + Sync {
    async fn suggest(&self, payload: &ContentPayload) -> Result<Vec<String>, TextServiceError>;
}

/// Always-available source: suggests nothing, so the fallback set applies.
pub struct FixedTags;

#[async_trait]
impl TagSource for FixedTags {
    async fn suggest(&self, _payload: &ContentPayload) -> Result<Vec<String>, TextServiceError> {
        Ok(Vec::new())
    }
}

pub struct GeneratedTags {
    service: Arc<dyn TextService>,
}

impl GeneratedTags {
    pub fn new(service: Arc<dyn TextService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TagSource for GeneratedTags {
    async fn suggest(&self, payload: &ContentPayload) -> Result<Vec<String>, TextServiceError> {
        let excerpt: String = payload.body.chars().take(1500).collect();
        let prompt = format!(
            "Suggest {} relevant hashtags for a narrated video of this post.\n\
             Return them on one line separated by spaces, without explanations.\n\n\
             Title: {}\n\n{}",
            MAX_TAGS - MANDATORY_TAGS.len(),
            payload.title,
            excerpt
        );
        let reply = self
            .service
            .complete(Completion {
                system: TAG_SYSTEM,
                prompt: &prompt,
                max_tokens: 100,
            })
            .await?;
        Ok(reply.split_whitespace().map(String::from).collect())
    }
}

pub struct MetadataGenerator {
    source: Arc<dyn TagSource>,
}

impl MetadataGenerator {
    pub fn new(source: Arc<dyn TagSource>) -> Self {
        Self { source }
    }

    pub fn fixed() -> Self {
        Self::new(Arc::new(FixedTags))
    }

    /// Never fails: a broken or empty suggestion falls back to the fixed set.
    pub async fn generate(&self, payload: &ContentPayload) -> Metadata {
        let suggested = match self.source.suggest(payload).await {
            Ok(tags) => tags,
            Err(err) => {
                warn!(error = %err, "Hashtag generation unavailable; using fallback tags");
                Vec::new()
            }
        };
        let hashtags = bound_tags(&suggested, payload.subreddit.as_deref());
        info!("Hashtags: {}", hashtags.join(" "));
        Metadata {
            title: truncate_title(&payload.title),
            description: describe(payload),
            hashtags,
        }
    }
}

/// Lowercase alphanumerics only; `#Story-Time!` becomes `storytime`.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    (!tag.is_empty()).then_some(tag)
}

/// Dedupes suggestions, keeps room for the mandatory tags and appends them.
pub fn bound_tags(suggested: &[String], subreddit: Option<&str>) -> Vec<String> {
    let room = MAX_TAGS - MANDATORY_TAGS.len();
    let mut tags: Vec<String> = Vec::new();
    let push = |tags: &mut Vec<String>, raw: &str| {
        if let Some(tag) = normalize_tag(raw) {
            if tags.len() < room
                && !tags.contains(&tag)
                && !MANDATORY_TAGS.contains(&tag.as_str())
            {
                tags.push(tag);
            }
        }
    };
    for raw in suggested {
        push(&mut tags, raw);
    }
    if tags.is_empty() {
        for raw in FALLBACK_TAGS.iter().copied().chain(subreddit) {
            push(&mut tags, raw);
        }
    }
    tags.extend(MANDATORY_TAGS.iter().map(|t| t.to_string()));
    tags
}

fn truncate_title(title: &str) -> String {
    let title = title.trim();
    if title.chars().count() <= TITLE_LIMIT {
        return title.to_string();
    }
    let cut: String = title.chars().take(TITLE_LIMIT - 3).collect();
    format!("{}...", cut.trim_end())
}

fn describe(payload: &ContentPayload) -> String {
    let line = match payload.subreddit.as_deref() {
        Some(sub) if !sub.is_empty() => format!("{} (r/{})", payload.title.trim(), sub),
        _ if !payload.title.trim().is_empty() => payload.title.trim().to_string(),
        _ => DEFAULT_DESCRIPTION.to_string(),
    };
    match payload.permalink.as_deref() {
        Some(link) => format!("{line}\nSource: {link}"),
        None => line,
    }
}
