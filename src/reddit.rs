use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::error::FetchError;

#[derive(Debug, Deserialize)]
pub struct RedditListing {
    pub data: RedditListingData,
}

#[derive(Debug, Deserialize)]
pub struct RedditListingData {
    pub children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
pub struct RedditChild {
    pub data: RedditPost,
}

#[derive(Debug, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
}

/// Title and body of one post. The body is carried verbatim, never shortened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPayload {
    pub title: String,
    pub body: String,
    pub source_id: String,
    pub subreddit: Option<String>,
    pub author: Option<String>,
    /// Absolute link back to the post, when the listing carries one.
    pub permalink: Option<String>,
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ContentPayload, FetchError>;
}

pub struct RedditSource {
    client: reqwest::Client,
}

impl RedditSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentSource for RedditSource {
    async fn fetch(&self, url: &str) -> Result<ContentPayload, FetchError> {
        let json_url = json_url(url)?;
        info!("Fetching post from {}", json_url);
        let response = self
            .client
            .get(json_url.as_str())
            .header(USER_AGENT, "storyreel-rust/0.1")
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(FetchError::NotFound(url.to_string()));
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            _ => {}
        }
        let res = response.error_for_status()?.text().await?;
        let payload = parse_post(&res)?;
        info!(
            "Fetched post {} ({} chars of body)",
            payload.source_id,
            payload.body.chars().count()
        );
        Ok(payload)
    }
}

/// Rewrites a post link into its structured `.json` representation.
pub fn json_url(raw: &str) -> Result<Url, FetchError> {
    let invalid = |reason: &str| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let mut url = Url::parse(raw.trim()).map_err(|err| invalid(&err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("only http and https are supported"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    url.set_query(None);
    url.set_fragment(None);
    let path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        return Err(invalid("missing post path"));
    }
    if !path.ends_with(".json") {
        url.set_path(&format!("{path}.json"));
    }
    url.set_query(Some("raw_json=1"));
    Ok(url)
}

/// Extracts the first post of a listing response.
///
/// Post pages answer with `[post_listing, comment_listing]`; a bare listing
/// object is accepted as well.
pub fn parse_post(body: &str) -> Result<ContentPayload, FetchError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|err| FetchError::Malformed(err.to_string()))?;
    let listing = match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        serde_json::Value::Array(_) => {
            return Err(FetchError::Malformed("empty listing array".into()));
        }
        other => other,
    };
    let listing: RedditListing =
        serde_json::from_value(listing).map_err(|err| FetchError::Malformed(err.to_string()))?;
    let post = listing
        .data
        .children
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Malformed("listing contains no posts".into()))?
        .data;
    debug!("Parsed post {} from r/{:?}", post.id, post.subreddit);
    if post.title.trim().is_empty() && post.selftext.trim().is_empty() {
        return Err(FetchError::Malformed(format!("post {} has no text", post.id)));
    }
    Ok(ContentPayload {
        title: post.title.trim().to_string(),
        body: post.selftext,
        source_id: post.id,
        subreddit: post.subreddit,
        author: post.author,
        permalink: post
            .permalink
            .filter(|p| !p.is_empty())
            .map(|p| format!("https://www.reddit.com{p}")),
    })
}
