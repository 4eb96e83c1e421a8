use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::error::TextServiceError;
use crate::llm::{Completion, TextService};
use crate::reddit::ContentPayload;
use crate::utils::collapse_whitespace;

static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static BARE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]*").unwrap());
static QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:>|&gt;)+[ \t]?").unwrap());
static RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*_][ \t]*){3,}$").unwrap());
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*|__|~~|\*").unwrap());

const CLUTTER: [&str; 3] = ["please do not harass", "refer to rules", "i am not the oop"];
const SKIPPED_HEADERS: [&str; 2] = ["[Original Post]", "[Update]"];
const TRAILER: &str = "EDIT: Added comments";

/// Rewrite replies may run somewhat longer than the input; roughly four
/// characters per token with room to spare.
fn rewrite_token_budget(chars: usize) -> u32 {
    (chars / 2).clamp(1_000, 16_000) as u32
}

const REWRITE_SYSTEM: &str = "You prepare written posts for audio narration. You keep every \
    event, line of dialogue and detail, and only change how the text reads aloud.";

/// Optional speech-oriented rewriting of already cleaned text.
#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(&self, cleaned: &str) -> Result<String, TextServiceError>;
}

/// Always-available rewriter: the cleaned text is the narration.
pub struct Verbatim;

#[async_trait]
impl Rewriter for Verbatim {
    async fn rewrite(&self, cleaned: &str) -> Result<String, TextServiceError> {
        Ok(cleaned.to_string())
    }
}

pub struct SpokenRewriter {
    service: Arc<dyn TextService>,
}

impl SpokenRewriter {
    pub fn new(service: Arc<dyn TextService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Rewriter for SpokenRewriter {
    async fn rewrite(&self, cleaned: &str) -> Result<String, TextServiceError> {
        let prompt = format!(
            "Rewrite this post so it reads naturally when spoken aloud.\n\
             - Do not summarize, shorten or drop any content; aim for about {} characters.\n\
             - Use shorter sentences and add pauses with commas and periods.\n\
             - Spell out abbreviations and remove any leftover formatting or links.\n\
             - Write \"Update:\" headings as \"Update.\".\n\
             - Keep all dialogue and the order of events.\n\n\
             Post:\n{}\n\nReturn only the rewritten text.",
            cleaned.chars().count(),
            cleaned
        );
        self.service
            .complete(Completion {
                system: REWRITE_SYSTEM,
                prompt: &prompt,
                max_tokens: rewrite_token_budget(cleaned.chars().count()),
            })
            .await
    }
}

pub struct Normalizer {
    rewriter: Arc<dyn Rewriter>,
}

impl Normalizer {
    pub fn new(rewriter: Arc<dyn Rewriter>) -> Self {
        Self { rewriter }
    }

    pub fn local() -> Self {
        Self::new(Arc::new(Verbatim))
    }

    /// Produces narration-ready text. Never fails: the rewriter only ever
    /// enhances the locally cleaned text.
    pub async fn normalize(&self, payload: &ContentPayload) -> String {
        let raw = if payload.body.trim().is_empty() {
            payload.title.clone()
        } else {
            format!("{}\n\n{}", payload.title, payload.body)
        };
        let cleaned = clean_markup(&raw);
        let cleaned = if cleaned.is_empty() {
            collapse_whitespace(&raw)
        } else {
            cleaned
        };
        if cleaned.is_empty() {
            return cleaned;
        }

        match self.rewriter.rewrite(&cleaned).await {
            Ok(rewritten) => {
                let rewritten = strip_markup(&rewritten);
                let (before, after) = (cleaned.chars().count(), rewritten.chars().count());
                if rewritten.is_empty() {
                    warn!("Rewrite came back empty; using cleaned text");
                    cleaned
                } else if after * 2 < before {
                    warn!(before, after, "Rewrite looks like a summary; using cleaned text");
                    cleaned
                } else if after < before && cleaned.starts_with(&rewritten) {
                    warn!(before, after, "Rewrite stops early; using cleaned text");
                    cleaned
                } else {
                    info!(before, after, "Narration text rewritten for speech");
                    rewritten
                }
            }
            Err(err) => {
                warn!(error = %err, "Rewrite unavailable; using cleaned text");
                cleaned
            }
        }
    }
}

/// Drops editorial clutter lines, then markup, then redundant whitespace.
pub fn clean_markup(text: &str) -> String {
    let mut kept = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(TRAILER) {
            break;
        }
        let lower = trimmed.to_lowercase();
        if CLUTTER.iter().any(|kw| lower.contains(kw)) {
            continue;
        }
        if SKIPPED_HEADERS.iter().any(|h| trimmed.starts_with(h)) {
            continue;
        }
        kept.push(line);
    }
    strip_markup(&kept.join("\n"))
}

fn strip_markup(text: &str) -> String {
    let text = RULE.replace_all(text, "");
    let text = LINK.replace_all(&text, "$1");
    let text = BARE_URL.replace_all(&text, "");
    let text = HEADING.replace_all(&text, "");
    let text = QUOTE.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");
    let text = text
        .replace("&#x200B;", "")
        .replace("&nbsp;", " ")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&");
    collapse_whitespace(&text)
}
