use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Which kind of adapter serves a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Keyword search against a news index.
    Search,
    /// A specific website's headline page.
    Site,
    /// An RSS/Atom feed URL.
    Feed,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Search => write!(f, "search"),
            SourceKind::Site => write!(f, "site"),
            SourceKind::Feed => write!(f, "feed"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "search" => Ok(SourceKind::Search),
            "site" => Ok(SourceKind::Site),
            "feed" | "rss" => Ok(SourceKind::Feed),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

/// One configured source for a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub kind: SourceKind,
    /// Search query context, site URL, or feed URL depending on `kind`.
    pub identifier: String,
    /// Cap on items taken from this source per run. Zero takes nothing.
    #[serde(default = "default_max_items")]
    pub max_items: u32,
}

fn default_max_items() -> u32 {
    5
}

impl SourceSpec {
    /// Stable id used to tag items and report per-source failures.
    pub fn source_id(&self) -> String {
        format!("{}:{}", self.kind, self.identifier)
    }
}

/// Social platforms a bot can publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    Twitter,
    Reddit,
    Forum,
    Instagram,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Twitter => write!(f, "twitter"),
            PlatformKind::Reddit => write!(f, "reddit"),
            PlatformKind::Forum => write!(f, "forum"),
            PlatformKind::Instagram => write!(f, "instagram"),
        }
    }
}

impl std::str::FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(PlatformKind::Twitter),
            "reddit" => Ok(PlatformKind::Reddit),
            "forum" => Ok(PlatformKind::Forum),
            "instagram" => Ok(PlatformKind::Instagram),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// One configured destination for a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub platform: PlatformKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Vault key the connector resolves its credentials from. The core
    /// never sees the credential material itself.
    pub credential_ref: String,
}

fn default_true() -> bool {
    true
}

/// Which question templates the transformer may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    What,
    Why,
    How,
}

/// How the transformer derives an image reference for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    /// Deterministic card spec rendered elsewhere.
    Card,
    /// Pass through the article's own image when present.
    SourceImage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOptions {
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
    #[serde(default = "default_question_kinds")]
    pub question_kinds: Vec<QuestionKind>,
    #[serde(default = "default_image_mode")]
    pub image_mode: ImageMode,
    /// Bounded worker pool size for one run of this bot.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_max_sentences() -> usize {
    3
}

fn default_question_kinds() -> Vec<QuestionKind> {
    vec![QuestionKind::What, QuestionKind::Why, QuestionKind::How]
}

fn default_image_mode() -> ImageMode {
    ImageMode::SourceImage
}

fn default_workers() -> usize {
    4
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            max_sentences: default_max_sentences(),
            question_kinds: default_question_kinds(),
            image_mode: default_image_mode(),
            workers: default_workers(),
        }
    }
}

/// Immutable snapshot of one bot. The scheduler and pipeline only ever
/// read it; edits go through the bot store and take effect on the next run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub id: String,
    pub name: String,
    pub topics: Vec<String>,
    pub sources: Vec<SourceSpec>,
    pub destinations: Vec<DestinationSpec>,
    /// Six-field cron expression (seconds first), e.g. `"0 0 */4 * * *"`.
    pub schedule: String,
    #[serde(default)]
    pub transform: TransformOptions,
}

impl BotConfig {
    /// Replicate this bot under a new identity. The clone shares nothing
    /// with the original except the common posting ledger.
    pub fn replicate(&self, name: &str) -> BotConfig {
        BotConfig {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Primary topic used for title-based fingerprint fallback.
    pub fn primary_topic(&self) -> &str {
        self.topics.first().map(String::as_str).unwrap_or("")
    }

    pub fn enabled_destinations(&self) -> impl Iterator<Item = &DestinationSpec> {
        self.destinations.iter().filter(|d| d.enabled)
    }
}

/// One candidate news item as fetched from a source. Lives for the run
/// only, unless it becomes a [`ProcessedItem`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub source_id: String,
    pub url: String,
    pub title: String,
    /// Unix seconds at fetch time.
    pub fetched_at: i64,
    pub raw_text: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Identity key for one logical news item across sources and runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive from the normalized URL, or from normalized title + topic
    /// when the item has no usable URL.
    pub fn of(item: &RawItem, topic: &str) -> Fingerprint {
        let basis = match normalize_url(&item.url) {
            Some(url) => url,
            None => format!("{}|{}", normalize_title(&item.title), topic.to_lowercase()),
        };
        let mut hasher = Sha256::new();
        hasher.update(basis.as_bytes());
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn from_hex(hex: String) -> Fingerprint {
        Fingerprint(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical form of an article URL: scheme and `www.` stripped, host
/// lowercased, fragment and tracking params dropped, no trailing slash.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = url::Url::parse(raw).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    let path = parsed.path().trim_end_matches('/');

    let mut kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && k != "fbclid" && k != "gclid")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort();

    let query = if kept.is_empty() {
        String::new()
    } else {
        let joined: Vec<String> = kept.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("?{}", joined.join("&"))
    };

    Some(format!("{}{}{}", host, path, query))
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fully transformed item, ready to publish. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub fingerprint: Fingerprint,
    pub summary: String,
    pub questions: Vec<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
    pub source_item: RawItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Posted,
    SkippedDuplicate,
    Failed,
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostStatus::Posted => write!(f, "posted"),
            PostStatus::SkippedDuplicate => write!(f, "skipped_duplicate"),
            PostStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posted" => Ok(PostStatus::Posted),
            "skipped_duplicate" => Ok(PostStatus::SkippedDuplicate),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("unknown post status '{}'", other)),
        }
    }
}

/// Resolution of one (item, destination) pair. Append-only in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostOutcome {
    pub bot_id: String,
    pub fingerprint: Fingerprint,
    pub destination: PlatformKind,
    pub status: PostStatus,
    pub post_id: Option<String>,
    pub error_kind: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl PostOutcome {
    pub fn posted(
        bot_id: &str,
        fingerprint: &Fingerprint,
        destination: PlatformKind,
        post_id: String,
    ) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            fingerprint: fingerprint.clone(),
            destination,
            status: PostStatus::Posted,
            post_id: Some(post_id),
            error_kind: None,
            attempted_at: Utc::now(),
        }
    }

    pub fn skipped(bot_id: &str, fingerprint: &Fingerprint, destination: PlatformKind) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            fingerprint: fingerprint.clone(),
            destination,
            status: PostStatus::SkippedDuplicate,
            post_id: None,
            error_kind: None,
            attempted_at: Utc::now(),
        }
    }

    pub fn failed(
        bot_id: &str,
        fingerprint: &Fingerprint,
        destination: PlatformKind,
        error_kind: &str,
    ) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            fingerprint: fingerprint.clone(),
            destination,
            status: PostStatus::Failed,
            post_id: None,
            error_kind: Some(error_kind.to_string()),
            attempted_at: Utc::now(),
        }
    }
}

/// Why an item produced no publish attempts, or the attempts it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ItemDisposition {
    /// Every enabled destination already had a posted outcome.
    AlreadyPosted,
    /// The transform stage failed; no destination was attempted.
    TransformFailed { error: String },
    /// Publish attempts ran; one outcome per attempted destination.
    Published { outcomes: Vec<PostOutcome> },
    /// The run was cancelled before this item was attempted.
    NotAttempted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub fingerprint: Fingerprint,
    pub title: String,
    pub url: String,
    pub disposition: ItemDisposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The pipeline ran to completion, item failures included.
    Completed,
    /// Run-level failure; the scheduler may retry the slot.
    Failed,
    /// Shutdown interrupted the run; recorded attempts are final.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Record of one triggered run. Persisted append-only, keyed by
/// (bot_id, started_at).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub bot_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunStatus,
    pub items: Vec<ItemReport>,
    /// Sources that failed during gather, with the reason. Informational.
    #[serde(default)]
    pub source_failures: Vec<(String, String)>,
}

impl RunRecord {
    /// Counts of (posted, skipped, failed) pairs across all items.
    pub fn outcome_counts(&self) -> (usize, usize, usize) {
        let mut posted = 0;
        let mut skipped = 0;
        let mut failed = 0;
        for item in &self.items {
            match &item.disposition {
                ItemDisposition::AlreadyPosted => skipped += 1,
                ItemDisposition::TransformFailed { .. } => failed += 1,
                ItemDisposition::NotAttempted => {}
                ItemDisposition::Published { outcomes } => {
                    for o in outcomes {
                        match o.status {
                            PostStatus::Posted => posted += 1,
                            PostStatus::SkippedDuplicate => skipped += 1,
                            PostStatus::Failed => failed += 1,
                        }
                    }
                }
            }
        }
        (posted, skipped, failed)
    }

    /// One-line summary written back to the bot store after each run.
    pub fn summary_line(&self) -> String {
        let (posted, skipped, failed) = self.outcome_counts();
        format!(
            "{}: {} items, {} posted, {} skipped, {} failed",
            self.status,
            self.items.len(),
            posted,
            skipped,
            failed
        )
    }
}
