//! Upstream story records and the response shapes built from them.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an upstream item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryId(pub u64);

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StoryId {
    fn from(id: u64) -> Self {
        StoryId(id)
    }
}

/// A story as returned by `item/{id}.json`.
///
/// `id`, `score` and `time` are required; a payload without them fails to decode. Text fields
/// the upstream omits for some item kinds decode as empty, and a missing `descendants` as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    id: StoryId,
    #[serde(default)]
    title: String,
    #[serde(rename = "by", default)]
    author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    score: i64,
    #[serde(rename = "descendants", default)]
    comment_count: u64,
    /// Unix time in seconds.
    #[serde(rename = "time")]
    posted_at: f64,
    #[serde(default)]
    kids: Vec<StoryId>,
}

impl Story {
    pub fn new(id: impl Into<StoryId>, title: impl Into<String>, score: i64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: String::new(),
            url: None,
            score,
            comment_count: 0,
            posted_at: 0.0,
            kids: Vec::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_comment_count(mut self, count: u64) -> Self {
        self.comment_count = count;
        self
    }

    pub fn with_posted_at(mut self, epoch_seconds: f64) -> Self {
        self.posted_at = epoch_seconds;
        self
    }

    pub fn with_kids(mut self, kids: impl IntoIterator<Item = StoryId>) -> Self {
        self.kids = kids.into_iter().collect();
        self
    }

    pub fn id(&self) -> StoryId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    pub fn comment_count(&self) -> u64 {
        self.comment_count
    }

    pub fn posted_at_epoch_seconds(&self) -> f64 {
        self.posted_at
    }

    pub fn kids(&self) -> &[StoryId] {
        &self.kids
    }

    /// Posting time in the local time zone. Out-of-range timestamps fall back to the epoch.
    pub fn created_on(&self) -> DateTime<Local> {
        let millis = (self.posted_at * 1000.0).round() as i64;
        DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default().with_timezone(&Local)
    }
}

/// Presentation summary of a story.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestStory {
    pub title: String,
    pub uri: Option<String>,
    pub posted_by: String,
    pub time: DateTime<Local>,
    pub score: i64,
    pub comment_count: u64,
}

impl From<&Story> for BestStory {
    fn from(story: &Story) -> Self {
        Self {
            title: story.title.clone(),
            uri: story.url.clone(),
            posted_by: story.author.clone(),
            time: story.created_on(),
            score: story.score,
            comment_count: story.comment_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBestStoriesResponse {
    pub best_stories: Vec<BestStory>,
}

impl FromIterator<BestStory> for GetBestStoriesResponse {
    fn from_iter<I: IntoIterator<Item = BestStory>>(iter: I) -> Self {
        Self { best_stories: iter.into_iter().collect() }
    }
}
