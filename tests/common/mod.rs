#![allow(dead_code)]

use async_trait::async_trait;
use beststories::{NewsApi, Result, Story, StoryId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

struct SharedGuard(Arc<Mutex<Vec<u8>>>);
impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Captures formatted events for the current thread while the guard is alive.
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl CapturedLogs {
    pub fn start() -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        Self { buffer, _guard: guard }
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
    }

    /// Events at `level` ("INFO", "ERROR", ...) emitted from `target`.
    pub fn count(&self, level: &str, target: &str) -> usize {
        let needle = format!("{level} {target}:");
        self.text().lines().filter(|line| line.trim_start().starts_with(&needle)).count()
    }

    /// Events at `level` from any target.
    pub fn count_level(&self, level: &str) -> usize {
        let needle = format!("{level} ");
        self.text().lines().filter(|line| line.trim_start().starts_with(&needle)).count()
    }
}

/// In-memory upstream that counts calls and can be told to fail or stall.
#[derive(Default)]
pub struct StubApi {
    pub stories: Vec<Story>,
    pub delay: Duration,
    pub fail_story: Option<StoryId>,
    pub id_calls: AtomicUsize,
    pub story_calls: AtomicUsize,
}

impl StubApi {
    pub fn with_scores(scores: &[(u64, i64)]) -> Self {
        let stories =
            scores.iter().map(|&(id, score)| Story::new(id, format!("story {id}"), score)).collect();
        Self { stories, ..Self::default() }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, id: u64) -> Self {
        self.fail_story = Some(StoryId(id));
        self
    }

    pub fn id_calls(&self) -> usize {
        self.id_calls.load(Ordering::SeqCst)
    }

    pub fn story_calls(&self) -> usize {
        self.story_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.id_calls() + self.story_calls()
    }
}

#[async_trait]
impl NewsApi for StubApi {
    async fn best_story_ids(&self, _cancel: &CancellationToken) -> Result<Vec<StoryId>> {
        self.id_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.stories.iter().map(Story::id).collect())
    }

    async fn story(&self, id: StoryId, _cancel: &CancellationToken) -> Result<Story> {
        self.story_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_story == Some(id) {
            return Err(beststories::Error::NonSuccessStatus { code: 500 });
        }
        self.stories
            .iter()
            .find(|s| s.id() == id)
            .cloned()
            .ok_or(beststories::Error::NonSuccessStatus { code: 404 })
    }
}
