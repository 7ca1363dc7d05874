//! Scripted fakes shared by the orchestrator integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use coordination::batch::Batch;
use coordination::processor::{
    BatchProcessor, ProcessorSet, RawOutcome, ResultSink, ReviewSink, SinkError, TierProcessor,
};
use coordination::store::{CampaignStore, MemoryStore, StoreError, StoreResult};
use coordination::types::{
    Attempt, AttemptSummary, BellSchedule, ExtractedResult, GradeSchedule, QueueEntry, Target,
    TerminalFlag, Tier,
};
use coordination::{Orchestrator, OrchestratorConfig};

// ---------------------------------------------------------------------------
// Raw outcome builders
// ---------------------------------------------------------------------------

pub fn http(status: u16) -> RawOutcome {
    RawOutcome::Http {
        status,
        url: "https://district.example.org/".to_string(),
        body_excerpt: None,
        server: None,
    }
}

pub fn waf_block() -> RawOutcome {
    RawOutcome::Http {
        status: 403,
        url: "https://district.example.org/".to_string(),
        body_excerpt: Some("<title>Attention Required! | Cloudflare</title>".to_string()),
        server: Some("cloudflare".to_string()),
    }
}

pub fn empty() -> RawOutcome {
    RawOutcome::Empty {
        url: Some("https://district.example.org/".to_string()),
        detail: "no schedule-like text".to_string(),
        discovered_urls: vec![],
    }
}

pub fn transient() -> RawOutcome {
    RawOutcome::failed("connection reset by peer")
}

pub fn extracted(tier: Tier, confidence: f64) -> RawOutcome {
    RawOutcome::Extracted {
        result: ExtractedResult {
            schedule: BellSchedule {
                grades: vec![GradeSchedule {
                    grade_band: "high".to_string(),
                    start_time: "07:45".to_string(),
                    end_time: "14:30".to_string(),
                    instructional_minutes: Some(405),
                }],
                notes: None,
            },
            confidence,
            tier,
            source_urls: vec!["https://district.example.org/bell-schedule".to_string()],
        },
        discovered_urls: vec![],
    }
}

pub fn targets(n: usize) -> Vec<Target> {
    (0..n)
        .map(|i| {
            Target::new(format!("d-{i}"), format!("District {i}"), "CA")
                .with_homepage(format!("https://d{i}.k12.ca.us"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Concurrency gauge
// ---------------------------------------------------------------------------

/// Counts open calls and remembers the highest count seen
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Scripted processors
// ---------------------------------------------------------------------------

/// Single-target processor that replays a per-target script.
///
/// Once a target's script runs out, `fallback` is returned.
pub struct ScriptedProcessor {
    tier: Tier,
    scripts: Mutex<HashMap<String, VecDeque<RawOutcome>>>,
    fallback: RawOutcome,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    pub in_flight: InFlight,
}

impl ScriptedProcessor {
    pub fn new(tier: Tier, fallback: RawOutcome) -> Self {
        Self {
            tier,
            scripts: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(HashMap::new()),
            delay: None,
            in_flight: InFlight::default(),
        }
    }

    pub fn script(self, target_id: &str, outcomes: Vec<RawOutcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(target_id.to_string(), outcomes.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, target_id: &str) -> usize {
        self.calls.lock().unwrap().get(target_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl TierProcessor for ScriptedProcessor {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn process(&self, target: &Target) -> RawOutcome {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(target.id.clone())
            .or_insert(0) += 1;
        self.in_flight.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.exit();
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&target.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Batch processor answering from a fixed per-target table
pub struct ScriptedBatchProcessor {
    tier: Tier,
    answers: HashMap<String, RawOutcome>,
    fallback: Option<RawOutcome>,
    batches: Mutex<Vec<Batch>>,
    delay: Option<Duration>,
    pub in_flight: InFlight,
}

impl ScriptedBatchProcessor {
    pub fn new(tier: Tier, fallback: Option<RawOutcome>) -> Self {
        Self {
            tier,
            answers: HashMap::new(),
            fallback,
            batches: Mutex::new(Vec::new()),
            delay: None,
            in_flight: InFlight::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn answer(mut self, target_id: &str, raw: RawOutcome) -> Self {
        self.answers.insert(target_id.to_string(), raw);
        self
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchProcessor for ScriptedBatchProcessor {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn process_batch(&self, batch: &Batch) -> Vec<(String, RawOutcome)> {
        self.batches.lock().unwrap().push(batch.clone());
        self.in_flight.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.exit();
        batch
            .members
            .iter()
            .filter_map(|m| {
                self.answers
                    .get(&m.id)
                    .or(self.fallback.as_ref())
                    .map(|raw| (m.id.clone(), raw.clone()))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Recording sinks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingResultSink {
    pub persisted: Mutex<Vec<(String, ExtractedResult)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl ResultSink for RecordingResultSink {
    async fn persist(&self, target_id: &str, result: &ExtractedResult) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("results database offline".to_string()));
        }
        self.persisted
            .lock()
            .unwrap()
            .push((target_id.to_string(), result.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReviewSink {
    pub flagged: Mutex<Vec<(String, String, AttemptSummary)>>,
}

impl RecordingReviewSink {
    pub fn ids(&self) -> Vec<String> {
        self.flagged
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl ReviewSink for RecordingReviewSink {
    async fn flag(
        &self,
        target_id: &str,
        reason: &str,
        summary: &AttemptSummary,
    ) -> Result<(), SinkError> {
        self.flagged.lock().unwrap().push((
            target_id.to_string(),
            reason.to_string(),
            summary.clone(),
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store wrapper that can refuse ledger writes
// ---------------------------------------------------------------------------

/// Delegates to a `MemoryStore`; `record` fails for attempts at `fail_tier`
pub struct FlakyLedger {
    pub inner: MemoryStore,
    pub fail_tier: Mutex<Option<Tier>>,
}

impl FlakyLedger {
    pub fn new(fail_tier: Option<Tier>) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_tier: Mutex::new(fail_tier),
        }
    }
}

impl CampaignStore for FlakyLedger {
    fn put_target(&self, target: &Target) -> StoreResult<()> {
        self.inner.put_target(target)
    }

    fn get_target(&self, target_id: &str) -> StoreResult<Option<Target>> {
        self.inner.get_target(target_id)
    }

    fn list_targets(&self) -> StoreResult<Vec<Target>> {
        self.inner.list_targets()
    }

    fn append_discovered(&self, target_id: &str, urls: &[String]) -> StoreResult<usize> {
        self.inner.append_discovered(target_id, urls)
    }

    fn record(&self, attempt: &Attempt) -> StoreResult<()> {
        if *self.fail_tier.lock().unwrap() == Some(attempt.tier) {
            return Err(StoreError::Serialization("disk full".to_string()));
        }
        self.inner.record(attempt)
    }

    fn history(&self, target_id: &str) -> StoreResult<Vec<Attempt>> {
        self.inner.history(target_id)
    }

    fn enqueue(&self, target_id: &str, tier: Tier) -> StoreResult<QueueEntry> {
        self.inner.enqueue(target_id, tier)
    }

    fn dequeue_ready(&self, tier: Tier, max: usize) -> StoreResult<Vec<QueueEntry>> {
        self.inner.dequeue_ready(tier, max)
    }

    fn peek_ready(&self, tier: Tier, max: usize) -> StoreResult<Vec<QueueEntry>> {
        self.inner.peek_ready(tier, max)
    }

    fn has_pending(&self, tier: Tier) -> StoreResult<bool> {
        self.inner.has_pending(tier)
    }

    fn move_to_tier(
        &self,
        target_id: &str,
        from: Tier,
        to: Tier,
        attempt_id: &str,
    ) -> StoreResult<QueueEntry> {
        self.inner.move_to_tier(target_id, from, to, attempt_id)
    }

    fn retry_in_place(
        &self,
        target_id: &str,
        tier: Tier,
        attempt_id: &str,
    ) -> StoreResult<QueueEntry> {
        self.inner.retry_in_place(target_id, tier, attempt_id)
    }

    fn finish(
        &self,
        target_id: &str,
        tier: Tier,
        flag: TerminalFlag,
        attempt_id: &str,
    ) -> StoreResult<QueueEntry> {
        self.inner.finish(target_id, tier, flag, attempt_id)
    }

    fn entry(&self, target_id: &str) -> StoreResult<Option<QueueEntry>> {
        self.inner.entry(target_id)
    }

    fn entries(&self) -> StoreResult<Vec<QueueEntry>> {
        self.inner.entries()
    }

    fn release_claims(&self) -> StoreResult<usize> {
        self.inner.release_claims()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Processors for all five tiers plus recording sinks
pub struct Harness {
    pub probe: Arc<ScriptedProcessor>,
    pub rendered: Arc<ScriptedProcessor>,
    pub document: Arc<ScriptedProcessor>,
    pub extraction: Arc<ScriptedBatchProcessor>,
    pub search: Arc<ScriptedBatchProcessor>,
    pub results: Arc<RecordingResultSink>,
    pub reviews: Arc<RecordingReviewSink>,
}

impl Harness {
    /// Every tier answers `not_found` unless scripted otherwise
    pub fn new() -> Self {
        Self {
            probe: Arc::new(ScriptedProcessor::new(Tier::Probe, empty())),
            rendered: Arc::new(ScriptedProcessor::new(Tier::Rendered, empty())),
            document: Arc::new(ScriptedProcessor::new(Tier::Document, empty())),
            extraction: Arc::new(ScriptedBatchProcessor::new(Tier::Extraction, Some(empty()))),
            search: Arc::new(ScriptedBatchProcessor::new(Tier::Search, Some(empty()))),
            results: Arc::new(RecordingResultSink::default()),
            reviews: Arc::new(RecordingReviewSink::default()),
        }
    }

    pub fn processors(&self) -> ProcessorSet {
        ProcessorSet::new()
            .with_processor(self.probe.clone())
            .with_processor(self.rendered.clone())
            .with_processor(self.document.clone())
            .with_batch_processor(self.extraction.clone())
            .with_batch_processor(self.search.clone())
    }

    pub fn orchestrator(&self, store: Arc<dyn CampaignStore>) -> Orchestrator {
        self.orchestrator_with(store, test_config())
    }

    pub fn orchestrator_with(
        &self,
        store: Arc<dyn CampaignStore>,
        config: OrchestratorConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            store,
            self.processors(),
            self.results.clone(),
            self.reviews.clone(),
            config,
        )
        .expect("all tiers have processors")
    }
}

/// Fast polling so idle detection does not slow tests down
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval_ms: 10,
        ..Default::default()
    }
}
