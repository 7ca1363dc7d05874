//! Tiered enrichment orchestrator
//!
//! Drives every target through the tier ladder:
//!
//! ```text
//! dequeue ─▶ processor ─▶ classify ─▶ record attempt ─▶ decide ─▶ transition
//!   ▲          (timeout)                 (ledger)                    │
//!   └───────────── retry_same_tier / advance_tier ◀──────────────────┘
//!                                   stop_* ─▶ finish ─▶ result / review sink
//! ```
//!
//! The attempt is written before the target moves; a refused write aborts
//! the step with [`OrchestratorError::LedgerWrite`]. One worker drains each
//! tier. Free tiers run up to `concurrency` processor calls at once; costly
//! tiers run composed batches with at most `batch_in_flight` calls.

mod error;
mod status;

pub use error::{OrchestratorError, OrchestratorResult};
pub use status::{StatusReport, TierCounts};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, BatchComposer, BatchConfig};
use crate::classifier::{Classifier, ClassifierConfig};
use crate::escalation::{
    Action, Decision, EscalationPolicy, EscalationReason, Observation, PolicyConfig,
};
use crate::events::{EnrichmentEvent, EventBus, SharedEventBus};
use crate::processor::{
    BatchProcessor, ProcessorSet, RawOutcome, ResultSink, ReviewSink, SinkError, TierProcessor,
};
use crate::store::{SharedStore, StoreError};
use crate::types::{
    Attempt, AttemptSummary, BatchId, Category, QueueEntry, Target, TargetId, TerminalFlag, Tier,
};

/// Wall-clock budget per unit of work, per tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBudgets {
    pub probe_secs: u64,
    pub rendered_secs: u64,
    pub document_secs: u64,
    /// Whole-batch budget
    pub extraction_secs: u64,
    /// Whole-batch budget
    pub search_secs: u64,
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            probe_secs: Tier::Probe.default_budget().as_secs(),
            rendered_secs: Tier::Rendered.default_budget().as_secs(),
            document_secs: Tier::Document.default_budget().as_secs(),
            extraction_secs: Tier::Extraction.default_budget().as_secs(),
            search_secs: Tier::Search.default_budget().as_secs(),
        }
    }
}

impl TierBudgets {
    pub fn for_tier(&self, tier: Tier) -> Duration {
        let secs = match tier {
            Tier::Probe => self.probe_secs,
            Tier::Rendered => self.rendered_secs,
            Tier::Document => self.document_secs,
            Tier::Extraction => self.extraction_secs,
            Tier::Search => self.search_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrent processor calls per free tier
    pub concurrency: usize,
    /// Concurrent batch calls per costly tier
    pub batch_in_flight: usize,
    /// Max entries taken from a tier queue per step
    pub dequeue_limit: usize,
    /// Sleep between idle polls
    pub poll_interval_ms: u64,
    pub policy: PolicyConfig,
    pub classifier: ClassifierConfig,
    pub batch: BatchConfig,
    pub budgets: TierBudgets,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            batch_in_flight: 1,
            dequeue_limit: 50,
            poll_interval_ms: 250,
            policy: PolicyConfig::default(),
            classifier: ClassifierConfig::default(),
            batch: BatchConfig::default(),
            budgets: TierBudgets::default(),
        }
    }
}

/// Outcome of one `step_tier` round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Targets routed (attempt recorded and transition applied)
    pub processed: usize,
    /// Claimed targets left untouched because of cancellation
    pub skipped: usize,
    pub batches: usize,
}

/// Outcome of `resume`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub released_claims: usize,
    /// Pending targets whose last recorded attempt was re-applied
    pub reconciled: usize,
}

/// Outcome of `run_until_idle`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub processed: BTreeMap<Tier, usize>,
    pub cancelled: bool,
    pub released_claims: usize,
}

impl RunReport {
    pub fn total_processed(&self) -> usize {
        self.processed.values().sum()
    }
}

/// Per-tier halt flags shared by the tier workers of one run
type HaltFlags = [AtomicBool; 5];

fn tier_index(tier: Tier) -> usize {
    usize::from(tier.number() - 1)
}

/// The tiered enrichment state machine
pub struct Orchestrator {
    store: SharedStore,
    processors: ProcessorSet,
    results: Arc<dyn ResultSink>,
    reviews: Arc<dyn ReviewSink>,
    classifier: Classifier,
    policy: EscalationPolicy,
    composer: BatchComposer,
    events: SharedEventBus,
    config: OrchestratorConfig,
    sink_failures: AtomicU64,
}

impl Orchestrator {
    /// Build an orchestrator.
    ///
    /// Every tier up to the policy's final tier needs a processor of the
    /// right shape, otherwise targets could be routed into a queue nobody
    /// drains.
    pub fn new(
        store: SharedStore,
        processors: ProcessorSet,
        results: Arc<dyn ResultSink>,
        reviews: Arc<dyn ReviewSink>,
        config: OrchestratorConfig,
    ) -> OrchestratorResult<Self> {
        let missing = processors.missing_up_to(config.policy.final_tier);
        if !missing.is_empty() {
            return Err(OrchestratorError::MissingProcessors(missing));
        }

        Ok(Self {
            store,
            processors,
            results,
            reviews,
            classifier: Classifier::with_config(config.classifier.clone()),
            policy: EscalationPolicy::with_config(config.policy.clone()),
            composer: BatchComposer::with_config(config.batch.clone()),
            events: EventBus::new().shared(),
            config,
            sink_failures: AtomicU64::new(0),
        })
    }

    /// Publish on an existing bus instead of a private one
    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // =========================================================================
    // Campaign lifecycle
    // =========================================================================

    /// Persist targets and queue each at the first tier.
    ///
    /// The whole import is rejected if any id repeats, within the input or
    /// against targets already stored.
    pub fn import(&self, targets: Vec<Target>) -> OrchestratorResult<usize> {
        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(target.id.as_str()) || self.store.get_target(&target.id)?.is_some() {
                return Err(StoreError::DuplicateTarget(target.id.clone()).into());
            }
        }

        for target in &targets {
            self.store.put_target(target)?;
            self.store
                .enqueue(&target.id, Tier::Probe)
                .map_err(|e| OrchestratorError::queue(Tier::Probe, e))?;
            self.events.publish(EnrichmentEvent::TargetImported {
                target_id: target.id.clone(),
                timestamp: Utc::now(),
            });
        }

        info!(count = targets.len(), "Imported targets");
        Ok(targets.len())
    }

    /// Recover after an interrupted run.
    ///
    /// Releases stale claims, then re-applies any attempt that reached the
    /// ledger but whose transition never happened. The processor is not
    /// called again, so a recorded block stays the only attempt at its tier.
    pub async fn resume(&self) -> OrchestratorResult<ResumeReport> {
        let released_claims = self.store.release_claims()?;
        let mut reconciled = 0;

        for entry in self.store.entries()?.into_iter().filter(QueueEntry::is_pending) {
            let history = self.store.history(&entry.target_id)?;
            let Some(last) = history.last() else {
                continue;
            };
            let unapplied = entry.last_attempt_id.as_deref() != Some(last.id.as_str())
                && last.tier == entry.tier
                && last.started_at >= entry.enqueued_at;
            if unapplied {
                warn!(
                    target_id = %entry.target_id,
                    tier = %entry.tier,
                    attempt = %last.id,
                    category = %last.category,
                    "Re-applying attempt recorded before interruption"
                );
                self.apply(&entry, last, &history).await?;
                reconciled += 1;
            }
        }

        info!(released_claims, reconciled, "Campaign resumed");
        Ok(ResumeReport {
            released_claims,
            reconciled,
        })
    }

    /// Run every tier until nothing is pending or `cancel` fires.
    ///
    /// Cancellation stops new dequeues; calls already in flight complete and
    /// are recorded. A fatal fault halts only its own tier; the others keep
    /// draining and the first fatal error is returned once they stop.
    pub async fn run_until_idle(&self, cancel: CancellationToken) -> OrchestratorResult<RunReport> {
        let halted: HaltFlags = Default::default();
        for tier in Tier::ALL {
            if !self.processors.has(tier) {
                halted[tier_index(tier)].store(true, Ordering::SeqCst);
            }
        }

        let workers = Tier::ALL
            .into_iter()
            .filter(|tier| self.processors.has(*tier))
            .map(|tier| self.tier_worker(tier, &cancel, &halted));
        let results = join_all(workers).await;

        // Entries claimed but never started because of cancellation
        let released_claims = self.store.release_claims()?;

        let mut report = RunReport {
            cancelled: cancel.is_cancelled(),
            released_claims,
            ..Default::default()
        };
        let mut first_error = None;
        for (tier, result) in results {
            match result {
                Ok(processed) => {
                    report.processed.insert(tier, processed);
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        info!(
            processed = report.total_processed(),
            cancelled = report.cancelled,
            "Campaign run stopped"
        );
        Ok(report)
    }

    /// One dequeue round for one tier.
    ///
    /// Costly tiers only claim whole batches, unless the oldest entry has
    /// waited past the max wait or `flush` is set.
    pub async fn step_tier(
        &self,
        tier: Tier,
        flush: bool,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<StepReport> {
        if tier.is_batched() {
            match self.processors.batched(tier) {
                Some(processor) => self.step_batched(tier, processor, flush, cancel).await,
                None => Ok(StepReport::default()),
            }
        } else {
            match self.processors.single(tier) {
                Some(processor) => self.step_single(tier, processor, cancel).await,
                None => Ok(StepReport::default()),
            }
        }
    }

    /// Classify a raw outcome, record it, and apply the policy's decision
    pub async fn route(
        &self,
        entry: &QueueEntry,
        raw: RawOutcome,
        batch_id: Option<BatchId>,
        started_at: DateTime<Utc>,
    ) -> OrchestratorResult<Decision> {
        let target_id = entry.target_id.as_str();
        let tier = entry.tier;
        let classification = self.classifier.classify(&raw);

        let discovered = raw.discovered_urls();
        if !discovered.is_empty() {
            let added = self.store.append_discovered(target_id, discovered)?;
            if added > 0 {
                debug!(target_id, tier = %tier, added, "Discovered sub-site URLs");
            }
        }

        let mut history = self.store.history(target_id)?;
        let attempt = Attempt {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: target_id.to_string(),
            tier,
            started_at,
            ended_at: Utc::now(),
            category: classification.category,
            diagnostics: classification.diagnostics,
            batch_id,
            result: raw.result().cloned(),
        };

        self.store
            .record(&attempt)
            .map_err(|source| OrchestratorError::LedgerWrite {
                target: target_id.to_string(),
                tier,
                source,
            })?;
        debug!(
            target_id,
            tier = %tier,
            category = %attempt.category,
            attempt = %attempt.id,
            "Attempt recorded"
        );
        self.events.publish(EnrichmentEvent::AttemptRecorded {
            target_id: target_id.to_string(),
            attempt_id: attempt.id.clone(),
            tier,
            category: attempt.category,
            batch_id: attempt.batch_id.clone(),
            timestamp: attempt.ended_at,
        });

        history.push(attempt.clone());
        self.apply(entry, &attempt, &history).await
    }

    /// Aggregate counts for the whole campaign
    pub fn status(&self) -> OrchestratorResult<StatusReport> {
        Ok(StatusReport::from_store(
            self.store.as_ref(),
            self.sink_failures.load(Ordering::Relaxed),
        )?)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Decide on a recorded attempt and move the target accordingly.
    ///
    /// `history` is the target's full ledger, ending with `attempt`.
    async fn apply(
        &self,
        entry: &QueueEntry,
        attempt: &Attempt,
        history: &[Attempt],
    ) -> OrchestratorResult<Decision> {
        let target_id = entry.target_id.as_str();
        let tier = entry.tier;

        let not_found_total = history
            .iter()
            .filter(|a| a.category == Category::NotFound)
            .count() as u32;
        let mut observation =
            Observation::new(attempt.category).with_not_found_total(not_found_total);
        if let Some(confidence) = attempt.diagnostics.confidence {
            observation = observation.with_confidence(confidence);
        }
        let decision = self.policy.decide(entry, &observation);

        match decision.action {
            Action::RetrySameTier => {
                let updated = self
                    .store
                    .retry_in_place(target_id, tier, &attempt.id)
                    .map_err(|e| OrchestratorError::queue(tier, e))?;
                warn!(target_id, tier = %tier, reason = %decision.reason, "Retrying at same tier");
                self.events.publish(EnrichmentEvent::RetryScheduled {
                    target_id: target_id.to_string(),
                    tier,
                    failures: updated.consecutive_failures,
                    timestamp: Utc::now(),
                });
            }
            Action::AdvanceTier { to } => {
                self.store
                    .move_to_tier(target_id, tier, to, &attempt.id)
                    .map_err(|e| OrchestratorError::queue(tier, e))?;
                info!(target_id, from = %tier, to = %to, reason = %decision.reason, "Advancing tier");
                self.events.publish(EnrichmentEvent::TierAdvanced {
                    target_id: target_id.to_string(),
                    from: tier,
                    to,
                    reason: decision.reason.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Action::StopSuccess => {
                self.finish(entry, attempt, history, TerminalFlag::Succeeded, &decision.reason)
                    .await?;
            }
            Action::StopManualReview => {
                self.finish(entry, attempt, history, TerminalFlag::ManualReview, &decision.reason)
                    .await?;
            }
            Action::StopBlocked => {
                self.finish(entry, attempt, history, TerminalFlag::Blocked, &decision.reason)
                    .await?;
            }
        }

        Ok(decision)
    }

    /// Terminal transition, then exactly one sink call.
    ///
    /// Sink failures are counted and logged; they never revert the flag.
    async fn finish(
        &self,
        entry: &QueueEntry,
        attempt: &Attempt,
        history: &[Attempt],
        flag: TerminalFlag,
        reason: &EscalationReason,
    ) -> OrchestratorResult<()> {
        let target_id = entry.target_id.as_str();
        let tier = entry.tier;

        self.store
            .finish(target_id, tier, flag, &attempt.id)
            .map_err(|e| OrchestratorError::queue(tier, e))?;
        info!(target_id, tier = %tier, flag = %flag, reason = %reason, "Target finished");
        self.events.publish(EnrichmentEvent::TargetFinished {
            target_id: target_id.to_string(),
            tier,
            flag,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });

        let delivered = match flag {
            TerminalFlag::Succeeded => match &attempt.result {
                Some(result) => self.results.persist(target_id, result).await,
                None => Err(SinkError::Rejected(
                    "success without an extracted result".to_string(),
                )),
            },
            _ => {
                let summary = AttemptSummary::from_history(history);
                self.reviews
                    .flag(target_id, &reason.to_string(), &summary)
                    .await
            }
        };

        if let Err(e) = delivered {
            self.sink_failures.fetch_add(1, Ordering::Relaxed);
            warn!(target_id, flag = %flag, error = %e, "Sink call failed; terminal state kept");
        }
        Ok(())
    }

    // =========================================================================
    // Tier workers
    // =========================================================================

    async fn tier_worker(
        &self,
        tier: Tier,
        cancel: &CancellationToken,
        halted: &HaltFlags,
    ) -> (Tier, OrchestratorResult<usize>) {
        let mut processed = 0;
        match self.drive_tier(tier, cancel, halted, &mut processed).await {
            Ok(()) => {
                debug!(tier = %tier, processed, "Tier worker stopped");
                (tier, Ok(processed))
            }
            Err(e) => {
                halted[tier_index(tier)].store(true, Ordering::SeqCst);
                error!(tier = %tier, error = %e, "Tier halted");
                self.events.publish(EnrichmentEvent::TierHalted {
                    tier,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                (tier, Err(e))
            }
        }
    }

    async fn drive_tier(
        &self,
        tier: Tier,
        cancel: &CancellationToken,
        halted: &HaltFlags,
        processed: &mut usize,
    ) -> OrchestratorResult<()> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            // Nothing more can arrive from cheaper tiers: stop waiting to fill
            let flush = tier.is_batched() && !self.pending_below(tier, halted)?;
            let step = self.step_tier(tier, flush, cancel).await?;
            *processed += step.processed;
            if step.processed > 0 {
                continue;
            }

            if !self.has_live_work(halted)? {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Pending entries at cheaper tiers that still have a live worker
    fn pending_below(&self, tier: Tier, halted: &HaltFlags) -> OrchestratorResult<bool> {
        self.any_live_pending(Tier::ALL.into_iter().filter(|t| *t < tier), halted)
    }

    /// Pending entries anywhere a live worker can still reach them
    fn has_live_work(&self, halted: &HaltFlags) -> OrchestratorResult<bool> {
        self.any_live_pending(Tier::ALL, halted)
    }

    fn any_live_pending(
        &self,
        tiers: impl IntoIterator<Item = Tier>,
        halted: &HaltFlags,
    ) -> OrchestratorResult<bool> {
        for tier in tiers {
            if halted[tier_index(tier)].load(Ordering::SeqCst) {
                continue;
            }
            if self.store.has_pending(tier)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn step_single(
        &self,
        tier: Tier,
        processor: &Arc<dyn TierProcessor>,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<StepReport> {
        let entries = self
            .store
            .dequeue_ready(tier, self.config.dequeue_limit)
            .map_err(|e| OrchestratorError::queue(tier, e))?;
        if entries.is_empty() {
            return Ok(StepReport::default());
        }
        debug!(tier = %tier, count = entries.len(), "Dequeued targets");

        // A fatal fault stops calls that have not started yet
        let halt = cancel.child_token();
        let results: Vec<OrchestratorResult<bool>> = stream::iter(entries)
            .map(|entry| {
                let halt = &halt;
                async move {
                    let result = self.run_single(processor, entry, halt).await;
                    if result.as_ref().is_err_and(OrchestratorError::is_fatal) {
                        halt.cancel();
                    }
                    result
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = StepReport::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => error!(tier = %tier, error = %e, "Additional fault in halted step"),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn run_single(
        &self,
        processor: &Arc<dyn TierProcessor>,
        entry: QueueEntry,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<bool> {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let target = self.load_target(&entry)?;
        let budget = self.config.budgets.for_tier(entry.tier);
        let started_at = Utc::now();

        let raw = match tokio::time::timeout(budget, processor.process(&target)).await {
            Ok(raw) => raw,
            Err(_elapsed) => {
                debug!(
                    target_id = %entry.target_id,
                    tier = %entry.tier,
                    budget_secs = budget.as_secs(),
                    "Processor exceeded budget"
                );
                RawOutcome::TimedOut {
                    after_ms: budget.as_millis() as u64,
                }
            }
        };

        self.route(&entry, raw, None, started_at).await?;
        Ok(true)
    }

    async fn step_batched(
        &self,
        tier: Tier,
        processor: &Arc<dyn BatchProcessor>,
        flush: bool,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<StepReport> {
        let ready = self
            .store
            .peek_ready(tier, self.config.dequeue_limit)
            .map_err(|e| OrchestratorError::queue(tier, e))?;
        if ready.is_empty() || cancel.is_cancelled() {
            return Ok(StepReport::default());
        }
        let take = if flush {
            ready.len()
        } else {
            let oldest = ready.iter().map(|e| e.enqueued_at).min();
            self.composer.dispatch_count(ready.len(), oldest, Utc::now())
        };
        if take == 0 {
            return Ok(StepReport::default());
        }

        let entries = self
            .store
            .dequeue_ready(tier, take)
            .map_err(|e| OrchestratorError::queue(tier, e))?;
        let mut members = Vec::with_capacity(entries.len());
        let mut by_id = HashMap::with_capacity(entries.len());
        for entry in entries {
            members.push(self.load_target(&entry)?);
            by_id.insert(entry.target_id.clone(), entry);
        }

        let batches = self.composer.compose(tier, members);
        let mut report = StepReport {
            batches: batches.len(),
            ..Default::default()
        };

        let halt = cancel.child_token();
        let results: Vec<OrchestratorResult<usize>> = stream::iter(batches)
            .map(|batch| {
                let halt = &halt;
                let by_id = &by_id;
                async move {
                    let result = self.run_batch(processor, batch, by_id, halt).await;
                    if result.as_ref().is_err_and(OrchestratorError::is_fatal) {
                        halt.cancel();
                    }
                    result
                }
            })
            .buffer_unordered(self.config.batch_in_flight.max(1))
            .collect()
            .await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(routed) => report.processed += routed,
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => error!(tier = %tier, error = %e, "Additional fault in halted step"),
            }
        }
        report.skipped = by_id.len().saturating_sub(report.processed);
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Dispatch one batch and route every member's outcome.
    ///
    /// Members the collaborator omits are recorded as failures; ids it
    /// returns that are not members are ignored.
    async fn run_batch(
        &self,
        processor: &Arc<dyn BatchProcessor>,
        batch: Batch,
        entries: &HashMap<TargetId, QueueEntry>,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<usize> {
        if cancel.is_cancelled() {
            return Ok(0);
        }

        info!(
            tier = %batch.tier,
            batch = %batch.id,
            key = %batch.key,
            size = batch.len(),
            "Dispatching batch"
        );
        self.events.publish(EnrichmentEvent::BatchDispatched {
            batch_id: batch.id.clone(),
            tier: batch.tier,
            key: batch.key.clone(),
            size: batch.len(),
            timestamp: Utc::now(),
        });

        let budget = self.config.budgets.for_tier(batch.tier);
        let started_at = Utc::now();
        let mut outcomes: HashMap<TargetId, RawOutcome> =
            match tokio::time::timeout(budget, processor.process_batch(&batch)).await {
                Ok(results) => {
                    let mut outcomes = HashMap::with_capacity(results.len());
                    for (target_id, raw) in results {
                        if !batch.members.iter().any(|m| m.id == target_id) {
                            warn!(batch = %batch.id, target_id = %target_id, "Ignoring outcome for non-member");
                            continue;
                        }
                        outcomes.entry(target_id).or_insert(raw);
                    }
                    outcomes
                }
                Err(_elapsed) => {
                    warn!(batch = %batch.id, budget_secs = budget.as_secs(), "Batch exceeded budget");
                    let after_ms = budget.as_millis() as u64;
                    batch
                        .members
                        .iter()
                        .map(|m| (m.id.clone(), RawOutcome::TimedOut { after_ms }))
                        .collect()
                }
            };

        let mut routed = 0;
        for member in &batch.members {
            let entry = entries.get(&member.id).ok_or_else(|| {
                OrchestratorError::queue(
                    batch.tier,
                    StoreError::invariant(&member.id, "batch member was never dequeued"),
                )
            })?;
            let raw = outcomes
                .remove(&member.id)
                .unwrap_or_else(|| RawOutcome::failed("missing from batch response"));
            self.route(entry, raw, Some(batch.id.clone()), started_at)
                .await?;
            routed += 1;
        }
        Ok(routed)
    }

    fn load_target(&self, entry: &QueueEntry) -> OrchestratorResult<Target> {
        self.store.get_target(&entry.target_id)?.ok_or_else(|| {
            OrchestratorError::queue(
                entry.tier,
                StoreError::invariant(&entry.target_id, "queued target has no record"),
            )
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("processors", &self.processors)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
