//! Tiers 4 and 5: hand a whole batch to a costly collaborator

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use coordination::processor::{BatchProcessor, RawOutcome};
use coordination::{Batch, BellSchedule, ExtractedResult, TargetId, Tier};

use super::collaborator_failure;
use crate::clients::{BatchExtractor, BatchPayload, BatchSearcher, CollaboratorError};

/// Assumed when the search service finds a schedule but reports no score
const DEFAULT_SEARCH_CONFIDENCE: f64 = 0.5;

/// Every member shares the fate of a failed call
fn fail_all(batch: &Batch, err: &CollaboratorError) -> Vec<(TargetId, RawOutcome)> {
    warn!(batch = %batch.id, tier = %batch.tier, error = %err, "Batch call failed");
    batch
        .members
        .iter()
        .map(|t| (t.id.clone(), collaborator_failure(err)))
        .collect()
}

/// Drop answers for targets that were never sent
fn retain_members(batch: &Batch, answers: &mut Vec<(TargetId, RawOutcome)>) {
    answers.retain(|(id, _)| {
        let known = batch.members.iter().any(|t| &t.id == id);
        if !known {
            debug!(batch = %batch.id, target_id = %id, "Ignoring answer for unknown member");
        }
        known
    });
}

fn found(
    tier: Tier,
    schedule: BellSchedule,
    confidence: f64,
    source_url: Option<String>,
) -> RawOutcome {
    RawOutcome::Extracted {
        result: ExtractedResult {
            schedule,
            confidence: confidence.clamp(0.0, 1.0),
            tier,
            source_urls: source_url.into_iter().collect(),
        },
        discovered_urls: vec![],
    }
}

pub struct ExtractionProcessor {
    extractor: Arc<dyn BatchExtractor>,
}

impl ExtractionProcessor {
    pub fn new(extractor: Arc<dyn BatchExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl BatchProcessor for ExtractionProcessor {
    fn tier(&self) -> Tier {
        Tier::Extraction
    }

    async fn process_batch(&self, batch: &Batch) -> Vec<(TargetId, RawOutcome)> {
        let payload = BatchPayload::from_batch(batch);
        let items = match self.extractor.extract_batch(&payload).await {
            Ok(items) => items,
            Err(e) => return fail_all(batch, &e),
        };

        let mut answers: Vec<_> = items
            .into_iter()
            .map(|item| {
                let outcome = match item.extracted {
                    Some(schedule) if !schedule.grades.is_empty() => {
                        found(Tier::Extraction, schedule, item.confidence, item.source_url)
                    }
                    _ => RawOutcome::Empty {
                        url: item.source_url,
                        detail: "extraction service found no schedule".to_string(),
                        discovered_urls: vec![],
                    },
                };
                (item.target_id, outcome)
            })
            .collect();
        retain_members(batch, &mut answers);
        answers
    }
}

pub struct SearchProcessor {
    searcher: Arc<dyn BatchSearcher>,
}

impl SearchProcessor {
    pub fn new(searcher: Arc<dyn BatchSearcher>) -> Self {
        Self { searcher }
    }
}

#[async_trait]
impl BatchProcessor for SearchProcessor {
    fn tier(&self) -> Tier {
        Tier::Search
    }

    async fn process_batch(&self, batch: &Batch) -> Vec<(TargetId, RawOutcome)> {
        let payload = BatchPayload::from_batch(batch);
        let items = match self.searcher.search_batch(&payload).await {
            Ok(items) => items,
            Err(e) => return fail_all(batch, &e),
        };

        let mut answers: Vec<_> = items
            .into_iter()
            .map(|item| {
                let outcome = match (item.found, item.extracted) {
                    (true, Some(schedule)) if !schedule.grades.is_empty() => found(
                        Tier::Search,
                        schedule,
                        item.confidence.unwrap_or(DEFAULT_SEARCH_CONFIDENCE),
                        item.url,
                    ),
                    (true, _) => RawOutcome::Empty {
                        url: item.url.clone(),
                        detail: "search found a page but no schedule".to_string(),
                        discovered_urls: item.url.into_iter().collect(),
                    },
                    (false, _) => RawOutcome::Empty {
                        url: None,
                        detail: "search found nothing".to_string(),
                        discovered_urls: vec![],
                    },
                };
                (item.target_id, outcome)
            })
            .collect();
        retain_members(batch, &mut answers);
        answers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use coordination::{GradeSchedule, Target};

    use crate::clients::{CollaboratorResult, ExtractionItem, SearchItem};

    fn batch(tier: Tier) -> Batch {
        Batch {
            id: "b-1".to_string(),
            tier,
            key: "CA".to_string(),
            members: vec![
                Target::new("d-1", "Alpha USD", "CA").with_homepage("https://alpha.org"),
                Target::new("d-2", "Beta USD", "CA"),
            ],
        }
    }

    fn schedule() -> BellSchedule {
        BellSchedule {
            grades: vec![GradeSchedule {
                grade_band: "all".to_string(),
                start_time: "08:00".to_string(),
                end_time: "15:00".to_string(),
                instructional_minutes: None,
            }],
            notes: None,
        }
    }

    struct FakeExtractor {
        items: CollaboratorResult<Vec<ExtractionItem>>,
        seen: Mutex<Vec<BatchPayload>>,
    }

    #[async_trait]
    impl BatchExtractor for FakeExtractor {
        async fn extract_batch(
            &self,
            payload: &BatchPayload,
        ) -> CollaboratorResult<Vec<ExtractionItem>> {
            self.seen.lock().unwrap().push(payload.clone());
            match &self.items {
                Ok(items) => Ok(items.clone()),
                Err(_) => Err(CollaboratorError::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                }),
            }
        }
    }

    struct FakeSearcher(Vec<SearchItem>);

    #[async_trait]
    impl BatchSearcher for FakeSearcher {
        async fn search_batch(&self, _payload: &BatchPayload) -> CollaboratorResult<Vec<SearchItem>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_extraction_maps_each_item() {
        let extractor = Arc::new(FakeExtractor {
            items: Ok(vec![
                ExtractionItem {
                    target_id: "d-1".to_string(),
                    extracted: Some(schedule()),
                    confidence: 1.3,
                    source_url: Some("https://alpha.org/bell".to_string()),
                },
                ExtractionItem {
                    target_id: "d-2".to_string(),
                    extracted: None,
                    confidence: 0.0,
                    source_url: None,
                },
                ExtractionItem {
                    target_id: "stranger".to_string(),
                    extracted: Some(schedule()),
                    confidence: 0.9,
                    source_url: None,
                },
            ]),
            seen: Mutex::new(vec![]),
        });
        let processor = ExtractionProcessor::new(extractor.clone());

        let answers = processor.process_batch(&batch(Tier::Extraction)).await;
        assert_eq!(answers.len(), 2);

        let (id, outcome) = &answers[0];
        assert_eq!(id, "d-1");
        let result = outcome.result().unwrap();
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.tier, Tier::Extraction);
        assert_eq!(result.source_urls, vec!["https://alpha.org/bell"]);
        assert!(matches!(answers[1].1, RawOutcome::Empty { .. }));

        let seen = extractor.seen.lock().unwrap();
        assert_eq!(seen[0].key, "CA");
        assert_eq!(seen[0].members.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_call_fails_every_member() {
        let processor = ExtractionProcessor::new(Arc::new(FakeExtractor {
            items: Err(CollaboratorError::Decode("unused".to_string())),
            seen: Mutex::new(vec![]),
        }));
        let answers = processor.process_batch(&batch(Tier::Extraction)).await;
        assert_eq!(answers.len(), 2);
        for (_, outcome) in answers {
            match outcome {
                RawOutcome::Failed { error } => assert!(error.contains("503"), "{error}"),
                other => panic!("expected failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_search_outcomes() {
        let processor = SearchProcessor::new(Arc::new(FakeSearcher(vec![
            SearchItem {
                target_id: "d-1".to_string(),
                found: true,
                url: Some("https://alpha.org/hours".to_string()),
                extracted: Some(schedule()),
                confidence: None,
            },
            SearchItem {
                target_id: "d-2".to_string(),
                found: true,
                url: Some("https://beta.org/bells.pdf".to_string()),
                extracted: None,
                confidence: None,
            },
        ])));

        let answers = processor.process_batch(&batch(Tier::Search)).await;
        let result = answers[0].1.result().unwrap();
        assert_eq!(result.confidence, DEFAULT_SEARCH_CONFIDENCE);
        assert_eq!(result.tier, Tier::Search);
        assert_eq!(
            answers[1].1.discovered_urls(),
            &["https://beta.org/bells.pdf".to_string()]
        );
    }
}
