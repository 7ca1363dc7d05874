//! Integration tests for the classify → decide flow
//!
//! Feeds realistic raw outcomes through the classifier and the escalation
//! policy together, the way the orchestrator does for every attempt.

use coordination::{
    Action, Category, Classifier, EscalationPolicy, EscalationReason, ExtractedResult,
    Observation, QueueEntry, RawOutcome, Tier,
};

fn http(status: u16, body: &str, server: Option<&str>) -> RawOutcome {
    RawOutcome::Http {
        status,
        url: "https://district.example/bell-schedule".to_string(),
        body_excerpt: Some(body.to_string()),
        server: server.map(String::from),
    }
}

fn extracted(confidence: f64) -> RawOutcome {
    RawOutcome::Extracted {
        result: ExtractedResult {
            schedule: Default::default(),
            confidence,
            tier: Tier::Rendered,
            source_urls: vec![],
        },
        discovered_urls: vec![],
    }
}

/// Classify `raw` and decide for `entry`, counting `prior_not_found` earlier misses
fn run(raw: &RawOutcome, entry: &QueueEntry, prior_not_found: u32) -> (Category, Action) {
    let classification = Classifier::new().classify(raw);
    let mut observation = Observation::new(classification.category);
    if let Some(c) = classification.confidence {
        observation = observation.with_confidence(c);
    }
    if classification.category == Category::NotFound {
        observation = observation.with_not_found_total(prior_not_found + 1);
    }
    let decision = EscalationPolicy::new().decide(entry, &observation);
    (classification.category, decision.action)
}

/// Test: A Cloudflare 403 stops the target on its first attempt
#[test]
fn test_waf_block_stops_immediately() {
    let entry = QueueEntry::new("d-1", Tier::Probe);
    let raw = http(403, "<title>Attention Required! | Cloudflare</title>", Some("cloudflare"));

    let (category, action) = run(&raw, &entry, 0);
    assert_eq!(category, Category::SecurityBlock);
    assert_eq!(action, Action::StopBlocked);
}

/// Test: A challenge interstitial behind a 200 is still a block
#[test]
fn test_challenge_page_with_200_blocks() {
    let entry = QueueEntry::new("d-1", Tier::Rendered);
    let raw = http(200, "<title>Just a moment...</title><div id=\"cf-chl-widget\">", None);

    let (category, action) = run(&raw, &entry, 0);
    assert_eq!(category, Category::SecurityBlock);
    assert_eq!(action, Action::StopBlocked);
}

/// Test: A bare 403 is retried once, then escalated, never blocked
#[test]
fn test_bare_forbidden_is_transient() {
    let mut entry = QueueEntry::new("d-1", Tier::Probe);
    let raw = http(403, "Forbidden", Some("nginx"));

    let (category, action) = run(&raw, &entry, 0);
    assert_eq!(category, Category::TransientError);
    assert_eq!(action, Action::RetrySameTier);

    entry.consecutive_failures = 1;
    let (_, action) = run(&raw, &entry, 0);
    assert_eq!(action, Action::AdvanceTier { to: Tier::Rendered });
}

/// Test: not_found accumulates across tiers until the limit flags the target
#[test]
fn test_not_found_accumulates_to_manual_review() {
    let raw = http(404, "Not Found", None);

    let entry = QueueEntry::new("d-1", Tier::Probe);
    assert_eq!(run(&raw, &entry, 0).1, Action::RetrySameTier);

    let mut entry = QueueEntry::new("d-1", Tier::Probe);
    entry.consecutive_failures = 1;
    assert_eq!(run(&raw, &entry, 1).1, Action::AdvanceTier { to: Tier::Rendered });

    let entry = QueueEntry::new("d-1", Tier::Rendered);
    assert_eq!(run(&raw, &entry, 2).1, Action::RetrySameTier);

    let mut entry = QueueEntry::new("d-1", Tier::Rendered);
    entry.consecutive_failures = 1;
    let (category, action) = run(&raw, &entry, 3);
    assert_eq!(category, Category::NotFound);
    assert_eq!(action, Action::StopManualReview);
}

/// Test: Confidence around the threshold decides between stop and advance
#[test]
fn test_confidence_threshold() {
    let entry = QueueEntry::new("d-1", Tier::Rendered);

    assert_eq!(run(&extracted(0.85), &entry, 0), (Category::Success, Action::StopSuccess));
    assert_eq!(run(&extracted(0.7), &entry, 0).1, Action::StopSuccess);
    assert_eq!(
        run(&extracted(0.4), &entry, 0),
        (Category::LowConfidence, Action::AdvanceTier { to: Tier::Document })
    );
}

/// Test: Weak results at the last tier go to a human instead of advancing
#[test]
fn test_final_tier_low_confidence_goes_to_review() {
    let entry = QueueEntry::new("d-1", Tier::Search);
    let classification = Classifier::new().classify(&extracted(0.4));
    let decision = EscalationPolicy::new().decide(
        &entry,
        &Observation::new(classification.category).with_confidence(0.4),
    );

    assert_eq!(decision.action, Action::StopManualReview);
    assert!(matches!(
        decision.reason,
        EscalationReason::FinalTierExhausted { tier: Tier::Search, .. }
    ));
}

/// Test: Timeouts, reported either way, are retried like transient errors
#[test]
fn test_timeouts_retry() {
    let entry = QueueEntry::new("d-1", Tier::Document);
    for raw in [
        RawOutcome::TimedOut { after_ms: 60_000 },
        RawOutcome::failed("operation timed out after 30s"),
    ] {
        let (category, action) = run(&raw, &entry, 0);
        assert_eq!(category, Category::Timeout);
        assert_eq!(action, Action::RetrySameTier);
    }
}
