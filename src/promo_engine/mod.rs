//! Promotion relay engine
//!
//! Picks a few listing sources per run, extracts candidate promotions, drops
//! invalid and already-announced ones, and fans the rest out to the configured
//! chat channels. Everything runs sequentially inside one run; the history and
//! rotation state are owned by the caller and passed in by reference.

pub mod affiliate;
pub mod channels;
pub mod config;
pub mod deduplicator;
pub mod delivery;
pub mod errors;
pub mod history;
pub mod message;
pub mod normalizer;
pub mod parser;
pub mod rate_limiter;
pub mod retry;
pub mod rotation;
pub mod scraper;
pub mod store;
pub mod validator;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use affiliate::{LinkRewriter, Passthrough};
use deduplicator::SimilarityMatcher;
use delivery::DeliveryFanout;
use history::HistoryStore;
use message::MessageFormatter;
use rate_limiter::Pacer;
use retry::RetryPolicy;
use rotation::RotationSelector;
use scraper::Extractor;
use validator::Validator;

/// One promotion scraped from a listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Key stored in the history. Defaults to the display name.
    pub identifier: String,
    pub display_name: String,
    /// Raw price texts keyed by field (`price`, `old_price`, ...).
    pub price_fields: BTreeMap<String, String>,
    pub image_url: Option<String>,
    pub source_url: String,
    pub affiliate_url: Option<String>,
}

impl CandidateRecord {
    pub fn new(display_name: impl Into<String>, source_url: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            identifier: display_name.clone(),
            display_name,
            price_fields: BTreeMap::new(),
            image_url: None,
            source_url: source_url.into(),
            affiliate_url: None,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_price(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.price_fields.insert(field.into(), value.into());
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_affiliate_url(mut self, url: impl Into<String>) -> Self {
        self.affiliate_url = Some(url.into());
        self
    }

    pub fn price(&self, field: &str) -> Option<&str> {
        self.price_fields.get(field).map(String::as_str)
    }

    /// The link to announce: the affiliate link when present.
    pub fn link(&self) -> &str {
        self.affiliate_url.as_deref().unwrap_or(&self.source_url)
    }
}

/// Summary of a single run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sources: Vec<String>,
    pub failed_sources: Vec<String>,
    pub candidates: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
    /// Candidates left unprocessed once the delivery cap was reached.
    pub skipped_by_cap: usize,
    pub ended_early: bool,
}

impl RunReport {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            sources: Vec::new(),
            failed_sources: Vec::new(),
            candidates: 0,
            rejected: 0,
            duplicates: 0,
            delivered: 0,
            delivery_failures: 0,
            skipped_by_cap: 0,
            ended_early: false,
        }
    }

    fn finish(mut self, ended_early: bool) -> Self {
        self.ended_early = ended_early;
        self.finished_at = Some(Utc::now());
        self
    }
}

enum CandidateOutcome {
    Rejected,
    Duplicate,
    Delivered,
    NotDelivered,
}

/// Drives one run: select sources, fetch, then validate, dedup, deliver and
/// record each candidate in turn.
pub struct Orchestrator {
    extractor: Box<dyn Extractor>,
    validator: Validator,
    matcher: SimilarityMatcher,
    fanout: DeliveryFanout,
    formatter: MessageFormatter,
    links: Box<dyn LinkRewriter>,
    retry: RetryPolicy,
    source_pause: Pacer,
    candidate_pause: Pacer,
    sources_per_rotation: usize,
    max_deliveries: usize,
}

impl Orchestrator {
    pub fn new(
        extractor: Box<dyn Extractor>,
        validator: Validator,
        matcher: SimilarityMatcher,
        fanout: DeliveryFanout,
        formatter: MessageFormatter,
    ) -> Self {
        Self {
            extractor,
            validator,
            matcher,
            fanout,
            formatter,
            links: Box::new(Passthrough),
            retry: RetryPolicy::default(),
            source_pause: Pacer::from_secs(5.0, 10.0),
            candidate_pause: Pacer::from_secs(3.0, 7.0),
            sources_per_rotation: 2,
            max_deliveries: 10,
        }
    }

    pub fn with_link_rewriter(mut self, links: Box<dyn LinkRewriter>) -> Self {
        self.links = links;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pauses(mut self, source_pause: Pacer, candidate_pause: Pacer) -> Self {
        self.source_pause = source_pause;
        self.candidate_pause = candidate_pause;
        self
    }

    /// `max_deliveries` caps delivery attempts per run; rejected and
    /// duplicate candidates do not count against it.
    pub fn with_limits(mut self, sources_per_rotation: usize, max_deliveries: usize) -> Self {
        self.sources_per_rotation = sources_per_rotation.max(1);
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    pub async fn run<R: Rng>(&self, history: &mut HistoryStore, rotation: &mut RotationSelector<R>) -> RunReport {
        let mut report = RunReport::start();

        report.sources = rotation.select_next(self.sources_per_rotation);
        if report.sources.is_empty() {
            warn!("No sources configured, nothing to do");
            return report.finish(true);
        }
        info!("Selected sources: {:?}", report.sources);

        let mut batches = Vec::with_capacity(report.sources.len());
        for (index, source) in report.sources.iter().enumerate() {
            if index > 0 {
                self.source_pause.pause().await;
            }
            let label = format!("fetch {source}");
            match self.retry.run(&label, |_| self.extractor.fetch(source)).await {
                Ok(found) => {
                    info!("Found {} candidates at {}", found.len(), source);
                    batches.push(found);
                }
                Err(e) => {
                    warn!("Giving up on {}: {}", source, e);
                    report.failed_sources.push(source.clone());
                }
            }
        }

        if report.failed_sources.len() == report.sources.len() {
            error!("Every selected source failed, ending the run");
            return report.finish(true);
        }
        let candidates = interleave(batches);
        if candidates.is_empty() {
            info!("No candidates found this run");
            return report.finish(true);
        }
        report.candidates = candidates.len();

        let ready = self.fanout.readiness().await;

        let total = candidates.len();
        let mut paused = true;
        for (index, candidate) in candidates.into_iter().enumerate() {
            if report.delivered + report.delivery_failures >= self.max_deliveries {
                report.skipped_by_cap = total - index;
                info!(
                    "Reached {} deliveries, leaving {} candidates for later runs",
                    self.max_deliveries, report.skipped_by_cap
                );
                break;
            }
            if !paused {
                self.candidate_pause.pause().await;
                paused = true;
            }
            match self.process_candidate(candidate, history, &ready).await {
                CandidateOutcome::Rejected => report.rejected += 1,
                CandidateOutcome::Duplicate => report.duplicates += 1,
                CandidateOutcome::Delivered => {
                    report.delivered += 1;
                    paused = false;
                }
                CandidateOutcome::NotDelivered => {
                    report.delivery_failures += 1;
                    paused = false;
                }
            }
        }

        info!(
            "Run finished: {} delivered, {} duplicates, {} rejected, {} failed",
            report.delivered, report.duplicates, report.rejected, report.delivery_failures
        );
        report.finish(false)
    }

    async fn process_candidate(
        &self,
        mut candidate: CandidateRecord,
        history: &mut HistoryStore,
        ready: &[bool],
    ) -> CandidateOutcome {
        if candidate.affiliate_url.is_none() {
            let link = self.links.rewrite(&candidate.source_url);
            if link != candidate.source_url {
                candidate.affiliate_url = Some(link);
            }
        }

        let name = candidate.display_name.clone();
        let validated = match self.validator.validate(candidate).await {
            Ok(validated) => validated,
            Err(reasons) => {
                let reasons: Vec<String> = reasons.iter().map(ToString::to_string).collect();
                warn!("Rejected {:?}: {}", name, reasons.join("; "));
                return CandidateOutcome::Rejected;
            }
        };

        if history.contains(&validated.record.identifier, &self.matcher) {
            info!("Already announced, skipping: {}", name);
            return CandidateOutcome::Duplicate;
        }

        let announcement = self.formatter.announce(&validated.record);
        let outcome = self.fanout.deliver(&validated, &announcement, ready).await;

        if outcome.should_record {
            history.append(validated.record.identifier.clone());
            history.save();
            info!("Announced {}", name);
            CandidateOutcome::Delivered
        } else {
            warn!("Delivery of {} did not meet the {:?} policy", name, self.fanout.policy());
            CandidateOutcome::NotDelivered
        }
    }
}

/// Round-robin merge so every source gets a turn before the delivery cap.
fn interleave(batches: Vec<Vec<CandidateRecord>>) -> Vec<CandidateRecord> {
    let total = batches.iter().map(Vec::len).sum();
    let mut sources: Vec<_> = batches.into_iter().map(Vec::into_iter).collect();
    let mut merged = Vec::with_capacity(total);
    while merged.len() < total {
        for source in sources.iter_mut() {
            if let Some(candidate) = source.next() {
                merged.push(candidate);
            }
        }
    }
    merged
}
