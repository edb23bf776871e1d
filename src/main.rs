use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use promo_relay::promo_engine::affiliate::{LinkRewriter, Passthrough, QueryAffiliate};
use promo_relay::promo_engine::channels::{GreenApiChannel, TelegramChannel};
use promo_relay::promo_engine::config::{RunConfig, RunMode};
use promo_relay::promo_engine::deduplicator::SimilarityMatcher;
use promo_relay::promo_engine::delivery::{Channel, ChannelTarget, DeliveryFanout};
use promo_relay::promo_engine::history::HistoryStore;
use promo_relay::promo_engine::message::MessageFormatter;
use promo_relay::promo_engine::normalizer::Normalizer;
use promo_relay::promo_engine::parser::ListingParser;
use promo_relay::promo_engine::retry::RetryPolicy;
use promo_relay::promo_engine::rotation::RotationSelector;
use promo_relay::promo_engine::scraper::HttpExtractor;
use promo_relay::promo_engine::validator::{HttpImageProbe, ValidationPolicy, Validator};
use promo_relay::promo_engine::Orchestrator;
use promo_relay::routes::status::{status_routes, SharedStatus, StatusSnapshot};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RunConfig::from_env().context("invalid configuration")?;
    info!(
        "🛍️ promo-relay starting in {:?} mode with {} sources",
        config.mode,
        config.sources.len()
    );
    if config.mode == RunMode::Test {
        warn!("Test mode: history and rotation files are read but never written");
    }

    let orchestrator = build_orchestrator(&config)?;
    let persistence = config.persistence();
    let mut history = HistoryStore::open(&config.history_path, config.history_capacity, persistence);
    let mut rotation = RotationSelector::open(config.sources.clone(), &config.rotation_path, persistence);

    let status: SharedStatus = Arc::new(RwLock::new(StatusSnapshot {
        mode: format!("{:?}", config.mode).to_lowercase(),
        history: history.entries().cloned().collect(),
        ..StatusSnapshot::default()
    }));

    if let Some(addr) = &config.status_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind status server on {addr}"))?;
        info!("Status server listening on {}", addr);
        let app = status_routes(status.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Status server stopped: {}", e);
            }
        });
    }

    let mut first = true;
    loop {
        if first && !config.force_run_on_start {
            info!("Waiting {:?} before the first run", config.run_interval);
            sleep(config.run_interval).await;
        }
        first = false;

        let report = orchestrator.run(&mut history, &mut rotation).await;
        {
            let mut snapshot = status.write().await;
            snapshot.runs += 1;
            snapshot.history = history.entries().cloned().collect();
            snapshot.last_report = Some(report);
        }

        info!("Next run in {:?}", config.run_interval);
        sleep(config.run_interval).await;
    }
}

fn build_orchestrator(config: &RunConfig) -> anyhow::Result<Orchestrator> {
    let mut targets = Vec::new();
    if let Some(telegram) = &config.telegram {
        let channel: Arc<dyn Channel> = Arc::new(TelegramChannel::new(&telegram.bot_token, config.http_timeout));
        targets.push(ChannelTarget::new(channel, telegram.destinations.clone()));
    }
    if let Some(whatsapp) = &config.whatsapp {
        let channel: Arc<dyn Channel> = Arc::new(GreenApiChannel::new(
            &whatsapp.instance_id,
            &whatsapp.api_token,
            config.http_timeout,
        ));
        targets.push(ChannelTarget::new(channel, whatsapp.destinations.clone()));
    }

    let retry = RetryPolicy::new(config.retry_attempts, config.retry_backoff);
    let fanout = DeliveryFanout::new(targets, config.record_policy, retry, config.send_pause)
        .with_admin_alerts(config.admin_destinations.clone());

    let validator = Validator::new(
        ValidationPolicy {
            require_image: config.require_image,
            max_image_bytes: config.max_image_bytes,
            excluded_keywords: config.excluded_keywords.clone(),
            ..ValidationPolicy::default()
        },
        Box::new(HttpImageProbe::new(config.http_timeout)),
    );

    let matcher = SimilarityMatcher::with_normalizer(
        config.similarity_threshold,
        Normalizer::new(config.keep_punctuation),
    );

    let parser = ListingParser::new(&config.selectors).context("invalid listing selectors")?;
    let extractor = HttpExtractor::new(parser, config.http_timeout, config.max_items_per_source);

    let links: Box<dyn LinkRewriter> = match &config.affiliate {
        Some(affiliate) => Box::new(QueryAffiliate::new(
            affiliate.base_url.clone(),
            affiliate.params.clone(),
            affiliate.target_param.clone(),
        )),
        None => Box::new(Passthrough),
    };

    Ok(Orchestrator::new(
        Box::new(extractor),
        validator,
        matcher,
        fanout,
        MessageFormatter::new(config.store_label.clone()),
    )
    .with_link_rewriter(links)
    .with_retry(retry)
    .with_pauses(config.source_pause, config.candidate_pause)
    .with_limits(config.sources_per_rotation, config.max_candidates_per_run))
}
