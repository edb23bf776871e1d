//! Multi-channel fan-out with per-channel image-to-text fallback

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::promo_engine::message::{Announcement, Markup};
use crate::promo_engine::rate_limiter::Pacer;
use crate::promo_engine::retry::RetryPolicy;
use crate::promo_engine::validator::ValidatedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Telegram,
    WhatsApp,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Telegram => write!(f, "telegram"),
            ChannelKind::WhatsApp => write!(f, "whatsapp"),
        }
    }
}

/// One outbound messaging backend. Destinations are opaque chat ids.
#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn supports_media(&self) -> bool {
        true
    }

    fn markup(&self) -> Markup {
        Markup::TelegramMarkdown
    }

    /// Longest caption a media message may carry; longer texts go out as text.
    fn caption_limit(&self) -> Option<usize> {
        None
    }

    /// Checked once per run; a channel that is not ready is skipped.
    async fn is_ready(&self) -> bool {
        true
    }

    async fn send_text(&self, destination: &str, text: &str) -> bool;

    async fn send_media(&self, destination: &str, text: &str, media_url: &str) -> bool;
}

/// A configured channel with its destinations.
#[derive(Clone)]
pub struct ChannelTarget {
    pub channel: Arc<dyn Channel>,
    pub destinations: Vec<String>,
}

impl ChannelTarget {
    pub fn new(channel: Arc<dyn Channel>, destinations: Vec<String>) -> Self {
        Self { channel, destinations }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    /// Media was refused and the text fallback carried the message.
    MediaRejected,
    /// Every media and text attempt failed.
    SendFailed,
    NotReady,
    NoDestinations,
    /// Not attempted because the primary channel failed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelResult {
    pub channel: ChannelKind,
    pub attempted_media: bool,
    pub success: bool,
    pub error_kind: Option<DeliveryErrorKind>,
}

/// Which deliveries make a candidate count as announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Attempt every channel; record when any succeeded.
    #[default]
    AnySuccess,
    /// Attempt the first (primary) channel alone first; others only after it succeeded.
    PrimaryFirst,
    /// Attempt every channel; record only when all succeeded.
    AllSucceeded,
}

impl FromStr for RecordPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" | "any_success" => Ok(RecordPolicy::AnySuccess),
            "primary" | "primary_first" => Ok(RecordPolicy::PrimaryFirst),
            "all" | "all_succeeded" => Ok(RecordPolicy::AllSucceeded),
            other => Err(format!("unknown record policy {other:?}, expected any, primary or all")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub results: Vec<ChannelResult>,
    pub should_record: bool,
}

impl DeliveryOutcome {
    pub fn any_success(&self) -> bool {
        self.results.iter().any(|r| r.success)
    }
}

pub struct DeliveryFanout {
    targets: Vec<ChannelTarget>,
    policy: RecordPolicy,
    retry: RetryPolicy,
    send_pause: Pacer,
    admin_destinations: Vec<String>,
}

impl DeliveryFanout {
    pub fn new(targets: Vec<ChannelTarget>, policy: RecordPolicy, retry: RetryPolicy, send_pause: Pacer) -> Self {
        Self {
            targets,
            policy,
            retry,
            send_pause,
            admin_destinations: Vec::new(),
        }
    }

    /// Chats told through a ready Telegram channel when another channel is down.
    pub fn with_admin_alerts(mut self, destinations: Vec<String>) -> Self {
        self.admin_destinations = destinations;
        self
    }

    pub fn policy(&self) -> RecordPolicy {
        self.policy
    }

    pub fn targets(&self) -> &[ChannelTarget] {
        &self.targets
    }

    /// Readiness of every channel, in target order. Evaluated once per run.
    pub async fn readiness(&self) -> Vec<bool> {
        let mut ready = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let ok = target.channel.is_ready().await;
            if !ok {
                warn!("Channel {} is not ready, skipping it this run", target.channel.kind());
            }
            ready.push(ok);
        }
        self.alert_admins(&ready).await;
        ready
    }

    async fn alert_admins(&self, ready: &[bool]) {
        let down: Vec<String> = self
            .targets
            .iter()
            .zip(ready)
            .filter(|(_, ok)| !**ok)
            .map(|(target, _)| target.channel.kind().to_string())
            .collect();
        if down.is_empty() || self.admin_destinations.is_empty() {
            return;
        }

        let Some(notifier) = self
            .targets
            .iter()
            .zip(ready)
            .find(|(target, ok)| **ok && target.channel.kind() == ChannelKind::Telegram)
            .map(|(target, _)| target.channel.as_ref())
        else {
            warn!("No ready Telegram channel to report {} as down", down.join(", "));
            return;
        };

        let alert = format!(
            "⚠️ Canal desconectado: {}. Os envios por ele estão suspensos até a reconexão.",
            down.join(", ")
        );
        for destination in &self.admin_destinations {
            if !self.send_text(notifier, destination, &alert).await {
                warn!("Could not alert admin {} about {}", destination, down.join(", "));
            }
        }
    }

    /// Sends the announcement through every channel, in each channel's markup,
    /// according to the record policy. `ready` comes from
    /// [`DeliveryFanout::readiness`]; missing entries count as ready.
    pub async fn deliver(&self, record: &ValidatedRecord, announcement: &Announcement, ready: &[bool]) -> DeliveryOutcome {
        let mut results = Vec::with_capacity(self.targets.len());

        for (index, target) in self.targets.iter().enumerate() {
            let primary_failed = self.policy == RecordPolicy::PrimaryFirst
                && results.first().is_some_and(|r: &ChannelResult| !r.success);

            let result = if primary_failed {
                ChannelResult {
                    channel: target.channel.kind(),
                    attempted_media: false,
                    success: false,
                    error_kind: Some(DeliveryErrorKind::Skipped),
                }
            } else if !ready.get(index).copied().unwrap_or(true) {
                ChannelResult {
                    channel: target.channel.kind(),
                    attempted_media: false,
                    success: false,
                    error_kind: Some(DeliveryErrorKind::NotReady),
                }
            } else {
                self.deliver_to_channel(target, record, announcement).await
            };

            results.push(result);
        }

        let should_record = match self.policy {
            RecordPolicy::AnySuccess => results.iter().any(|r| r.success),
            RecordPolicy::PrimaryFirst => results.first().is_some_and(|r| r.success),
            RecordPolicy::AllSucceeded => !results.is_empty() && results.iter().all(|r| r.success),
        };

        DeliveryOutcome { results, should_record }
    }

    async fn deliver_to_channel(
        &self,
        target: &ChannelTarget,
        record: &ValidatedRecord,
        announcement: &Announcement,
    ) -> ChannelResult {
        let channel = target.channel.as_ref();
        let kind = channel.kind();
        let message = announcement.text(channel.markup());
        let caption_fits = channel
            .caption_limit()
            .map_or(true, |limit| message.chars().count() <= limit);
        if record.media_url.is_some() && !caption_fits {
            debug!("Message too long for a {} caption, sending text only", kind);
        }
        let media = record
            .media_url
            .as_deref()
            .filter(|_| channel.supports_media() && caption_fits);

        if target.destinations.is_empty() {
            warn!("Channel {} has no destinations configured", kind);
            return ChannelResult {
                channel: kind,
                attempted_media: false,
                success: false,
                error_kind: Some(DeliveryErrorKind::NoDestinations),
            };
        }

        let mut delivered = 0;
        let mut media_rejected = false;

        for destination in &target.destinations {
            let sent = match media {
                Some(media_url) => {
                    if self.send_media(channel, destination, message, media_url).await {
                        true
                    } else {
                        // Fall back to text on this same channel.
                        media_rejected = true;
                        warn!("Media send to {} {} failed, falling back to text", kind, destination);
                        self.send_text(channel, destination, message).await
                    }
                }
                None => self.send_text(channel, destination, message).await,
            };

            if sent {
                delivered += 1;
                debug!("Delivered to {} {}", kind, destination);
                self.send_pause.pause().await;
            } else {
                warn!("Delivery to {} {} failed", kind, destination);
            }
        }

        let success = delivered > 0;
        info!(
            "{}: delivered to {}/{} destinations for {}",
            kind,
            delivered,
            target.destinations.len(),
            record.record.display_name
        );

        let error_kind = if !success {
            Some(DeliveryErrorKind::SendFailed)
        } else if media_rejected {
            Some(DeliveryErrorKind::MediaRejected)
        } else {
            None
        };

        ChannelResult {
            channel: kind,
            attempted_media: media.is_some(),
            success,
            error_kind,
        }
    }

    async fn send_media(&self, channel: &dyn Channel, destination: &str, text: &str, media_url: &str) -> bool {
        let label = format!("{} media to {}", channel.kind(), destination);
        self.retry
            .run(&label, |_| async move {
                if channel.send_media(destination, text, media_url).await {
                    Ok(())
                } else {
                    Err("rejected")
                }
            })
            .await
            .is_ok()
    }

    async fn send_text(&self, channel: &dyn Channel, destination: &str, text: &str) -> bool {
        let label = format!("{} text to {}", channel.kind(), destination);
        self.retry
            .run(&label, |_| async move {
                if channel.send_text(destination, text).await {
                    Ok(())
                } else {
                    Err("rejected")
                }
            })
            .await
            .is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::promo_engine::CandidateRecord;
    use std::sync::Mutex;

    /// Channel double that records every call and answers from fixed flags.
    pub(crate) struct MockChannel {
        pub kind: ChannelKind,
        pub text_ok: bool,
        pub media_ok: bool,
        pub ready: bool,
        pub media_support: bool,
        pub caption_limit: Option<usize>,
        pub markup: Markup,
        pub calls: Mutex<Vec<String>>,
        pub texts: Mutex<Vec<String>>,
    }

    impl MockChannel {
        pub(crate) fn new(kind: ChannelKind, text_ok: bool, media_ok: bool) -> Self {
            Self {
                kind,
                text_ok,
                media_ok,
                ready: true,
                media_support: true,
                caption_limit: None,
                markup: Markup::TelegramMarkdown,
                calls: Mutex::new(Vec::new()),
                texts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn texts(&self) -> Vec<String> {
            self.texts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn supports_media(&self) -> bool {
            self.media_support
        }

        fn markup(&self) -> Markup {
            self.markup
        }

        fn caption_limit(&self) -> Option<usize> {
            self.caption_limit
        }

        async fn is_ready(&self) -> bool {
            self.ready
        }

        async fn send_text(&self, destination: &str, text: &str) -> bool {
            self.calls.lock().unwrap().push(format!("text:{destination}"));
            self.texts.lock().unwrap().push(text.to_string());
            self.text_ok
        }

        async fn send_media(&self, destination: &str, text: &str, _media_url: &str) -> bool {
            self.calls.lock().unwrap().push(format!("media:{destination}"));
            self.texts.lock().unwrap().push(text.to_string());
            self.media_ok
        }
    }

    fn validated(media: Option<&str>) -> ValidatedRecord {
        ValidatedRecord {
            record: CandidateRecord::new("Fone Bluetooth XPTO", "https://shop.example/p/1").with_price("price", "R$199,90"),
            media_url: media.map(str::to_string),
        }
    }

    fn msg() -> Announcement {
        Announcement::uniform("msg")
    }

    fn fanout(channels: &[Arc<MockChannel>], policy: RecordPolicy) -> DeliveryFanout {
        let targets = channels
            .iter()
            .map(|c| ChannelTarget::new(c.clone() as Arc<dyn Channel>, vec!["chat-1".to_string()]))
            .collect();
        DeliveryFanout::new(targets, policy, RetryPolicy::new(1, Pacer::none()), Pacer::none())
    }

    #[tokio::test]
    async fn test_media_failure_falls_back_to_text_on_same_channel() {
        let telegram = Arc::new(MockChannel::new(ChannelKind::Telegram, true, false));
        let outcome = fanout(&[telegram.clone()], RecordPolicy::AnySuccess)
            .deliver(&validated(Some("https://img.example/1.jpg")), &msg(), &[])
            .await;

        let result = &outcome.results[0];
        assert!(result.success);
        assert!(result.attempted_media);
        assert_eq!(result.error_kind, Some(DeliveryErrorKind::MediaRejected));
        assert_eq!(telegram.calls(), vec!["media:chat-1", "text:chat-1"]);
        assert!(outcome.should_record);
    }

    #[tokio::test]
    async fn test_text_only_without_media() {
        let telegram = Arc::new(MockChannel::new(ChannelKind::Telegram, true, true));
        let outcome = fanout(&[telegram.clone()], RecordPolicy::AnySuccess)
            .deliver(&validated(None), &msg(), &[])
            .await;

        assert!(!outcome.results[0].attempted_media);
        assert_eq!(outcome.results[0].error_kind, None);
        assert_eq!(telegram.calls(), vec!["text:chat-1"]);
    }

    #[tokio::test]
    async fn test_channel_without_media_support_sends_text() {
        let mut plain = MockChannel::new(ChannelKind::WhatsApp, true, true);
        plain.media_support = false;
        let plain = Arc::new(plain);
        let outcome = fanout(&[plain.clone()], RecordPolicy::AnySuccess)
            .deliver(&validated(Some("https://img.example/1.jpg")), &msg(), &[])
            .await;

        assert!(outcome.results[0].success);
        assert_eq!(plain.calls(), vec!["text:chat-1"]);
    }

    #[tokio::test]
    async fn test_one_failing_channel_does_not_block_others() {
        let broken = Arc::new(MockChannel::new(ChannelKind::Telegram, false, false));
        let working = Arc::new(MockChannel::new(ChannelKind::WhatsApp, true, true));
        let outcome = fanout(&[broken.clone(), working.clone()], RecordPolicy::AnySuccess)
            .deliver(&validated(Some("https://img.example/1.jpg")), &msg(), &[])
            .await;

        assert!(!outcome.results[0].success);
        assert_eq!(outcome.results[0].error_kind, Some(DeliveryErrorKind::SendFailed));
        assert!(outcome.results[1].success);
        assert!(outcome.should_record);
        assert_eq!(working.calls(), vec!["media:chat-1"]);
    }

    #[tokio::test]
    async fn test_primary_first_skips_secondaries_on_failure() {
        let primary = Arc::new(MockChannel::new(ChannelKind::Telegram, false, false));
        let secondary = Arc::new(MockChannel::new(ChannelKind::WhatsApp, true, true));
        let outcome = fanout(&[primary.clone(), secondary.clone()], RecordPolicy::PrimaryFirst)
            .deliver(&validated(None), &msg(), &[])
            .await;

        assert!(!outcome.should_record);
        assert_eq!(outcome.results[1].error_kind, Some(DeliveryErrorKind::Skipped));
        assert!(secondary.calls().is_empty());
    }

    #[tokio::test]
    async fn test_all_succeeded_policy() {
        let ok = Arc::new(MockChannel::new(ChannelKind::Telegram, true, true));
        let failing = Arc::new(MockChannel::new(ChannelKind::WhatsApp, false, false));
        let outcome = fanout(&[ok, failing], RecordPolicy::AllSucceeded)
            .deliver(&validated(None), &msg(), &[])
            .await;

        assert!(outcome.any_success());
        assert!(!outcome.should_record);
    }

    #[tokio::test]
    async fn test_not_ready_channel_is_skipped() {
        let mut offline = MockChannel::new(ChannelKind::WhatsApp, true, true);
        offline.ready = false;
        let offline = Arc::new(offline);
        let online = Arc::new(MockChannel::new(ChannelKind::Telegram, true, true));
        let fanout = fanout(&[online.clone(), offline.clone()], RecordPolicy::AnySuccess);

        let ready = fanout.readiness().await;
        assert_eq!(ready, vec![true, false]);

        let outcome = fanout.deliver(&validated(None), &msg(), &ready).await;
        assert_eq!(outcome.results[1].error_kind, Some(DeliveryErrorKind::NotReady));
        assert!(offline.calls().is_empty());
        assert!(outcome.should_record);
    }

    #[tokio::test]
    async fn test_retries_each_send() {
        let flaky = Arc::new(MockChannel::new(ChannelKind::Telegram, false, false));
        let targets = vec![ChannelTarget::new(flaky.clone() as Arc<dyn Channel>, vec!["a".to_string()])];
        let fanout = DeliveryFanout::new(targets, RecordPolicy::AnySuccess, RetryPolicy::new(2, Pacer::none()), Pacer::none());

        fanout.deliver(&validated(Some("https://img.example/x.png")), &msg(), &[]).await;
        assert_eq!(flaky.calls(), vec!["media:a", "media:a", "text:a", "text:a"]);
    }

    #[tokio::test]
    async fn test_long_caption_goes_out_as_text_without_retries() {
        let mut limited = MockChannel::new(ChannelKind::Telegram, true, false);
        limited.caption_limit = Some(10);
        let limited = Arc::new(limited);
        let targets = vec![ChannelTarget::new(limited.clone() as Arc<dyn Channel>, vec!["a".to_string()])];
        let fanout = DeliveryFanout::new(targets, RecordPolicy::AnySuccess, RetryPolicy::new(3, Pacer::none()), Pacer::none());

        let long = Announcement::uniform("x".repeat(11));
        let outcome = fanout.deliver(&validated(Some("https://img.example/x.png")), &long, &[]).await;

        assert_eq!(limited.calls(), vec!["text:a"]);
        assert!(!outcome.results[0].attempted_media);
        assert_eq!(outcome.results[0].error_kind, None);

        let short = Announcement::uniform("x".repeat(10));
        fanout.deliver(&validated(Some("https://img.example/x.png")), &short, &[]).await;
        assert_eq!(&limited.calls()[1..], ["media:a", "media:a", "media:a", "text:a"]);
    }

    #[tokio::test]
    async fn test_each_channel_gets_its_own_markup() {
        let telegram = Arc::new(MockChannel::new(ChannelKind::Telegram, true, true));
        let mut whatsapp = MockChannel::new(ChannelKind::WhatsApp, true, true);
        whatsapp.markup = Markup::WhatsApp;
        let whatsapp = Arc::new(whatsapp);
        let announcement = Announcement {
            markdown: "Fone \\[Preto\\]".to_string(),
            whatsapp: "Fone [Preto]".to_string(),
        };

        fanout(&[telegram.clone(), whatsapp.clone()], RecordPolicy::AnySuccess)
            .deliver(&validated(None), &announcement, &[])
            .await;

        assert_eq!(telegram.texts(), vec!["Fone \\[Preto\\]"]);
        assert_eq!(whatsapp.texts(), vec!["Fone [Preto]"]);
    }

    #[tokio::test]
    async fn test_admins_are_alerted_when_a_channel_is_down() {
        let telegram = Arc::new(MockChannel::new(ChannelKind::Telegram, true, true));
        let mut whatsapp = MockChannel::new(ChannelKind::WhatsApp, true, true);
        whatsapp.ready = false;
        let whatsapp = Arc::new(whatsapp);
        let fanout = fanout(&[telegram.clone(), whatsapp.clone()], RecordPolicy::AnySuccess)
            .with_admin_alerts(vec!["admin-1".to_string(), "admin-2".to_string()]);

        assert_eq!(fanout.readiness().await, vec![true, false]);
        assert_eq!(telegram.calls(), vec!["text:admin-1", "text:admin-2"]);
        assert!(telegram.texts()[0].contains("whatsapp"));
        assert!(whatsapp.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_alert_without_admins_or_outage() {
        let telegram = Arc::new(MockChannel::new(ChannelKind::Telegram, true, true));
        let mut whatsapp = MockChannel::new(ChannelKind::WhatsApp, true, true);
        whatsapp.ready = false;
        let whatsapp = Arc::new(whatsapp);
        fanout(&[telegram.clone(), whatsapp], RecordPolicy::AnySuccess).readiness().await;
        assert!(telegram.calls().is_empty());

        let healthy = fanout(&[telegram.clone()], RecordPolicy::AnySuccess).with_admin_alerts(vec!["admin-1".to_string()]);
        healthy.readiness().await;
        assert!(telegram.calls().is_empty());
    }

    #[tokio::test]
    async fn test_alert_needs_a_ready_telegram_channel() {
        let mut telegram = MockChannel::new(ChannelKind::Telegram, true, true);
        telegram.ready = false;
        let telegram = Arc::new(telegram);
        let fanout = fanout(&[telegram.clone()], RecordPolicy::AnySuccess).with_admin_alerts(vec!["admin-1".to_string()]);

        assert_eq!(fanout.readiness().await, vec![false]);
        assert!(telegram.calls().is_empty());
    }

    #[test]
    fn test_record_policy_parsing() {
        assert_eq!("any".parse::<RecordPolicy>().unwrap(), RecordPolicy::AnySuccess);
        assert_eq!("PRIMARY".parse::<RecordPolicy>().unwrap(), RecordPolicy::PrimaryFirst);
        assert_eq!("all".parse::<RecordPolicy>().unwrap(), RecordPolicy::AllSucceeded);
        assert!("most".parse::<RecordPolicy>().is_err());
    }
}
