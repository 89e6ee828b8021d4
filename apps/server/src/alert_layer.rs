//! Tracing layer that forwards ERROR events to an operator webhook.
//!
//! At most one alert per `MIN_INTERVAL`, identical messages suppressed for
//! `DEDUP_WINDOW`, and the HTTP post is spawned so logging never blocks.
//! The webhook receives `{"text": "..."}`, which Slack-style incoming
//! webhooks accept as is.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

pub struct AlertLayer {
    webhook_url: String,
    http: reqwest::Client,
    state: Mutex<Throttle>,
}

struct Throttle {
    last_sent: Option<Instant>,
    /// (message hash, sent at) of recent alerts.
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.recent
            .retain(|(_, ts)| now.duration_since(*ts) < DEDUP_WINDOW);

        let is_dup = self.recent.iter().any(|(h, _)| *h == hash);
        let too_soon = self
            .last_sent
            .is_some_and(|last| now.duration_since(last) < MIN_INTERVAL);
        if is_dup || too_soon {
            return false;
        }

        self.last_sent = Some(now);
        self.recent.push((hash, now));
        true
    }
}

impl AlertLayer {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
            state: Mutex::new(Throttle {
                last_sent: None,
                recent: Vec::new(),
            }),
        }
    }

    fn should_send(&self, message: &str) -> bool {
        let hash = {
            let mut h = DefaultHasher::new();
            message.hash(&mut h);
            h.finish()
        };
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admit(hash, Instant::now())
    }
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();
        if !self.should_send(&message) {
            return;
        }

        let meta = event.metadata();
        let text = format!(
            "[turnera] {}\n{} ({}:{})\n{}",
            message,
            meta.target(),
            meta.file().unwrap_or("?"),
            meta.line().map(|l| l.to_string()).unwrap_or_else(|| "?".into()),
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );

        // Events can fire outside the runtime (startup, tests).
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.http.clone();
        let url = self.webhook_url.clone();
        runtime.spawn(async move {
            let _ = client
                .post(&url)
                .json(&serde_json::json!({ "text": text }))
                .send()
                .await;
        });
    }
}

/// Renders an event as `message (key=value, ...)`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    extras: String,
}

impl MessageVisitor {
    fn message(&self) -> String {
        match (self.message.is_empty(), self.extras.is_empty()) {
            (_, true) => self.message.clone(),
            (true, false) => self.extras.clone(),
            (false, false) => format!("{} ({})", self.message, self.extras),
        }
    }

    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
            return;
        }
        if !self.extras.is_empty() {
            self.extras.push_str(", ");
        }
        self.extras.push_str(field.name());
        self.extras.push('=');
        self.extras.push_str(&value);
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn throttle() -> Throttle {
        Throttle {
            last_sent: None,
            recent: Vec::new(),
        }
    }

    #[test]
    fn test_first_alert_allowed() {
        assert!(throttle().admit(1, Instant::now()));
    }

    #[test]
    fn test_rate_limit_suppresses_burst() {
        let mut t = throttle();
        let now = Instant::now();
        assert!(t.admit(1, now));
        assert!(!t.admit(2, now + Duration::from_secs(1)));
        assert!(t.admit(2, now + MIN_INTERVAL));
    }

    #[test]
    fn test_duplicate_suppressed_within_window() {
        let mut t = throttle();
        let now = Instant::now();
        assert!(t.admit(1, now));
        assert!(!t.admit(1, now + MIN_INTERVAL));
        assert!(t.admit(1, now + DEDUP_WINDOW));
    }

    #[test]
    fn test_should_send_hashes_message() {
        let layer = AlertLayer::new("http://127.0.0.1:9/hook".into());
        assert!(layer.should_send("db down"));
        assert!(!layer.should_send("db down"));
    }

    #[test]
    fn test_visitor_collects_fields() {
        let visitor = MessageVisitor {
            message: "deposit failed".into(),
            extras: "appointment_id=42".into(),
        };
        assert_eq!(visitor.message(), "deposit failed (appointment_id=42)");
        assert_eq!(MessageVisitor::default().message(), "");
    }

    #[test]
    fn test_error_outside_runtime_does_not_panic() {
        let layer = AlertLayer::new("http://127.0.0.1:9/hook".into());
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(appointment_id = 1, "boom");
        });
    }
}
