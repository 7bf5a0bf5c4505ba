//! Tracing layer that pages the operator chat on ERROR events.
//!
//! A paid booking that could not be placed, a reaper spike or a failing
//! payment lookup all log at ERROR, and all of them need a human. Sends are
//! throttled to one per `MIN_INTERVAL` and identical messages are muted for
//! `DEDUP_WINDOW`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

// ── Throttle ──

struct Throttle {
    last_sent: Option<Instant>,
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            last_sent: None,
            recent: Vec::new(),
        }
    }

    /// Whether a message with `hash` may go out at `now`. Records it if so.
    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.recent
            .retain(|(_, at)| now.duration_since(*at) < DEDUP_WINDOW);

        let duplicate = self.recent.iter().any(|(h, _)| *h == hash);
        let too_soon = self
            .last_sent
            .is_some_and(|last| now.duration_since(last) < MIN_INTERVAL);
        if duplicate || too_soon {
            return false;
        }

        self.last_sent = Some(now);
        self.recent.push((hash, now));
        true
    }
}

fn hash_of(message: &str) -> u64 {
    let mut h = DefaultHasher::new();
    message.hash(&mut h);
    h.finish()
}

// ── Layer ──

pub struct AlertLayer {
    bot_token: String,
    chat_id: i64,
    http: reqwest::Client,
    throttle: Mutex<Throttle>,
}

impl AlertLayer {
    pub fn new(bot_token: String, chat_id: i64) -> Self {
        Self {
            bot_token,
            chat_id,
            http: reqwest::Client::new(),
            throttle: Mutex::new(Throttle::new()),
        }
    }
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);
        let message = fields.render();

        let admitted = match self.throttle.lock() {
            Ok(mut throttle) => throttle.admit(hash_of(&message), Instant::now()),
            Err(_) => false,
        };
        if !admitted {
            return;
        }

        // Events can come from outside the runtime (e.g. during shutdown).
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let meta = event.metadata();
        let location = format!(
            "{} ({}:{})",
            meta.target(),
            meta.file().unwrap_or("?"),
            meta.line().map(|l| l.to_string()).unwrap_or_else(|| "?".into())
        );
        let text = format!(
            "\u{1f6a8} <b>Booking server error</b>\n<code>{}</code>\n{}\n{}",
            escape_html(&message),
            location,
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let client = self.http.clone();
        let chat_id = self.chat_id;
        runtime.spawn(async move {
            let _ = client
                .post(&url)
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML"
                }))
                .send()
                .await;
        });
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ── Field visitor ──

/// The event message plus its structured fields as `key=value`.
#[derive(Default)]
struct EventFields {
    message: String,
    extra: Vec<String>,
}

impl EventFields {
    fn render(&self) -> String {
        match (self.message.is_empty(), self.extra.is_empty()) {
            (_, true) => self.message.clone(),
            (true, false) => self.extra.join(", "),
            (false, false) => format!("{} ({})", self.message, self.extra.join(", ")),
        }
    }

    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.extra.push(format!("{}={}", field.name(), value));
        }
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_alert_goes_out() {
        let mut throttle = Throttle::new();
        assert!(throttle.admit(1, Instant::now()));
    }

    #[test]
    fn test_rate_limit_holds_back_a_different_alert() {
        let mut throttle = Throttle::new();
        let start = Instant::now();
        assert!(throttle.admit(1, start));
        assert!(!throttle.admit(2, start + Duration::from_secs(3)));
        assert!(throttle.admit(2, start + MIN_INTERVAL));
    }

    #[test]
    fn test_duplicate_muted_until_window_passes() {
        let mut throttle = Throttle::new();
        let start = Instant::now();
        assert!(throttle.admit(7, start));
        assert!(!throttle.admit(7, start + MIN_INTERVAL + Duration::from_secs(1)));
        assert!(throttle.admit(7, start + DEDUP_WINDOW + Duration::from_secs(1)));
    }

    #[test]
    fn test_render_message_and_fields() {
        let fields = EventFields {
            message: "Paid session could not be placed".into(),
            extra: vec!["payment_id=123".into()],
        };
        assert_eq!(fields.render(), "Paid session could not be placed (payment_id=123)");

        let only_fields = EventFields {
            message: String::new(),
            extra: vec!["cancelled=12".into(), "threshold=10".into()],
        };
        assert_eq!(only_fields.render(), "cancelled=12, threshold=10");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b> & c"), "a&lt;b&gt; &amp; c");
    }
}
