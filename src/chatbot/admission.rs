//! Per-event admission control: message-id dedup plus a per-chat rate ceiling.
//!
//! State is process-local. Several relay instances behind one webhook URL do
//! not share counters.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::LimitsConfig;

/// Admission decision for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Duplicate,
    RateLimited,
}

struct RateWindow {
    started: Instant,
    count: u32,
}

#[derive(Default)]
struct State {
    seen: HashMap<String, Instant>,
    windows: HashMap<String, RateWindow>,
}

/// In-memory dedup and rate-limit gate.
pub struct Admission {
    limits: LimitsConfig,
    state: Mutex<State>,
}

impl Admission {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits, state: Mutex::new(State::default()) }
    }

    pub fn admit(&self, message_id: &str, chat_id: &str) -> Verdict {
        self.admit_at(message_id, chat_id, Instant::now())
    }

    /// Check and record under a single lock, so concurrent deliveries of one
    /// message id admit at most one of them.
    pub fn admit_at(&self, message_id: &str, chat_id: &str, now: Instant) -> Verdict {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_expired(&mut state, now);

        if state.seen.contains_key(message_id) {
            return Verdict::Duplicate;
        }

        let window = state
            .windows
            .entry(chat_id.to_string())
            .or_insert(RateWindow { started: now, count: 0 });
        window.count += 1;
        if window.count > self.limits.max_requests_per_window {
            return Verdict::RateLimited;
        }

        state.seen.insert(message_id.to_string(), now);
        Verdict::Allowed
    }

    fn evict_expired(&self, state: &mut State, now: Instant) {
        let dedup = self.limits.dedup_window;
        let rate = self.limits.rate_window;
        state.seen.retain(|_, at| elapsed(now, *at) < dedup);
        state.windows.retain(|_, w| elapsed(now, w.started) < rate);
    }
}

fn elapsed(now: Instant, then: Instant) -> Duration {
    now.saturating_duration_since(then)
}
