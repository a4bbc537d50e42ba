//! At-least-once delivery for clients that negotiated acknowledgements.
//!
//! Every reliable frame carries a `msgId` and `reliable: true`. The recipient
//! echoes `ack { msgId }`; until then the envelope is retransmitted on a
//! backoff schedule and finally dropped after `max_attempts` sends.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use {
    lrcom_config::ReliableConfig,
    lrcom_protocol::ServerFrame,
    serde_json::Value,
    tracing::warn,
};

/// Upper bound on any single retry delay, whatever the configuration says.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base · 2^(n-1)` clamped to `[base, max]`.
    Exponential { base: Duration, max: Duration },
    Fixed(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &ReliableConfig) -> Self {
        Self {
            backoff: Backoff::Exponential {
                base: config.base_delay(),
                max: config.max_delay(),
            },
            max_attempts: config.max_attempts.max(1),
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: Backoff::Fixed(delay),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before the next send, given how many sends already happened.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
                base.saturating_mul(factor).min(max).max(base)
            },
        };
        delay.min(MAX_RETRY_DELAY)
    }

    /// When the next send is due.
    pub fn next_at(&self, now: Instant, attempts: u32) -> Instant {
        now.checked_add(self.delay_after(attempts)).unwrap_or(now)
    }
}

/// What to do when an envelope is dropped without being acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Tell the author of a private message that it never arrived.
    PrivateMessage {
        sender_id: String,
        recipient_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct Envelope {
    /// Coalescing key; defaults to `msg_id`.
    pub key: String,
    pub msg_id: String,
    /// Serialized frame exactly as it goes on the wire.
    pub payload: String,
    pub attempts: u32,
    pub next_at: Instant,
    pub policy: RetryPolicy,
    pub on_failure: Option<DeliveryFailure>,
}

/// Result of one retry pass over a recipient's queue.
#[derive(Debug, Default)]
pub struct DuePass {
    pub resend: Vec<String>,
    pub exhausted: Vec<Envelope>,
}

/// Pending envelopes per recipient connection.
#[derive(Debug, Default)]
pub struct Outbox {
    queues: HashMap<String, Vec<Envelope>>,
}

impl Outbox {
    /// Track an envelope that has just been sent once. An envelope with the
    /// same key is replaced in place, so at most one per key is pending.
    pub fn track(&mut self, recipient: &str, envelope: Envelope) {
        let queue = self.queues.entry(recipient.to_string()).or_default();
        match queue.iter_mut().find(|e| e.key == envelope.key) {
            Some(existing) => *existing = envelope,
            None => queue.push(envelope),
        }
    }

    pub fn ack(&mut self, recipient: &str, msg_id: &str) -> bool {
        let Some(queue) = self.queues.get_mut(recipient) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|e| e.msg_id != msg_id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.queues.remove(recipient);
        }
        removed
    }

    /// Collect envelopes due at `now`: those with attempts left are returned
    /// for resend (and rescheduled), the rest are removed.
    pub fn take_due(&mut self, recipient: &str, now: Instant) -> DuePass {
        let mut pass = DuePass::default();
        let Some(queue) = self.queues.get_mut(recipient) else {
            return pass;
        };
        let mut kept = Vec::with_capacity(queue.len());
        for mut envelope in queue.drain(..) {
            if envelope.next_at > now {
                kept.push(envelope);
            } else if envelope.attempts >= envelope.policy.max_attempts {
                pass.exhausted.push(envelope);
            } else {
                envelope.attempts += 1;
                envelope.next_at = envelope.policy.next_at(now, envelope.attempts);
                pass.resend.push(envelope.payload.clone());
                kept.push(envelope);
            }
        }
        *queue = kept;
        if queue.is_empty() {
            self.queues.remove(recipient);
        }
        pass
    }

    /// Drop everything pending for a departed recipient.
    pub fn purge(&mut self, recipient: &str) -> Vec<Envelope> {
        self.queues.remove(recipient).unwrap_or_default()
    }

    pub fn pending(&self, recipient: &str) -> &[Envelope] {
        self.queues.get(recipient).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }
}

/// Serialize `frame` with the reliable markers injected.
pub fn reliable_payload(frame: &ServerFrame, msg_id: &str) -> Option<String> {
    let mut value = match serde_json::to_value(frame) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "failed to serialize reliable frame");
            return None;
        },
    };
    if let Value::Object(map) = &mut value {
        map.insert("msgId".into(), Value::String(msg_id.to_string()));
        map.insert("reliable".into(), Value::Bool(true));
    }
    serde_json::to_string(&value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(
        key: &str,
        msg_id: &str,
        payload: &str,
        now: Instant,
        policy: RetryPolicy,
    ) -> Envelope {
        Envelope {
            key: key.into(),
            msg_id: msg_id.into(),
            payload: payload.into(),
            attempts: 1,
            next_at: policy.next_at(now, 1),
            policy,
            on_failure: None,
        }
    }

    fn default_policy() -> RetryPolicy {
        RetryPolicy::from_config(&ReliableConfig::default())
    }

    #[test]
    fn exponential_backoff_is_capped_and_monotonic() {
        let policy = default_policy();
        let delays: Vec<u128> = (1..=8).map(|n| policy.delay_after(n).as_millis()).collect();
        assert_eq!(delays, vec![800, 1600, 3200, 6400, 8000, 8000, 8000, 8000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(policy.delay_after(u32::MAX).as_millis(), 8000);
    }

    #[test]
    fn oversized_delays_are_capped() {
        let huge = Duration::from_secs(u64::MAX);
        let exponential = RetryPolicy {
            backoff: Backoff::Exponential {
                base: huge,
                max: huge,
            },
            max_attempts: 3,
        };
        let fixed = RetryPolicy::fixed(huge, 3);
        let now = Instant::now();
        for policy in [exponential, fixed] {
            assert_eq!(policy.delay_after(u32::MAX), MAX_RETRY_DELAY);
            assert_eq!(policy.next_at(now, 2), now + MAX_RETRY_DELAY);
        }
    }

    #[test]
    fn fixed_backoff_ignores_attempts() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 5);
        assert_eq!(policy.delay_after(1), policy.delay_after(4));
    }

    #[test]
    fn same_key_replaces_pending_envelope() {
        let now = Instant::now();
        let mut outbox = Outbox::default();
        outbox.track("u1", envelope("hello", "m1", "old", now, default_policy()));
        outbox.track("u1", envelope("hello", "m2", "new", now, default_policy()));
        outbox.track("u1", envelope("other", "m3", "x", now, default_policy()));

        let pending = outbox.pending("u1");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload, "new");
        assert!(!outbox.ack("u1", "m1"));
        assert!(outbox.ack("u1", "m2"));
        assert_eq!(outbox.pending("u1").len(), 1);
    }

    #[test]
    fn due_envelopes_resend_until_exhausted() {
        let t0 = Instant::now();
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 3);
        let mut outbox = Outbox::default();
        outbox.track("u1", envelope("k", "m", "p", t0, policy));

        assert!(outbox.take_due("u1", t0).resend.is_empty());

        let pass = outbox.take_due("u1", t0 + Duration::from_secs(1));
        assert_eq!(pass.resend, vec!["p".to_string()]);
        let pass = outbox.take_due("u1", t0 + Duration::from_secs(2));
        assert_eq!(pass.resend.len(), 1);
        assert_eq!(outbox.pending("u1")[0].attempts, 3);

        let pass = outbox.take_due("u1", t0 + Duration::from_secs(3));
        assert!(pass.resend.is_empty());
        assert_eq!(pass.exhausted.len(), 1);
        assert!(outbox.pending("u1").is_empty());
        assert!(outbox.recipients().is_empty());
    }

    #[test]
    fn purge_returns_pending() {
        let now = Instant::now();
        let mut outbox = Outbox::default();
        outbox.track("u1", envelope("a", "a", "p", now, default_policy()));
        assert_eq!(outbox.purge("u1").len(), 1);
        assert!(outbox.purge("u1").is_empty());
    }

    #[test]
    fn payload_carries_reliable_markers() {
        let raw = reliable_payload(&ServerFrame::error("NO_NAME"), "m1").unwrap();
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["msgId"], "m1");
        assert_eq!(v["reliable"], true);
    }
}
