use chrono::{DateTime, Duration, Utc};

use floe_core::config::RetentionConfig;
use floe_core::model::Message;

/// Bounds per-room memory: messages older than the window are dropped, then
/// the total is capped by evicting oldest-first.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    max_age: Duration,
    max_count: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_config(&RetentionConfig::default())
    }
}

impl RetentionPolicy {
    pub fn new(max_age: Duration, max_count: usize) -> Self {
        Self {
            max_age,
            max_count: max_count.max(1),
        }
    }

    pub fn from_config(config: &RetentionConfig) -> Self {
        Self::new(
            Duration::days(i64::from(config.max_age_days)),
            config.max_count,
        )
    }

    /// Evict in place from an ascending list. Returns the number of
    /// messages removed.
    pub fn apply(&self, messages: &mut Vec<Message>, now: DateTime<Utc>) -> usize {
        let before = messages.len();
        let cutoff = now - self.max_age;
        messages.retain(|m| m.timestamp >= cutoff);

        if messages.len() > self.max_count {
            let excess = messages.len() - self.max_count;
            messages.drain(0..excess);
        }

        before - messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floe_core::model::{MessageContent, MessageId, MessageStatus};

    fn message_at(n: i64, now: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::Remote(format!("srv-{n}")),
            room_id: "general".into(),
            sender_id: "u1".into(),
            sender_name: "Ada".into(),
            content: MessageContent::text(format!("m{n}")),
            timestamp: now + Duration::seconds(n),
            status: MessageStatus::Sent,
            reply_to: None,
            reactions: Vec::new(),
        }
    }

    #[test]
    fn caps_to_most_recent() {
        let now = Utc::now();
        let policy = RetentionPolicy::new(Duration::days(7), 200);
        let mut messages: Vec<_> = (0..250).map(|n| message_at(n, now)).collect();

        let evicted = policy.apply(&mut messages, now);

        assert_eq!(evicted, 50);
        assert_eq!(messages.len(), 200);
        assert_eq!(messages[0].id, MessageId::Remote("srv-50".into()));
        assert_eq!(messages[199].id, MessageId::Remote("srv-249".into()));
    }

    #[test]
    fn drops_entries_older_than_window() {
        let now = Utc::now();
        let policy = RetentionPolicy::new(Duration::days(7), 200);
        let mut messages = vec![
            message_at(-8 * 24 * 3600, now),
            message_at(-6 * 24 * 3600, now),
            message_at(0, now),
        ];

        let evicted = policy.apply(&mut messages, now);

        assert_eq!(evicted, 1);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.timestamp >= now - Duration::days(7)));
    }

    #[test]
    fn within_bounds_is_untouched() {
        let now = Utc::now();
        let policy = RetentionPolicy::new(Duration::days(7), 200);
        let mut messages: Vec<_> = (0..10).map(|n| message_at(n, now)).collect();

        assert_eq!(policy.apply(&mut messages, now), 0);
        assert_eq!(messages.len(), 10);
    }
}
