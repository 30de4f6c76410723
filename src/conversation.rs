//! Conversation continuity tracking
//!
//! Links stateless HTTP calls into one backend conversation by remembering the
//! last backend response id per conversation.
//!
//! - Ids come from a caller header, or a SHA-256 fingerprint of the opening turns
//! - Updates for one id run under that id's map entry lock; different ids
//!   only contend when they share a shard, and never across an await
//! - A background sweep drops records idle for longer than `max_age`

use crate::formats::responses::{InputMessage, InputRole, ResponsesUsage};
use axum::http::HeaderMap;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Headers checked for an explicit conversation id, first non-empty wins
pub const CONVERSATION_HEADERS: [&str; 6] = [
    "x-conversation-id",
    "conversation-id",
    "x-session-id",
    "session-id",
    "x-thread-id",
    "thread-id",
];

/// Opening user messages this short are too generic to fingerprint
const MIN_FINGERPRINT_TEXT: usize = 10;

/// Per-conversation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    conversation_id: String,
    last_response_id: String,
    message_count: u64,
    total_tokens_used: u64,
    reasoning_tokens_used: u64,
    last_seen_at: Instant,
}

impl ConversationRecord {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn last_response_id(&self) -> &str {
        &self.last_response_id
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn total_tokens_used(&self) -> u64 {
        self.total_tokens_used
    }

    pub fn reasoning_tokens_used(&self) -> u64 {
        self.reasoning_tokens_used
    }

    pub fn last_seen_at(&self) -> Instant {
        self.last_seen_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationSource {
    Header,
    Fingerprint,
}

/// Resolved conversation identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationId {
    id: String,
    source: ConversationSource,
}

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> ConversationSource {
        self.source
    }

    /// Whether a stored response id may be attached to this request
    ///
    /// Fingerprints only identify the opening of a conversation, so a request
    /// without any assistant turn is treated as a fresh conversation even if
    /// it fingerprints the same as an earlier one.
    pub fn continues(&self, input: &[InputMessage]) -> bool {
        match self.source {
            ConversationSource::Header => true,
            ConversationSource::Fingerprint => {
                input.iter().any(|m| m.role == InputRole::Assistant)
            }
        }
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Header id if present, otherwise a fingerprint of the conversation opening
pub fn resolve_conversation_id(
    headers: &HeaderMap,
    input: &[InputMessage],
    user_id: Option<&str>,
) -> ConversationId {
    let from_header = CONVERSATION_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    });

    match from_header {
        Some(id) => ConversationId {
            id: id.to_string(),
            source: ConversationSource::Header,
        },
        None => ConversationId {
            id: fingerprint(input, user_id),
            source: ConversationSource::Fingerprint,
        },
    }
}

/// `conv-` plus 16 hex chars of SHA-256 over system prompt, first
/// substantive user message and end-user id
pub fn fingerprint(input: &[InputMessage], user_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();

    for message in input.iter().filter(|m| m.role == InputRole::System) {
        hasher.update(message.content.as_bytes());
        hasher.update([0u8]);
    }

    let opening = input
        .iter()
        .filter(|m| m.role == InputRole::User)
        .map(|m| m.content.trim())
        .find(|text| text.chars().count() > MIN_FINGERPRINT_TEXT)
        .or_else(|| {
            input
                .iter()
                .find(|m| m.role == InputRole::User)
                .map(|m| m.content.trim())
        });
    if let Some(text) = opening {
        hasher.update(text.as_bytes());
    }
    hasher.update([0u8]);

    if let Some(user) = user_id {
        hasher.update(user.as_bytes());
    }

    let hash = format!("{:x}", hasher.finalize());
    format!("conv-{}", &hash[..16])
}

/// In-memory, time-bounded conversation store
pub struct ConversationTracker {
    records: DashMap<String, ConversationRecord>,
    max_age: Duration,
    max_conversations: usize,
}

impl ConversationTracker {
    pub fn new(max_age: Duration, max_conversations: usize) -> Self {
        Self {
            records: DashMap::new(),
            max_age,
            max_conversations,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, conversation_id: &str) -> Option<ConversationRecord> {
        self.records.get(conversation_id).map(|r| r.clone())
    }

    /// Last response id for a live conversation
    pub fn previous_response_id(&self, conversation_id: &str) -> Option<String> {
        self.previous_response_id_at(conversation_id, Instant::now())
    }

    pub fn previous_response_id_at(&self, conversation_id: &str, now: Instant) -> Option<String> {
        let record = self.records.get(conversation_id)?;
        if now.saturating_duration_since(record.last_seen_at) > self.max_age {
            tracing::debug!(
                conversation_id = %conversation_id,
                "Conversation expired, starting fresh"
            );
            return None;
        }
        Some(record.last_response_id.clone())
    }

    /// Upsert after a successful backend call
    pub fn record_success(
        &self,
        conversation_id: &str,
        response_id: &str,
        usage: &ResponsesUsage,
    ) -> ConversationRecord {
        self.record_success_at(conversation_id, response_id, usage, Instant::now())
    }

    pub fn record_success_at(
        &self,
        conversation_id: &str,
        response_id: &str,
        usage: &ResponsesUsage,
        now: Instant,
    ) -> ConversationRecord {
        let snapshot = {
            let mut entry = self
                .records
                .entry(conversation_id.to_string())
                .or_insert_with(|| ConversationRecord {
                    conversation_id: conversation_id.to_string(),
                    last_response_id: String::new(),
                    message_count: 0,
                    total_tokens_used: 0,
                    reasoning_tokens_used: 0,
                    last_seen_at: now,
                });
            let record = entry.value_mut();
            record.last_response_id = response_id.to_string();
            record.message_count += 1;
            record.total_tokens_used += u64::from(usage.total_tokens);
            record.reasoning_tokens_used += u64::from(usage.reasoning_tokens.unwrap_or(0));
            record.last_seen_at = now;
            record.clone()
        };

        if self.records.len() > self.max_conversations {
            self.evict_oldest();
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            response_id = %response_id,
            message_count = snapshot.message_count,
            "Conversation updated"
        );
        snapshot
    }

    fn evict_oldest(&self) {
        while self.records.len() > self.max_conversations {
            let oldest = self
                .records
                .iter()
                .min_by_key(|entry| entry.value().last_seen_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(id) => {
                    self.records.remove(&id);
                    tracing::debug!(conversation_id = %id, "Evicted oldest conversation");
                }
                None => break,
            }
        }
    }

    /// Remove records idle for longer than `max_age`; returns how many went
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| now.saturating_duration_since(record.last_seen_at) <= self.max_age);
        before.saturating_sub(self.records.len())
    }

    /// Spawn the periodic sweep plus a task that reports if it ever stops
    pub fn start_background_sweep(self: Arc<Self>, interval: Duration) {
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                max_age_seconds = self.max_age.as_secs(),
                "Starting conversation sweep"
            );

            loop {
                tokio::time::sleep(interval).await;
                let removed = self.sweep_at(Instant::now());
                if removed > 0 {
                    tracing::debug!(
                        removed,
                        remaining = self.len(),
                        "Swept expired conversations"
                    );
                }
            }
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(_) => {
                    tracing::error!(
                        "Conversation sweep task terminated unexpectedly. \
                        Expired conversations will accumulate until restart."
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Conversation sweep task panicked. \
                        Expired conversations will accumulate until restart."
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn usage(total: u32, reasoning: Option<u32>) -> ResponsesUsage {
        ResponsesUsage {
            prompt_tokens: 0,
            completion_tokens: total,
            total_tokens: total,
            reasoning_tokens: reasoning,
        }
    }

    fn tracker() -> ConversationTracker {
        ConversationTracker::new(Duration::from_secs(60), 100)
    }

    #[test]
    fn test_header_resolution_order() {
        let mut headers = HeaderMap::new();
        headers.insert("thread-id", HeaderValue::from_static("thread"));
        headers.insert("x-session-id", HeaderValue::from_static("session"));
        headers.insert("x-conversation-id", HeaderValue::from_static("  "));

        let id = resolve_conversation_id(&headers, &[], None);
        assert_eq!(id.as_str(), "session");
        assert_eq!(id.source(), ConversationSource::Header);
    }

    #[test]
    fn test_fingerprint_is_stable_and_user_scoped() {
        let input = vec![
            InputMessage::new(InputRole::System, "be brief"),
            InputMessage::new(InputRole::User, "hi"),
            InputMessage::new(InputRole::User, "Help me refactor the parser module"),
        ];
        let a = fingerprint(&input, Some("user-1"));
        assert!(a.starts_with("conv-"));
        assert_eq!(a.len(), "conv-".len() + 16);
        assert_eq!(a, fingerprint(&input, Some("user-1")));
        assert_ne!(a, fingerprint(&input, Some("user-2")));

        // Later turns do not change the fingerprint.
        let mut longer = input.clone();
        longer.push(InputMessage::new(InputRole::Assistant, "Sure"));
        longer.push(InputMessage::new(InputRole::User, "Now add tests for it please"));
        assert_eq!(a, fingerprint(&longer, Some("user-1")));
    }

    #[test]
    fn test_fingerprint_only_continues_with_assistant_turn() {
        let fresh = vec![InputMessage::new(InputRole::User, "Help me refactor the parser")];
        let id = resolve_conversation_id(&HeaderMap::new(), &fresh, None);
        assert_eq!(id.source(), ConversationSource::Fingerprint);
        assert!(!id.continues(&fresh));

        let mut continued = fresh.clone();
        continued.push(InputMessage::new(InputRole::Assistant, "ok"));
        continued.push(InputMessage::new(InputRole::User, "more"));
        assert!(id.continues(&continued));
    }

    #[test]
    fn test_k_sequential_calls() {
        let tracker = tracker();
        for k in 1..=5u32 {
            tracker.record_success("conv", &format!("resp_{}", k), &usage(10, Some(2)));
        }
        let record = tracker.get("conv").expect("record exists");
        assert_eq!(record.message_count(), 5);
        assert_eq!(record.last_response_id(), "resp_5");
        assert_eq!(record.total_tokens_used(), 50);
        assert_eq!(record.reasoning_tokens_used(), 10);
        assert_eq!(tracker.previous_response_id("conv").as_deref(), Some("resp_5"));
    }

    #[test]
    fn test_expired_record_is_ignored_and_swept() {
        let tracker = ConversationTracker::new(Duration::from_secs(10), 100);
        let start = Instant::now();
        tracker.record_success_at("old", "resp_old", &usage(1, None), start);
        tracker.record_success_at("new", "resp_new", &usage(1, None), start + Duration::from_secs(8));

        let later = start + Duration::from_secs(15);
        assert_eq!(tracker.previous_response_id_at("old", later), None);
        assert_eq!(
            tracker.previous_response_id_at("new", later).as_deref(),
            Some("resp_new")
        );
        assert_eq!(tracker.sweep_at(later), 1);
        assert!(tracker.get("old").is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let tracker = ConversationTracker::new(Duration::from_secs(60), 2);
        let start = Instant::now();
        tracker.record_success_at("a", "1", &usage(1, None), start);
        tracker.record_success_at("b", "2", &usage(1, None), start + Duration::from_secs(1));
        tracker.record_success_at("c", "3", &usage(1, None), start + Duration::from_secs(2));
        assert_eq!(tracker.len(), 2);
        assert!(tracker.get("a").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let tracker = Arc::new(tracker());
        let mut handles = Vec::new();
        for i in 0..50 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                tracker.record_success("shared", &format!("resp_{}", i), &usage(2, None));
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }
        let record = tracker.get("shared").expect("record exists");
        assert_eq!(record.message_count(), 50);
        assert_eq!(record.total_tokens_used(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_to_different_ids_stay_separate() {
        let tracker = Arc::new(tracker());
        let barrier = Arc::new(tokio::sync::Barrier::new(40));
        let mut handles = Vec::new();
        for i in 0..40 {
            let tracker = Arc::clone(&tracker);
            let barrier = Arc::clone(&barrier);
            let (id, tokens) = if i % 2 == 0 { ("alpha", 3) } else { ("beta", 5) };
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                tracker.record_success(id, &format!("{}_{}", id, i), &usage(tokens, None));
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        let alpha = tracker.get("alpha").expect("alpha recorded");
        let beta = tracker.get("beta").expect("beta recorded");
        assert_eq!(alpha.message_count(), 20);
        assert_eq!(alpha.total_tokens_used(), 60);
        assert!(alpha.last_response_id().starts_with("alpha_"));
        assert_eq!(beta.message_count(), 20);
        assert_eq!(beta.total_tokens_used(), 100);
        assert!(beta.last_response_id().starts_with("beta_"));
        assert_eq!(tracker.len(), 2);
    }
}
