use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::domain::conversation::{
    ContextMessage, ConversationContext, ConversationId, ConversationSummary, Sentiment,
};
use crate::domain::webhook::EventId;

/// Event ids remembered per conversation for replay detection.
const SEEN_EVENT_LIMIT: usize = 256;

/// Bounded per-conversation history plus rolling triage state.
///
/// Callers serialize mutation per conversation; the inner lock only protects the map.
#[derive(Clone, Debug)]
pub struct ConversationContextStore {
    window: usize,
    contexts: Arc<RwLock<HashMap<ConversationId, ConversationContext>>>,
}

impl ConversationContextStore {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1), contexts: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Appends a message, dropping the oldest beyond the window.
    ///
    /// Returns `false` when the event was appended before, so a retried queue item
    /// does not record the same message twice. Replays are recognized for the last
    /// `SEEN_EVENT_LIMIT` events of the conversation, even after the message left
    /// the window.
    pub fn add_message(&self, conversation_id: ConversationId, message: ContextMessage) -> bool {
        let mut contexts = self.write();
        let context = contexts
            .entry(conversation_id)
            .or_insert_with(|| ConversationContext::new(conversation_id));

        if context.seen_event_ids.contains(&message.event_id) {
            return false;
        }
        context.seen_event_ids.push_back(message.event_id.clone());
        while context.seen_event_ids.len() > SEEN_EVENT_LIMIT.max(self.window) {
            context.seen_event_ids.pop_front();
        }

        if message.is_incoming {
            context.customer_message_count += 1;
        }
        context.updated_at = message.received_at;
        context.recent_messages.push_back(message);
        while context.recent_messages.len() > self.window {
            context.recent_messages.pop_front();
        }
        true
    }

    pub fn set_sentiment(&self, conversation_id: ConversationId, sentiment: Sentiment) {
        self.update(conversation_id, |context| context.sentiment = sentiment);
    }

    pub fn set_urgency(&self, conversation_id: ConversationId, urgency: f64) {
        self.update(conversation_id, |context| context.urgency = urgency.clamp(0.0, 1.0));
    }

    /// Remembers that `event_id` was held back by an outstanding approval.
    pub fn defer(&self, conversation_id: ConversationId, event_id: &EventId) {
        let mut contexts = self.write();
        let Some(context) = contexts.get_mut(&conversation_id) else {
            return;
        };
        if context.deferred.iter().any(|message| &message.event_id == event_id) {
            return;
        }
        if let Some(message) =
            context.recent_messages.iter().find(|message| &message.event_id == event_id).cloned()
        {
            context.deferred.push(message);
        }
    }

    /// Messages deferred since the last `clear_deferred`, oldest first.
    pub fn deferred_messages(&self, conversation_id: ConversationId) -> Vec<ContextMessage> {
        self.read().get(&conversation_id).map(|context| context.deferred.clone()).unwrap_or_default()
    }

    pub fn clear_deferred(&self, conversation_id: ConversationId) {
        self.update(conversation_id, |context| context.deferred.clear());
    }

    pub fn record_escalation(&self, conversation_id: ConversationId, at: DateTime<Utc>) {
        self.update(conversation_id, |context| {
            context.escalation_history.count += 1;
            context.escalation_history.occurred_at.push(at);
        });
    }

    /// Newest last; at most `limit` messages.
    pub fn get_recent_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Vec<ContextMessage> {
        let contexts = self.read();
        let Some(context) = contexts.get(&conversation_id) else {
            return Vec::new();
        };
        let skip = context.recent_messages.len().saturating_sub(limit);
        context.recent_messages.iter().skip(skip).cloned().collect()
    }

    pub fn get_summary(&self, conversation_id: ConversationId) -> Option<ConversationSummary> {
        let contexts = self.read();
        let context = contexts.get(&conversation_id)?;
        Some(ConversationSummary {
            conversation_id,
            message_count: context.recent_messages.len(),
            customer_message_count: context.customer_message_count,
            sentiment: context.sentiment,
            urgency: context.urgency,
            escalation_count: context.escalation_history.count,
            last_escalated_at: context.escalation_history.occurred_at.last().copied(),
            last_message: context.recent_messages.back().map(|message| message.text.clone()),
        })
    }

    pub fn snapshot(&self, conversation_id: ConversationId) -> Option<ConversationContext> {
        self.read().get(&conversation_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, conversation_id: ConversationId, apply: impl FnOnce(&mut ConversationContext)) {
        let mut contexts = self.write();
        let context = contexts
            .entry(conversation_id)
            .or_insert_with(|| ConversationContext::new(conversation_id));
        apply(context);
        context.updated_at = Utc::now();
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConversationId, ConversationContext>> {
        match self.contexts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConversationId, ConversationContext>> {
        match self.contexts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ConversationContextStore {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::ConversationContextStore;
    use crate::domain::conversation::{ContextMessage, ConversationId, Sentiment};
    use crate::domain::webhook::EventId;

    fn message(id: &str, text: &str) -> ContextMessage {
        ContextMessage {
            event_id: EventId(id.to_string()),
            text: text.to_string(),
            is_incoming: true,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn history_is_bounded_and_keeps_newest_last() {
        let store = ConversationContextStore::new(3);
        let conversation = ConversationId(42);
        for index in 0..5 {
            assert!(store.add_message(conversation, message(&format!("evt-{index}"), &format!("m{index}"))));
        }

        let texts: Vec<String> =
            store.get_recent_messages(conversation, 10).into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);

        let last_two: Vec<String> =
            store.get_recent_messages(conversation, 2).into_iter().map(|m| m.text).collect();
        assert_eq!(last_two, vec!["m3", "m4"]);

        let summary = store.get_summary(conversation).unwrap();
        assert_eq!(summary.customer_message_count, 5);
        assert_eq!(summary.message_count, 3);
    }

    #[test]
    fn replayed_event_is_not_appended_twice() {
        let store = ConversationContextStore::new(10);
        let conversation = ConversationId(7);

        assert!(store.add_message(conversation, message("evt-1", "hello")));
        assert!(!store.add_message(conversation, message("evt-1", "hello")));

        let context = store.snapshot(conversation).unwrap();
        assert_eq!(context.recent_messages.len(), 1);
        assert_eq!(context.customer_message_count, 1);
        assert_eq!(context.prior_contact_count(), 0);
    }

    #[test]
    fn replay_is_detected_after_the_message_left_the_window() {
        let store = ConversationContextStore::new(2);
        let conversation = ConversationId(7);

        assert!(store.add_message(conversation, message("evt-1", "hello")));
        assert!(store.add_message(conversation, message("evt-2", "anyone?")));
        assert!(store.add_message(conversation, message("evt-3", "hello??")));
        assert!(!store.add_message(conversation, message("evt-1", "hello")));

        let texts: Vec<String> =
            store.get_recent_messages(conversation, 10).into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["anyone?", "hello??"]);
        assert_eq!(store.get_summary(conversation).unwrap().customer_message_count, 3);
    }

    #[test]
    fn deferred_messages_survive_until_cleared() {
        let store = ConversationContextStore::new(1);
        let conversation = ConversationId(9);
        store.add_message(conversation, message("evt-1", "Also, can I change the address?"));
        store.defer(conversation, &EventId("evt-1".to_string()));
        store.defer(conversation, &EventId("evt-1".to_string()));
        store.add_message(conversation, message("evt-2", "Hello?"));
        store.defer(conversation, &EventId("evt-2".to_string()));

        let deferred: Vec<String> =
            store.deferred_messages(conversation).into_iter().map(|m| m.text).collect();
        assert_eq!(deferred, vec!["Also, can I change the address?", "Hello?"]);

        store.clear_deferred(conversation);
        assert!(store.deferred_messages(conversation).is_empty());
        assert!(store.deferred_messages(ConversationId(10)).is_empty());
    }

    #[test]
    fn conversations_do_not_share_state() {
        let store = ConversationContextStore::default();
        store.add_message(ConversationId(1), message("evt-a", "first"));
        store.set_sentiment(ConversationId(1), Sentiment::Angry);
        store.set_urgency(ConversationId(1), 1.7);
        store.record_escalation(ConversationId(1), Utc::now());

        assert!(store.get_summary(ConversationId(2)).is_none());
        let summary = store.get_summary(ConversationId(1)).unwrap();
        assert_eq!(summary.sentiment, Sentiment::Angry);
        assert_eq!(summary.urgency, 1.0);
        assert_eq!(summary.escalation_count, 1);
        assert!(summary.last_escalated_at.is_some());
        assert_eq!(store.len(), 1);
    }
}
