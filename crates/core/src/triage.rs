//! Keyword triage: sentiment, urgency and confidence for one inbound message.
//!
//! Rules are ordered data. The first sentiment class with any matching phrase wins,
//! regardless of how many phrases other classes match. Phrases match at word starts
//! and tolerate short inflection suffixes, so `sue` matches "sued" but not "issue".

use serde::{Deserialize, Serialize};

use crate::domain::conversation::{ConversationContext, Sentiment};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentimentRule {
    pub sentiment: Sentiment,
    pub phrases: &'static [&'static str],
}

/// Severity order: angry, frustrated, disappointed, satisfied, happy.
pub const SENTIMENT_RULES: &[SentimentRule] = &[
    SentimentRule {
        sentiment: Sentiment::Angry,
        phrases: &["furious", "outraged", "unacceptable", "disgusting", "terrible", "worst"],
    },
    SentimentRule {
        sentiment: Sentiment::Frustrated,
        phrases: &["frustrated", "annoying", "disappointed", "upset", "unhappy"],
    },
    SentimentRule {
        sentiment: Sentiment::Disappointed,
        phrases: &["expected better", "let down", "not what i expected"],
    },
    SentimentRule {
        sentiment: Sentiment::Satisfied,
        phrases: &["satisfied", "good", "thank", "appreciate", "great"],
    },
    SentimentRule {
        sentiment: Sentiment::Happy,
        phrases: &["excellent", "amazing", "love", "perfect", "wonderful"],
    },
];

pub const URGENCY_PHRASES: &[&str] = &["urgent", "asap", "emergency", "immediately", "right now"];

const LONG_MESSAGE_CHARS: usize = 500;

const WORD_SUFFIXES: &[&str] = &["", "s", "es", "d", "ed", "ing", "ly"];

/// Whether lowercase `text` contains lowercase `phrase` starting on a word boundary.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(start, _)| {
        let starts_word =
            text[..start].chars().next_back().map_or(true, |previous| !previous.is_alphanumeric());
        if !starts_word {
            return false;
        }
        let rest = &text[start + phrase.len()..];
        let tail_len = rest.find(|next: char| !next.is_alphanumeric()).unwrap_or(rest.len());
        WORD_SUFFIXES.contains(&&rest[..tail_len])
    })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub sentiment: Sentiment,
    pub urgency: f64,
    pub confidence: f64,
    pub matched_phrases: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TriageClassifier;

impl TriageClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classifies `text` given the conversation context.
    ///
    /// `context` is expected to already contain the message being classified, so its
    /// prior-contact count excludes it. Pure and deterministic.
    pub fn classify(&self, text: &str, context: Option<&ConversationContext>) -> TriageResult {
        let lowered = text.to_lowercase();
        let (sentiment, matched_phrases) = match_sentiment(&lowered);
        let prior_contacts = context.map(ConversationContext::prior_contact_count).unwrap_or(0);

        TriageResult {
            sentiment,
            urgency: urgency_score(sentiment, &lowered, text.chars().count(), prior_contacts),
            confidence: confidence(sentiment, matched_phrases.len()),
            matched_phrases,
        }
    }
}

fn match_sentiment(lowered: &str) -> (Sentiment, Vec<String>) {
    for rule in SENTIMENT_RULES {
        let matched: Vec<String> = rule
            .phrases
            .iter()
            .filter(|phrase| contains_phrase(lowered, phrase))
            .map(|phrase| (*phrase).to_string())
            .collect();
        if !matched.is_empty() {
            return (rule.sentiment, matched);
        }
    }
    (Sentiment::Neutral, Vec::new())
}

fn base_urgency(sentiment: Sentiment) -> f64 {
    match sentiment {
        Sentiment::Angry => 0.8,
        Sentiment::Frustrated => 0.6,
        Sentiment::Disappointed => 0.4,
        Sentiment::Neutral => 0.2,
        Sentiment::Satisfied | Sentiment::Happy => 0.1,
    }
}

fn urgency_score(sentiment: Sentiment, lowered: &str, length: usize, prior_contacts: u32) -> f64 {
    let mut score = base_urgency(sentiment);
    if URGENCY_PHRASES.iter().any(|phrase| contains_phrase(lowered, phrase)) {
        score += 0.15;
    }
    if length > LONG_MESSAGE_CHARS {
        score += 0.05;
    }
    score += (f64::from(prior_contacts) * 0.05).min(0.15);
    round2(score.clamp(0.0, 1.0))
}

fn confidence(sentiment: Sentiment, matched: usize) -> f64 {
    if sentiment == Sentiment::Neutral && matched == 0 {
        return 0.5;
    }
    let extra = matched.saturating_sub(1) as f64;
    round2((0.6 + extra * 0.1).min(0.95))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{contains_phrase, TriageClassifier};
    use crate::domain::conversation::{ContextMessage, ConversationContext, ConversationId, Sentiment};
    use crate::domain::webhook::EventId;

    fn context_with(customer_messages: u32) -> ConversationContext {
        let mut context = ConversationContext::new(ConversationId(42));
        for index in 0..customer_messages {
            context.recent_messages.push_back(ContextMessage {
                event_id: EventId(format!("evt-{index}")),
                text: "hello".to_string(),
                is_incoming: true,
                received_at: Utc::now(),
            });
        }
        context.customer_message_count = customer_messages;
        context
    }

    #[test]
    fn plain_question_is_neutral_and_low_urgency() {
        let result = TriageClassifier::new().classify("Where is my order?", None);

        assert_eq!(result.sentiment, Sentiment::Neutral);
        assert_eq!(result.urgency, 0.2);
        assert_eq!(result.confidence, 0.5);
        assert!(result.matched_phrases.is_empty());
    }

    #[test]
    fn severity_order_beats_match_count() {
        let result = TriageClassifier::new()
            .classify("Thank you, great, good service but this delay is unacceptable", None);

        assert_eq!(result.sentiment, Sentiment::Angry);
        assert_eq!(result.matched_phrases, vec!["unacceptable".to_string()]);
        assert_eq!(result.confidence, 0.6);
    }

    #[test]
    fn additional_phrases_raise_confidence_up_to_cap() {
        let classifier = TriageClassifier::new();
        let two = classifier.classify("This is the worst, terrible experience", None);
        assert_eq!(two.sentiment, Sentiment::Angry);
        assert_eq!(two.confidence, 0.7);

        let many = classifier.classify(
            "furious, outraged, unacceptable, disgusting, terrible, worst",
            None,
        );
        assert_eq!(many.confidence, 0.95);
    }

    #[test]
    fn urgency_adds_structural_signals_and_clamps() {
        let classifier = TriageClassifier::new();

        let urgent = classifier.classify("I need this fixed ASAP", None);
        assert_eq!(urgent.urgency, 0.35);

        let repeated = classifier.classify("still waiting", Some(&context_with(3)));
        assert_eq!(repeated.urgency, 0.3);

        let capped_contacts = classifier.classify("still waiting", Some(&context_with(10)));
        assert_eq!(capped_contacts.urgency, 0.35);

        let long_angry = format!("This is unacceptable and urgent. {}", "x".repeat(600));
        let clamped = classifier.classify(&long_angry, Some(&context_with(10)));
        assert_eq!(clamped.urgency, 1.0);
    }

    #[test]
    fn phrases_match_on_word_starts_only() {
        assert!(contains_phrase("i will sue you", "sue"));
        assert!(contains_phrase("we got sued", "sue"));
        assert!(!contains_phrase("i have an issue", "sue"));
        assert!(contains_phrase("thanks a lot", "thank"));
        assert!(!contains_phrase("goodbye", "good"));
        assert!(contains_phrase("fix it right now!", "right now"));
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = TriageClassifier::new();
        let first = classifier.classify("I'm upset and let down", None);
        let second = classifier.classify("I'm upset and let down", None);

        assert_eq!(first, second);
        assert_eq!(first.sentiment, Sentiment::Frustrated);
    }
}
