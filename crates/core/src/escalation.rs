//! Rule-based escalation over a message, its triage result and conversation context.
//!
//! All triggers are collected first; severity is then derived from the whole set.

use crate::domain::conversation::{ConversationContext, Sentiment};
use crate::domain::escalation::{Assignee, EscalationDecision, EscalationTrigger, Severity};
use crate::triage::{contains_phrase, round2, TriageResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeywordRule {
    pub trigger: EscalationTrigger,
    pub phrases: &'static [&'static str],
}

pub const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        trigger: EscalationTrigger::LegalThreat,
        phrases: &[
            "lawyer",
            "attorney",
            "sue",
            "legal action",
            "court",
            "lawsuit",
            "better business bureau",
            "bbb",
            "consumer protection",
        ],
    },
    KeywordRule {
        trigger: EscalationTrigger::PolicyViolation,
        phrases: &[
            "false advertising",
            "misleading",
            "scam",
            "fraud",
            "illegal",
            "violation",
            "breach of contract",
        ],
    },
    KeywordRule {
        trigger: EscalationTrigger::RefundRequest,
        phrases: &[
            "refund",
            "money back",
            "want my money",
            "charge back",
            "chargeback",
            "return payment",
        ],
    },
    KeywordRule {
        trigger: EscalationTrigger::ReturnRequest,
        phrases: &["return", "send back", "return label", "return policy", "ship back"],
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EscalationThresholds {
    /// `complex-issue` fires when the context holds more messages than this.
    pub complex_issue_threshold: usize,
    /// `repeated-contact` fires when prior customer contacts exceed this.
    pub repeated_contact_threshold: u32,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self { complex_issue_threshold: 5, repeated_contact_threshold: 2 }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EscalationEvaluator {
    thresholds: EscalationThresholds,
}

impl EscalationEvaluator {
    pub fn new(thresholds: EscalationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(
        &self,
        message: &str,
        triage: &TriageResult,
        context: Option<&ConversationContext>,
    ) -> EscalationDecision {
        let lowered = message.to_lowercase();
        let mut triggers = Vec::new();
        let mut matched_keywords = Vec::new();

        for rule in KEYWORD_RULES {
            let matched: Vec<&str> = rule
                .phrases
                .iter()
                .copied()
                .filter(|phrase| contains_phrase(&lowered, phrase))
                .collect();
            if !matched.is_empty() {
                triggers.push(rule.trigger);
                matched_keywords.extend(matched.into_iter().map(str::to_string));
            }
        }

        if triage.sentiment.is_negative() {
            triggers.push(EscalationTrigger::NegativeSentiment);
            matched_keywords.extend(triage.matched_phrases.iter().cloned());
        }

        if let Some(context) = context {
            if context.message_count() > self.thresholds.complex_issue_threshold {
                triggers.push(EscalationTrigger::ComplexIssue);
            }
            if context.prior_contact_count() > self.thresholds.repeated_contact_threshold {
                triggers.push(EscalationTrigger::RepeatedContact);
            }
        }

        triggers.sort();
        let severity = severity(&triggers, triage.sentiment);

        EscalationDecision {
            should_escalate: !triggers.is_empty(),
            priority: severity.priority(),
            severity,
            sentiment: triage.sentiment,
            reason: reason(&triggers, triage.sentiment),
            recommended_action: recommended_action(severity, &triggers).to_string(),
            assignee: assignee(&triggers),
            confidence: confidence(&triggers),
            triggers,
            matched_keywords,
        }
    }
}

pub fn severity(triggers: &[EscalationTrigger], sentiment: Sentiment) -> Severity {
    let has = |trigger| triggers.contains(&trigger);

    if has(EscalationTrigger::LegalThreat)
        || (has(EscalationTrigger::PolicyViolation) && sentiment == Sentiment::Angry)
    {
        return Severity::Critical;
    }
    if sentiment == Sentiment::Angry
        && (has(EscalationTrigger::RefundRequest) || has(EscalationTrigger::ReturnRequest))
    {
        return Severity::High;
    }
    if triggers.len() >= 3 || sentiment == Sentiment::Frustrated {
        return Severity::Medium;
    }
    Severity::Low
}

fn reason(triggers: &[EscalationTrigger], sentiment: Sentiment) -> String {
    triggers
        .iter()
        .map(|trigger| match trigger {
            EscalationTrigger::LegalThreat => "Customer mentioned legal action".to_string(),
            EscalationTrigger::PolicyViolation => {
                "Alleged policy violation or fraud claim".to_string()
            }
            EscalationTrigger::RefundRequest => "Customer requesting refund".to_string(),
            EscalationTrigger::ReturnRequest => "Customer requesting return".to_string(),
            EscalationTrigger::NegativeSentiment => {
                format!("Customer sentiment: {}", sentiment.as_str())
            }
            EscalationTrigger::ComplexIssue => {
                "Complex issue requiring multiple exchanges".to_string()
            }
            EscalationTrigger::RepeatedContact => {
                "Customer has contacted support multiple times".to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn recommended_action(severity: Severity, triggers: &[EscalationTrigger]) -> &'static str {
    match severity {
        Severity::Critical => {
            "Immediate CEO escalation required. Review legal implications before responding."
        }
        Severity::High => {
            "Escalate to CEO within 1 hour. Prepare detailed context and proposed resolution."
        }
        _ if triggers.contains(&EscalationTrigger::RefundRequest)
            || triggers.contains(&EscalationTrigger::ReturnRequest) =>
        {
            "Review order details and process request per policy. Escalate if value exceeds threshold."
        }
        Severity::Medium => {
            "Senior support review recommended. Provide detailed response with evidence."
        }
        Severity::Low => {
            "Monitor conversation. Escalate if situation deteriorates or customer requests."
        }
    }
}

fn assignee(triggers: &[EscalationTrigger]) -> Assignee {
    if triggers.contains(&EscalationTrigger::LegalThreat) {
        Assignee::Manager
    } else if triggers.contains(&EscalationTrigger::RefundRequest)
        || triggers.contains(&EscalationTrigger::ReturnRequest)
    {
        Assignee::SupportLead
    } else {
        Assignee::SupportTeam
    }
}

/// Signal keywords attributed to each trigger when scoring confidence.
fn keyword_weight(trigger: EscalationTrigger) -> usize {
    match trigger {
        EscalationTrigger::LegalThreat | EscalationTrigger::NegativeSentiment => 2,
        _ => 1,
    }
}

fn confidence(triggers: &[EscalationTrigger]) -> f64 {
    let keywords: usize = triggers.iter().copied().map(keyword_weight).sum();
    let trigger_score = (triggers.len() as f64 * 0.25).min(0.75);
    let keyword_score = (keywords as f64 * 0.05).min(0.25);
    round2((trigger_score + keyword_score).min(1.0))
}
