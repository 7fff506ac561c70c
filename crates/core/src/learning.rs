use std::collections::BTreeSet;

use crate::domain::approval::{DecisionAction, InterruptionResolution};
use crate::domain::feedback::{EditDiff, EditType, FeedbackLabel};
use crate::triage::round2;

/// Character-level Levenshtein distance.
pub fn edit_distance(left: &str, right: &str) -> usize {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0; right.len() + 1];

    for (i, left_char) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, right_char) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(left_char != right_char);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right.len()]
}

pub fn classify_edit(ratio: f64) -> EditType {
    if ratio < 0.1 {
        EditType::Minor
    } else if ratio < 0.3 {
        EditType::Moderate
    } else if ratio < 0.6 {
        EditType::Major
    } else {
        EditType::CompleteRewrite
    }
}

/// Diff between a model draft and the text a human sent instead. `None` when unchanged.
pub fn edit_diff(draft: &str, final_text: &str) -> Option<EditDiff> {
    if draft == final_text {
        return None;
    }
    let distance = edit_distance(draft, final_text);
    let longest = draft.chars().count().max(final_text.chars().count()).max(1);
    let ratio = round2(distance as f64 / longest as f64);
    Some(EditDiff { distance, ratio, edit_type: classify_edit(ratio) })
}

/// Labels for a finished approval chain.
pub fn chain_labels(resolutions: &[InterruptionResolution]) -> BTreeSet<FeedbackLabel> {
    let mut labels = BTreeSet::new();
    for resolution in resolutions {
        match resolution.action {
            DecisionAction::Approve => {
                labels.insert(FeedbackLabel::Approved);
                if resolution.edited_content.is_some() {
                    labels.insert(FeedbackLabel::Edited);
                }
            }
            DecisionAction::Reject => {
                labels.insert(FeedbackLabel::Rejected);
            }
        }
    }
    labels
}
