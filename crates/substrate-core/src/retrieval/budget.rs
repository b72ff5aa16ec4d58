//! Token/character budgeting shared by `recall` and the session-start assembler.
//!
//! Every response enforces its budget with the same four-characters-per-token heuristic rather
//! than an actual tokenizer — cheap, deterministic, and close enough for a soft cap the caller is
//! expected to respect rather than a hard wire-protocol limit.

/// Characters per token under the heuristic this crate uses everywhere a token budget matters.
pub const CHARS_PER_TOKEN: usize = 4;

/// Token ceiling for `recall`'s compact and timeline detail levels.
pub const COMPACT_TOKEN_BUDGET: usize = 2_000;

/// Token ceiling for a single `recall` full-detail view.
pub const FULL_TOKEN_BUDGET: usize = 4_000;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// The result of fitting a list of candidates into a token budget: the items that fit, whether
/// anything was dropped, and how many candidates existed before truncation.
#[derive(Debug, Clone)]
pub struct BudgetedList<T> {
    pub items: Vec<T>,
    pub truncated: bool,
    pub total_matches: usize,
}

/// Accumulate `candidates` (assumed already sorted in priority order) until the next item would
/// push the running token total over `token_budget`, per spec.md §4.6: "the formatter accumulates
/// items in score order and truncates when the next item would exceed the budget (always
/// including at least one item)".
pub fn truncate_to_budget<T>(
    candidates: Vec<T>,
    token_budget: usize,
    render: impl Fn(&T) -> String,
) -> BudgetedList<T> {
    let total_matches = candidates.len();
    let mut items = Vec::new();
    let mut used_tokens = 0usize;
    let mut truncated = false;

    for (i, item) in candidates.into_iter().enumerate() {
        let cost = estimate_tokens(&render(&item));
        if i > 0 && used_tokens + cost > token_budget {
            truncated = true;
            break;
        }
        used_tokens += cost;
        items.push(item);
    }

    BudgetedList { items, truncated, total_matches }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn truncation_always_keeps_at_least_one_item() {
        let huge = "x".repeat(CHARS_PER_TOKEN * COMPACT_TOKEN_BUDGET * 4);
        let result = truncate_to_budget(vec![huge.clone(), "short".to_string()], COMPACT_TOKEN_BUDGET, |s| s.clone());
        assert_eq!(result.items.len(), 1);
        assert!(result.truncated);
        assert_eq!(result.total_matches, 2);
    }

    #[test]
    fn items_within_budget_are_not_truncated() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result = truncate_to_budget(items.clone(), COMPACT_TOKEN_BUDGET, |s| s.clone());
        assert_eq!(result.items.len(), 3);
        assert!(!result.truncated);
        assert_eq!(result.total_matches, 3);
    }
}
