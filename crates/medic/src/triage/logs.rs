//! Bounded excerpt of CI logs for the classifier.

/// Prefix added when older output was dropped.
pub const TRUNCATION_MARKER: &str = "...(older logs truncated)...\n";

/// Default character budget for the excerpt.
pub const DEFAULT_LOG_BUDGET: usize = 10_000;

/// Keep the tail of `full_text` within `max_chars` characters.
///
/// Failures surface at the end of CI output, so the newest lines are kept.
/// When truncating, the partial first line of the kept window is dropped and
/// [`TRUNCATION_MARKER`] is prepended. Lengths are counted in `char`s.
#[must_use]
pub fn filter_log_window(full_text: &str, max_chars: usize) -> String {
    let total = full_text.chars().count();
    if total <= max_chars {
        return full_text.to_string();
    }

    let start = full_text
        .char_indices()
        .nth(total - max_chars)
        .map_or(full_text.len(), |(idx, _)| idx);
    let tail = &full_text[start..];
    let tail = tail.split_once('\n').map_or(tail, |(_, rest)| rest);

    format!("{TRUNCATION_MARKER}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_unchanged() {
        assert_eq!(filter_log_window("", 10), "");
        assert_eq!(filter_log_window("line\n", 10), "line\n");
        let exact = "a".repeat(10);
        assert_eq!(filter_log_window(&exact, 10), exact);
    }

    #[test]
    fn test_keeps_tail_and_drops_partial_line() {
        let text = "first line\nsecond line\nERROR: boom\n";
        let filtered = filter_log_window(text, 16);
        // last 16 chars: "ine\nERROR: boom\n"
        assert_eq!(filtered, format!("{TRUNCATION_MARKER}ERROR: boom\n"));
    }

    #[test]
    fn test_single_long_line_kept_as_tail() {
        let text = "x".repeat(50);
        let filtered = filter_log_window(&text, 20);
        assert_eq!(filtered, format!("{TRUNCATION_MARKER}{}", "x".repeat(20)));
    }

    #[test]
    fn test_bounded_length() {
        let text: String = (0..2_000).map(|i| format!("step {i} ok\n")).collect();
        for budget in [0, 1, 100, 1_000, 10_000] {
            let filtered = filter_log_window(&text, budget);
            assert!(filtered.chars().count() <= budget + TRUNCATION_MARKER.chars().count());
        }
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "日本語のログ\n".repeat(100);
        let filtered = filter_log_window(&text, 15);
        assert!(filtered.starts_with(TRUNCATION_MARKER));
        assert!(filtered.ends_with("日本語のログ\n"));
    }

    #[test]
    fn test_idempotent_within_budget() {
        let text: String = (0..500).map(|i| format!("line {i}\n")).collect();
        let once = filter_log_window(&text, 200);
        let budget = once.chars().count();
        assert_eq!(filter_log_window(&once, budget), once);
    }
}
