//! Middle-omission truncation for stored run output.
//!
//! Run results are kept in the run log, so very chatty jobs are cut down
//! while keeping both the first lines (what started) and the last lines
//! (how it ended).

/// Cut `output` to about `max_chars` characters by dropping its middle.
///
/// Counts characters, not bytes, so multi-byte sequences are never split.
/// `max_chars == 0` disables truncation.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    if max_chars == 0 || output.len() <= max_chars {
        return output.to_owned();
    }
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let half = max_chars / 2;
    let omitted = total - 2 * half;
    let head_end = byte_offset(output, half);
    let tail_start = byte_offset(output, total - half);

    format!(
        "{}\n\n... [{omitted} chars omitted] ...\n\n{}",
        &output[..head_end],
        &output[tail_start..]
    )
}

/// Byte index of the `n`th character.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_untouched() {
        assert_eq!(truncate_output("hello\n", 100), "hello\n");
        assert_eq!(truncate_output("", 100), "");
    }

    #[test]
    fn exact_boundary_untouched() {
        let s = "x".repeat(64);
        assert_eq!(truncate_output(&s, 64), s);
    }

    #[test]
    fn zero_limit_disables() {
        let s = "y".repeat(1_000);
        assert_eq!(truncate_output(&s, 0), s);
    }

    #[test]
    fn keeps_head_and_tail() {
        let input = format!("{}{}{}", "A".repeat(100), "B".repeat(1_000), "C".repeat(100));
        let out = truncate_output(&input, 200);
        assert!(out.starts_with(&"A".repeat(100)));
        assert!(out.ends_with(&"C".repeat(100)));
        assert!(out.contains("[1000 chars omitted]"));
        assert!(!out.contains('B'));
    }

    #[test]
    fn multibyte_chars_not_split() {
        let s = "€".repeat(500);
        let out = truncate_output(&s, 100);
        assert!(out.contains("[400 chars omitted]"));
        assert_eq!(out.chars().filter(|c| *c == '€').count(), 100);
    }

    #[test]
    fn odd_limit_counts_omitted_exactly() {
        let s = "z".repeat(20);
        let out = truncate_output(&s, 5);
        assert!(out.contains("[16 chars omitted]"));
    }
}
