//! Forgiving unified-diff application.
//!
//! Hunk headers (`@@ -a,b +c,d @@`) are treated as separators only; their
//! line numbers are never trusted. The diff is walked sequentially against a
//! cursor into the original, so a model that miscounts header offsets still
//! produces the intended edit. The trade-off is that context lines are not
//! checked against the original text.

/// Rebuild file content from `original` plus `diff`.
///
/// - `+line` emits `line`
/// - `-line` skips one original line
/// - ` line` copies the next original line forward
/// - an empty interior line is a context line whose leading space was lost
/// - a `--- ` line directly followed by `+++ ` before the first hunk is a
///   file header pair and is ignored
///
/// Original lines left after the diff is exhausted are appended verbatim.
pub fn apply_unified_diff(original: &str, diff: &str) -> String {
    let original_lines: Vec<&str> = original.split('\n').collect();
    let mut cursor = 0usize;
    let mut output: Vec<&str> = Vec::with_capacity(original_lines.len());

    let diff_lines: Vec<&str> = diff.split('\n').collect();
    let last = diff_lines.len().saturating_sub(1);
    let mut seen_hunk = false;
    let mut in_header = false;

    for (i, line) in diff_lines.iter().enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.starts_with("@@") {
            seen_hunk = true;
            continue;
        }
        if in_header {
            // The `+++ ` partner of a skipped `--- ` line
            in_header = false;
            continue;
        }
        if !seen_hunk && line.starts_with("--- ") {
            let next = diff_lines.get(i + 1).map(|l| l.strip_suffix('\r').unwrap_or(l));
            if next.is_some_and(|l| l.starts_with("+++ ")) {
                in_header = true;
                continue;
            }
        }

        if let Some(added) = line.strip_prefix('+') {
            output.push(added);
        } else if line.starts_with('-') {
            cursor += 1;
        } else if line.starts_with(' ') || (line.is_empty() && i != last) {
            if let Some(kept) = original_lines.get(cursor) {
                output.push(kept);
                cursor += 1;
            }
        }
        // `\ No newline at end of file` and other markers are ignored
    }

    if cursor < original_lines.len() {
        output.extend_from_slice(&original_lines[cursor..]);
    }

    output.join("\n")
}
