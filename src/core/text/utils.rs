//! Width-aware truncation and wrapping.

use unicode_segmentation::UnicodeSegmentation;

use super::ansi::extract_ansi_code;
use super::width::{grapheme_width, visible_width};

const ANSI_RESET: &str = "\x1b[0m";

pub fn grapheme_segments(text: &str) -> unicode_segmentation::Graphemes<'_> {
    UnicodeSegmentation::graphemes(text, true)
}

/// Cuts `text` to `max_width` columns, keeping escape sequences intact.
pub fn truncate_to_width(text: &str, max_width: usize, ellipsis: &str, pad: bool) -> String {
    if max_width == 0 {
        return String::new();
    }

    let text_width = visible_width(text);
    if text_width <= max_width {
        if pad {
            return format!("{text}{}", " ".repeat(max_width - text_width));
        }
        return text.to_string();
    }

    let ellipsis_width = visible_width(ellipsis);
    let target_width = max_width.saturating_sub(ellipsis_width);
    if target_width == 0 {
        return ellipsis.chars().take(max_width).collect();
    }

    let mut truncated = String::new();
    let mut current_width = 0;
    let mut idx = 0;
    'outer: while idx < text.len() {
        if let Some(ansi) = extract_ansi_code(text, idx) {
            truncated.push_str(&ansi.code);
            idx += ansi.length;
            continue;
        }

        let text_end = next_ansi_or_end(text, idx);
        for grapheme in grapheme_segments(&text[idx..text_end]) {
            let width = grapheme_width(grapheme);
            if current_width + width > target_width {
                break 'outer;
            }
            truncated.push_str(grapheme);
            current_width += width;
        }
        idx = text_end;
    }

    let mut result = String::with_capacity(truncated.len() + ellipsis.len() + ANSI_RESET.len());
    result.push_str(&truncated);
    result.push_str(ANSI_RESET);
    result.push_str(ellipsis);

    if pad {
        let result_width = visible_width(&result);
        if result_width < max_width {
            result.push_str(&" ".repeat(max_width - result_width));
        }
    }

    result
}

/// Keeps the rightmost graphemes of plain `text` that fit in `max_width`.
pub fn tail_to_width(text: &str, max_width: usize, ellipsis: &str) -> String {
    if visible_width(text) <= max_width {
        return text.to_string();
    }

    let budget = max_width.saturating_sub(visible_width(ellipsis));
    let mut kept: Vec<&str> = Vec::new();
    let mut width = 0;
    for grapheme in grapheme_segments(text).rev() {
        let grapheme_cols = grapheme_width(grapheme);
        if width + grapheme_cols > budget {
            break;
        }
        kept.push(grapheme);
        width += grapheme_cols;
    }
    kept.reverse();

    format!("{ellipsis}{}", kept.concat())
}

/// Word-wraps plain `text` into lines of at most `width` columns.
///
/// Words wider than a full line are split at grapheme boundaries. Embedded
/// newlines always start a new line.
pub fn wrap_to_width(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for raw_line in text.split('\n') {
        let raw_line = raw_line.trim_end_matches('\r');
        let mut current = String::new();
        let mut current_width = 0;

        for word in raw_line.split_word_bounds() {
            let word_width = visible_width(word);
            if current_width + word_width <= width {
                current.push_str(word);
                current_width += word_width;
                continue;
            }

            if word.trim().is_empty() {
                lines.push(current.trim_end().to_string());
                current.clear();
                current_width = 0;
                continue;
            }

            if !current.is_empty() {
                lines.push(current.trim_end().to_string());
                current.clear();
                current_width = 0;
            }

            for grapheme in grapheme_segments(word) {
                let grapheme_cols = grapheme_width(grapheme);
                if current_width + grapheme_cols > width && !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                    current_width = 0;
                }
                current.push_str(grapheme);
                current_width += grapheme_cols;
            }
        }

        lines.push(current);
    }

    lines
}

fn next_ansi_or_end(input: &str, mut idx: usize) -> usize {
    while idx < input.len() {
        if extract_ansi_code(input, idx).is_some() {
            break;
        }
        match input[idx..].chars().next() {
            Some(ch) => idx += ch.len_utf8(),
            None => break,
        }
    }
    idx
}
