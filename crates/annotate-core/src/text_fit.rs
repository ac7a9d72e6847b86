//! Adaptive font sizing and word wrapping for free text in a fixed box
//!
//! The search starts at the largest allowed font size and only ever shrinks,
//! so it finishes after at most `(max - min) / step + 1` attempts. Text that
//! still does not fit at the smallest size is cut to the line budget and the
//! last line ends in an ellipsis.

use invoice_types::Rect;
use serde::{Deserialize, Serialize};

use crate::config::{AnnotationConfig, FontBounds};

pub const ELLIPSIS: &str = "...";

/// Inner padding between the box border and its text, in points.
pub const TEXT_PADDING: f64 = 4.0;

const FONT_EPSILON: f64 = 1e-9;

/// Approximate glyph metrics used to estimate line capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    pub char_width_ratio: f64,
    pub line_height_ratio: f64,
    pub padding: f64,
}

impl TextMetrics {
    pub fn from_config(config: &AnnotationConfig) -> Self {
        Self {
            char_width_ratio: config.char_width_ratio,
            line_height_ratio: config.line_height_ratio,
            padding: TEXT_PADDING,
        }
    }

    pub fn chars_per_line(&self, width: f64, font_size: f64) -> usize {
        let usable = (width - 2.0 * self.padding).max(0.0);
        ((usable / (font_size * self.char_width_ratio)).floor() as usize).max(1)
    }

    pub fn lines_that_fit(&self, height: f64, font_size: f64) -> usize {
        let usable = (height - 2.0 * self.padding).max(0.0);
        ((usable / (font_size * self.line_height_ratio)).floor() as usize).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub font_size: f64,
    pub lines: Vec<String>,
    /// The text did not fit at the minimum size and was cut
    pub truncated: bool,
    /// Number of font sizes tried
    pub attempts: usize,
}

/// Greedy word wrap to `width` characters. Words longer than a line are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        let mut current_len = 0usize;

        for word in paragraph.split_whitespace() {
            let chars: Vec<char> = word.chars().collect();
            for chunk in chars.chunks(width) {
                let piece: String = chunk.iter().collect();
                let needed = if current_len == 0 {
                    chunk.len()
                } else {
                    current_len + 1 + chunk.len()
                };
                if needed > width && current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                if current_len > 0 {
                    current.push(' ');
                    current_len += 1;
                }
                current.push_str(&piece);
                current_len += chunk.len();
            }
        }

        if current_len > 0 {
            lines.push(current);
        }
    }

    lines
}

fn truncate_with_ellipsis(line: &str, width: usize) -> String {
    let keep = width.saturating_sub(ELLIPSIS.len());
    let head: String = line.chars().take(keep).collect();
    format!("{}{}", head.trim_end(), ELLIPSIS)
}

/// Fit `text` into `rect`, shrinking the font from `bounds.max` towards
/// `bounds.min` until the wrapped text fits the line budget.
///
/// The line budget at a given size is the smaller of `max_lines` and the
/// number of lines the box height can hold.
pub fn fit_text(
    text: &str,
    rect: &Rect,
    bounds: FontBounds,
    max_lines: usize,
    metrics: &TextMetrics,
) -> FitResult {
    let max_lines = max_lines.max(1);
    let mut font_size = bounds.max;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let per_line = metrics.chars_per_line(rect.width(), font_size);
        let budget = metrics
            .lines_that_fit(rect.height(), font_size)
            .min(max_lines);
        let mut lines = wrap_text(text, per_line);

        if lines.len() <= budget {
            return FitResult {
                font_size,
                lines,
                truncated: false,
                attempts,
            };
        }

        if font_size <= bounds.min + FONT_EPSILON {
            lines.truncate(budget);
            if let Some(last) = lines.last_mut() {
                *last = truncate_with_ellipsis(last, per_line);
            }
            return FitResult {
                font_size,
                lines,
                truncated: true,
                attempts,
            };
        }

        let next = font_size - bounds.step;
        font_size = if next <= bounds.min + FONT_EPSILON {
            bounds.min
        } else {
            next
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metrics() -> TextMetrics {
        TextMetrics {
            char_width_ratio: 0.5,
            line_height_ratio: 1.2,
            padding: 0.0,
        }
    }

    #[test]
    fn test_wrap_text_greedy() {
        let lines = wrap_text("the quick brown fox jumps over the lazy dog", 10);
        assert_eq!(
            lines,
            vec!["the quick", "brown fox", "jumps over", "the lazy", "dog"]
        );
    }

    #[test]
    fn test_wrap_text_splits_long_words_and_keeps_paragraphs() {
        let lines = wrap_text("abcdefghij kl\n\nmn", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij", "kl", "mn"]);
    }

    #[test]
    fn test_short_text_fits_at_max() {
        let rect = Rect::new(0.0, 0.0, 200.0, 100.0);
        let fit = fit_text("Check delivery", &rect, FontBounds::default(), 6, &metrics());
        assert_eq!(fit.font_size, 11.0);
        assert_eq!(fit.lines, vec!["Check delivery"]);
        assert!(!fit.truncated);
        assert_eq!(fit.attempts, 1);
    }

    #[test]
    fn test_shrinks_until_fits() {
        // 120 chars; at 11pt a 220pt box holds 40 chars/line but only 2 lines in 30pt.
        let text = "word ".repeat(24);
        let rect = Rect::new(0.0, 0.0, 220.0, 30.0);
        let fit = fit_text(&text, &rect, FontBounds::default(), 6, &metrics());
        assert!(!fit.truncated);
        assert!(fit.font_size < 11.0 && fit.font_size >= 6.0);
        assert_eq!(fit.font_size, 8.0);
        let budget = metrics().lines_that_fit(30.0, fit.font_size).min(6);
        assert!(fit.lines.len() <= budget);
    }

    #[test]
    fn test_scenario_long_note_truncated_at_floor() {
        // 500 characters, ~120 chars/line at the max font, 6 lines max.
        let text = "Supplier shorted two cases of tomatoes and invoiced both. ".repeat(9);
        let text = &text[..500];
        let bounds = FontBounds {
            min: 9.0,
            max: 10.0,
            step: 0.5,
        };
        let rect = Rect::new(0.0, 0.0, 600.0, 40.0);
        let fit = fit_text(text, &rect, bounds, 6, &metrics());

        assert!(fit.truncated);
        assert_eq!(fit.font_size, 9.0, "reports the floor it stopped at");
        assert_eq!(fit.attempts, 3);
        assert!(fit.lines.len() <= 6);
        assert!(fit.lines.last().unwrap().ends_with(ELLIPSIS));
        let per_line = metrics().chars_per_line(600.0, 9.0);
        assert!(fit.lines.iter().all(|l| l.chars().count() <= per_line));
    }

    #[test]
    fn test_scenario_long_note_fits_at_max_font() {
        let text = "x".repeat(499) + " ";
        let rect = Rect::new(0.0, 0.0, 660.0, 200.0);
        let fit = fit_text(&text, &rect, FontBounds::default(), 6, &metrics());
        // 660 / (11 * 0.5) = 120 chars per line at the max font: 5 lines.
        assert_eq!(fit.font_size, 11.0);
        assert_eq!(fit.lines.len(), 5);
    }

    #[test]
    fn test_empty_text() {
        let rect = Rect::new(0.0, 0.0, 100.0, 50.0);
        let fit = fit_text("   ", &rect, FontBounds::default(), 3, &metrics());
        assert!(fit.lines.is_empty());
        assert!(!fit.truncated);
    }
}
