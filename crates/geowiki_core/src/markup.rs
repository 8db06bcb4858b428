//! Page markup to plain text, for the text archive export.

use anyhow::{Context, Result};

/// Column the text archive wraps at.
pub const TEXT_WIDTH: usize = 80;

/// Render page HTML as plain text wrapped at [`TEXT_WIDTH`].
///
/// Runs of blank lines collapse to one; the result ends with a newline unless it is empty.
pub fn html_to_text(html: &str) -> Result<String> {
    let rendered = html2text::config::plain()
        .string_from_read(html.as_bytes(), TEXT_WIDTH)
        .context("failed to render page markup as text")?;
    Ok(collapse_blank_lines(&rendered))
}

fn collapse_blank_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.is_empty() && lines.last().is_none_or(|last| last.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        return String::new();
    }
    let mut output = lines.join("\n");
    output.push('\n');
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_are_separated_by_a_single_blank_line() {
        let text = html_to_text("<p>First   line</p>\n\n\n<p>Second<br/>line</p>").expect("render");
        assert_eq!(text, "First line\n\nSecond\nline\n");
    }

    #[test]
    fn list_items_and_entities() {
        let text = html_to_text("<ul><li>Water &amp; food</li><li>&lt;blankets&gt;&#33;</li></ul>").expect("render");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, vec!["* Water & food", "* <blankets>!"]);
    }

    #[test]
    fn comments_are_dropped_and_long_text_wraps() {
        let words = "shelter ".repeat(30);
        let text = html_to_text(&format!("<!-- note --><p>{words}</p>")).expect("render");
        assert!(!text.contains("note"));
        assert!(text.lines().count() > 1);
        assert!(text.lines().all(|line| line.chars().count() <= TEXT_WIDTH));
    }

    #[test]
    fn blank_runs_collapse() {
        assert_eq!(collapse_blank_lines("\n\na\n\n\n\nb\n\n"), "a\n\nb\n");
        assert_eq!(collapse_blank_lines("\n \n"), "");
        assert_eq!(html_to_text("").expect("empty"), "");
        assert_eq!(html_to_text("no markup here").expect("plain"), "no markup here\n");
    }
}
