use std::borrow::Cow;

use scraper::{Html, Node};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const ELLIPSIS: &str = "...";

/// Terminal column width of `s` (CJK and emoji count as two columns).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Cuts `s` down to at most `max_width` terminal columns, appending "..."
/// when something was removed. Used for the `list` table.
///
/// ```
/// use feedrelay::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let (budget, suffix) = if max_width > ELLIPSIS.len() {
        (max_width - ELLIPSIS.len(), ELLIPSIS)
    } else {
        (max_width, "")
    };

    let mut used = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        end = idx + c.len_utf8();
    }

    Cow::Owned(format!("{}{}", &s[..end], suffix))
}

/// Pads `s` with spaces on the right up to `width` columns.
pub fn pad_to_width(s: &str, width: usize) -> String {
    let w = display_width(s);
    let mut out = String::with_capacity(s.len() + width.saturating_sub(w));
    out.push_str(s);
    out.extend(std::iter::repeat(' ').take(width.saturating_sub(w)));
    out
}

/// Elements whose edges separate words even without surrounding whitespace.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "li", "ul", "ol", "blockquote", "h1", "h2", "h3", "h4", "h5", "h6", "tr",
    "td", "th", "pre", "hr", "table",
];

/// Reduces an HTML feed summary to plain text for a chat card.
///
/// The fragment goes through a real HTML parser, so every named and numeric
/// entity is decoded and a bare `<` in prose survives. Script and style
/// bodies are dropped, and runs of whitespace collapse to a single space.
pub fn summary_to_plain(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::with_capacity(html.len());

    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Text(t) => {
                let hidden = node
                    .parent()
                    .and_then(|p| p.value().as_element().map(|e| e.name()))
                    .is_some_and(|name| name == "script" || name == "style");
                if !hidden {
                    text.push_str(&t.text);
                }
            }
            Node::Element(e) if BLOCK_TAGS.contains(&e.name()) => text.push(' '),
            _ => {}
        }
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates to at most `max_chars` characters, counting the trailing "...".
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = s.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push_str(ELLIPSIS);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_counts_wide_chars() {
        assert_eq!(display_width("abc"), 3);
        assert_eq!(display_width("日本"), 4);
    }

    #[test]
    fn test_truncate_to_width_wide_chars() {
        assert_eq!(truncate_to_width("日本語のタイトル", 7), "日本...");
        assert_eq!(truncate_to_width("abc", 0), "");
    }

    #[test]
    fn test_pad_to_width() {
        assert_eq!(pad_to_width("ab", 4), "ab  ");
        assert_eq!(pad_to_width("日本", 5), "日本 ");
        assert_eq!(pad_to_width("toolong", 3), "toolong");
    }

    #[test]
    fn test_summary_to_plain_strips_tags_and_entities() {
        let html = "<p>Hello&nbsp;<b>world</b> &amp; friends</p>\n\n<p>Bye</p>";
        assert_eq!(summary_to_plain(html), "Hello world & friends Bye");
    }

    #[test]
    fn test_summary_to_plain_keeps_plain_text() {
        assert_eq!(summary_to_plain("  just   text "), "just text");
    }

    #[test]
    fn test_summary_to_plain_decodes_numeric_entities() {
        assert_eq!(
            summary_to_plain("It&#8217;s done&#8230; &#x2014; &copy; 2024"),
            "It\u{2019}s done\u{2026} \u{2014} \u{a9} 2024"
        );
    }

    #[test]
    fn test_summary_to_plain_keeps_bare_angle_bracket() {
        assert_eq!(summary_to_plain("1 < 2 and more"), "1 < 2 and more");
    }

    #[test]
    fn test_summary_to_plain_drops_scripts_and_splits_blocks() {
        let html = "<div>first</div><div>second</div><script>alert(1)</script><br>third";
        assert_eq!(summary_to_plain(html), "first second third");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("hello world again", 10), "hello w...");
        assert_eq!(truncate_chars("ééééé", 4), "é...");
    }
}
