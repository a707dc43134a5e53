//! Input cleaning for text that is stored and later rendered

/// Trim, drop control characters (newlines and tabs survive) and HTML-escape.
pub fn clean(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.trim().chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// [`clean`] for optional fields; blank input becomes `None`.
pub fn clean_opt(input: Option<&str>) -> Option<String> {
    input.map(clean).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            clean(r#"<script>alert("x")</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;"
        );
        assert_eq!(clean("Tom & Jerry's"), "Tom &amp; Jerry&#39;s");
    }

    #[test]
    fn trims_and_strips_control_chars() {
        assert_eq!(clean("  hi\u{0}there\u{7}  "), "hithere");
        assert_eq!(clean("line one\nline two"), "line one\nline two");
    }

    #[test]
    fn blank_optional_is_none() {
        assert_eq!(clean_opt(Some("   ")), None);
        assert_eq!(clean_opt(None), None);
        assert_eq!(clean_opt(Some(" ok ")), Some("ok".to_string()));
    }
}
