//! HTML escaping and HTML-to-text conversion

use log::warn;

/// Wide enough that html2text never wraps body text
const RENDER_WIDTH: usize = 4096;

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render plain text as HTML: escaped, newlines as `<br>`
pub fn plain_to_html(text: &str) -> String {
    let escaped = escape_html(&text.replace("\r\n", "\n"));
    format!("<div>{}</div>", escaped.replace('\n', "<br>"))
}

/// Visible text of an HTML document with whitespace collapsed
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), RENDER_WIDTH) {
        Ok(text) => collapse_whitespace(&text),
        Err(e) => {
            warn!("html2text failed ({e}), falling back to tag stripping");
            collapse_whitespace(&strip_tags(html))
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Crude tag removal for documents html2text rejects
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b && c > \"d\""), "a &lt; b &amp;&amp; c &gt; &quot;d&quot;");
    }

    #[test]
    fn test_plain_to_html() {
        assert_eq!(
            plain_to_html("line one\r\nline <two>"),
            "<div>line one<br>line &lt;two&gt;</div>"
        );
    }

    #[test]
    fn test_html_to_text_drops_markup() {
        let text = html_to_text(
            "<html><head><style>p { color: red; }</style></head>\
             <body><p>Meeting moved to <b>Thursday</b></p><p>See you</p></body></html>",
        );
        assert!(text.contains("Meeting moved to"));
        assert!(text.contains("Thursday"));
        assert!(text.contains("See you"));
        assert!(!text.contains("<p>"));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(collapse_whitespace(&strip_tags("<div>a<br>b</div>")), "a b");
    }
}
