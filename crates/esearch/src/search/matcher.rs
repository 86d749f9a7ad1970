//! Keyword matching, snippets and highlights over decrypted records

use serde::{Deserialize, Serialize};

use crate::models::ContentRecord;

/// A highlighted text span within a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightSpan {
    /// Start byte offset
    pub start: usize,
    /// End byte offset
    pub end: usize,
}

/// Match highlights for a specific field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldHighlight {
    /// Field name ("subject" or "body")
    pub field: String,
    /// The text containing highlights
    pub text: String,
    pub highlights: Vec<HighlightSpan>,
}

/// True if every keyword occurs in the searchable text of the record.
/// The body only counts when it was decrypted.
pub fn matches(record: &ContentRecord, has_body: bool, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return false;
    }
    let haystack = searchable_text(record, has_body);
    keywords.iter().all(|k| haystack.contains(k.as_str()))
}

fn searchable_text(record: &ContentRecord, has_body: bool) -> String {
    let mut text = String::with_capacity(record.approximate_size());
    text.push_str(&record.subject);
    push_contact(&mut text, &record.sender.name, &record.sender.address);
    for contact in record.recipients() {
        push_contact(&mut text, &contact.name, &contact.address);
    }
    if has_body {
        text.push('\n');
        text.push_str(&record.body);
    }
    text.to_lowercase()
}

fn push_contact(text: &mut String, name: &Option<String>, address: &str) {
    text.push('\n');
    if let Some(name) = name {
        text.push_str(name);
        text.push(' ');
    }
    text.push_str(address);
}

/// Body excerpt centred on the first keyword hit, `context` characters on
/// each side. Without a hit, the start of the body.
pub fn snippet(body: &str, keywords: &[String], context: usize) -> String {
    let (lower, origin) = fold_case(body);
    let first_hit = keywords
        .iter()
        .filter(|k| !k.is_empty())
        .filter_map(|k| lower.find(k.as_str()).map(|pos| source_range(&origin, pos, k.len())))
        .min_by_key(|(start, _)| *start);

    let Some((start, end)) = first_hit else {
        return truncate_chars(body, context * 2);
    };

    let before: String = {
        let mut chars: Vec<char> = body[..start].chars().rev().take(context).collect();
        chars.reverse();
        chars.into_iter().collect()
    };
    let after: String = body[end..].chars().take(context).collect();

    let mut out = String::new();
    if before.len() < start {
        out.push_str("...");
    }
    out.push_str(&before);
    out.push_str(&body[start..end]);
    out.push_str(&after);
    if end + after.len() < body.len() {
        out.push_str("...");
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Lowercase `text`, recording for every byte of the result the byte range
/// of the source character it came from. Lowercasing can change a
/// character's encoded length (`ẞ` is three bytes, `ß` two).
fn fold_case(text: &str) -> (String, Vec<(usize, usize)>) {
    let mut lower = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());
    for (start, c) in text.char_indices() {
        let end = start + c.len_utf8();
        for folded in c.to_lowercase() {
            lower.push(folded);
        }
        origin.resize(lower.len(), (start, end));
    }
    (lower, origin)
}

/// Source byte range of a non-empty match at `pos..pos + len` in the
/// folded text
fn source_range(origin: &[(usize, usize)], pos: usize, len: usize) -> (usize, usize) {
    (origin[pos].0, origin[pos + len - 1].1)
}

/// Highlight every keyword occurrence in `text`, or `None` if there is none
pub fn highlight(field: &str, text: &str, keywords: &[String]) -> Option<FieldHighlight> {
    let (lower, origin) = fold_case(text);

    let mut spans: Vec<HighlightSpan> = Vec::new();
    for keyword in keywords.iter().filter(|k| !k.is_empty()) {
        let mut from = 0;
        while let Some(found) = lower[from..].find(keyword.as_str()) {
            let pos = from + found;
            let (start, end) = source_range(&origin, pos, keyword.len());
            spans.push(HighlightSpan { start, end });
            from = pos + keyword.len();
        }
    }
    if spans.is_empty() {
        return None;
    }

    // Merge overlaps from different keywords
    spans.sort_by_key(|s| s.start);
    let mut merged: Vec<HighlightSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }

    Some(FieldHighlight {
        field: field.to_string(),
        text: text.to_string(),
        highlights: merged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Contact;

    fn record() -> ContentRecord {
        ContentRecord {
            subject: "Quarterly Report".into(),
            sender: Contact::with_name("Alice Smith", "alice@example.com"),
            to: vec![Contact::new("bob@example.com")],
            cc: vec![],
            bcc: vec![Contact::new("audit@example.com")],
            body: "Numbers for Q3 are attached. Revenue grew.".into(),
        }
    }

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_all_keywords_must_match() {
        let r = record();
        assert!(matches(&r, true, &kw(&["quarterly", "revenue"])));
        assert!(matches(&r, true, &kw(&["alice", "audit@example"])));
        assert!(!matches(&r, true, &kw(&["quarterly", "missing"])));
        assert!(!matches(&r, true, &[]));
    }

    #[test]
    fn test_body_ignored_without_decrypted_body() {
        let r = record();
        assert!(!matches(&r, false, &kw(&["revenue"])));
        assert!(matches(&r, false, &kw(&["report"])));
    }

    #[test]
    fn test_snippet_centres_on_first_hit() {
        let body = "aaaa bbbb target cccc dddd";
        assert_eq!(snippet(body, &kw(&["target"]), 5), "...bbbb target cccc...");
        assert_eq!(snippet(body, &kw(&["missing"]), 2), "aaaa...");
        assert_eq!(snippet("short", &kw(&["short"]), 10), "short");
    }

    #[test]
    fn test_highlight_merges_spans() {
        let h = highlight("subject", "Quarterly Report", &kw(&["quarter", "terly", "report"])).unwrap();
        assert_eq!(
            h.highlights,
            vec![HighlightSpan { start: 0, end: 9 }, HighlightSpan { start: 10, end: 16 }]
        );
        assert!(highlight("subject", "Quarterly Report", &kw(&["nope"])).is_none());
    }

    #[test]
    fn test_highlight_when_lowercase_changes_length() {
        let text = "GRO\u{1E9E}E Pl\u{E4}ne";
        let h = highlight("subject", text, &kw(&["gro\u{DF}e", "pl\u{E4}ne"])).unwrap();
        assert_eq!(
            h.highlights,
            vec![HighlightSpan { start: 0, end: 7 }, HighlightSpan { start: 8, end: 14 }]
        );
        assert_eq!(&text[8..14], "Pl\u{E4}ne");
    }

    #[test]
    fn test_snippet_when_lowercase_changes_length() {
        assert_eq!(
            snippet("\u{1E9E} Stadt Plan", &kw(&["plan"]), 3),
            "...dt Plan"
        );
    }
}
