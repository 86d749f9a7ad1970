//! Query keyword extraction

use std::collections::HashSet;

/// Split a query into lowercase keywords
///
/// Text between double quotes is one keyword; everything else splits on
/// whitespace. Typographic quotes and apostrophes are normalized first so
/// that `“foo bar”` and `don’t` behave like their ASCII forms.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let normalized = normalize(query.trim());
    let segments: Vec<&str> = normalized.split('"').collect();
    // An odd number of quotes leaves the last segment unclosed
    let unclosed = segments.len() % 2 == 0;

    let mut keywords = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        // Odd segments sit between a pair of quotes
        let in_phrase = i % 2 == 1 && !(unclosed && i == segments.len() - 1);
        if in_phrase {
            let phrase = segment.trim();
            if !phrase.is_empty() {
                keywords.push(phrase.to_string());
            }
        } else {
            keywords.extend(segment.split_whitespace().map(str::to_string));
        }
    }

    let mut seen = HashSet::new();
    keywords.retain(|keyword| seen.insert(keyword.clone()));
    keywords
}

fn normalize(query: &str) -> String {
    query
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201B}' => '\'',
            _ => c,
        })
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_split_and_lowercase() {
        assert_eq!(extract_keywords("  Lunch   FRIDAY "), vec!["lunch", "friday"]);
    }

    #[test]
    fn test_quoted_phrase() {
        assert_eq!(
            extract_keywords("report \"quarterly numbers\" draft"),
            vec!["report", "quarterly numbers", "draft"]
        );
    }

    #[test]
    fn test_typographic_quotes() {
        assert_eq!(
            extract_keywords("\u{201C}Don\u{2019}t panic\u{201D}"),
            vec!["don't panic"]
        );
    }

    #[test]
    fn test_unbalanced_quote() {
        assert_eq!(extract_keywords("budget \"next year"), vec!["budget", "next", "year"]);
    }

    #[test]
    fn test_unbalanced_quote_after_phrase() {
        assert_eq!(
            extract_keywords("\"quarterly numbers\" \""),
            vec!["quarterly numbers"]
        );
        assert_eq!(
            extract_keywords("\"quarterly numbers\" \"due friday"),
            vec!["quarterly numbers", "due", "friday"]
        );
    }

    #[test]
    fn test_repeated_keywords_kept_once() {
        assert_eq!(
            extract_keywords("lunch friday lunch \"friday\""),
            vec!["lunch", "friday"]
        );
    }

    #[test]
    fn test_empty_query() {
        assert!(extract_keywords("   ").is_empty());
        assert!(extract_keywords("\"\"").is_empty());
    }
}
