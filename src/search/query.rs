use chrono::{Days, NaiveDate};
use sha2::{Digest, Sha256};

use super::filter::SearchFilter;

/// Query that matches every message when no filter clause is present.
const MATCH_ALL: &str = "in:anywhere";

/// Provider query string plus the canonical filter it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    query: String,
    filter: SearchFilter,
    digest: String,
}

impl NormalizedQuery {
    /// The Gmail search expression.
    pub fn as_str(&self) -> &str {
        &self.query
    }

    pub fn filter(&self) -> &SearchFilter {
        &self.filter
    }

    /// Hex SHA-256 of the query string and page size. Excludes the page token,
    /// so every page of one search shares a digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn page_size(&self) -> u32 {
        self.filter.max_results
    }

    pub fn is_first_page(&self) -> bool {
        self.filter.is_first_page()
    }
}

/// Build the provider query for a filter.
///
/// Total and deterministic. Range checks happen before this is called; a
/// filter that reaches here is rendered as-is.
pub fn build(filter: &SearchFilter) -> NormalizedQuery {
    let filter = filter.normalized();
    let mut clauses: Vec<String> = Vec::with_capacity(5);

    if let Some(sender) = &filter.sender {
        clauses.push(format!("from:\"{}\"", escape_term(sender)));
    }
    if let Some(subject) = &filter.subject {
        clauses.push(format!("subject:\"{}\"", escape_term(subject)));
    }
    if let Some(from) = filter.date_from {
        clauses.push(format!("after:{}", format_date(from)));
    }
    if let Some(to) = filter.date_to {
        // `before:` is exclusive upstream
        let bound = to.checked_add_days(Days::new(1)).unwrap_or(to);
        clauses.push(format!("before:{}", format_date(bound)));
    }
    match filter.has_attachment {
        Some(true) => clauses.push("has:attachment".to_string()),
        Some(false) => clauses.push("-has:attachment".to_string()),
        None => {}
    }

    let query = if clauses.is_empty() {
        MATCH_ALL.to_string()
    } else {
        clauses.join(" ")
    };
    let digest = compute_digest(&query, filter.max_results);

    NormalizedQuery {
        query,
        filter,
        digest,
    }
}

/// Escape characters that carry meaning in the provider grammar so a term
/// cannot break out of its quoted phrase.
pub fn escape_term(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        match ch {
            '\\' | '"' | '(' | ')' | '[' | ']' | '{' | '}' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            c if c.is_control() => escaped.push(' '),
            c => escaped.push(c),
        }
    }
    escaped
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y/%m/%d").to_string()
}

fn compute_digest(query: &str, page_size: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b"\n");
    hasher.update(page_size.to_be_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_january_range_in_canonical_order() {
        let filter = SearchFilter {
            date_from: Some(date(2024, 1, 1)),
            date_to: Some(date(2024, 1, 31)),
            max_results: 50,
            ..Default::default()
        };
        let query = build(&filter);
        assert_eq!(query.as_str(), "after:2024/01/01 before:2024/02/01");
        assert_eq!(query.page_size(), 50);
        assert_eq!(query.digest().len(), 64);
    }

    #[test]
    fn test_all_clauses() {
        let filter = SearchFilter {
            date_from: Some(date(2023, 12, 1)),
            date_to: Some(date(2023, 12, 31)),
            sender: Some("Bob@Example.com".to_string()),
            subject: Some("invoice  due".to_string()),
            has_attachment: Some(true),
            ..Default::default()
        };
        assert_eq!(
            build(&filter).as_str(),
            "from:\"bob@example.com\" subject:\"invoice due\" after:2023/12/01 before:2024/01/01 has:attachment"
        );
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert_eq!(build(&SearchFilter::default()).as_str(), MATCH_ALL);
    }

    #[test]
    fn test_without_attachment() {
        let filter = SearchFilter {
            has_attachment: Some(false),
            ..Default::default()
        };
        assert_eq!(build(&filter).as_str(), "-has:attachment");
    }

    #[test]
    fn test_injection_is_escaped() {
        let filter = SearchFilter {
            subject: Some(r#"x" OR from:(*) \"#.to_string()),
            ..Default::default()
        };
        assert_eq!(
            build(&filter).as_str(),
            r#"subject:"x\" or from:\(*\) \\""#
        );
    }

    #[test]
    fn test_control_characters_become_spaces() {
        assert_eq!(escape_term("a\u{0}b"), "a b");
    }

    #[test]
    fn test_page_token_does_not_change_digest() {
        let first = SearchFilter {
            sender: Some("a@b.c".to_string()),
            ..Default::default()
        };
        let next = SearchFilter {
            page_token: Some("token".to_string()),
            ..first.clone()
        };
        assert_eq!(build(&first).digest(), build(&next).digest());
        assert!(!build(&next).is_first_page());
    }

    #[test]
    fn test_page_size_changes_digest() {
        let small = SearchFilter {
            max_results: 10,
            ..Default::default()
        };
        let large = SearchFilter {
            max_results: 20,
            ..Default::default()
        };
        assert_eq!(build(&small).as_str(), build(&large).as_str());
        assert_ne!(build(&small).digest(), build(&large).digest());
    }

    fn arb_text() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[ a-zA-Z0-9@._\"()\\[\\]{}\\\\-]{0,24}")
    }

    fn arb_filter() -> impl Strategy<Value = SearchFilter> {
        (
            proptest::option::of(0i64..3000),
            proptest::option::of(0u64..400),
            arb_text(),
            arb_text(),
            proptest::option::of(any::<bool>()),
            1u32..=500,
        )
            .prop_map(|(from, span, sender, subject, has_attachment, max_results)| {
                let base = date(2020, 1, 1);
                let date_from = from.map(|d| base + chrono::Duration::days(d));
                let date_to = match (date_from, span) {
                    (Some(f), Some(s)) => f.checked_add_days(Days::new(s)),
                    _ => None,
                };
                SearchFilter {
                    date_from,
                    date_to,
                    sender,
                    subject,
                    has_attachment,
                    max_results,
                    page_token: None,
                }
            })
    }

    /// Re-case and re-space free text without changing its normalized meaning.
    fn perturb(text: &Option<String>) -> Option<String> {
        text.as_ref().map(|t| {
            let words: Vec<String> = t
                .split_whitespace()
                .enumerate()
                .map(|(i, w)| {
                    if i % 2 == 0 {
                        w.to_uppercase()
                    } else {
                        w.to_string()
                    }
                })
                .collect();
            format!("  {}\t", words.join("   "))
        })
    }

    proptest! {
        #[test]
        fn prop_equivalent_filters_build_identical_queries(filter in arb_filter()) {
            let variant = SearchFilter {
                sender: perturb(&filter.sender),
                subject: perturb(&filter.subject),
                ..filter.clone()
            };
            let a = build(&filter);
            let b = build(&variant);
            prop_assert_eq!(a.as_str(), b.as_str());
            prop_assert_eq!(a.digest(), b.digest());
        }

        #[test]
        fn prop_build_is_deterministic(filter in arb_filter()) {
            prop_assert_eq!(build(&filter), build(&filter));
        }

        #[test]
        fn prop_no_unescaped_quote_inside_terms(subject in "[a-z\" ]{1,16}") {
            let filter = SearchFilter { subject: Some(subject), ..Default::default() };
            let query = build(&filter);
            let inner = query
                .as_str()
                .strip_prefix("subject:\"")
                .and_then(|s| s.strip_suffix('"'));
            if let Some(inner) = inner {
                let mut prev = ' ';
                for ch in inner.chars() {
                    if ch == '"' {
                        prop_assert_eq!(prev, '\\');
                    }
                    prev = ch;
                }
            }
        }
    }
}
