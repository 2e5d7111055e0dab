use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Limits applied to every inbound filter before it reaches the query builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchLimits {
    /// Upper bound for `max_results` (inclusive).
    pub max_results: u32,
    /// Page size used when the caller does not ask for one.
    pub default_results: u32,
    /// Longest allowed `date_from..=date_to` span, in days.
    pub max_span_days: i64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_results: 500,
            default_results: 50,
            max_span_days: 366,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("date_from {from} is after date_to {to}")]
    InvertedDateRange { from: NaiveDate, to: NaiveDate },
    #[error("date range spans {days} days, the maximum is {max}")]
    DateSpanTooWide { days: i64, max: i64 },
    #[error("max_results must be between 1 and {max}, got {got}")]
    ResultCountOutOfRange { got: u32, max: u32 },
    #[error("invalid page token: {0}")]
    InvalidPageToken(String),
}

/// Structured search request for one principal's mailbox.
///
/// Free-text fields are kept as the caller sent them; [`SearchFilter::normalized`]
/// produces the canonical form the query builder consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub has_attachment: Option<bool>,
    pub max_results: u32,
    pub page_token: Option<String>,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            sender: None,
            subject: None,
            has_attachment: None,
            max_results: SearchLimits::default().default_results,
            page_token: None,
        }
    }
}

impl SearchFilter {
    /// A request is a first page when it carries no continuation token.
    pub fn is_first_page(&self) -> bool {
        self.page_token.is_none()
    }

    /// Check ordering, span and page-size bounds.
    pub fn validate(&self, limits: &SearchLimits) -> Result<(), ValidationError> {
        if self.max_results == 0 || self.max_results > limits.max_results {
            return Err(ValidationError::ResultCountOutOfRange {
                got: self.max_results,
                max: limits.max_results,
            });
        }

        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(ValidationError::InvertedDateRange { from, to });
            }
            let days = (to - from).num_days();
            if days > limits.max_span_days {
                return Err(ValidationError::DateSpanTooWide {
                    days,
                    max: limits.max_span_days,
                });
            }
        }

        if let Some(token) = &self.page_token {
            if token.trim().is_empty() {
                return Err(ValidationError::InvalidPageToken(
                    "page token is empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Canonical copy: trimmed, lower-cased, inner whitespace collapsed,
    /// blank strings dropped.
    pub fn normalized(&self) -> Self {
        Self {
            sender: normalize_text(self.sender.as_deref()),
            subject: normalize_text(self.subject.as_deref()),
            page_token: self
                .page_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            ..self.clone()
        }
    }
}

fn normalize_text(value: Option<&str>) -> Option<String> {
    let collapsed = value?
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_default_filter_is_valid() {
        let filter = SearchFilter::default();
        assert!(filter.validate(&SearchLimits::default()).is_ok());
        assert!(filter.is_first_page());
        assert_eq!(filter.max_results, 50);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let filter = SearchFilter {
            date_from: Some(date(2024, 2, 1)),
            date_to: Some(date(2024, 1, 1)),
            ..Default::default()
        };
        assert!(matches!(
            filter.validate(&SearchLimits::default()),
            Err(ValidationError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_span_ceiling() {
        let limits = SearchLimits {
            max_span_days: 31,
            ..Default::default()
        };
        let ok = SearchFilter {
            date_from: Some(date(2024, 1, 1)),
            date_to: Some(date(2024, 2, 1)),
            ..Default::default()
        };
        assert!(ok.validate(&limits).is_ok());

        let too_wide = SearchFilter {
            date_to: Some(date(2024, 2, 2)),
            ..ok
        };
        assert_eq!(
            too_wide.validate(&limits),
            Err(ValidationError::DateSpanTooWide { days: 32, max: 31 })
        );
    }

    #[test]
    fn test_result_count_bounds() {
        let limits = SearchLimits::default();
        for bad in [0, 501] {
            let filter = SearchFilter {
                max_results: bad,
                ..Default::default()
            };
            assert!(matches!(
                filter.validate(&limits),
                Err(ValidationError::ResultCountOutOfRange { .. })
            ));
        }
        let filter = SearchFilter {
            max_results: 500,
            ..Default::default()
        };
        assert!(filter.validate(&limits).is_ok());
    }

    #[test]
    fn test_blank_page_token_rejected() {
        let filter = SearchFilter {
            page_token: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            filter.validate(&SearchLimits::default()),
            Err(ValidationError::InvalidPageToken(_))
        ));
    }

    #[test]
    fn test_normalized_text() {
        let filter = SearchFilter {
            sender: Some("  Alice@Example.COM ".to_string()),
            subject: Some("Quarterly \t  REPORT\n draft".to_string()),
            ..Default::default()
        };
        let normalized = filter.normalized();
        assert_eq!(normalized.sender.as_deref(), Some("alice@example.com"));
        assert_eq!(normalized.subject.as_deref(), Some("quarterly report draft"));

        let blank = SearchFilter {
            subject: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.normalized().subject, None);
    }
}
