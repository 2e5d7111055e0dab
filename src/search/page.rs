use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message summary returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub subject: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub has_attachments: bool,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultPage {
    pub messages: Vec<Message>,
    pub next_page_token: Option<String>,
    pub has_more: bool,
    /// Served from the result cache rather than the upstream.
    pub cached: bool,
    pub estimated_total: Option<u64>,
}
