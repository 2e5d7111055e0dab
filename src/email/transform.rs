use chrono::{DateTime, Utc};
use mailparse::{MailAddr, MailHeaderMap};

use super::provider::RawMessage;
use crate::search::Message;

/// Normalize a provider message into the caller-facing shape.
///
/// Unparseable headers leave the corresponding fields empty rather than
/// dropping the message: it did match the search.
pub fn to_message(raw: &RawMessage) -> Message {
    let headers = match mailparse::parse_headers(&raw.headers) {
        Ok((headers, _)) => headers,
        Err(e) => {
            tracing::debug!(id = %raw.id, error = %e, "Unparseable header block");
            Vec::new()
        }
    };

    let date = headers
        .get_first_value("Date")
        .and_then(|value| mailparse::dateparse(&value).ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .or(raw.internal_date);

    let has_attachments = headers
        .get_first_value("Content-Type")
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("multipart/mixed"))
        .unwrap_or(false);

    Message {
        id: raw.id.clone(),
        thread_id: thread_root(&headers),
        from: headers.get_first_value("From").map(|v| v.trim().to_string()),
        to: headers
            .get_first_value("To")
            .map(|v| addresses(&v))
            .unwrap_or_default(),
        subject: headers.get_first_value("Subject").map(|v| v.trim().to_string()),
        date,
        has_attachments,
    }
}

pub fn to_messages(raw: &[RawMessage]) -> Vec<Message> {
    raw.iter().map(to_message).collect()
}

/// Oldest message id the conversation refers to, or the message's own id.
fn thread_root(headers: &[mailparse::MailHeader<'_>]) -> Option<String> {
    ["References", "In-Reply-To", "Message-ID"]
        .iter()
        .find_map(|name| {
            headers
                .get_first_value(name)
                .and_then(|v| v.split_whitespace().next().map(str::to_string))
        })
}

fn addresses(value: &str) -> Vec<String> {
    match mailparse::addrparse(value) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.addr.clone()],
                MailAddr::Group(group) => group.addrs.iter().map(|a| a.addr.clone()).collect(),
            })
            .collect(),
        Err(_) => value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}
