use std::collections::HashMap;
use std::sync::Arc;

use async_imap::Session;
use async_native_tls::TlsStream;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use super::credentials::Credential;
use super::provider::{RawMessage, UpstreamClient, UpstreamError, UpstreamPage};

use futures::io::{AsyncRead, AsyncWrite};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

/// Wrapper for either TLS or Plain IMAP stream
enum StreamWrapper {
    Tls(TlsStream<Compat<TcpStream>>),
    Plain(Compat<TcpStream>),
}

impl AsyncRead for StreamWrapper {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_read(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for StreamWrapper {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_write(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_flush(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_close(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_close(cx),
        }
    }
}

impl std::fmt::Debug for StreamWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamWrapper::Tls(_) => write!(f, "StreamWrapper::Tls"),
            StreamWrapper::Plain(_) => write!(f, "StreamWrapper::Plain"),
        }
    }
}

impl Unpin for StreamWrapper {}

type SessionSlot = Arc<Mutex<Option<Session<StreamWrapper>>>>;

/// Gmail search over IMAP using the `X-GM-RAW` extension, which accepts the
/// same grammar as the Gmail search box. Authenticates with app passwords.
///
/// One session is kept per mailbox address; concurrent searches for the same
/// mailbox take turns on it, different mailboxes never wait on each other.
pub struct GmailImapClient {
    mailbox: String,
    sessions: DashMap<String, SessionSlot>,
}

impl GmailImapClient {
    pub fn new(mailbox: String) -> Self {
        Self {
            mailbox,
            sessions: DashMap::new(),
        }
    }

    fn slot(&self, address: &str) -> SessionSlot {
        self.sessions
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Establish a new IMAP connection
    async fn connect(&self, credential: &Credential) -> Result<Session<StreamWrapper>, UpstreamError> {
        let host = credential.imap_host.as_str();
        let port = credential.imap_port;
        tracing::info!("Connecting to IMAP {}:{}", host, port);

        let tcp = TcpStream::connect(format!("{}:{}", host, port))
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("connect failed: {}", e)))?;

        let stream = if port == 993 || port == 3993 {
            let tls = async_native_tls::TlsConnector::new();
            let tls_stream = tls
                .connect(host, tcp.compat())
                .await
                .map_err(|e| UpstreamError::Unavailable(format!("TLS handshake failed: {}", e)))?;
            StreamWrapper::Tls(tls_stream)
        } else {
            tracing::debug!("Using plain IMAP");
            StreamWrapper::Plain(tcp.compat())
        };

        let client = async_imap::Client::new(stream);
        let mut session = client
            .login(&credential.address, &credential.secret)
            .await
            .map_err(|(err, _)| classify_login(err))?;

        session
            .select(&self.mailbox)
            .await
            .map_err(|e| classify(e, "SELECT"))?;

        tracing::info!("IMAP login successful for {}", credential.address);
        Ok(session)
    }

    /// Reconnect if the session is missing or stale
    async fn ensure_session(
        &self,
        slot: &mut Option<Session<StreamWrapper>>,
        credential: &Credential,
    ) -> Result<(), UpstreamError> {
        let needs_reconnect = if let Some(ref mut session) = *slot {
            session.noop().await.is_err()
        } else {
            true
        };

        if needs_reconnect {
            *slot = Some(self.connect(credential).await?);
        }
        Ok(())
    }

    async fn run_search(
        &self,
        session: &mut Session<StreamWrapper>,
        query: &str,
        page_size: u32,
        offset: usize,
    ) -> Result<UpstreamPage, UpstreamError> {
        let command = search_command(query);
        let uids = session
            .uid_search(&command)
            .await
            .map_err(|e| classify(e, "UID SEARCH"))?;

        let total = uids.len();
        let mut uids: Vec<u32> = uids.into_iter().collect();
        // Newest first
        uids.sort_unstable_by(|a, b| b.cmp(a));

        let (page, next_offset) = page_window(&uids, offset, page_size as usize);
        let messages = if page.is_empty() {
            Vec::new()
        } else {
            self.fetch_headers(session, page).await?
        };

        Ok(UpstreamPage {
            messages,
            next_page_token: next_offset.map(|o| o.to_string()),
            estimated_total: Some(total as u64),
        })
    }

    async fn fetch_headers(
        &self,
        session: &mut Session<StreamWrapper>,
        uids: &[u32],
    ) -> Result<Vec<RawMessage>, UpstreamError> {
        let uid_set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut by_uid: HashMap<u32, RawMessage> = HashMap::with_capacity(uids.len());
        {
            let mut fetch_stream = session
                .uid_fetch(&uid_set, "(UID INTERNALDATE BODY.PEEK[HEADER])")
                .await
                .map_err(|e| classify(e, "UID FETCH"))?;

            while let Some(result) = fetch_stream.next().await {
                let fetch = result.map_err(|e| classify(e, "UID FETCH"))?;
                let Some(uid) = fetch.uid else { continue };
                by_uid.insert(
                    uid,
                    RawMessage {
                        id: uid.to_string(),
                        headers: fetch.header().map(<[u8]>::to_vec).unwrap_or_default(),
                        internal_date: fetch.internal_date().map(|d| d.with_timezone(&chrono::Utc)),
                    },
                );
            }
        }

        // Keep search order; messages expunged between SEARCH and FETCH are skipped.
        Ok(uids.iter().filter_map(|uid| by_uid.remove(uid)).collect())
    }
}

#[async_trait]
impl UpstreamClient for GmailImapClient {
    async fn search(
        &self,
        credential: &Credential,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<UpstreamPage, UpstreamError> {
        let offset = match page_token {
            Some(cursor) => parse_cursor(cursor).map_err(UpstreamError::Unknown)?,
            None => 0,
        };

        let slot = self.slot(&credential.address);
        let mut guard = slot.lock().await;
        self.ensure_session(&mut guard, credential).await?;
        let session = guard
            .as_mut()
            .ok_or_else(|| UpstreamError::Unavailable("no IMAP session".to_string()))?;

        let result = self.run_search(session, query, page_size, offset).await;
        if let Err(UpstreamError::Unavailable(_)) = &result {
            // Drop the broken connection so the next attempt starts fresh.
            *guard = None;
        }
        result
    }

    fn validate_cursor(&self, cursor: &str) -> Result<(), String> {
        parse_cursor(cursor).map(|_| ())
    }
}

/// Cursors are decimal offsets into the newest-first UID list.
fn parse_cursor(cursor: &str) -> Result<usize, String> {
    cursor
        .parse::<usize>()
        .map_err(|_| format!("invalid cursor {:?}", cursor))
}

/// Arguments for `UID SEARCH`.
///
/// Quoted strings are 7-bit only, so anything else goes out as a
/// non-synchronizing literal (RFC 7888) under `CHARSET UTF-8`.
fn search_command(query: &str) -> String {
    if query.is_ascii() {
        format!("X-GM-RAW {}", imap_quote(query))
    } else {
        format!("CHARSET UTF-8 X-GM-RAW {{{}+}}\r\n{}", query.len(), query)
    }
}

/// Quote a string as an IMAP quoted-string.
fn imap_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if ch == '\\' || ch == '"' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Slice one page out of the ordered UID list and compute the next offset.
fn page_window(uids: &[u32], offset: usize, page_size: usize) -> (&[u32], Option<usize>) {
    let start = offset.min(uids.len());
    let end = start.saturating_add(page_size).min(uids.len());
    let next = (end < uids.len()).then_some(end);
    (&uids[start..end], next)
}

fn is_throttled(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("throttled")
        || lower.contains("too many simultaneous connections")
        || lower.contains("bandwidth limits")
        || lower.contains("account exceeded command or bandwidth limits")
}

fn classify_login(err: async_imap::error::Error) -> UpstreamError {
    match err {
        async_imap::error::Error::No(msg) if is_throttled(&msg) => UpstreamError::QuotaExceeded,
        async_imap::error::Error::No(_) | async_imap::error::Error::Bad(_) => UpstreamError::AuthExpired,
        other => classify(other, "LOGIN"),
    }
}

fn classify(err: async_imap::error::Error, command: &str) -> UpstreamError {
    use async_imap::error::Error;

    match err {
        Error::No(msg) | Error::Bad(msg) if is_throttled(&msg) => UpstreamError::QuotaExceeded,
        Error::Bad(msg) if command == "UID SEARCH" => UpstreamError::MalformedQuery(msg),
        Error::Io(e) => UpstreamError::Unavailable(format!("{} I/O error: {}", command, e)),
        Error::ConnectionLost => UpstreamError::Unavailable(format!("{}: connection lost", command)),
        other => UpstreamError::Unknown(format!("{} failed: {}", command, other)),
    }
}
