//! HTTP implementation of the remote message store
//!
//! Uses synchronous HTTP (ureq) to stay executor-agnostic. Status codes are
//! inspected by hand so a 429 can carry its `Retry-After` hint out.

use std::sync::RwLock;
use std::time::Duration;

use url::Url;

use super::api::{parse_detail, parse_page};
use super::{MessageDetail, MessagePage, RemoteError, RemoteMessageStore};
use crate::models::{IndexCursor, MessageId};

/// Credentials of an authenticated API session
#[derive(Debug, Clone)]
pub struct ApiSession {
    pub uid: String,
    pub access_token: String,
}

/// Remote message store speaking the JSON messages API
pub struct HttpRemoteStore {
    base_url: Url,
    session: RwLock<ApiSession>,
    agent: ureq::Agent,
}

impl HttpRemoteStore {
    /// Request timeout for list and detail calls
    const TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(base_url: &str, session: ApiSession) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Transport(format!("invalid base URL {base_url}: {e}")))?;
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Self::TIMEOUT))
            .build()
            .into();

        Ok(Self {
            base_url,
            session: RwLock::new(session),
            agent,
        })
    }

    /// Swap in refreshed credentials
    pub fn update_session(&self, session: ApiSession) {
        if let Ok(mut guard) = self.session.write() {
            *guard = session;
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    fn get(&self, url: &Url) -> Result<String, RemoteError> {
        let session = self
            .session
            .read()
            .map_err(|_| RemoteError::Transport("session lock poisoned".into()))?
            .clone();

        let mut response = self
            .agent
            .get(url.as_str())
            .header("x-pm-uid", &session.uid)
            .header("Authorization", &format!("Bearer {}", session.access_token))
            .header("Accept", "application/json")
            .call()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        match status_to_error(status, retry_after, &body) {
            Some(err) => Err(err),
            None => Ok(body),
        }
    }
}

impl RemoteMessageStore for HttpRemoteStore {
    fn list_messages(
        &self,
        label_id: &str,
        before: Option<&IndexCursor>,
        page_size: usize,
    ) -> Result<MessagePage, RemoteError> {
        let mut url = self.endpoint("mail/v4/messages")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("LabelID", label_id)
                .append_pair("Sort", "Time")
                .append_pair("Desc", "1")
                .append_pair("PageSize", &page_size.to_string());
            if let Some(cursor) = before {
                query
                    .append_pair("End", &cursor.time.to_string())
                    .append_pair("EndID", cursor.message_id.as_str());
            }
        }

        let body = self.get(&url)?;
        Ok(parse_page(&body)?)
    }

    fn get_message_detail(&self, id: &MessageId) -> Result<MessageDetail, RemoteError> {
        let path = format!("mail/v4/messages/{}", urlencoding::encode(id.as_str()));
        let body = self.get(&self.endpoint(&path)?)?;
        Ok(parse_detail(&body)?)
    }
}

/// Seconds form of `Retry-After`; HTTP-date hints are ignored
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map a non-success HTTP status to a remote error
pub fn status_to_error(status: u16, retry_after: Option<Duration>, body: &str) -> Option<RemoteError> {
    match status {
        200..=299 => None,
        429 | 503 if status == 429 || retry_after.is_some() => {
            Some(RemoteError::RateLimited { retry_after })
        }
        _ => Some(RemoteError::Status {
            status,
            message: body.chars().take(200).collect(),
        }),
    }
}
