use crate::binary::{Attrs, Node, NodeContent};
use crate::client::Client;
use crate::socket::SocketError;
use crate::types::jid::Jid;
use log::warn;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

const DEFAULT_IQ_TIMEOUT: Duration = Duration::from_secs(75);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQueryType {
    Get,
    Set,
}

impl InfoQueryType {
    fn as_str(self) -> &'static str {
        match self {
            InfoQueryType::Get => "get",
            InfoQueryType::Set => "set",
        }
    }
}

/// An info-query request: one `<iq>` stanza and its correlated response.
#[derive(Debug, Clone)]
pub struct InfoQuery<'a> {
    pub namespace: &'a str,
    pub query_type: InfoQueryType,
    pub to: Jid,
    pub content: Option<NodeContent>,
    pub timeout: Option<Duration>,
}

impl<'a> InfoQuery<'a> {
    pub fn get(namespace: &'a str, to: Jid, content: Option<NodeContent>) -> Self {
        Self {
            namespace,
            query_type: InfoQueryType::Get,
            to,
            content,
            timeout: None,
        }
    }

    pub fn set(namespace: &'a str, to: Jid, content: Option<NodeContent>) -> Self {
        Self {
            namespace,
            query_type: InfoQueryType::Set,
            to,
            content,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Error)]
pub enum IqError {
    #[error("IQ request timed out")]
    Timeout,
    #[error("client is not connected")]
    NotConnected,
    #[error("session closed while waiting for IQ response")]
    SessionClosed,
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("received disconnect node while waiting for IQ response")]
    Disconnected(Node),
    #[error("server returned error: code={code}, text='{text}'")]
    ServerError { code: u16, text: String },
}

/// Translates a delivered response node into the caller-facing result.
pub(crate) fn parse_iq_response(node: &Node) -> Result<(), IqError> {
    if node.tag == "stream:error" || node.tag == "xmlstreamend" {
        return Err(IqError::Disconnected(node.clone()));
    }
    if node.attrs.get("type").map(String::as_str) == Some("error") {
        let Some(error_node) = node.get_optional_child("error") else {
            return Err(IqError::ServerError {
                code: 0,
                text: "malformed error response".to_string(),
            });
        };
        let mut attrs = error_node.attr_parser();
        let code = attrs.optional_u64("code").unwrap_or(0) as u16;
        let text = attrs.optional_string("text").unwrap_or("").to_string();
        return Err(IqError::ServerError { code, text });
    }
    Ok(())
}

impl Client {
    /// Generates the next stanza ID: the client's random two-byte prefix
    /// plus an atomic counter, unique across all concurrently outstanding
    /// requests.
    pub fn next_stanza_id(&self) -> String {
        let count = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.unique_id, count)
    }

    /// Sends an IQ stanza and waits for its correlated response.
    pub async fn send_iq(&self, query: InfoQuery<'_>) -> Result<Node, IqError> {
        let req_id = self.next_stanza_id();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.response_waiters
            .lock()
            .await
            .insert(req_id.clone(), tx);

        let mut attrs = Attrs::new();
        attrs.insert("id".into(), req_id.clone());
        attrs.insert("xmlns".into(), query.namespace.into());
        attrs.insert("type".into(), query.query_type.as_str().into());
        attrs.insert("to".into(), query.to.to_string());
        let node = Node {
            tag: "iq".into(),
            attrs,
            content: query.content,
        };

        if let Err(e) = self.send_node(&node).await {
            self.response_waiters.lock().await.remove(&req_id);
            return Err(e);
        }

        match timeout(query.timeout.unwrap_or(DEFAULT_IQ_TIMEOUT), rx).await {
            Ok(Ok(response)) => parse_iq_response(&response).map(|()| response),
            // The sender is dropped when the session dies and waiters fail.
            Ok(Err(_)) => Err(IqError::SessionClosed),
            Err(_) => {
                self.response_waiters.lock().await.remove(&req_id);
                Err(IqError::Timeout)
            }
        }
    }

    /// Delivers an inbound node to the waiter registered under its `id`
    /// attribute. A consumed node (`None`) is never also handed to a tag
    /// handler; an unconsumed one is returned for further routing.
    pub(crate) async fn deliver_response(&self, node: Node) -> Option<Node> {
        let Some(id) = node.attrs.get("id").cloned() else {
            return Some(node);
        };
        let Some(waiter) = self.response_waiters.lock().await.remove(&id) else {
            return Some(node);
        };
        if waiter.send(node).is_err() {
            warn!(target: "Client", "IQ waiter for {id} was dropped before delivery");
        }
        None
    }
}
