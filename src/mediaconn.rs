//! Cached media-connection info for the host's media helper.

use crate::binary::{NodeBuilder, NodeContent};
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType, IqError};
use crate::types::jid::Jid;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct MediaConnHost {
    pub hostname: String,
}

/// Result of a `media_conn` query: upload/download hosts plus an auth token
/// with a server-assigned lifetime.
#[derive(Debug, Clone)]
pub struct MediaConn {
    pub auth: String,
    pub ttl: Duration,
    pub hosts: Vec<MediaConnHost>,
    pub fetched_at: Instant,
}

impl MediaConn {
    pub fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > self.ttl
    }
}

impl Client {
    /// Returns the cached media connection, refreshing it on first use, on
    /// expiry, or when `force` is set. Lazily initialized under its own
    /// lock so concurrent callers share one fetch.
    pub async fn media_conn(&self, force: bool) -> Result<MediaConn, IqError> {
        let mut guard = self.media_conn.lock().await;
        if !force {
            if let Some(conn) = guard.as_ref() {
                if !conn.is_expired() {
                    return Ok(conn.clone());
                }
            }
        }

        let resp = self
            .send_iq(InfoQuery {
                namespace: "w:m",
                query_type: InfoQueryType::Set,
                to: Jid::server_jid(),
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("media_conn")
                    .build()])),
                timeout: None,
            })
            .await?;

        let conn_node = resp.get_optional_child("media_conn").ok_or_else(|| {
            IqError::ServerError {
                code: 0,
                text: "missing <media_conn> in response".to_string(),
            }
        })?;
        let mut attrs = conn_node.attr_parser();
        let auth = attrs.string("auth");
        let ttl = Duration::from_secs(attrs.optional_u64("ttl").unwrap_or(3600));
        let hosts = conn_node
            .get_children_by_tag("host")
            .map(|h| MediaConnHost {
                hostname: h.attr_parser().string("hostname"),
            })
            .collect();

        let conn = MediaConn {
            auth,
            ttl,
            hosts,
            fetched_at: Instant::now(),
        };
        *guard = Some(conn.clone());
        Ok(conn)
    }
}
