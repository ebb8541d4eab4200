use crate::binary::{NodeBuilder, NodeContent};
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType, IqError};
use crate::types::jid::Jid;
use log::{debug, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

const KEEP_ALIVE_INTERVAL_MIN: Duration = Duration::from_secs(20);
const KEEP_ALIVE_INTERVAL_MAX: Duration = Duration::from_secs(30);
const KEEP_ALIVE_RESPONSE_DEADLINE: Duration = Duration::from_secs(20);
/// How long pings may keep failing before the session is declared dead.
const KEEP_ALIVE_MAX_FAIL_TIME: Duration = Duration::from_secs(180);

impl Client {
    async fn send_keepalive(&self) -> bool {
        debug!(target: "Client/Keepalive", "Sending keepalive ping");
        let iq = InfoQuery {
            namespace: "w:p",
            query_type: InfoQueryType::Get,
            to: Jid::server_jid(),
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new("ping").build()])),
            timeout: Some(KEEP_ALIVE_RESPONSE_DEADLINE),
        };
        match self.send_iq(iq).await {
            Ok(_) => {
                debug!(target: "Client/Keepalive", "Received keepalive pong");
                true
            }
            Err(e) => {
                warn!(target: "Client/Keepalive", "Keepalive ping failed: {e}");
                // Transport-level failures are terminal either way; only
                // count soft failures against the fail window.
                !matches!(e, IqError::Socket(_) | IqError::Disconnected(_))
            }
        }
    }

    /// Background pinger bound to the session. Exits on shutdown; tears the
    /// session down after the fail window is exceeded.
    pub(crate) async fn keepalive_loop(self: Arc<Self>) {
        let mut last_success = tokio::time::Instant::now();
        let mut error_count = 0u32;

        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        loop {
            let interval = rand::thread_rng().gen_range(
                KEEP_ALIVE_INTERVAL_MIN.as_millis()..=KEEP_ALIVE_INTERVAL_MAX.as_millis(),
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(interval as u64)) => {
                    if !self.is_connected() {
                        debug!(target: "Client/Keepalive", "Not connected, exiting keepalive loop");
                        return;
                    }
                    if self.send_keepalive().await {
                        if error_count > 0 {
                            debug!(target: "Client/Keepalive", "Keepalive restored");
                        }
                        error_count = 0;
                        last_success = tokio::time::Instant::now();
                    } else {
                        error_count += 1;
                        warn!(target: "Client/Keepalive",
                            "Keepalive failure #{error_count}");
                        if last_success.elapsed() > KEEP_ALIVE_MAX_FAIL_TIME {
                            warn!(target: "Client/Keepalive",
                                "No pong for {}s, terminating session",
                                KEEP_ALIVE_MAX_FAIL_TIME.as_secs());
                            self.teardown_session(true).await;
                            return;
                        }
                    }
                }
                _ = &mut shutdown => {
                    debug!(target: "Client/Keepalive", "Shutdown signaled, exiting keepalive loop");
                    return;
                }
            }
        }
    }
}
