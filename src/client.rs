//! Client facade and inbound dispatcher.
//!
//! One `Client` owns one session: the frame socket, the Noise stream, the
//! response-waiter table, the bounded handler queue with its single consumer
//! task, the keep-alive pinger and the event fan-out.

use crate::binary::{self, Node, NodeBuilder};
use crate::handshake;
use crate::mediaconn::MediaConn;
use crate::request::IqError;
use crate::socket::{FrameSocket, NoiseSocket, SocketError};
use crate::store::traits::AppStateBlobDownloader;
use crate::store::Device;
use crate::types::events::{self, Event};
use chrono::{TimeZone, Utc};
use log::{debug, error, info, warn};
use rand::RngCore;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};

/// Capacity of the inbound handler queue.
const HANDLER_QUEUE_SIZE: usize = 2048;
/// How long the host has to scan each pairing QR code.
const QR_CODE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

pub type EventHandler = Box<dyn Fn(&Event) + Send + Sync>;

type NodeHandler = fn(Arc<Client>, Node) -> Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("client is not connected")]
    NotConnected,
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("handshake failed: {0}")]
    Handshake(#[from] handshake::HandshakeError),
}

/// Per-client configuration, fixed at construction.
#[derive(Default)]
pub struct ClientConfig {
    /// Emit per-mutation app-state events during a full sync. Off by
    /// default: a full resync of a large account would flood the host.
    pub emit_app_state_events_on_full_sync: bool,
    /// Media helper used to fetch externally stored app-state blobs.
    pub blob_downloader: Option<Arc<dyn AppStateBlobDownloader>>,
}

pub struct Client {
    pub store: Arc<Device>,
    pub(crate) config: ClientConfig,

    frame_socket: Mutex<Option<FrameSocket>>,
    noise_socket: Mutex<Option<Arc<NoiseSocket>>>,

    pub(crate) response_waiters: Mutex<HashMap<String, oneshot::Sender<Node>>>,
    pub(crate) unique_id: String,
    pub(crate) id_counter: AtomicU64,

    event_handlers: RwLock<Vec<EventHandler>>,

    /// Fixed at construction; tags without an entry are dropped with a
    /// debug log.
    node_handlers: HashMap<&'static str, NodeHandler>,
    handler_queue_tx: mpsc::Sender<Node>,
    handler_queue_rx: Mutex<Option<mpsc::Receiver<Node>>>,

    pub(crate) shutdown: Notify,
    connected: AtomicBool,
    logged_in: AtomicBool,
    expected_disconnect: AtomicBool,

    /// Serializes all app-state sync work (one in-flight sync at a time).
    pub(crate) app_state_sync_lock: Mutex<()>,
    pub(crate) media_conn: Mutex<Option<MediaConn>>,
    session_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    weak_self: std::sync::Weak<Client>,
}

impl Client {
    pub fn new(store: Arc<Device>, config: ClientConfig) -> Arc<Self> {
        let mut prefix = [0u8; 2];
        rand::thread_rng().fill_bytes(&mut prefix);

        let (queue_tx, queue_rx) = mpsc::channel(HANDLER_QUEUE_SIZE);

        let mut node_handlers: HashMap<&'static str, NodeHandler> = HashMap::new();
        node_handlers.insert("message", |c, n| Box::pin(async move { c.handle_message(n).await }));
        node_handlers.insert("receipt", |c, n| Box::pin(async move { c.handle_receipt(n).await }));
        node_handlers.insert("notification", |c, n| {
            Box::pin(async move { c.handle_notification(n).await })
        });
        node_handlers.insert("success", |c, n| Box::pin(async move { c.handle_success(n).await }));
        node_handlers.insert("failure", |c, n| Box::pin(async move { c.handle_failure(n).await }));
        node_handlers.insert("stream:error", |c, n| {
            Box::pin(async move { c.handle_stream_error(n).await })
        });
        node_handlers.insert("iq", |c, n| Box::pin(async move { c.handle_iq(n).await }));

        Arc::new_cyclic(|weak| Self {
            store,
            config,
            frame_socket: Mutex::new(None),
            noise_socket: Mutex::new(None),
            response_waiters: Mutex::new(HashMap::new()),
            unique_id: format!("{}.{}", prefix[0], prefix[1]),
            id_counter: AtomicU64::new(0),
            event_handlers: RwLock::new(Vec::new()),
            node_handlers,
            handler_queue_tx: queue_tx,
            handler_queue_rx: Mutex::new(Some(queue_rx)),
            shutdown: Notify::new(),
            connected: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
            app_state_sync_lock: Mutex::new(()),
            media_conn: Mutex::new(None),
            session_tasks: Mutex::new(Vec::new()),
            weak_self: weak.clone(),
        })
    }

    /// The owning `Arc` of this client; used to hand handles to spawned
    /// tasks. The client only ever exists behind an `Arc`.
    fn shared(&self) -> Arc<Client> {
        self.weak_self.upgrade().expect("client is always behind an Arc")
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    /// Registers an event handler. Handlers run synchronously in
    /// registration order; registering after `connect` is legal but races
    /// with in-flight events.
    pub async fn add_event_handler(&self, handler: EventHandler) {
        self.event_handlers.write().await.push(handler);
    }

    pub(crate) async fn dispatch_event(&self, event: Event) {
        let handlers = self.event_handlers.read().await;
        for handler in handlers.iter() {
            handler(&event);
        }
    }

    /// Dials the endpoint, runs the Noise handshake and starts the three
    /// session tasks: socket reader, handler-queue consumer and keep-alive.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.connected.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyConnected);
        }
        let guard = scopeguard::guard(self.shared(), |client| {
            client.connected.store(false, Ordering::Release);
        });

        let (frame_socket, mut frames_rx) = FrameSocket::new();
        frame_socket.connect().await?;
        let noise_socket =
            match handshake::do_handshake(&self.store, &frame_socket, &mut frames_rx).await {
                Ok(noise_socket) => noise_socket,
                Err(e) => {
                    frame_socket.close().await;
                    return Err(e.into());
                }
            };

        *self.frame_socket.lock().await = Some(frame_socket);
        *self.noise_socket.lock().await = Some(Arc::new(noise_socket));
        self.expected_disconnect.store(false, Ordering::Release);

        let tasks = vec![
            tokio::spawn(self.shared().read_loop(frames_rx)),
            tokio::spawn(self.shared().handler_queue_loop()),
            tokio::spawn(self.shared().keepalive_loop()),
        ];
        *self.session_tasks.lock().await = tasks;

        scopeguard::ScopeGuard::into_inner(guard);
        Ok(())
    }

    /// Ends the session: cancels the background loops, closes the socket,
    /// fails all outstanding waiters and drops the key material, in that
    /// order. Waits for all session tasks to return before completing, so
    /// it must not be called from inside an event handler.
    pub async fn disconnect(&self) {
        self.expected_disconnect.store(true, Ordering::Release);
        self.teardown_session(false).await;
        let tasks = std::mem::take(&mut *self.session_tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
    }

    pub(crate) async fn teardown_session(&self, server_initiated: bool) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.logged_in.store(false, Ordering::Release);

        // Cancel the session context first so the loops stop pulling work.
        self.shutdown.notify_waiters();

        if let Some(socket) = self.frame_socket.lock().await.take() {
            socket.close().await;
        }

        // Fail every outstanding IQ waiter by dropping its sender.
        self.response_waiters.lock().await.clear();

        // Zero the key material: the ciphers die with the socket handle.
        *self.noise_socket.lock().await = None;

        if server_initiated && !self.expected_disconnect.load(Ordering::Acquire) {
            self.dispatch_event(Event::Disconnected(events::Disconnected)).await;
        }
    }

    pub(crate) async fn send_node(&self, node: &Node) -> Result<(), IqError> {
        let noise = self
            .noise_socket
            .lock()
            .await
            .clone()
            .ok_or(IqError::NotConnected)?;
        debug!(target: "Client/Send", "{node}");

        let payload = binary::marshal(node);
        let encrypted = noise.encrypt_frame(&payload)?;

        let socket_guard = self.frame_socket.lock().await;
        let socket = socket_guard.as_ref().ok_or(IqError::NotConnected)?;
        socket.send_frame(&encrypted).await.map_err(Into::into)
    }

    async fn read_loop(self: Arc<Self>, mut frames_rx: mpsc::Receiver<bytes::Bytes>) {
        // Registered once up front, so a notification that lands while a
        // frame is being processed still cancels the loop on the next poll.
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!(target: "Client", "Shutdown signaled, exiting read loop");
                    return;
                }
                frame = frames_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if !self.process_frame(&frame).await {
                                return;
                            }
                        }
                        None => {
                            info!(target: "Client", "Socket closed");
                            self.teardown_session(true).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Decrypts, unpacks and dispatches one inbound frame. Returns false
    /// when the session must end.
    async fn process_frame(&self, frame: &[u8]) -> bool {
        let noise = match self.noise_socket.lock().await.clone() {
            Some(noise) => noise,
            None => return false,
        };

        let decrypted = match noise.decrypt_frame(frame) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                // Nonce desync or tampering; the stream cannot recover.
                error!(target: "Client/Recv", "Frame decryption failed, closing session: {e}");
                self.teardown_session(true).await;
                return false;
            }
        };

        let unpacked = match binary::util::unpack(&decrypted) {
            Ok(data) => data,
            Err(e) => {
                warn!(target: "Client/Recv", "Failed to unpack frame: {e}");
                debug!(target: "Client/Recv", "Errored frame hex: {}", hex::encode(&decrypted));
                return true;
            }
        };
        let node = match binary::unmarshal(&unpacked) {
            Ok(node) => node,
            Err(e) => {
                warn!(target: "Client/Recv", "Failed to decode node: {e}");
                debug!(target: "Client/Recv", "Errored frame hex: {}", hex::encode(&unpacked));
                return true;
            }
        };

        debug!(target: "Client/Recv", "{node}");
        self.dispatch_node(node).await
    }

    /// Inbound routing: stream end, waiter correlation, handler enqueue, or
    /// drop. Returns false when the session must end.
    ///
    /// When the queue is full the enqueue blocks the reader (after a
    /// warning), applying backpressure to the socket instead of growing
    /// unbounded; inbound traffic stalls until the consumer catches up.
    pub(crate) async fn dispatch_node(&self, node: Node) -> bool {
        if node.tag == "xmlstreamend" {
            // Graceful server-initiated close.
            info!(target: "Client", "Received stream end, closing session");
            self.teardown_session(true).await;
            return false;
        }

        let Some(node) = self.deliver_response(node).await else {
            return true;
        };

        if self.node_handlers.contains_key(node.tag.as_str()) {
            match self.handler_queue_tx.try_send(node) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(node)) => {
                    warn!(target: "Client",
                        "Handler queue is full, message ordering is no longer guaranteed");
                    if self.handler_queue_tx.send(node).await.is_err() {
                        debug!(target: "Client", "Handler queue closed, dropping node");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(target: "Client", "Handler queue closed, dropping node");
                }
            }
        } else {
            debug!(target: "Client", "Dropping unhandled node <{}>", node.tag);
        }
        true
    }

    /// Single consumer of the handler queue. Sequential execution keeps
    /// per-tag causal order as long as the overflow branch never fired.
    pub(crate) async fn handler_queue_loop(self: Arc<Self>) {
        let mut rx = match self.handler_queue_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!(target: "Client", "Handler queue consumer already running");
                return;
            }
        };
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!(target: "Client", "Shutdown signaled, exiting handler queue loop");
                    break;
                }
                node = rx.recv() => {
                    match node {
                        Some(node) => {
                            if let Some(handler) = self.node_handlers.get(node.tag.as_str()) {
                                handler(self.clone(), node).await;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        // Hand the receiver back so a later session can drain the queue.
        *self.handler_queue_rx.lock().await = Some(rx);
    }

    // --- tag handlers -----------------------------------------------------

    async fn handle_success(self: Arc<Self>, _node: Node) {
        info!(target: "Client", "Authentication succeeded");
        self.logged_in.store(true, Ordering::Release);
        self.dispatch_event(Event::Connected(events::Connected)).await;
    }

    async fn handle_failure(self: Arc<Self>, node: Node) {
        let mut attrs = node.attr_parser();
        let reason = attrs.optional_u64("reason").unwrap_or(0) as u16;
        let message = attrs.optional_string("message").unwrap_or("").to_string();
        warn!(target: "Client", "Connect failure: reason={reason} message={message:?}");
        self.expected_disconnect.store(true, Ordering::Release);
        self.dispatch_event(Event::ConnectFailure(events::ConnectFailure { reason, message }))
            .await;
        self.teardown_session(false).await;
    }

    async fn handle_stream_error(self: Arc<Self>, node: Node) {
        let code = node
            .attr_parser()
            .optional_string("code")
            .unwrap_or("")
            .to_string();
        warn!(target: "Client", "Stream error: code={code}");
        self.dispatch_event(Event::StreamError(events::StreamError {
            code,
            raw: Some(node),
        }))
        .await;
        self.teardown_session(true).await;
    }

    async fn handle_iq(self: Arc<Self>, node: Node) {
        if node.attrs.get("type").map(String::as_str) == Some("get")
            && node.get_optional_child("ping").is_some()
        {
            debug!(target: "Client", "Received ping, sending pong");
            self.ack_iq(&node).await;
            return;
        }
        // Pairing stanzas arrive as server-initiated IQs.
        if let Some(pair_device) = node.get_optional_child("pair-device") {
            let codes: Vec<String> = pair_device
                .get_children_by_tag("ref")
                .filter_map(|r| match &r.content {
                    Some(binary::NodeContent::String(s)) => Some(s.clone()),
                    Some(binary::NodeContent::Bytes(b)) => {
                        String::from_utf8(b.clone()).ok()
                    }
                    _ => None,
                })
                .collect();
            self.ack_iq(&node).await;
            info!(target: "Client", "Received {} pairing codes", codes.len());
            self.dispatch_event(Event::Qr(events::Qr {
                codes,
                timeout: QR_CODE_TIMEOUT,
            }))
            .await;
            return;
        }
        if let Some(pair_success) = node.get_optional_child("pair-success") {
            let id = pair_success
                .get_optional_child("device")
                .map(|d| d.attr_parser().jid("jid"))
                .unwrap_or_default();
            let platform = pair_success
                .get_optional_child("platform")
                .and_then(|p| match &p.content {
                    Some(binary::NodeContent::String(s)) => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            let business_name = pair_success
                .get_optional_child("biz")
                .map(|b| b.attr_parser().string("name"))
                .unwrap_or_default();
            self.ack_iq(&node).await;
            info!(target: "Client", "Paired as {id}");
            self.dispatch_event(Event::PairSuccess(events::PairSuccess {
                id,
                business_name,
                platform,
            }))
            .await;
            return;
        }
        debug!(target: "Client", "Unhandled IQ: {node}");
    }

    /// Replies to a server-initiated IQ with an empty `result`.
    async fn ack_iq(&self, node: &Node) {
        let mut attrs = node.attr_parser();
        let id = attrs.string("id");
        let to = attrs.jid("from");
        let ack = NodeBuilder::new("iq")
            .attr("to", to.to_string())
            .attr("id", id)
            .attr("type", "result")
            .build();
        if let Err(e) = self.send_node(&ack).await {
            warn!(target: "Client", "Failed to ack IQ: {e}");
        }
    }

    async fn handle_message(self: Arc<Self>, node: Node) {
        let mut attrs = node.attr_parser();
        let info = events::MessageInfo {
            id: attrs.string("id"),
            chat: attrs.jid("from").to_non_ad(),
            sender: attrs.optional_jid("participant").unwrap_or_else(|| attrs.jid("from")),
            push_name: attrs.optional_string("notify").unwrap_or("").to_string(),
            timestamp: unix_ts(attrs.unix_time("t")),
        };
        if !attrs.ok() {
            warn!(target: "Client/Recv", "Message attribute errors: {:?}", attrs.errors);
        }
        self.dispatch_event(Event::Message(events::Message { info, raw: node }))
            .await;
    }

    async fn handle_receipt(self: Arc<Self>, node: Node) {
        let mut attrs = node.attr_parser();
        let mut message_ids = vec![attrs.string("id")];
        if let Some(list) = node.get_optional_child("list") {
            for item in list.get_children_by_tag("item") {
                if let Some(id) = item.attrs.get("id") {
                    message_ids.push(id.clone());
                }
            }
        }
        let receipt = events::Receipt {
            message_ids,
            source: attrs.jid("from"),
            timestamp: unix_ts(attrs.unix_time("t")),
            receipt_type: attrs.optional_string("type").unwrap_or("").to_string(),
        };
        if !attrs.ok() {
            warn!(target: "Client/Recv", "Receipt attribute errors: {:?}", attrs.errors);
        }
        self.dispatch_event(Event::Receipt(receipt)).await;
    }

    async fn handle_notification(self: Arc<Self>, node: Node) {
        let notification_type = node
            .attr_parser()
            .optional_string("type")
            .unwrap_or("")
            .to_string();
        match notification_type.as_str() {
            "server_sync" => {
                for collection in node.get_children_by_tag("collection") {
                    let name = collection.attr_parser().string("name");
                    debug!(target: "Client/AppState", "Server marked '{name}' dirty, resyncing");
                    let client = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = client.fetch_app_state(&name, false, false).await {
                            error!(target: "Client/AppState", "Resync of '{name}' failed: {e}");
                        }
                    });
                }
            }
            other => {
                debug!(target: "Client", "Unhandled notification type '{other}'");
            }
        }
    }
}

fn unix_ts(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::store::MemoryStore;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn test_client() -> Arc<Client> {
        let store = Arc::new(MemoryStore::new());
        let device = Arc::new(Device::new(
            KeyPair::generate(),
            store.clone(),
            store.clone(),
            store,
        ));
        Client::new(device, ClientConfig::default())
    }

    async fn capture_receipt_ids(client: &Arc<Client>) -> Arc<StdMutex<Vec<String>>> {
        let ids = Arc::new(StdMutex::new(Vec::new()));
        let sink = ids.clone();
        client
            .add_event_handler(Box::new(move |event| {
                if let Event::Receipt(receipt) = event {
                    sink.lock().unwrap().push(receipt.message_ids[0].clone());
                }
            }))
            .await;
        ids
    }

    fn receipt(id: &str) -> Node {
        NodeBuilder::new("receipt")
            .attr("from", "1234@s.whatsapp.net")
            .attr("id", id)
            .attr("t", "1700000000")
            .build()
    }

    async fn wait_for_count(ids: &Arc<StdMutex<Vec<String>>>, count: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if ids.lock().unwrap().len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handlers did not drain in time");
    }

    #[test]
    fn stanza_ids_are_pairwise_distinct() {
        let client = test_client();
        let ids: HashSet<String> = (0..1000).map(|_| client.next_stanza_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.starts_with(&client.unique_id)));
    }

    #[tokio::test]
    async fn correlated_response_never_reaches_tag_handlers() {
        let client = test_client();
        let ids = capture_receipt_ids(&client).await;

        let (tx, rx) = oneshot::channel();
        client
            .response_waiters
            .lock()
            .await
            .insert("abc".to_string(), tx);

        // First delivery fulfils the waiter; the second (same ID, waiter
        // now gone) falls through to the handler queue.
        assert!(client.dispatch_node(receipt("abc")).await);
        assert!(client.dispatch_node(receipt("abc")).await);

        let delivered = rx.await.unwrap();
        assert_eq!(delivered.attrs.get("id").map(String::as_str), Some("abc"));

        let consumer = tokio::spawn(client.clone().handler_queue_loop());
        wait_for_count(&ids, 1).await;
        assert_eq!(ids.lock().unwrap().as_slice(), ["abc"]);

        client.shutdown.notify_waiters();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn waiter_is_delivered_at_most_once_under_contention() {
        let client = test_client();
        let (tx, rx) = oneshot::channel();
        client
            .response_waiters
            .lock()
            .await
            .insert("race".to_string(), tx);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                client.deliver_response(receipt("race")).await.is_none()
            }));
        }
        let mut consumed = 0;
        for task in tasks {
            if task.await.unwrap() {
                consumed += 1;
            }
        }
        assert_eq!(consumed, 1);
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn handlers_run_in_receive_order() {
        let client = test_client();
        let ids = capture_receipt_ids(&client).await;

        let expected: Vec<String> = (0..10).map(|i| format!("R{i}")).collect();
        for id in &expected {
            client.dispatch_node(receipt(id)).await;
        }

        let consumer = tokio::spawn(client.clone().handler_queue_loop());
        wait_for_count(&ids, expected.len()).await;
        assert_eq!(*ids.lock().unwrap(), expected);

        client.shutdown.notify_waiters();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn queue_overflow_blocks_the_reader_but_loses_nothing() {
        let client = test_client();
        let ids = capture_receipt_ids(&client).await;

        // Fill the queue to capacity while the consumer is not running.
        for i in 0..HANDLER_QUEUE_SIZE {
            client.dispatch_node(receipt(&format!("N{i}"))).await;
        }

        // The overflowing dispatches block on the enqueue (backpressure).
        let overflow = {
            let client = client.clone();
            tokio::spawn(async move {
                for i in HANDLER_QUEUE_SIZE..3000 {
                    client.dispatch_node(receipt(&format!("N{i}"))).await;
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!overflow.is_finished(), "overflow dispatch should block");

        let consumer = tokio::spawn(client.clone().handler_queue_loop());
        wait_for_count(&ids, 3000).await;
        overflow.await.unwrap();
        assert_eq!(ids.lock().unwrap().len(), 3000);

        client.shutdown.notify_waiters();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn unhandled_tags_are_dropped() {
        let client = test_client();
        let ids = capture_receipt_ids(&client).await;

        client
            .dispatch_node(NodeBuilder::new("presence").attr("from", "x@g.us").build())
            .await;
        client.dispatch_node(receipt("after")).await;

        let consumer = tokio::spawn(client.clone().handler_queue_loop());
        wait_for_count(&ids, 1).await;
        assert_eq!(ids.lock().unwrap().as_slice(), ["after"]);

        client.shutdown.notify_waiters();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn stream_end_closes_the_session_and_emits_disconnected() {
        let client = test_client();
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        client
            .add_event_handler(Box::new(move |event| {
                if let Event::Disconnected(_) = event {
                    sink.lock().unwrap().push(());
                }
            }))
            .await;

        // Pretend a session is live.
        client.connected.store(true, Ordering::Release);
        let keep_going = client
            .dispatch_node(NodeBuilder::new("xmlstreamend").build())
            .await;

        assert!(!keep_going);
        assert!(!client.is_connected());
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn teardown_fails_outstanding_waiters() {
        let client = test_client();
        let (tx, rx) = oneshot::channel();
        client
            .response_waiters
            .lock()
            .await
            .insert("pending".to_string(), tx);

        client.connected.store(true, Ordering::Release);
        client.teardown_session(false).await;

        assert!(rx.await.is_err(), "waiter should fail when the session dies");
        assert!(client.response_waiters.lock().await.is_empty());
    }

    #[tokio::test]
    async fn success_node_marks_logged_in_and_emits_connected() {
        let client = test_client();
        let events = Arc::new(StdMutex::new(0usize));
        let sink = events.clone();
        client
            .add_event_handler(Box::new(move |event| {
                if let Event::Connected(_) = event {
                    *sink.lock().unwrap() += 1;
                }
            }))
            .await;

        client.dispatch_node(NodeBuilder::new("success").build()).await;
        let consumer = tokio::spawn(client.clone().handler_queue_loop());
        tokio::time::timeout(Duration::from_secs(5), async {
            while !client.is_logged_in() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*events.lock().unwrap(), 1);

        client.shutdown.notify_waiters();
        consumer.await.unwrap();
    }
}
