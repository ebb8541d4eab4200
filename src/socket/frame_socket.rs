use crate::socket::consts::{
    CONN_HEADER, FRAME_LENGTH_SIZE, FRAME_MAX_SIZE, ORIGIN, URL, USER_AGENT,
};
use crate::socket::error::{Result, SocketError};
use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tokio_websockets::{ClientBuilder, MaybeTlsStream, Message, WebSocketStream};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Prefixes `payload` with its 24-bit big-endian length; `header` (the
/// connection prologue) is prepended on the very first frame of a session.
pub fn encode_frame(payload: &[u8], header: Option<&[u8]>) -> Result<Vec<u8>> {
    if payload.len() > FRAME_MAX_SIZE {
        return Err(SocketError::FrameTooLarge {
            max: FRAME_MAX_SIZE,
            got: payload.len(),
        });
    }
    let header = header.unwrap_or_default();
    let mut out = Vec::with_capacity(header.len() + FRAME_LENGTH_SIZE + payload.len());
    out.extend_from_slice(header);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Reassembles logical frames from a byte stream. A logical frame may span
/// several WebSocket messages; reassembly is purely by byte count.
#[derive(Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn next_frame(&mut self) -> Option<Bytes> {
        if self.buf.len() < FRAME_LENGTH_SIZE {
            return None;
        }
        let len = ((self.buf[0] as usize) << 16) | ((self.buf[1] as usize) << 8)
            | self.buf[2] as usize;
        if self.buf.len() < FRAME_LENGTH_SIZE + len {
            return None;
        }
        self.buf.advance(FRAME_LENGTH_SIZE);
        Some(self.buf.split_to(len).freeze())
    }
}

type OnDisconnect = Box<dyn Fn(bool) + Send>;

/// Length-prefixed frame transport over a single WebSocket connection.
///
/// Inbound frames are delivered through the channel returned by
/// [`FrameSocket::new`]; outbound frames go through [`FrameSocket::send_frame`].
pub struct FrameSocket {
    ws_sink: Mutex<Option<WsSink>>,
    frames_tx: Sender<Bytes>,
    connected: Arc<AtomicBool>,
    on_disconnect: Arc<Mutex<Option<OnDisconnect>>>,
    /// Connection prologue, consumed by the first outbound frame.
    header: Mutex<Option<Vec<u8>>>,
}

impl FrameSocket {
    pub fn new() -> (Self, Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(128);
        let socket = Self {
            ws_sink: Mutex::new(None),
            frames_tx: tx,
            connected: Arc::new(AtomicBool::new(false)),
            on_disconnect: Arc::new(Mutex::new(None)),
            header: Mutex::new(Some(CONN_HEADER.to_vec())),
        };
        (socket, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn set_on_disconnect(&self, cb: OnDisconnect) {
        *self.on_disconnect.lock().await = Some(cb);
    }

    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Err(SocketError::AlreadyOpen);
        }

        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            trace!(target: "Socket", "rustls crypto provider already installed");
        }

        debug!(target: "Socket", "Dialing {URL}");
        let uri: http::Uri = URL
            .parse()
            .map_err(|e| SocketError::Transport(format!("bad endpoint URL: {e}")))?;
        let builder = ClientBuilder::from_uri(uri)
            .add_header(
                http::header::ORIGIN,
                http::HeaderValue::from_static(ORIGIN),
            )
            .map_err(|e| SocketError::Transport(e.to_string()))?
            .add_header(
                http::header::USER_AGENT,
                http::HeaderValue::from_static(USER_AGENT),
            )
            .map_err(|e| SocketError::Transport(e.to_string()))?;
        let (ws, _response) = builder.connect().await?;

        let (sink, stream) = ws.split();
        *self.ws_sink.lock().await = Some(sink);
        self.connected.store(true, Ordering::Release);

        tokio::spawn(Self::read_pump(
            stream,
            self.frames_tx.clone(),
            self.connected.clone(),
            self.on_disconnect.clone(),
        ));
        Ok(())
    }

    pub async fn send_frame(&self, payload: &[u8]) -> Result<()> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(SocketError::Closed)?;

        let header = self.header.lock().await.take();
        let frame = encode_frame(payload, header.as_deref())?;

        trace!(target: "Socket", "--> frame: {} payload bytes, {} total", payload.len(), frame.len());
        sink.send(Message::binary(Bytes::from(frame))).await?;
        Ok(())
    }

    async fn read_pump(
        mut stream: WsStream,
        frames_tx: Sender<Bytes>,
        connected: Arc<AtomicBool>,
        on_disconnect: Arc<Mutex<Option<OnDisconnect>>>,
    ) {
        let mut frames = FrameBuffer::new();
        loop {
            match stream.next().await {
                Some(Ok(msg)) if msg.is_binary() => {
                    frames.feed(msg.as_payload());
                    let mut receiver_gone = false;
                    while let Some(frame) = frames.next_frame() {
                        trace!(target: "Socket", "<-- frame: {} bytes", frame.len());
                        if frames_tx.send(frame).await.is_err() {
                            warn!(target: "Socket", "Frame receiver dropped, stopping read pump");
                            receiver_gone = true;
                            break;
                        }
                    }
                    if receiver_gone {
                        break;
                    }
                }
                Some(Ok(msg)) if msg.is_close() => {
                    trace!(target: "Socket", "Received close frame");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(target: "Socket", "WebSocket read error: {e}");
                    break;
                }
                None => {
                    trace!(target: "Socket", "WebSocket stream ended");
                    break;
                }
            }
        }

        connected.store(false, Ordering::Release);
        if let Some(cb) = on_disconnect.lock().await.as_ref() {
            cb(true);
        }
    }

    pub async fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            *self.ws_sink.lock().await = None;
            if let Some(cb) = self.on_disconnect.lock().await.as_ref() {
                cb(false);
            }
        }
    }
}
