//! Realtime change feed over the Phoenix WebSocket protocol

mod message;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::Error;

pub use message::*;

/// Connection state of the shared socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct ChannelEntry {
    spec: ChannelSpec,
    callback: ChangeCallback,
}

struct Inner {
    channels: RwLock<HashMap<u64, ChannelEntry>>,
    socket: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    state: watch::Sender<ConnectionState>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

/// Client for the realtime service.
///
/// The socket is opened on the first subscription and shared by every
/// channel; it is not reopened automatically after the server closes it,
/// the next subscription does that.
pub struct RealtimeClient {
    url: String,
    heartbeat_interval: Duration,
    next_ref: AtomicU64,
    inner: Arc<Inner>,
}

impl RealtimeClient {
    /// Create a new RealtimeClient for a project URL (http or https)
    pub(crate) fn new(url: &str, key: &str, heartbeat_interval: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: Self::socket_url(url, key),
            heartbeat_interval,
            next_ref: AtomicU64::new(1),
            inner: Arc::new(Inner {
                channels: RwLock::new(HashMap::new()),
                socket: Mutex::new(None),
                state,
                tasks: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// Get the WebSocket URL for the realtime API
    pub fn socket_url(url: &str, key: &str) -> String {
        let url = url
            .trim_end_matches('/')
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", url, key)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Join a channel and route its matching changes to `callback`.
    pub async fn subscribe(
        &self,
        spec: ChannelSpec,
        callback: ChangeCallback,
        access_token: Option<String>,
    ) -> Result<ChannelHandle, Error> {
        let sender = self.ensure_connected().await?;

        let id = self.next_ref.fetch_add(1, Ordering::SeqCst);
        let topic = spec.topic();
        let join = PhoenixMessage::new(
            &topic,
            "phx_join",
            spec.join_payload(access_token.as_deref()),
            self.next_ref(),
        );

        self.inner
            .channels
            .write()
            .await
            .insert(id, ChannelEntry { spec, callback });

        send(&sender, &join)?;
        info!("joined channel {}", topic);
        Ok(ChannelHandle { id, topic })
    }

    /// Stop delivering changes for `handle`.
    ///
    /// Once this returns the callback is not invoked again.
    pub async fn unsubscribe(&self, handle: &ChannelHandle) -> Result<(), Error> {
        let topic_still_used = {
            let mut channels = self.inner.channels.write().await;
            if channels.remove(&handle.id).is_none() {
                return Ok(());
            }
            channels.values().any(|entry| entry.spec.topic() == handle.topic)
        };

        if !topic_still_used {
            if let Some(sender) = self.inner.socket.lock().await.as_ref() {
                let leave = PhoenixMessage::new(&handle.topic, "phx_leave", json!({}), self.next_ref());
                if let Err(e) = send(sender, &leave) {
                    debug!("could not send phx_leave for {}: {}", handle.topic, e);
                }
            }
        }
        info!("left channel {}", handle.topic);
        Ok(())
    }

    /// Close the socket and drop every channel
    pub async fn disconnect(&self) {
        self.inner.channels.write().await.clear();
        self.inner.socket.lock().await.take();
        abort_tasks(&self.inner);
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }

    async fn ensure_connected(&self) -> Result<mpsc::UnboundedSender<Message>, Error> {
        let mut socket = self.inner.socket.lock().await;
        if let Some(sender) = socket.as_ref() {
            if !sender.is_closed() {
                return Ok(sender.clone());
            }
        }

        self.inner.state.send_replace(ConnectionState::Connecting);
        let (stream, _) = match connect_async(self.url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(Error::realtime(format!("could not connect: {}", e)));
            }
        };
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("realtime socket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let inner = self.inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => dispatch(&inner, &text).await,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("realtime socket read failed: {}", e);
                        break;
                    }
                }
            }
            info!("realtime socket closed");
            inner.socket.lock().await.take();
            inner.state.send_replace(ConnectionState::Disconnected);
        });

        let heartbeat_tx = tx.clone();
        let period = self.heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            let mut n: u64 = 0;
            loop {
                ticker.tick().await;
                n += 1;
                let beat = PhoenixMessage::new("phoenix", "heartbeat", json!({}), format!("hb-{}", n));
                if send(&heartbeat_tx, &beat).is_err() {
                    break;
                }
            }
        });

        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.extend([writer, reader, heartbeat]);
        }

        *socket = Some(tx.clone());
        self.inner.state.send_replace(ConnectionState::Connected);
        info!("realtime socket connected");
        Ok(tx)
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        abort_tasks(&self.inner);
    }
}

fn abort_tasks(inner: &Inner) {
    if let Ok(mut tasks) = inner.tasks.lock() {
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

fn send(sender: &mpsc::UnboundedSender<Message>, message: &PhoenixMessage) -> Result<(), Error> {
    let text = serde_json::to_string(message)?;
    sender
        .send(Message::Text(text))
        .map_err(|_| Error::realtime("socket is closed"))
}

async fn dispatch(inner: &Inner, text: &str) {
    let message: PhoenixMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("ignoring unparsable realtime frame: {}", e);
            return;
        }
    };
    trace!("realtime <- {} {}", message.topic, message.event);

    match message.event.as_str() {
        "postgres_changes" => {
            let event = match ChangeEvent::from_payload(&message.payload) {
                Some(event) => event,
                None => {
                    warn!("malformed postgres_changes payload on {}", message.topic);
                    return;
                }
            };
            let channels = inner.channels.read().await;
            for entry in channels.values() {
                if entry.spec.topic() == message.topic && entry.spec.matches(&event) {
                    (entry.callback)(event.clone());
                }
            }
        }
        "phx_reply" => {
            if message.payload.get("status").and_then(|s| s.as_str()) == Some("error") {
                warn!("{} rejected: {}", message.topic, message.payload["response"]);
            }
        }
        "phx_error" => warn!("channel {} errored: {}", message.topic, message.payload),
        "phx_close" => debug!("channel {} closed", message.topic),
        other => trace!("unhandled realtime event {} on {}", other, message.topic),
    }
}
