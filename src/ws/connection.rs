// axum-chat-hub/src/ws/connection.rs

//! One live client connection and its two pumps.
//!
//! The write pump drains the outbound queue into the transport and runs as
//! its own task. The read pump runs on the connection's task, decoding
//! client frames and forwarding the ones it understands. Whichever pump
//! stops first ends the connection; teardown always unregisters from the
//! hub, and unregistering is idempotent, so it happens exactly once in
//! effect.

use crate::config::HubConfig;
use crate::ws::dispatcher::Dispatcher;
use crate::ws::envelope::ClientEvent;
use crate::ws::registry::Hub;
use crate::ws::types::{ConnectionKey, ConnectionState, Frame};
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{Instrument, debug, error, info, instrument, trace, warn};

/// How long teardown waits for the write pump to flush and send its close
/// frame before abandoning it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
enum ReadError {
    #[error("transport error: {0}")]
    Transport(axum::Error),
    #[error("no frame received for {0:?}")]
    Idle(Duration),
}

pub(crate) struct Connection {
    key: ConnectionKey,
    hub: Hub,
    dispatcher: Dispatcher,
    ping_interval: Option<Duration>,
    idle_timeout: Option<Duration>,
    state: ConnectionState,
}

impl Connection {
    pub(crate) fn new(
        key: ConnectionKey,
        hub: Hub,
        dispatcher: Dispatcher,
        config: &HubConfig,
    ) -> Self {
        Self {
            key,
            hub,
            dispatcher,
            ping_interval: config.ping_interval,
            idle_timeout: config.idle_timeout,
            state: ConnectionState::Active,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    /// States only move forward: `Active`, then `Closing`, then `Closed`.
    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        debug!(from = ?self.state, to = ?next, "Connection state changed.");
        self.state = next;
    }

    /// Drives the connection until the transport fails, the client leaves,
    /// or the hub closes the outbound queue. Returns the final state.
    #[instrument(skip_all, fields(user_id = self.key.user_id, conn_id = %self.key.id))]
    pub(crate) async fn run<S>(
        mut self,
        socket: S,
        outbound: mpsc::Receiver<Frame>,
    ) -> ConnectionState
    where
        S: Stream<Item = Result<Message, axum::Error>>
            + Sink<Message, Error = axum::Error>
            + Send
            + 'static,
    {
        let (sink, mut stream) = socket.split();
        let mut writer = tokio::spawn(
            write_pump(sink, outbound, self.ping_interval).instrument(tracing::Span::current()),
        );

        info!(state = ?self.state(), "Connection started.");
        let mut writer_finished = false;

        loop {
            tokio::select! {
                result = &mut writer => {
                    log_write_result(result);
                    writer_finished = true;
                    break;
                }
                frame = next_frame(&mut stream, self.idle_timeout) => {
                    match frame {
                        Ok(Some(Message::Text(text))) => self.handle_text(text.as_str()).await,
                        Ok(Some(Message::Close(_))) => {
                            debug!("Client sent close frame.");
                            break;
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            debug!("Client stream ended.");
                            break;
                        }
                        Err(e) => {
                            warn!("Read pump stopped: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        self.transition(ConnectionState::Closing);
        if let Err(e) = self.hub.unregister(self.key).await {
            debug!("Could not unregister: {}", e);
        }

        // Unregistering drops the queue's sender, so the write pump drains
        // what is left, sends a close frame and returns.
        if !writer_finished {
            match tokio::time::timeout(CLOSE_GRACE, &mut writer).await {
                Ok(result) => log_write_result(result),
                Err(_) => {
                    debug!("Write pump did not finish in time; aborting it.");
                    writer.abort();
                }
            }
        }

        self.transition(ConnectionState::Closed);
        info!("Connection closed.");
        self.state
    }

    async fn handle_text(&self, text: &str) {
        match ClientEvent::parse(text) {
            Some(ClientEvent::Typing(request)) => {
                debug!(
                    recipient_id = request.recipient_id,
                    typing = request.typing,
                    "Forwarding typing indicator."
                );
                if let Err(e) = self.dispatcher.typing(self.key.user_id, request).await {
                    warn!("Failed to forward typing indicator: {}", e);
                }
            }
            None => trace!("Dropping unrecognized client frame."),
        }
    }
}

/// Writes queued frames to the transport, in order, until the queue is
/// closed. Sends a close frame on the way out.
async fn write_pump<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Frame>,
    ping_interval: Option<Duration>,
) -> Result<(), axum::Error>
where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    let mut heartbeat = ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    loop {
        let tick = async {
            match heartbeat.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => sink.send(Message::Text(frame)).await?,
                    None => break,
                }
            }
            _ = tick => {
                trace!("Sending ping.");
                sink.send(Message::Ping(Default::default())).await?;
            }
        }
    }

    debug!("Outbound queue closed; closing transport.");
    // The peer may already be gone.
    let _ = sink.close().await;
    Ok(())
}

async fn next_frame<R>(
    stream: &mut R,
    idle_timeout: Option<Duration>,
) -> Result<Option<Message>, ReadError>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| ReadError::Idle(limit))?,
        None => stream.next().await,
    };
    next.transpose().map_err(ReadError::Transport)
}

fn log_write_result(result: Result<Result<(), axum::Error>, JoinError>) {
    match result {
        Ok(Ok(())) => debug!("Write pump finished."),
        Ok(Err(e)) => warn!("Write pump stopped on transport error: {}", e),
        Err(e) if e.is_cancelled() => debug!("Write pump cancelled."),
        Err(e) => error!("Write pump task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::types::{ConnectionHandle, UserId};
    use once_cell::sync::Lazy;
    use serde_json::{Value, json};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    static TRACING: Lazy<()> = Lazy::new(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });

    /// In-memory transport: the test feeds client frames in and reads back
    /// what the write pump sent.
    struct TestSocket {
        incoming: mpsc::UnboundedReceiver<Result<Message, axum::Error>>,
        sent: mpsc::UnboundedSender<Message>,
    }

    impl Stream for TestSocket {
        type Item = Result<Message, axum::Error>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.incoming.poll_recv(cx)
        }
    }

    impl Sink<Message> for TestSocket {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.sent.send(item).map_err(axum::Error::new)
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Harness {
        hub: Hub,
        client: mpsc::UnboundedSender<Result<Message, axum::Error>>,
        sent: mpsc::UnboundedReceiver<Message>,
        task: tokio::task::JoinHandle<ConnectionState>,
    }

    /// Registers `user_id` and runs its connection over a [`TestSocket`].
    async fn spawn_connection(hub: &Hub, user_id: UserId) -> Harness {
        let config = HubConfig::default();
        let (handle, outbound) = ConnectionHandle::new(user_id, config.queue_capacity);
        let key = handle.key();
        hub.register(handle).await.unwrap();

        let connection = Connection::new(key, hub.clone(), Dispatcher::new(hub.clone()), &config);
        assert_eq!(connection.state(), ConnectionState::Active);

        let (client, incoming) = mpsc::unbounded_channel();
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let socket = TestSocket {
            incoming,
            sent: sent_tx,
        };
        Harness {
            hub: hub.clone(),
            client,
            sent,
            task: tokio::spawn(connection.run(socket, outbound)),
        }
    }

    fn start() -> Hub {
        Lazy::force(&TRACING);
        Hub::start(&HubConfig::default()).0
    }

    fn decode(frame: &Frame) -> Value {
        serde_json::from_str(frame.as_str()).unwrap()
    }

    #[tokio::test]
    async fn client_close_ends_in_closed_and_unregisters() {
        let hub = start();
        let (observer, mut observer_rx) = ConnectionHandle::new(2, 8);
        hub.register(observer).await.unwrap();

        let harness = spawn_connection(&hub, 1).await;
        harness.client.send(Ok(Message::Close(None))).unwrap();

        assert_eq!(harness.task.await.unwrap(), ConnectionState::Closed);
        harness.hub.online_users().await.unwrap();
        assert!(!hub.is_online(1));

        let presence: Vec<Value> = std::iter::from_fn(|| observer_rx.try_recv().ok())
            .map(|f| decode(&f))
            .collect();
        assert_eq!(
            presence,
            vec![
                json!({"type": "online_status", "payload": {"user_id": 1, "online": true}}),
                json!({"type": "online_status", "payload": {"user_id": 1, "online": false}}),
            ]
        );
    }

    #[tokio::test]
    async fn superseded_connection_drains_its_queue_and_closes() {
        let hub = start();
        let mut harness = spawn_connection(&hub, 1).await;

        hub.enqueue(1, Frame::from("last words")).await.unwrap();
        // A replacement drops the handle this connection was registered with.
        let (replacement, _replacement_rx) = ConnectionHandle::new(1, 8);
        hub.register(replacement).await.unwrap();

        // The client never sends anything, yet the connection still ends.
        assert_eq!(harness.task.await.unwrap(), ConnectionState::Closed);
        assert_eq!(harness.sent.recv().await.unwrap(), Message::Text("last words".into()));
        assert!(hub.is_online(1), "the replacement stays registered");
    }

    #[tokio::test]
    async fn typing_frames_are_forwarded_and_junk_is_dropped() {
        let hub = start();
        let (peer, mut peer_rx) = ConnectionHandle::new(2, 8);
        hub.register(peer).await.unwrap();
        let harness = spawn_connection(&hub, 1).await;

        let typing = json!({"type": "typing", "payload": {"recipient_id": 2, "typing": true}});
        for text in ["{not json".to_string(), typing.to_string()] {
            harness.client.send(Ok(Message::Text(text.into()))).unwrap();
        }
        harness.client.send(Ok(Message::Close(None))).unwrap();
        assert_eq!(harness.task.await.unwrap(), ConnectionState::Closed);
        hub.online_users().await.unwrap();

        let frames: Vec<Value> = std::iter::from_fn(|| peer_rx.try_recv().ok())
            .map(|f| decode(&f))
            .collect();
        assert_eq!(
            frames,
            vec![
                json!({"type": "online_status", "payload": {"user_id": 1, "online": true}}),
                json!({"type": "typing", "payload": {"user_id": 1, "typing": true}}),
                json!({"type": "online_status", "payload": {"user_id": 1, "online": false}}),
            ]
        );
    }
}
