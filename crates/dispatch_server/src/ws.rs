use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use dispatch_core::dispatch::OfferChannel;
use dispatch_core::error::DispatchError;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{watch, Mutex};

use crate::app::AppState;

pub async fn driver_socket(
    ws: WebSocketUpgrade,
    Path(driver_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, driver_id, state))
}

/// Offer channel that writes each payload straight to the socket as a text frame.
///
/// `send` returns once the frame is written. A failed write closes the channel so the
/// session task tears the socket down.
pub struct SocketOfferChannel<S> {
    driver_id: String,
    sink: Mutex<S>,
    closed: watch::Sender<bool>,
}

impl<S> SocketOfferChannel<S> {
    pub fn new(driver_id: impl Into<String>, sink: S) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            driver_id: driver_id.into(),
            sink: Mutex::new(sink),
            closed,
        }
    }

    /// Resolves once the channel is closed, by the registry or by a failed write.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        // the sender lives in `self`, so this only errors if it was dropped
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub async fn shutdown(&self)
    where
        S: Sink<Message> + Unpin + Send,
    {
        self.closed.send_replace(true);
        let _ = self.sink.lock().await.close().await;
    }
}

#[async_trait]
impl<S> OfferChannel for SocketOfferChannel<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    async fn send(&self, payload: String) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::ChannelClosed(self.driver_id.clone()));
        }
        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.send(Message::Text(payload.into())).await {
            tracing::warn!(driver_id = %self.driver_id, error = %err, "offer write failed");
            self.close();
            return Err(DispatchError::Write {
                driver_id: self.driver_id.clone(),
                reason: err.to_string(),
            });
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Hold the driver's registration until the socket closes or the session is replaced.
async fn run_session(socket: WebSocket, driver_id: String, state: AppState) {
    let (outbound, mut inbound) = socket.split();
    let channel = Arc::new(SocketOfferChannel::new(driver_id.as_str(), outbound));
    let session = state.registry.register(&driver_id, channel.clone());
    tracing::info!(%driver_id, "driver connected");

    loop {
        tokio::select! {
            // replaced by a newer session, or a write failed
            _ = channel.closed() => break,
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    tracing::debug!(%driver_id, error = %err, "socket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    channel.shutdown().await;
    if state.registry.unregister(&driver_id, session) {
        tracing::info!(%driver_id, "driver disconnected");
    }
}
