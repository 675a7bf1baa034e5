//! WebSocket transport for HMR messages. Traffic is server to client only.

use super::HmrServer;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::sync::Arc;

/// Pump HMR messages to one connected client until either side goes away.
pub async fn serve_client(socket: WebSocket, server: Arc<HmrServer>) {
    let (id, mut outgoing) = server.connect_client();
    let (mut sink, mut incoming) = socket.split();
    tracing::debug!(client = id, "HMR client connected");

    loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.as_ref().into())).await {
                        log_socket_error(&e);
                        break;
                    }
                }
                // Registry cleared: the server is shutting down
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log_socket_error(&e);
                    break;
                }
            },
        }
    }

    server.disconnect_client(id);
    tracing::debug!(client = id, "HMR client disconnected");
}

/// Connection resets happen whenever a client navigates away.
pub fn is_connection_reset(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == ErrorKind::ConnectionReset {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn log_socket_error(err: &axum::Error) {
    if !is_connection_reset(err) {
        tracing::warn!(error = %err, "HMR socket error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped")]
    struct Wrapped(#[source] std::io::Error);

    #[test]
    fn test_connection_reset_is_found_in_source_chain() {
        let reset = Wrapped(std::io::Error::from(ErrorKind::ConnectionReset));
        assert!(is_connection_reset(&reset));

        let other = Wrapped(std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(!is_connection_reset(&other));
    }
}
