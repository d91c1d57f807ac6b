use std::sync::Arc;

use axum::extract::ws::{Message as Frame, WebSocket};

use futures_util::{SinkExt, StreamExt};

use serde_json::Value as JsonValue;

use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use webthing::subscriber::ErrorMessage;
use webthing::{ChannelSubscriber, Message, SubscriberId, Thing};

/// Serves a WebSocket connection to a Thing.
///
/// The connection is a subscriber of the Thing until it is closed, the
/// server shuts down, or the Thing drops it because it cannot keep up.
pub(crate) async fn serve(
    socket: WebSocket,
    thing: Thing,
    capacity: usize,
    shutdown: CancellationToken,
) {
    let (mut sender, mut receiver) = socket.split();

    // The Thing owns the only sending half, so the channel closes as soon as
    // the Thing drops this subscriber.
    let (subscriber, mut messages) = ChannelSubscriber::channel(capacity);
    let id = thing.add_subscriber(Arc::new(subscriber));
    info!("WebSocket subscriber {id} connected to `{}`", thing.title());

    'connection: loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            outbound = messages.recv() => {
                let Some(message) = outbound else {
                    warn!("Subscriber {id} of `{}` has been dropped", thing.title());
                    break;
                };
                if sender.send(Frame::Text(message.to_string().into())).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => match inbound {
                Some(Ok(Frame::Text(text))) => {
                    for reply in handle_message(&thing, id, text.as_str()) {
                        let Ok(reply) = reply.encode() else {
                            continue;
                        };
                        if sender.send(Frame::Text(reply.to_string().into())).await.is_err() {
                            break 'connection;
                        }
                    }
                }
                Some(Ok(Frame::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = thing.remove_subscriber(id);
    let _ = sender.close().await;
    info!("WebSocket subscriber {id} disconnected from `{}`", thing.title());
}

fn error(message: impl Into<String>) -> Message {
    Message::Error(ErrorMessage::bad_request(message))
}

fn error_with_request(message: impl Into<String>, request: &JsonValue) -> Message {
    Message::Error(ErrorMessage::bad_request(message).request(request.clone()))
}

/// Applies an inbound message and returns the replies for its sender.
pub(crate) fn handle_message(thing: &Thing, id: SubscriberId, text: &str) -> Vec<Message> {
    let Ok(request) = serde_json::from_str::<JsonValue>(text) else {
        return vec![error("Parsing request failed")];
    };

    let (Some(message_type), Some(data)) = (
        request.get("messageType").and_then(JsonValue::as_str),
        request.get("data").and_then(JsonValue::as_object),
    ) else {
        return vec![error("Invalid message")];
    };

    debug!("Subscriber {id} sent a `{message_type}` message");

    let mut replies = Vec::new();
    match message_type {
        "setProperty" => {
            for (name, value) in data {
                if let Err(e) = thing.set_property(name, value.clone()) {
                    replies.push(error(e.description()));
                }
            }
        }
        "requestAction" => {
            for (name, params) in data {
                let input = params.get("input").cloned();
                if let Err(e) = thing.request_action(name, input, None) {
                    replies.push(error_with_request(
                        format!("Invalid action request: {}", e.description()),
                        &request,
                    ));
                }
            }
        }
        "addEventSubscription" => {
            for name in data.keys() {
                if let Err(e) = thing.add_event_subscription(id, name) {
                    replies.push(error_with_request(e.description(), &request));
                }
            }
        }
        other => replies.push(error_with_request(
            format!("Unknown messageType: {other}"),
            &request,
        )),
    }

    replies
}
