//! Adapts axum's WebSocket to the relay's message type.

use axum::body::Bytes;
use axum::extract::ws::{self, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use srd_runtime::{CloseFrame, Message};

/// The inspector side of a session, speaking [`Message`].
pub fn client(socket: WebSocket) -> impl Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Unpin + Send {
	socket
		.with(|message: Message| future::ready(Ok::<_, axum::Error>(to_axum(message))))
		.map(|incoming| incoming.map(from_axum))
}

fn from_axum(message: ws::Message) -> Message {
	match message {
		ws::Message::Text(text) => Message::Text(text.as_str().to_owned()),
		ws::Message::Binary(data) => Message::Binary(data.to_vec()),
		ws::Message::Ping(data) => Message::Ping(data.to_vec()),
		ws::Message::Pong(data) => Message::Pong(data.to_vec()),
		ws::Message::Close(frame) => Message::Close(frame.map(|frame| CloseFrame {
			code: frame.code.into(),
			reason: frame.reason.as_str().to_owned().into(),
		})),
	}
}

fn to_axum(message: Message) -> ws::Message {
	match message {
		Message::Text(text) => ws::Message::Text(text.into()),
		Message::Binary(data) => ws::Message::Binary(Bytes::from(data)),
		Message::Ping(data) => ws::Message::Ping(Bytes::from(data)),
		Message::Pong(data) => ws::Message::Pong(Bytes::from(data)),
		Message::Close(frame) => ws::Message::Close(frame.map(|frame| ws::CloseFrame {
			code: frame.code.into(),
			reason: frame.reason.into_owned().into(),
		})),
		Message::Frame(frame) => ws::Message::Binary(Bytes::copy_from_slice(frame.payload())),
	}
}
