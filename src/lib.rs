//! Bitcoin p2p channel proxy.
//!
//! This crate provides the per-connection state machine for a bitcoin
//! peer: it frames, validates, and demultiplexes wire messages arriving
//! over a single duplex byte stream, enforces three independent liveness
//! deadlines, and fans a one-shot stop notification out to every
//! outstanding subscriber.
//!
//! The [`Channel`] type is the entry point. It is generic over the stream
//! halves so any [`AsyncRead`]/[`AsyncWrite`] pair works; [`TcpChannel`]
//! wraps an established [`TcpStream`].
//!
//! Consumers interact through one-shot subscriptions: a handler observes
//! the next occurrence of its message variant and resubscribes to keep
//! listening. The handshake, peer discovery, and everything else above the
//! wire live with the consumer.
//!
//! # Examples
//!
//! ```no_run
//! use bitcoin::p2p::message::NetworkMessage;
//! use bitcoin::p2p::Magic;
//! use bitcoin_channel::{ChannelTimeouts, TcpChannel};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:8333").await?;
//! let channel = TcpChannel::tcp(stream, Magic::BITCOIN, ChannelTimeouts::default())?;
//!
//! channel.subscribe_pong(|result| {
//!     if let Ok(nonce) = result {
//!         println!("pong with nonce {nonce}");
//!     }
//! });
//! channel.subscribe_stop(|reason| {
//!     println!("channel closed: {reason}");
//! });
//!
//! channel.start();
//! channel.send(NetworkMessage::Ping(42)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`AsyncRead`]: tokio::io::AsyncRead
//! [`AsyncWrite`]: tokio::io::AsyncWrite
//! [`TcpStream`]: tokio::net::TcpStream

mod channel;
mod deadline;
mod error;
mod framer;
mod loader;
mod message;
mod subscriber;

pub use channel::{
    Channel, ChannelTimeouts, TcpChannel, DEFAULT_EXPIRATION, DEFAULT_INACTIVITY, DEFAULT_REVIVAL,
};
pub use deadline::{Deadline, DeadlineEvent};
pub use error::ChannelError;
pub use framer::{Frame, Framer};
pub use loader::{LoadResult, PayloadParser, StreamLoader};
pub use message::{
    payload_checksum, MessageHeader, CHECKSUM_SIZE, COMMAND_SIZE, HEADER_PREFIX_SIZE, HEADER_SIZE,
    MAX_PAYLOAD_LENGTH,
};
pub use subscriber::Subscriber;
