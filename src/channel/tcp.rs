//! TCP-backed channels.

use super::{Channel, ChannelTimeouts};
use crate::error::ChannelError;
use bitcoin::p2p::Magic;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A channel over Tokio's TCP stream halves.
pub type TcpChannel = Channel<OwnedReadHalf, OwnedWriteHalf>;

impl TcpChannel {
    /// Wrap an established TCP connection in a channel.
    ///
    /// Sets TCP_NODELAY; the protocol favors many small messages where
    /// latency matters more than bandwidth efficiency. The channel records
    /// the stream's remote endpoint for [`Channel::address`] and logging.
    ///
    /// Connection establishment, peer discovery, and the version handshake
    /// all live above this layer; callers subscribe to `version` and
    /// `verack` and drive their own handshake.
    pub fn tcp(
        stream: TcpStream,
        magic: Magic,
        timeouts: ChannelTimeouts,
    ) -> Result<Arc<TcpChannel>, ChannelError> {
        stream.set_nodelay(true)?;
        let address = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Ok(Channel::new(magic, timeouts, address, reader, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_channel_records_peer_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen_address = listener.local_addr().unwrap();

        let (stream, accepted) = tokio::join!(TcpStream::connect(listen_address), listener.accept());
        let stream = stream.unwrap();
        let (_accepted_stream, _accepted_from) = accepted.unwrap();

        let channel = TcpChannel::tcp(stream, Magic::BITCOIN, ChannelTimeouts::default()).unwrap();
        assert_eq!(channel.address(), Some(listen_address));

        channel.stop(ChannelError::Stopped).await;
        assert_eq!(channel.address(), None);
    }
}
