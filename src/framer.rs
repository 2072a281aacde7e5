//! Three-phase wire frame reader.
//!
//! A frame arrives as a fixed header prefix (magic, command, payload
//! length), a four-byte checksum word, and a variable payload. The framer
//! reads the three parts in strict order, validating the magic against the
//! channel's network and the checksum against the payload. There is no
//! recovery after a violation; the caller terminates the channel.

use crate::error::ChannelError;
use crate::message::{
    payload_checksum, MessageHeader, CHECKSUM_SIZE, HEADER_PREFIX_SIZE, MAX_PAYLOAD_LENGTH,
};
use bitcoin::p2p::Magic;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One validated wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The complete header, checksum included.
    pub header: MessageHeader,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
}

/// Reads validated frames off a byte stream.
///
/// The framer owns the reader half of the stream and its inbound buffers,
/// so at most one read is ever in flight. `progress` callbacks let the
/// owner rearm its inactivity deadline after each completed read step.
#[derive(Debug)]
pub struct Framer<R> {
    magic: Magic,
    reader: R,
    header_buffer: [u8; HEADER_PREFIX_SIZE],
    checksum_buffer: [u8; CHECKSUM_SIZE],
    payload_buffer: Vec<u8>,
}

impl<R> Framer<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a framer expecting `magic` on every inbound frame.
    pub fn new(magic: Magic, reader: R) -> Self {
        Self {
            magic,
            reader,
            header_buffer: [0u8; HEADER_PREFIX_SIZE],
            checksum_buffer: [0u8; CHECKSUM_SIZE],
            payload_buffer: Vec::new(),
        }
    }

    /// Read and validate the next frame.
    ///
    /// `progress` is invoked after the header and checksum steps complete.
    /// A magic mismatch, malformed command, oversized payload, or checksum
    /// mismatch yields [`ChannelError::BadStream`]; transport failures
    /// yield [`ChannelError::Io`]. Either way the stream position is
    /// unusable afterwards.
    pub async fn read_frame(&mut self, mut progress: impl FnMut()) -> Result<Frame, ChannelError> {
        fill(&mut self.reader, &mut self.header_buffer).await?;
        let mut header = MessageHeader::parse_prefix(&self.header_buffer)?;
        if header.magic != self.magic {
            return Err(ChannelError::BadStream);
        }
        if header.payload_length > MAX_PAYLOAD_LENGTH {
            return Err(ChannelError::BadStream);
        }
        progress();

        fill(&mut self.reader, &mut self.checksum_buffer).await?;
        header.checksum = u32::from_le_bytes(self.checksum_buffer);
        progress();

        self.payload_buffer.resize(header.payload_length as usize, 0);
        fill(&mut self.reader, &mut self.payload_buffer).await?;
        if header.checksum != payload_checksum(&self.payload_buffer) {
            return Err(ChannelError::BadStream);
        }

        Ok(Frame {
            header,
            payload: self.payload_buffer.clone(),
        })
    }
}

/// Read exactly `buffer.len()` bytes.
///
/// A clean close of the stream before the buffer fills is reported as
/// [`io::ErrorKind::UnexpectedEof`].
async fn fill<R>(reader: &mut R, buffer: &mut [u8]) -> Result<(), ChannelError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            return Err(ChannelError::Io(io::ErrorKind::UnexpectedEof));
        }
        filled += n;
    }
    Ok(())
}
