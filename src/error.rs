//! Error types surfaced at the channel boundary.

use std::error::Error;
use std::fmt;
use std::io;

/// Errors that can occur on a peer channel.
///
/// A single terminal code fans out to every outstanding subscriber when a
/// channel shuts down, so the type is cheap to clone and comparable in
/// assertions. Transport failures are narrowed to their [`io::ErrorKind`];
/// the full [`io::Error`] is logged at the failure site before the kind is
/// propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel has already transitioned to stopped.
    ///
    /// This is the synchronous response to subscriptions and sends placed
    /// after shutdown, and the code delivered to typed subscribers during
    /// shutdown regardless of the underlying cause.
    Stopped,
    /// The expiration or inactivity deadline fired.
    Timeout,
    /// The inbound byte stream violated the wire protocol: magic mismatch,
    /// malformed header, checksum mismatch, or payload decode failure.
    BadStream,
    /// An underlying socket error, narrowed to its kind.
    Io(io::ErrorKind),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Stopped => write!(f, "Channel stopped"),
            ChannelError::Timeout => write!(f, "Channel timed out"),
            ChannelError::BadStream => write!(f, "Invalid data on channel stream"),
            ChannelError::Io(kind) => write!(f, "Channel transport error: {kind}"),
        }
    }
}

impl Error for ChannelError {}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        ChannelError::Io(err.kind())
    }
}
