//! Wire-level message framing primitives.
//!
//! The bitcoin v1 wire frame is a fixed 24-byte header followed by a
//! variable-length payload. The header carries the network magic, a
//! null-padded ASCII command name, the payload length, and a payload
//! checksum. Everything on the wire is little-endian.

use crate::error::ChannelError;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::p2p::Magic;

/// Size of a complete message header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Size of the header prefix read before the checksum word: magic,
/// command, and payload length.
pub const HEADER_PREFIX_SIZE: usize = 20;

/// Size of the checksum word in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Size of the null-padded command name in bytes.
pub const COMMAND_SIZE: usize = 12;

/// Largest payload length accepted from the wire.
///
/// Matches the protocol's 32 MiB relay limit. A header advertising more
/// is treated as a stream violation rather than an allocation request.
pub const MAX_PAYLOAD_LENGTH: u32 = 32 * 1024 * 1024;

const MAGIC_SIZE: usize = 4;
const PAYLOAD_LENGTH_OFFSET: usize = MAGIC_SIZE + COMMAND_SIZE;

/// Compute the wire checksum of a payload.
///
/// The checksum is the first four bytes of `SHA256(SHA256(payload))`
/// interpreted as a little-endian `u32`.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    let digest = sha256d::Hash::hash(payload).to_byte_array();
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// A parsed bitcoin wire message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Network magic, fixed per channel.
    pub magic: Magic,
    /// ASCII command name, at most twelve bytes on the wire.
    pub command: String,
    /// Length of the payload that follows the header.
    pub payload_length: u32,
    /// Checksum over the payload.
    pub checksum: u32,
}

impl MessageHeader {
    /// Build a header describing `payload`, computing its length and
    /// checksum.
    ///
    /// Fails with [`ChannelError::BadStream`] if the command name does not
    /// fit the twelve-byte ASCII wire field.
    pub fn for_payload(
        magic: Magic,
        command: &str,
        payload: &[u8],
    ) -> Result<Self, ChannelError> {
        if command.len() > COMMAND_SIZE || !command.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(ChannelError::BadStream);
        }

        Ok(Self {
            magic,
            command: command.to_string(),
            payload_length: payload.len() as u32,
            checksum: payload_checksum(payload),
        })
    }

    /// Serialize the header to its 24-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..MAGIC_SIZE].copy_from_slice(&self.magic.to_bytes());
        for (slot, byte) in bytes[MAGIC_SIZE..MAGIC_SIZE + COMMAND_SIZE]
            .iter_mut()
            .zip(self.command.bytes())
        {
            *slot = byte;
        }
        bytes[PAYLOAD_LENGTH_OFFSET..PAYLOAD_LENGTH_OFFSET + 4]
            .copy_from_slice(&self.payload_length.to_le_bytes());
        bytes[HEADER_PREFIX_SIZE..].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Parse the 20-byte header prefix: magic, command, payload length.
    ///
    /// The checksum word travels separately on the wire and is filled in by
    /// the framer once its four bytes arrive; it is zero here.
    ///
    /// The command must be printable ASCII padded with trailing nulls. An
    /// embedded null or a non-printable byte is a stream violation.
    pub fn parse_prefix(bytes: &[u8; HEADER_PREFIX_SIZE]) -> Result<Self, ChannelError> {
        let mut magic = [0u8; MAGIC_SIZE];
        magic.copy_from_slice(&bytes[..MAGIC_SIZE]);

        let command_bytes = &bytes[MAGIC_SIZE..MAGIC_SIZE + COMMAND_SIZE];
        let name_end = command_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_SIZE);
        let (name, padding) = command_bytes.split_at(name_end);
        if padding.iter().any(|&b| b != 0) || !name.iter().all(|b| b.is_ascii_graphic()) {
            return Err(ChannelError::BadStream);
        }
        let command =
            String::from_utf8(name.to_vec()).map_err(|_| ChannelError::BadStream)?;

        let mut length = [0u8; 4];
        length.copy_from_slice(&bytes[PAYLOAD_LENGTH_OFFSET..PAYLOAD_LENGTH_OFFSET + 4]);

        Ok(Self {
            magic: Magic::from_bytes(magic),
            command,
            payload_length: u32::from_le_bytes(length),
            checksum: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_checksum() {
        // First four bytes of SHA256(SHA256("")).
        assert_eq!(payload_checksum(&[]), u32::from_le_bytes([0x5d, 0xf6, 0xe0, 0xe2]));
    }

    #[test]
    fn test_header_round_trip() {
        let payload = [0xABu8; 8];
        let header = MessageHeader::for_payload(Magic::BITCOIN, "ping", &payload).unwrap();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let mut prefix = [0u8; HEADER_PREFIX_SIZE];
        prefix.copy_from_slice(&bytes[..HEADER_PREFIX_SIZE]);
        let mut parsed = MessageHeader::parse_prefix(&prefix).unwrap();
        parsed.checksum = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);

        assert_eq!(parsed, header);
        assert_eq!(parsed.payload_length, 8);
        assert_eq!(parsed.checksum, payload_checksum(&payload));
    }

    #[test]
    fn test_command_too_long_rejected() {
        let result = MessageHeader::for_payload(Magic::BITCOIN, "averylongcommand", &[]);
        assert_eq!(result, Err(ChannelError::BadStream));
    }

    #[test]
    fn test_embedded_null_in_command_rejected() {
        let header = MessageHeader::for_payload(Magic::BITCOIN, "ping", &[]).unwrap();
        let mut bytes = header.to_bytes();
        // "pi\0g" has a null before the final non-null byte.
        bytes[6] = 0;

        let mut prefix = [0u8; HEADER_PREFIX_SIZE];
        prefix.copy_from_slice(&bytes[..HEADER_PREFIX_SIZE]);
        assert_eq!(
            MessageHeader::parse_prefix(&prefix),
            Err(ChannelError::BadStream)
        );
    }

    #[test]
    fn test_non_ascii_command_rejected() {
        let header = MessageHeader::for_payload(Magic::BITCOIN, "ping", &[]).unwrap();
        let mut bytes = header.to_bytes();
        bytes[4] = 0xFF;

        let mut prefix = [0u8; HEADER_PREFIX_SIZE];
        prefix.copy_from_slice(&bytes[..HEADER_PREFIX_SIZE]);
        assert_eq!(
            MessageHeader::parse_prefix(&prefix),
            Err(ChannelError::BadStream)
        );
    }
}
