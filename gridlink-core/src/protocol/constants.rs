//! Wire protocol constants.
//!
//! Peer implementations must agree on everything in this module. The
//! envelope checksum is CRC-32/IEEE (the polynomial used by zlib and
//! Ethernet) computed over the header with the checksum field excluded,
//! followed by the payload.

/// Magic number opening every envelope ("GLNK").
pub const MAGIC: u32 = 0x474C_4E4B;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the fixed envelope header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Offset of the magic field.
pub const MAGIC_OFFSET: usize = 0;

/// Offset of the protocol version field.
pub const VERSION_OFFSET: usize = 4;

/// Offset of the message type field.
pub const TYPE_OFFSET: usize = 5;

/// Offset of the flags field.
pub const FLAGS_OFFSET: usize = 6;

/// Offset of the session id field.
pub const SESSION_OFFSET: usize = 8;

/// Offset of the payload length field.
pub const PAYLOAD_LEN_OFFSET: usize = 16;

/// Offset of the checksum field.
pub const CHECKSUM_OFFSET: usize = 20;

/// Envelope carries one fragment of a larger logical message.
pub const FLAG_FRAGMENT: u16 = 1 << 0;

/// Envelope carries the final fragment of a logical message.
pub const FLAG_END: u16 = 1 << 1;

/// Maximum payload carried by a single envelope.
pub const DEFAULT_MAX_PAYLOAD: usize = 256 * 1024;
