//! Protocol module - read request/response definitions.

pub mod constants;
pub mod crc;
pub mod packet;
pub mod sequence;

pub use constants::*;
pub use self::crc::checksum;
pub use packet::{PacketError, ReadRequest, crc_field, decode_response, encode_request};
pub use sequence::{OffsetSequence, sequence};
