//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Truncated frame (fewer bytes than the header requires)
    #[error("truncated frame")]
    Incomplete,

    /// Header length field outside the valid range
    #[error("invalid header length: {0}")]
    Length(u8),

    /// Frame length disagrees with the header length field
    #[error("frame/header length mismatch: frame {frame}, header {header}")]
    LengthMismatch {
        /// Bytes actually delivered by the transport
        frame: usize,
        /// Length announced in the header
        header: u8,
    },

    /// Packet would exceed the maximum size
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Unknown packet type
    #[error("unknown packet type {0}")]
    Type(u8),

    /// Unknown window operator
    #[error("unknown operator {0}")]
    Operator(u8),

    /// Unknown operand location
    #[error("unknown location {0}")]
    Location(u8),

    /// Unknown arithmetic operator in a SET action
    #[error("unknown set operator {0}")]
    SetOperator(u8),

    /// Unknown action tag
    #[error("unknown action tag {0}")]
    ActionTag(u8),

    /// Unknown configuration property
    #[error("unknown config property {0}")]
    Property(u8),

    /// Byte offset outside the packet
    #[error("offset {0} out of range")]
    Offset(usize),

    /// Malformed payload structure
    #[error("malformed payload")]
    Malformed,
}
