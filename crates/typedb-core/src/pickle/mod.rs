//! Primitive decoder for the on-disk database format.
//!
//! Database files are written by a scraper as pickle streams (protocol 2 in
//! practice, older protocols for hand-built fixtures). This module turns a
//! byte slice into a [`RawValue`] tree and back. Nothing here knows about
//! Python members; see `typedb-python` for the record layer.

mod decode;
mod encode;
mod value;

pub use decode::{decode, decode_prefix, PartialDecode, Unpickler};
pub use encode::encode;
pub use value::RawValue;

use thiserror::Error;

/// Highest protocol version the decoder accepts.
pub const MAX_PROTOCOL: u8 = 2;

/// Deepest container nesting the decoder accepts.
pub const MAX_DEPTH: usize = 512;

/// Value nodes one load may copy for memo references and `DUP`, in
/// addition to [`COPIES_PER_BYTE`] per input byte.
pub const MAX_COPIED_NODES: usize = 1 << 20;

/// Copy allowance per input byte. Memoized containers are snapshotted when
/// they leave the stack, so a well-formed stream copies about as many nodes
/// as it has bytes times its nesting depth.
pub const COPIES_PER_BYTE: usize = 8;

/// Errors raised while decoding a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The stream is truncated, uses an unknown opcode, or is otherwise
    /// inconsistent.
    #[error("malformed stream at offset {offset}: {reason}")]
    MalformedStream { offset: usize, reason: String },

    /// The `PROTO` opcode names a version newer than [`MAX_PROTOCOL`].
    #[error("unsupported protocol version {protocol}")]
    UnsupportedVersion { protocol: u8 },
}

impl DecodeError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        DecodeError::MalformedStream {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn eof(offset: usize) -> Self {
        Self::malformed(offset, "unexpected end of stream")
    }
}

/// Result type for decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Opcode bytes.
pub(crate) mod opcodes {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';
    pub const GLOBAL: u8 = b'c';

    // Protocol 2
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;
}
