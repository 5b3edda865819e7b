//! Error types for decoding persisted blueprint data.

/// Errors raised while decoding a binary buffer.
///
/// Any of these aborts the whole load; callers keep their previous in-memory graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unexpected end of buffer at offset {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("Negative length {length} at offset {offset}")]
    NegativeLength { offset: usize, length: i32 },

    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    #[error("Unknown type tag {0}")]
    UnknownTypeTag(u8),

    #[error("Unknown value tag {0}")]
    UnknownValueTag(u8),

    #[error("Unknown struct reference '{0}'")]
    UnknownStructReference(String),

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(i32),

    #[error("Duplicate definition '{0}'")]
    DuplicateDefinition(String),

    #[error("Malformed data: {0}")]
    Malformed(String),
}
