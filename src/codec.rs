//! Argument-type word encoding.
//!
//! A 32-bit "argument type word" packs a [`ArgKind`] into the high 16 bits
//! and a byte size into the low 16 bits, mirroring
//! `__MINIPC_ARG_ENCODE`/`MINIPC_GET_AT`/`MINIPC_GET_ASIZE` from the
//! original `minipc.h`.

/// Kind tag carried in the high 16 bits of an argument-type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Terminator: marks the end of an argument list. Size is always 0.
    None,
    /// A 4-byte signed integer.
    Int,
    /// An 8-byte signed integer.
    Int64,
    /// An 8-byte IEEE-754 double.
    Double,
    /// A NUL-terminated string; size is the runtime length including the
    /// terminator, rounded up to a multiple of 4.
    String,
    /// A fixed-size opaque struct; size is the declared byte size, rounded
    /// up to a multiple of 4.
    Struct,
    /// Used only in a reply's `type` word: the value area holds a signed
    /// error code.
    Error,
}

impl ArgKind {
    const NONE: u32 = 0;
    const INT: u32 = 1;
    const INT64: u32 = 2;
    const DOUBLE: u32 = 3;
    const STRING: u32 = 4;
    const STRUCT: u32 = 5;
    const ERROR: u32 = 0xffff;

    fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            Self::NONE => ArgKind::None,
            Self::INT => ArgKind::Int,
            Self::INT64 => ArgKind::Int64,
            Self::DOUBLE => ArgKind::Double,
            Self::STRING => ArgKind::String,
            Self::STRUCT => ArgKind::Struct,
            Self::ERROR => ArgKind::Error,
            _ => return None,
        })
    }

    fn to_raw(self) -> u32 {
        match self {
            ArgKind::None => Self::NONE,
            ArgKind::Int => Self::INT,
            ArgKind::Int64 => Self::INT64,
            ArgKind::Double => Self::DOUBLE,
            ArgKind::String => Self::STRING,
            ArgKind::Struct => Self::STRUCT,
            ArgKind::Error => Self::ERROR,
        }
    }

    /// Fixed wire size in bytes for kinds whose size doesn't depend on a
    /// runtime value (`String`/`Struct` carry their own size separately).
    pub fn fixed_size(self) -> Option<u32> {
        match self {
            ArgKind::None => Some(0),
            ArgKind::Int => Some(4),
            ArgKind::Int64 => Some(8),
            ArgKind::Double => Some(8),
            ArgKind::Error => Some(4),
            ArgKind::String | ArgKind::Struct => None,
        }
    }
}

/// Encode a `(kind, size)` pair into a single 32-bit argument-type word.
pub fn encode(kind: ArgKind, size: u32) -> u32 {
    (kind.to_raw() << 16) | (size & 0xffff)
}

/// Extract the kind tag from an argument-type word. Returns `None` if the
/// high bits don't correspond to a known kind.
pub fn kind_of(word: u32) -> Option<ArgKind> {
    ArgKind::from_raw(word >> 16)
}

/// Extract the size field (low 16 bits) from an argument-type word.
pub fn size_of(word: u32) -> u32 {
    word & 0xffff
}

/// Number of 32-bit words a value of the given byte size occupies in the
/// argument area: `ceil(size / 4)`.
pub fn argument_word_count(size: u32) -> u32 {
    (size + 3) >> 2
}
