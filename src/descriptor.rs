//! Procedure descriptors: the immutable wire description of a name, return
//! type and argument-type list (`struct minipc_pd` in the original), plus
//! the owned value types used to marshal a call and unmarshal its reply.

use crate::codec::{encode, ArgKind};
use crate::error::{Error, Result};
use crate::packet::MAX_NAME;

/// A single argument or return type, with its declared byte size where the
/// size isn't implied by the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Int64,
    Double,
    String,
    /// Fixed-size opaque struct, with its declared byte size.
    Struct(u32),
}

impl ArgType {
    /// The encoded 32-bit argument-type word for this type. For `String`
    /// the size field is always 0 here — runtime string length is filled
    /// in at marshal/reply time, never in the static descriptor.
    pub fn type_word(self) -> u32 {
        match self {
            ArgType::Int => encode(ArgKind::Int, 4),
            ArgType::Int64 => encode(ArgKind::Int64, 8),
            ArgType::Double => encode(ArgKind::Double, 8),
            ArgType::String => encode(ArgKind::String, 0),
            ArgType::Struct(size) => encode(ArgKind::Struct, size),
        }
    }

    pub fn kind(self) -> ArgKind {
        match self {
            ArgType::Int => ArgKind::Int,
            ArgType::Int64 => ArgKind::Int64,
            ArgType::Double => ArgKind::Double,
            ArgType::String => ArgKind::String,
            ArgType::Struct(_) => ArgKind::Struct,
        }
    }
}

/// The immutable description of a procedure's name, return type, and
/// argument-type list. Descriptor identity is the name, not a numeric id;
/// descriptors are assumed immutable for the life of a channel.
#[derive(Debug, Clone)]
pub struct Descriptor {
    name: String,
    pub retval: ArgType,
    pub args: Vec<ArgType>,
}

impl Descriptor {
    /// Build a descriptor. Fails with [`Error::Invalid`] if `name` (plus
    /// its terminator) would not fit in [`MAX_NAME`] bytes.
    pub fn new(name: impl Into<String>, retval: ArgType, args: Vec<ArgType>) -> Result<Self> {
        let name = name.into();
        if name.as_bytes().len() >= MAX_NAME {
            return Err(Error::Invalid);
        }
        Ok(Descriptor { name, retval, args })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An owned argument value passed to [`crate::Channel::call`].
#[derive(Debug, Clone)]
pub enum ArgValue {
    Int(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Struct(Vec<u8>),
}

impl ArgValue {
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgValue::Int(_) => ArgKind::Int,
            ArgValue::Int64(_) => ArgKind::Int64,
            ArgValue::Double(_) => ArgKind::Double,
            ArgValue::String(_) => ArgKind::String,
            ArgValue::Struct(_) => ArgKind::Struct,
        }
    }
}

/// An owned return value, either decoded from a reply or produced by a
/// server-side handler.
#[derive(Debug, Clone)]
pub enum ReturnValue {
    Int(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Struct(Vec<u8>),
}

impl ReturnValue {
    pub fn kind(&self) -> ArgKind {
        match self {
            ReturnValue::Int(_) => ArgKind::Int,
            ReturnValue::Int64(_) => ArgKind::Int64,
            ReturnValue::Double(_) => ArgKind::Double,
            ReturnValue::String(_) => ArgKind::String,
            ReturnValue::Struct(_) => ArgKind::Struct,
        }
    }
}

/// A server-side handler: given the descriptor and the raw argument area
/// (as 32-bit words, matching the original's `uint32_t *args`), produce a
/// return value or fail with an errno (the original's "handler returns a
/// negative value" convention becomes `Err(errno)`).
pub type HandlerFn =
    Box<dyn Fn(&Descriptor, &[u32]) -> std::result::Result<ReturnValue, i32> + Send + Sync>;

/// A descriptor bound to its server-side handler — the server's export
/// list holds these pairs, per the design note separating the wire
/// description from the server-side binding.
pub struct ExportedProcedure {
    pub descriptor: Descriptor,
    pub handler: HandlerFn,
}

impl ExportedProcedure {
    pub fn new(descriptor: Descriptor, handler: HandlerFn) -> Self {
        ExportedProcedure { descriptor, handler }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlong_name() {
        let name = "x".repeat(MAX_NAME);
        assert!(Descriptor::new(name, ArgType::Int, vec![]).is_err());
    }

    #[test]
    fn accepts_max_length_name() {
        let name = "x".repeat(MAX_NAME - 1);
        assert!(Descriptor::new(name, ArgType::Int, vec![]).is_ok());
    }
}
