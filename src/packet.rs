//! Wire frames: the fixed request/reply layouts and the combined
//! shared-memory region, as specified in the original `struct mpc_req_packet`
//! / `struct mpc_rep_packet` / `struct mpc_shmem`.

use crate::codec::{self, ArgKind};
use crate::error::{Error, Result};
use std::sync::atomic::AtomicU32;

/// Name field width, including the trailing NUL.
pub const MAX_NAME: usize = 20;
/// Argument area width, in 32-bit words.
pub const MAX_ARGUMENTS: usize = 256;
/// Reply value-area width, in bytes.
pub const MAX_REPLY: usize = 1024;
/// Maximum simultaneous accepted stream clients per server channel.
pub const MAX_CLIENTS: usize = 64;

/// The fixed request frame: a zero-padded name followed by a packed
/// argument area.
#[derive(Clone)]
#[repr(C)]
pub struct RequestFrame {
    pub name: [u8; MAX_NAME],
    pub args: [u32; MAX_ARGUMENTS],
}

impl Default for RequestFrame {
    fn default() -> Self {
        RequestFrame {
            name: [0u8; MAX_NAME],
            args: [0u32; MAX_ARGUMENTS],
        }
    }
}

impl RequestFrame {
    /// Copy `name` into the name field, truncated to [`MAX_NAME`] - 1 bytes
    /// plus terminator, zero-padding the rest.
    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; MAX_NAME];
        let bytes = name.as_bytes();
        let n = bytes.len().min(MAX_NAME - 1);
        self.name[..n].copy_from_slice(&bytes[..n]);
    }

    /// Read the name field back as a `&str`, stopping at the first NUL.
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// View the argument area as a byte slice (for cursoring into STRING
    /// arguments that don't align to a word boundary in content, only in
    /// padded length).
    pub fn arg_bytes(&self) -> &[u8] {
        words_as_bytes(&self.args)
    }

    /// Serialize exactly `sizeof(name) + 4 * word_count` bytes, as the
    /// stream transport sends on the wire.
    pub fn to_wire(&self, word_count: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_NAME + word_count * 4);
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&words_as_bytes(&self.args)[..word_count * 4]);
        out
    }

    /// Parse a request frame from wire bytes (name field plus a prefix of
    /// the argument area). Remaining argument words are left zeroed.
    pub fn from_wire(buf: &[u8]) -> Result<Self> {
        if buf.len() < MAX_NAME {
            return Err(Error::protocol("request shorter than name field"));
        }
        let mut frame = RequestFrame::default();
        frame.name.copy_from_slice(&buf[..MAX_NAME]);
        let arg_bytes = &buf[MAX_NAME..];
        if arg_bytes.len() > MAX_ARGUMENTS * 4 {
            return Err(Error::protocol("request argument area too large"));
        }
        let dst = words_as_bytes_mut(&mut frame.args);
        dst[..arg_bytes.len()].copy_from_slice(arg_bytes);
        Ok(frame)
    }
}

/// The fixed reply frame: a `type` word followed by up to [`MAX_REPLY`]
/// bytes of value area.
#[derive(Clone)]
#[repr(C)]
pub struct ReplyFrame {
    pub kind_word: u32,
    pub value: [u8; MAX_REPLY],
}

impl Default for ReplyFrame {
    fn default() -> Self {
        ReplyFrame {
            kind_word: 0,
            value: [0u8; MAX_REPLY],
        }
    }
}

impl ReplyFrame {
    pub fn declared_size(&self) -> usize {
        codec::size_of(self.kind_word) as usize
    }

    pub fn kind(&self) -> Option<ArgKind> {
        codec::kind_of(self.kind_word)
    }

    /// Serialize `4 + size(type)` bytes, as the stream transport sends.
    pub fn to_wire(&self) -> Vec<u8> {
        let size = self.declared_size().min(MAX_REPLY);
        let mut out = Vec::with_capacity(4 + size);
        out.extend_from_slice(&self.kind_word.to_ne_bytes());
        out.extend_from_slice(&self.value[..size]);
        out
    }

    /// Parse a reply frame from up to `sizeof(type) + MAX_REPLY` bytes
    /// received off the wire. `declared_len` is the total byte count
    /// actually read, used by the caller to detect short replies.
    pub fn from_wire(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(Error::protocol("reply shorter than type word"));
        }
        let mut frame = ReplyFrame::default();
        frame.kind_word = u32::from_ne_bytes(buf[..4].try_into().unwrap());
        let value_bytes = &buf[4..];
        let n = value_bytes.len().min(MAX_REPLY);
        frame.value[..n].copy_from_slice(&value_bytes[..n]);
        Ok((frame, buf.len()))
    }

    pub fn set_error(&mut self, errno: i32) {
        self.kind_word = codec::encode(ArgKind::Error, 4);
        self.value[..4].copy_from_slice(&errno.to_ne_bytes());
    }

    pub fn error_code(&self) -> i32 {
        i32::from_ne_bytes(self.value[..4].try_into().unwrap())
    }
}

/// The shared-memory region: two sequence counters plus both frames, as
/// `struct mpc_shmem` in the original.
///
/// `AtomicU32` has the same size and layout as `u32`, so this struct is
/// bit-compatible with the plain-`u32`-counter layout the wire format
/// specifies while giving us `Ordering`-qualified loads/stores in Rust.
#[repr(C)]
pub struct SharedLayout {
    pub nrequest: AtomicU32,
    pub nreply: AtomicU32,
    pub request: RequestFrame,
    pub reply: ReplyFrame,
}

impl SharedLayout {
    pub const SIZE: usize = std::mem::size_of::<SharedLayout>();
}

fn words_as_bytes(words: &[u32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(words.as_ptr() as *const u8, std::mem::size_of_val(words)) }
}

fn words_as_bytes_mut(words: &mut [u32]) -> &mut [u8] {
    let len = std::mem::size_of_val(words);
    unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, len) }
}

/// Advance an argument-area cursor (in words) past one argument of the
/// given type word, per spec: STRING consumes `strlen+1` bytes rounded up
/// to 4; everything else consumes its fixed size rounded up to 4.
pub fn next_argument(args: &[u32], word_offset: usize, type_word: u32) -> Result<usize> {
    let kind = codec::kind_of(type_word)
        .ok_or_else(|| Error::protocol(format!("unknown argument kind 0x{:x}", type_word)))?;
    let word_count = match kind {
        ArgKind::String => {
            if word_offset >= args.len() {
                return Err(Error::protocol("argument area overflow"));
            }
            let bytes = words_as_bytes(&args[word_offset..]);
            let len = bytes
                .iter()
                .position(|&b| b == 0)
                .map(|p| p + 1)
                .unwrap_or(bytes.len());
            codec::argument_word_count(len as u32) as usize
        }
        _ => codec::argument_word_count(codec::size_of(type_word)) as usize,
    };
    let next = word_offset + word_count;
    if next > MAX_ARGUMENTS {
        return Err(Error::protocol("argument area overflow"));
    }
    Ok(next)
}
