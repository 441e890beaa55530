//! Marshaling between the owned [`ArgValue`]/[`ReturnValue`] types and the
//! raw word/byte wire forms, shared by [`crate::client`] (which marshals a
//! call and unmarshals its reply) and [`crate::server`] (which unmarshals a
//! reply the handler produced). Grounded on
//! `examples/original_source/minipc-client.c`'s `minipc_call`, which walks
//! the variadic argument list writing each value into the request's
//! argument area according to its declared type.

use crate::codec::{self, ArgKind};
use crate::descriptor::{ArgType, ArgValue, ReturnValue};
use crate::error::{Error, Result};
use crate::packet::{ReplyFrame, MAX_ARGUMENTS, MAX_REPLY};

/// Encode `args` into a request's argument-word area, validating each
/// value's kind against `expected`. Returns the filled word array and the
/// number of words actually used.
pub fn encode_args(args: &[ArgValue], expected: &[ArgType]) -> Result<([u32; MAX_ARGUMENTS], usize)> {
    if args.len() != expected.len() {
        return Err(Error::Invalid);
    }
    let mut words = [0u32; MAX_ARGUMENTS];
    let mut cursor = 0usize;
    for (value, ty) in args.iter().zip(expected.iter()) {
        if value.kind() != ty.kind() {
            return Err(Error::Invalid);
        }
        cursor = write_value(&mut words, cursor, value)?;
    }
    Ok((words, cursor))
}

fn write_value(words: &mut [u32; MAX_ARGUMENTS], cursor: usize, value: &ArgValue) -> Result<usize> {
    match value {
        ArgValue::Int(v) => write_bytes(words, cursor, &v.to_ne_bytes()),
        ArgValue::Int64(v) => write_bytes(words, cursor, &v.to_ne_bytes()),
        ArgValue::Double(v) => write_bytes(words, cursor, &v.to_ne_bytes()),
        ArgValue::Struct(bytes) => write_bytes(words, cursor, bytes),
        ArgValue::String(s) => {
            let mut bytes = s.clone().into_bytes();
            bytes.push(0);
            write_bytes(words, cursor, &bytes)
        }
    }
}

fn write_bytes(words: &mut [u32; MAX_ARGUMENTS], cursor: usize, bytes: &[u8]) -> Result<usize> {
    let word_count = codec::argument_word_count(bytes.len() as u32) as usize;
    if cursor + word_count > MAX_ARGUMENTS {
        return Err(Error::protocol("argument area overflow"));
    }
    let dst = words_as_bytes_mut(&mut words[cursor..cursor + word_count]);
    dst[..bytes.len()].copy_from_slice(bytes);
    Ok(cursor + word_count)
}

/// Decode one argument out of a raw request word area at `offset`,
/// according to its declared type. Used by server handlers that want typed
/// access rather than the raw `&[u32]` the handler signature provides.
pub fn read_argument(args: &[u32], offset: usize, ty: ArgType) -> Result<ArgValue> {
    let bytes = words_as_bytes(&args[offset..]);
    Ok(match ty {
        ArgType::Int => ArgValue::Int(i32::from_ne_bytes(bytes[..4].try_into().unwrap())),
        ArgType::Int64 => ArgValue::Int64(i64::from_ne_bytes(bytes[..8].try_into().unwrap())),
        ArgType::Double => ArgValue::Double(f64::from_ne_bytes(bytes[..8].try_into().unwrap())),
        ArgType::Struct(size) => ArgValue::Struct(bytes[..size as usize].to_vec()),
        ArgType::String => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            let s = std::str::from_utf8(&bytes[..end])
                .map_err(|_| Error::protocol("string argument is not valid utf-8"))?
                .to_owned();
            ArgValue::String(s)
        }
    })
}

/// Encode a handler's return value into a reply frame, validating its kind
/// against the descriptor's declared return type.
pub fn encode_reply(value: &ReturnValue, expected: ArgType) -> Result<ReplyFrame> {
    if value.kind() != expected.kind() {
        return Err(Error::Invalid);
    }
    let mut frame = ReplyFrame::default();
    let bytes: Vec<u8> = match value {
        ReturnValue::Int(v) => v.to_ne_bytes().to_vec(),
        ReturnValue::Int64(v) => v.to_ne_bytes().to_vec(),
        ReturnValue::Double(v) => v.to_ne_bytes().to_vec(),
        ReturnValue::Struct(bytes) => bytes.clone(),
        ReturnValue::String(s) => {
            let mut b = s.clone().into_bytes();
            b.push(0);
            b
        }
    };
    if bytes.len() > MAX_REPLY {
        return Err(Error::protocol("reply value exceeds MAX_REPLY"));
    }
    let padded_size = (codec::argument_word_count(bytes.len() as u32) * 4) as usize;
    if padded_size > MAX_REPLY {
        return Err(Error::protocol("reply value exceeds MAX_REPLY"));
    }
    frame.kind_word = codec::encode(expected.kind(), padded_size as u32);
    frame.value[..bytes.len()].copy_from_slice(&bytes);
    Ok(frame)
}

/// Decode a reply frame into a typed return value, per the expected return
/// type from the call's descriptor.
pub fn decode_reply(frame: &ReplyFrame, expected: ArgType) -> Result<ReturnValue> {
    match frame.kind() {
        Some(ArgKind::Error) => Err(Error::Remote(crate::error::RemoteError::from(
            frame.error_code(),
        ))),
        Some(kind) if kind == expected.kind() => {
            let size = frame.declared_size();
            let bytes = &frame.value[..size.min(MAX_REPLY)];
            // `size` is a peer-supplied field taken straight off the wire; a
            // corrupted or buggy peer can claim a size shorter than the
            // fixed width the declared kind requires, so check before
            // slicing instead of trusting it to panic-free index.
            let need = |n: usize| -> Result<()> {
                if bytes.len() < n {
                    Err(Error::protocol("short reply: size mismatch with type"))
                } else {
                    Ok(())
                }
            };
            Ok(match expected {
                ArgType::Int => {
                    need(4)?;
                    ReturnValue::Int(i32::from_ne_bytes(bytes[..4].try_into().unwrap()))
                }
                ArgType::Int64 => {
                    need(8)?;
                    ReturnValue::Int64(i64::from_ne_bytes(bytes[..8].try_into().unwrap()))
                }
                ArgType::Double => {
                    need(8)?;
                    ReturnValue::Double(f64::from_ne_bytes(bytes[..8].try_into().unwrap()))
                }
                ArgType::Struct(declared) => {
                    need(declared as usize)?;
                    ReturnValue::Struct(bytes[..declared as usize].to_vec())
                }
                ArgType::String => {
                    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                    let s = std::str::from_utf8(&bytes[..end])
                        .map_err(|_| Error::protocol("reply string is not valid utf-8"))?
                        .to_owned();
                    ReturnValue::String(s)
                }
            })
        }
        _ => Err(Error::protocol("reply type does not match descriptor")),
    }
}

fn words_as_bytes(words: &[u32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(words.as_ptr() as *const u8, std::mem::size_of_val(words)) }
}

fn words_as_bytes_mut(words: &mut [u32]) -> &mut [u8] {
    let len = std::mem::size_of_val(words);
    unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_int_args_roundtrip() {
        let expected = vec![ArgType::Int, ArgType::Int];
        let args = vec![ArgValue::Int(3), ArgValue::Int(4)];
        let (words, used) = encode_args(&args, &expected).unwrap();
        assert_eq!(used, 2);
        let a = read_argument(&words, 0, ArgType::Int).unwrap();
        let b = read_argument(&words, 1, ArgType::Int).unwrap();
        assert!(matches!(a, ArgValue::Int(3)));
        assert!(matches!(b, ArgValue::Int(4)));
    }

    #[test]
    fn encode_decode_string_arg_roundtrip() {
        let expected = vec![ArgType::String];
        let args = vec![ArgValue::String("hello".into())];
        let (words, _used) = encode_args(&args, &expected).unwrap();
        let v = read_argument(&words, 0, ArgType::String).unwrap();
        assert!(matches!(v, ArgValue::String(s) if s == "hello"));
    }

    #[test]
    fn reply_roundtrip() {
        let frame = encode_reply(&ReturnValue::Int64(99), ArgType::Int64).unwrap();
        let value = decode_reply(&frame, ArgType::Int64).unwrap();
        assert!(matches!(value, ReturnValue::Int64(99)));
    }

    #[test]
    fn reply_error_decodes_to_remote_error() {
        let mut frame = ReplyFrame::default();
        frame.set_error(libc::ETIMEDOUT);
        let err = decode_reply(&frame, ArgType::Int).unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
    }

    #[test]
    fn mismatched_arg_kind_is_rejected() {
        let expected = vec![ArgType::Int];
        let args = vec![ArgValue::String("nope".into())];
        assert!(encode_args(&args, &expected).is_err());
    }

    #[test]
    fn string_reply_size_is_padded_to_a_multiple_of_four() {
        // "foobar" + NUL is 7 bytes, which must round up to 8, not stay at 7.
        let frame = encode_reply(&ReturnValue::String("foobar".into()), ArgType::String).unwrap();
        assert_eq!(codec::size_of(frame.kind_word), 8);
        let value = decode_reply(&frame, ArgType::String).unwrap();
        assert!(matches!(value, ReturnValue::String(s) if s == "foobar"));
    }

    #[test]
    fn short_declared_size_is_rejected_instead_of_panicking() {
        let mut frame = ReplyFrame::default();
        frame.kind_word = codec::encode(ArgKind::Int64, 4); // claims 4 bytes for an 8-byte type
        let err = decode_reply(&frame, ArgType::Int64).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
