//! Client-side call path: marshal arguments, send the request, wait for a
//! reply within the caller's timeout, and decode it.
//!
//! Grounded on `examples/original_source/minipc-client.c`'s `minipc_call`:
//! marshal into the request packet, send it, `poll()` the link's descriptor
//! for the caller-supplied number of milliseconds, then validate and
//! unmarshal the reply. The stream half uses `std::net`-style read
//! timeouts instead of a manual `poll()` loop since a connected
//! `UnixStream` already exposes that as `set_read_timeout`; the
//! shared-memory half has to poll explicitly since there's no socket to
//! attach a timeout to.

use crate::codec;
use crate::descriptor::{ArgValue, Descriptor, ReturnValue};
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::error::{Error, Result};
use crate::marshal;
use crate::packet::{ReplyFrame, RequestFrame, MAX_ARGUMENTS, MAX_REPLY};
use crate::transport::{shmem::ShmemTransport, stream::StreamTransport, Transport};
use std::io::{self, Read, Write};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

pub fn call(
    transport: &mut Transport,
    sink: &mut dyn DiagnosticSink,
    timeout_ms: i32,
    descriptor: &Descriptor,
    args: &[ArgValue],
) -> Result<ReturnValue> {
    let (words, word_count) = marshal::encode_args(args, &descriptor.args)?;
    let mut request = RequestFrame::default();
    request.set_name(descriptor.name());
    request.args[..word_count].copy_from_slice(&words[..word_count]);

    crate::diagnostics::emit(sink, DiagnosticEvent::CallSent {
        procedure: descriptor.name(),
    });

    let result = match transport {
        Transport::Stream(t) => call_stream(t, timeout_ms, &request, word_count, descriptor),
        Transport::Shmem(t) => call_shmem(t, timeout_ms, &request, word_count, descriptor),
    };

    match &result {
        Err(Error::TimedOut) => crate::diagnostics::emit(sink, DiagnosticEvent::CallTimedOut {
            procedure: descriptor.name(),
            timeout_ms,
        }),
        Err(Error::Remote(remote)) => crate::diagnostics::emit(sink, DiagnosticEvent::CallFailed {
            procedure: descriptor.name(),
            errno: remote.code(),
        }),
        _ => {}
    }
    result
}

fn call_stream(
    t: &mut StreamTransport,
    timeout_ms: i32,
    request: &RequestFrame,
    word_count: usize,
    descriptor: &Descriptor,
) -> Result<ReturnValue> {
    let stream = t.client_stream_mut().ok_or(Error::Invalid)?;
    let timeout = if timeout_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms as u64))
    };
    stream.set_read_timeout(timeout).map_err(Error::Os)?;
    stream.set_write_timeout(timeout).map_err(Error::Os)?;

    // Sends the full fixed-size frame rather than just `word_count` words;
    // see DESIGN.md's "stream requests send the full argument area" entry.
    let _ = word_count;
    stream
        .write_all(&request.to_wire(MAX_ARGUMENTS))
        .map_err(classify_io_error)?;

    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .map_err(|e| classify_io_error(e))?;
    let kind_word = u32::from_ne_bytes(header);
    let size = (codec::size_of(kind_word) as usize).min(MAX_REPLY);
    let mut value = vec![0u8; size];
    if size > 0 {
        stream
            .read_exact(&mut value)
            .map_err(|e| classify_io_error(e))?;
    }

    let mut frame = ReplyFrame::default();
    frame.kind_word = kind_word;
    frame.value[..value.len()].copy_from_slice(&value);
    marshal::decode_reply(&frame, descriptor.retval)
}

fn classify_io_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::TimedOut,
        _ => Error::Os(e),
    }
}

fn call_shmem(
    t: &mut ShmemTransport,
    timeout_ms: i32,
    request: &RequestFrame,
    word_count: usize,
    descriptor: &Descriptor,
) -> Result<ReturnValue> {
    let shared = t.shared_mut();
    shared.request.name = request.name;
    shared.request.args[..word_count].copy_from_slice(&request.args[..word_count]);
    let target_seq = shared.nrequest.load(Ordering::SeqCst) + 1;
    shared.nrequest.store(target_seq, Ordering::SeqCst);

    let deadline = if timeout_ms < 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
    };

    loop {
        if t.shared().nreply.load(Ordering::SeqCst) >= target_seq {
            break;
        }
        let remaining = match deadline {
            None => None,
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return Err(Error::TimedOut);
                }
                Some(d - now)
            }
        };
        wait_for_wakeup(t, remaining)?;
    }

    let frame = t.shared().reply.clone();
    marshal::decode_reply(&frame, descriptor.retval)
}

fn wait_for_wakeup(t: &mut ShmemTransport, remaining: Option<Duration>) -> Result<()> {
    let Some(fd) = t.pipe_fd() else {
        // No poller bridge (shouldn't happen once open() succeeds) — fall
        // back to a short sleep so the caller still makes progress.
        std::thread::sleep(Duration::from_millis(1));
        return Ok(());
    };
    let timeout = match remaining {
        None => nix::poll::PollTimeout::NONE,
        Some(d) => nix::poll::PollTimeout::from(d.as_millis().min(u16::MAX as u128) as u16),
    };
    let mut pollfd = [nix::poll::PollFd::new(
        unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
        nix::poll::PollFlags::POLLIN,
    )];
    match nix::poll::poll(&mut pollfd, timeout) {
        Ok(0) => Err(Error::TimedOut),
        Ok(_) => {
            t.drain_wakeups();
            Ok(())
        }
        Err(e) => Err(Error::Os(std::io::Error::from_raw_os_error(e as i32))),
    }
}
