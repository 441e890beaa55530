//! End-to-end scenarios over the Unix-domain stream transport, from
//! spec section 8's scenario list: integer sum, a no-arg struct reply,
//! a string round-trip, an unknown procedure, and a timeout.

use anyhow::Context;
use mini_ipc::packet::next_argument;
use mini_ipc::{create_client, create_server, ArgType, ArgValue, Descriptor, Error, ReturnValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn socket_name(tag: &str) -> String {
    format!("test-{tag}-{}", std::process::id())
}

/// Bind a server and export one procedure on it, with `anyhow::Context` so a
/// setup failure names the procedure instead of just "called `Result::unwrap`".
fn server_exporting(
    name: &str,
    descriptor: &Descriptor,
    handler: mini_ipc::HandlerFn,
) -> anyhow::Result<mini_ipc::Channel> {
    let mut server = create_server(name, 0).with_context(|| format!("binding server '{name}'"))?;
    server
        .export(descriptor.clone(), handler)
        .with_context(|| format!("exporting '{}'", descriptor.name()))?;
    Ok(server)
}

/// Run a server's dispatch loop on a background thread until `stop` is
/// set, ticking at a short timeout so the thread notices `stop` promptly.
fn spawn_server_loop(
    mut server: mini_ipc::Channel,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            let _ = server.server_action(25);
        }
    })
}

#[test]
fn integer_sum() -> anyhow::Result<()> {
    let name = socket_name("sum");
    let descriptor = Descriptor::new("sum", ArgType::Int, vec![ArgType::Int, ArgType::Int]).unwrap();
    let server = server_exporting(
        &name,
        &descriptor,
        Box::new(|_d, args| Ok(ReturnValue::Int(args[0] as i32 + args[1] as i32))),
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_server_loop(server, stop.clone());

    let mut client = create_client(&name, 0).context("connecting client")?;
    let reply = client
        .call(1000, &descriptor, &[ArgValue::Int(345), ArgValue::Int(628)])
        .context("calling 'sum'")?;
    assert!(matches!(reply, ReturnValue::Int(973)));

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
    Ok(())
}

#[test]
fn no_arg_struct_reply() -> anyhow::Result<()> {
    let name = socket_name("gettimeofday");
    let descriptor = Descriptor::new("gettimeofday", ArgType::Struct(16), vec![]).unwrap();
    let server = server_exporting(
        &name,
        &descriptor,
        Box::new(|_d, _args| {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap();
            let mut buf = [0u8; 16];
            buf[0..8].copy_from_slice(&(now.as_secs() as i64).to_ne_bytes());
            buf[8..16].copy_from_slice(&(now.subsec_micros() as i64).to_ne_bytes());
            Ok(ReturnValue::Struct(buf.to_vec()))
        }),
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_server_loop(server, stop.clone());

    let mut client = create_client(&name, 0).context("connecting client")?;
    let reply = client.call(1000, &descriptor, &[]).context("calling 'gettimeofday'")?;
    match reply {
        ReturnValue::Struct(bytes) => assert_eq!(bytes.len(), 16),
        other => panic!("expected Struct reply, got {other:?}"),
    }

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
    Ok(())
}

#[test]
fn string_round_trip() -> anyhow::Result<()> {
    let name = socket_name("strcat");
    let descriptor =
        Descriptor::new("strcat", ArgType::String, vec![ArgType::String, ArgType::String]).unwrap();
    let server = server_exporting(
        &name,
        &descriptor,
        Box::new(|_d, args| {
            let a = read_string(args, 0);
            let off = next_argument(args, 0, ArgType::String.type_word()).unwrap();
            let b = read_string(args, off);
            Ok(ReturnValue::String(a + &b))
        }),
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_server_loop(server, stop.clone());

    let mut client = create_client(&name, 0).context("connecting client")?;
    let reply = client
        .call(
            1000,
            &descriptor,
            &[
                ArgValue::String("foo".into()),
                ArgValue::String("bar".into()),
            ],
        )
        .context("calling 'strcat'")?;
    match reply {
        ReturnValue::String(s) => assert_eq!(s, "foobar"),
        other => panic!("expected String reply, got {other:?}"),
    }

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
    Ok(())
}

#[test]
fn strcat_reply_is_word_padded_on_the_wire() -> anyhow::Result<()> {
    use mini_ipc::packet::{ReplyFrame, RequestFrame, MAX_ARGUMENTS};
    use mini_ipc::transport::stream::StreamTransport;
    use std::io::{Read, Write};

    let name = socket_name("strcat-wire");
    let descriptor =
        Descriptor::new("strcat", ArgType::String, vec![ArgType::String, ArgType::String]).unwrap();
    let server = server_exporting(
        &name,
        &descriptor,
        Box::new(|_d, args| {
            let a = read_string(args, 0);
            let off = next_argument(args, 0, ArgType::String.type_word()).unwrap();
            let b = read_string(args, off);
            Ok(ReturnValue::String(a + &b))
        }),
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_server_loop(server, stop.clone());

    // Bypass `Channel::call`'s decoding and inspect the raw reply frame,
    // since the declared size is exactly what we're checking.
    let mut raw = StreamTransport::connect(&name).context("connecting raw client")?;
    let stream = raw.client_stream_mut().unwrap();
    stream.set_nonblocking(false).unwrap();

    let (words, word_count) = mini_ipc::marshal::encode_args(
        &[
            ArgValue::String("foo".into()),
            ArgValue::String("bar".into()),
        ],
        &descriptor.args,
    )
    .unwrap();
    let mut request = RequestFrame::default();
    request.set_name("strcat");
    request.args[..word_count].copy_from_slice(&words[..word_count]);
    stream.write_all(&request.to_wire(MAX_ARGUMENTS)).unwrap();

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    let kind_word = u32::from_ne_bytes(header);
    let size = mini_ipc::codec::size_of(kind_word) as usize;
    // "foobar" + NUL is 7 bytes, which the reply's size field must round up
    // to 8, per spec.md §8 scenario 3.
    assert_eq!(size, 8);
    let mut value = vec![0u8; size];
    stream.read_exact(&mut value).unwrap();
    let mut frame = ReplyFrame::default();
    frame.kind_word = kind_word;
    frame.value[..value.len()].copy_from_slice(&value);
    let decoded = mini_ipc::marshal::decode_reply(&frame, descriptor.retval).unwrap();
    match decoded {
        ReturnValue::String(s) => assert_eq!(s, "foobar"),
        other => panic!("expected String reply, got {other:?}"),
    }

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
    Ok(())
}

fn read_string(args: &[u32], word_offset: usize) -> String {
    let bytes: &[u8] = unsafe {
        std::slice::from_raw_parts(
            args[word_offset..].as_ptr() as *const u8,
            (args.len() - word_offset) * 4,
        )
    };
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).unwrap().to_owned()
}

#[test]
fn unknown_procedure_returns_remote_eopnotsupp() {
    let name = socket_name("unknown");
    let server = create_server(&name, 0).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_server_loop(server, stop.clone());

    let mut client = create_client(&name, 0).unwrap();
    let descriptor = Descriptor::new("nope", ArgType::Int, vec![]).unwrap();
    let result = client.call(1000, &descriptor, &[]);
    match result {
        Err(Error::Remote(remote)) => assert_eq!(remote.code(), libc::EOPNOTSUPP),
        other => panic!("expected Remote(EOPNOTSUPP), got {other:?}"),
    }

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}

#[test]
fn unexport_then_call_returns_unsupported() {
    let name = socket_name("unexport");
    let descriptor = Descriptor::new("echo", ArgType::Int, vec![ArgType::Int]).unwrap();
    let mut server = create_server(&name, 0).unwrap();
    server
        .export(
            descriptor.clone(),
            Box::new(|_d, args| Ok(ReturnValue::Int(args[0] as i32))),
        )
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_thread = stop.clone();
    let handle = thread::spawn(move || {
        while !stop_for_thread.load(Ordering::Relaxed) {
            let _ = server.server_action(25);
        }
        server
    });

    let mut client = create_client(&name, 0).unwrap();
    let reply = client.call(1000, &descriptor, &[ArgValue::Int(42)]).unwrap();
    assert!(matches!(reply, ReturnValue::Int(42)));

    stop.store(true, Ordering::Relaxed);
    let mut server = handle.join().unwrap();

    // Unexport is a left-inverse of export: it removes the binding, and a
    // second unexport of the same name finds nothing left to remove.
    server.unexport("echo").unwrap();
    assert!(matches!(server.unexport("echo"), Err(Error::NotFound)));

    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_server_loop(server, stop.clone());

    let result = client.call(1000, &descriptor, &[ArgValue::Int(1)]);
    match result {
        Err(Error::Remote(remote)) => assert_eq!(remote.code(), libc::EOPNOTSUPP),
        other => panic!("expected Remote(EOPNOTSUPP), got {other:?}"),
    }

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}

#[test]
fn call_times_out_when_server_never_ticks() {
    let name = socket_name("timeout");
    let _server = create_server(&name, 0).unwrap(); // never calls server_action
    let mut client = create_client(&name, 0).unwrap();
    let descriptor = Descriptor::new("sum", ArgType::Int, vec![ArgType::Int, ArgType::Int]).unwrap();

    let started = std::time::Instant::now();
    let result = client.call(50, &descriptor, &[ArgValue::Int(1), ArgValue::Int(2)]);
    assert!(matches!(result, Err(Error::TimedOut)));
    assert!(started.elapsed() >= Duration::from_millis(50));
}
