//! Unix-domain stream socket transport.
//!
//! Grounded on `examples/original_source/minipc-core.c`'s
//! `__minipc_link_create` (socket path under a fixed base directory,
//! `mkdir` ignoring `EEXIST`, `unlink` of a stale socket before `bind`,
//! `listen`/`connect`) and `minipc-server.c`'s `mpc_handle_server` (accept
//! into the first free client slot, refuse with ECONNREFUSED when the
//! table is full). The client-slot table is a fixed-size array rather than
//! a `Vec` for the same reason the original used a fixed array: the wire
//! protocol caps simultaneous clients at [`MAX_CLIENTS`](crate::packet::MAX_CLIENTS).

use crate::error::{Error, Result};
use crate::packet::MAX_CLIENTS;
use crate::transport::{ReadySet, STREAM_BASE_PATH};
use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

/// Build the socket path for a named channel: `/tmp/.minipc/<name>`.
pub fn socket_path(name: &str) -> PathBuf {
    PathBuf::from(STREAM_BASE_PATH).join(name)
}

fn ensure_base_dir() -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    match fs::DirBuilder::new().mode(0o777).create(STREAM_BASE_PATH) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(Error::Os(e)),
    }
}

/// A single accepted client slot. `None` marks a free slot.
#[derive(Debug)]
pub struct ClientSlot {
    pub stream: UnixStream,
}

#[derive(Debug)]
pub enum StreamTransport {
    Server {
        path: PathBuf,
        listener: UnixListener,
        clients: Box<[Option<ClientSlot>; MAX_CLIENTS]>,
    },
    Client {
        path: PathBuf,
        stream: UnixStream,
    },
}

impl StreamTransport {
    /// Bind and listen on `name`'s socket path, removing a stale socket
    /// file left behind by a crashed prior server.
    pub fn bind(name: &str) -> Result<Self> {
        ensure_base_dir()?;
        let path = socket_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Os(e)),
        }
        let listener = UnixListener::bind(&path).map_err(Error::Os)?;
        listener.set_nonblocking(true).map_err(Error::Os)?;
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o666));
        }
        Ok(StreamTransport::Server {
            path,
            listener,
            clients: Box::new(std::array::from_fn(|_| None)),
        })
    }

    /// Connect to an existing server's socket.
    pub fn connect(name: &str) -> Result<Self> {
        let path = socket_path(name);
        let stream = UnixStream::connect(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => Error::NotFound,
            _ => Error::Os(e),
        })?;
        Ok(StreamTransport::Client { path, stream })
    }

    /// Accept one pending connection into the first free client slot.
    /// Refuses (closing the accepted socket immediately) if the table is
    /// full, matching the original's ECONNREFUSED-on-full behavior.
    pub fn accept_one(&mut self) -> Result<Option<usize>> {
        let (listener, clients) = match self {
            StreamTransport::Server { listener, clients, .. } => (listener, clients),
            StreamTransport::Client { .. } => return Err(Error::Invalid),
        };
        match listener.accept() {
            Ok((stream, _addr)) => {
                let slot = clients.iter().position(|c| c.is_none());
                match slot {
                    Some(idx) => {
                        stream.set_nonblocking(true).map_err(Error::Os)?;
                        clients[idx] = Some(ClientSlot { stream });
                        Ok(Some(idx))
                    }
                    None => {
                        drop(stream);
                        Err(Error::Refused)
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::Os(e)),
        }
    }

    pub fn close_slot(&mut self, idx: usize) {
        if let StreamTransport::Server { clients, .. } = self {
            clients[idx] = None;
        }
    }

    pub fn client_slot_mut(&mut self, idx: usize) -> Option<&mut UnixStream> {
        match self {
            StreamTransport::Server { clients, .. } => {
                clients[idx].as_mut().map(|c| &mut c.stream)
            }
            StreamTransport::Client { .. } => None,
        }
    }

    pub fn client_stream_mut(&mut self) -> Option<&mut UnixStream> {
        match self {
            StreamTransport::Client { stream, .. } => Some(stream),
            StreamTransport::Server { .. } => None,
        }
    }

    pub fn listener_fd(&self) -> Option<RawFd> {
        match self {
            StreamTransport::Server { listener, .. } => Some(listener.as_raw_fd()),
            StreamTransport::Client { .. } => None,
        }
    }

    /// Iterate over `(slot_index, fd)` for every occupied client slot.
    pub fn client_fds(&self) -> Vec<(usize, RawFd)> {
        match self {
            StreamTransport::Server { clients, .. } => clients
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.as_ref().map(|c| (i, c.stream.as_raw_fd())))
                .collect(),
            StreamTransport::Client { .. } => Vec::new(),
        }
    }

    pub fn ready_set(&self) -> ReadySet {
        let mut set = ReadySet::new();
        match self {
            StreamTransport::Server { listener, clients, .. } => {
                set.push(listener.as_raw_fd());
                for c in clients.iter().flatten() {
                    set.push(c.stream.as_raw_fd());
                }
            }
            StreamTransport::Client { stream, .. } => set.push(stream.as_raw_fd()),
        }
        set
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if let StreamTransport::Server { path, .. } = self {
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn unique_name(tag: &str) -> String {
        format!("test-{}-{}", tag, std::process::id())
    }

    #[test]
    fn bind_connect_accept_roundtrip() {
        let name = unique_name("bindconnect");
        let mut server = StreamTransport::bind(&name).unwrap();
        let mut client = StreamTransport::connect(&name).unwrap();

        // Give the kernel a moment to queue the connection for accept().
        let mut accepted = None;
        for _ in 0..1000 {
            match server.accept_one().unwrap() {
                Some(idx) => {
                    accepted = Some(idx);
                    break;
                }
                None => std::thread::sleep(std::time::Duration::from_millis(1)),
            }
        }
        let idx = accepted.expect("server accepted a client");

        let client_stream = client.client_stream_mut().unwrap();
        client_stream.set_nonblocking(false).unwrap();
        client_stream.write_all(b"ping").unwrap();

        let server_stream = server.client_slot_mut(idx).unwrap();
        server_stream.set_nonblocking(false).unwrap();
        let mut buf = [0u8; 4];
        server_stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn connect_without_server_is_not_found() {
        let name = unique_name("missing");
        match StreamTransport::connect(&name) {
            Err(Error::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn refuses_when_client_table_full() {
        let name = unique_name("full");
        let mut server = StreamTransport::bind(&name).unwrap();
        let mut _keep_alive = Vec::new();
        for _ in 0..MAX_CLIENTS {
            let client = StreamTransport::connect(&name).unwrap();
            let mut accepted = false;
            for _ in 0..1000 {
                if server.accept_one().unwrap().is_some() {
                    accepted = true;
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            assert!(accepted);
            _keep_alive.push(client);
        }

        let _overflow_client = StreamTransport::connect(&name).unwrap();
        let mut result = Ok(None);
        for _ in 0..1000 {
            result = server.accept_one();
            if result.is_ok() && matches!(result, Ok(None)) {
                std::thread::sleep(std::time::Duration::from_millis(1));
                continue;
            }
            break;
        }
        assert!(matches!(result, Err(Error::Refused)));
    }
}
