//! Transport abstraction: the Unix-domain stream socket and the
//! shared-memory region, unified behind one "ready set" of raw descriptors
//! so the dispatcher's `poll()` fan-in never needs to know which transport
//! it is watching.

pub mod shmem;
pub mod stream;

use std::os::unix::io::RawFd;

/// Base directory under which stream-transport socket files are created.
pub const STREAM_BASE_PATH: &str = "/tmp/.minipc";

/// Role a channel plays — determines who creates/binds resources and who
/// writes which half of a shared-memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// The set of descriptors a dispatcher or caller should watch for
/// readability. For a stream server this is the listening socket plus every
/// live client slot; for a stream client, the one connected socket; for a
/// shared-memory channel (either role), the poller bridge's pipe read end.
#[derive(Debug, Clone, Default)]
pub struct ReadySet {
    pub fds: Vec<RawFd>,
}

impl ReadySet {
    pub fn new() -> Self {
        ReadySet { fds: Vec::new() }
    }

    pub fn push(&mut self, fd: RawFd) {
        if !self.fds.contains(&fd) {
            self.fds.push(fd);
        }
    }
}

/// Concrete wire transport owned by a [`crate::Channel`].
pub enum Transport {
    Stream(stream::StreamTransport),
    Shmem(shmem::ShmemTransport),
}

impl Transport {
    pub fn ready_set(&self) -> ReadySet {
        match self {
            Transport::Stream(t) => t.ready_set(),
            Transport::Shmem(t) => t.ready_set(),
        }
    }
}
