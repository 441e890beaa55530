//! The `Channel`: the public handle tying a transport, a server's export
//! list, diagnostics, and process-wide registration together. Grounded on
//! `examples/original_source/minipc.h`'s `struct minipc_ch` (name, flags,
//! link, flist) and `minipc-core.c`'s `minipc_close`, generalized from a
//! single global list (`mpc_base`) to RAII: a `Channel` releases its
//! transport and deregisters itself in `Drop`, so callers don't need to
//! remember to call a `close()` function for correctness (though one is
//! provided, matching the original's explicit API and letting callers
//! observe close-time errors instead of swallowing them in `Drop`).

use crate::descriptor::{ArgValue, Descriptor, ExportedProcedure, HandlerFn, ReturnValue};
use crate::diagnostics::{DiagnosticSink, NullSink};
use crate::error::{Error, Result};
use crate::registry::{self, ChannelId, ChannelInfo};
use crate::transport::{shmem::ShmemTransport, stream::StreamTransport, ReadySet, Role, Transport};
use crate::{client, server};

/// User-defined bits a caller may pass through `flags`; the library ORs in
/// its own internal role/transport bits on top, matching the original's
/// `minipc_create` composing `MINIPC_FLAG_SERVER`/`_CLIENT` with the
/// caller's value.
pub const USER_FLAGS_MASK: u16 = 0x0fff;

/// A live mini-ipc channel: either a server (can export procedures and
/// dispatch requests) or a client (can call exported procedures).
pub struct Channel {
    id: ChannelId,
    role: Role,
    transport: Transport,
    exports: Vec<ExportedProcedure>,
    diagnostics: Box<dyn DiagnosticSink + Send>,
}

fn open_transport(role: Role, name: &str) -> Result<Transport> {
    if name.starts_with("shm:") || name.starts_with("mem:") {
        Ok(Transport::Shmem(ShmemTransport::open(role, name)?))
    } else {
        match role {
            Role::Server => Ok(Transport::Stream(StreamTransport::bind(name)?)),
            Role::Client => Ok(Transport::Stream(StreamTransport::connect(name)?)),
        }
    }
}

/// Create a server channel bound to `name` (a Unix-socket name, or a
/// `shm:<key>`/`mem:<hex>` shared-memory address).
pub fn create_server(name: &str, flags: u16) -> Result<Channel> {
    let _ = flags & USER_FLAGS_MASK;
    let transport = open_transport(Role::Server, name)?;
    let poller_pid = match &transport {
        Transport::Shmem(t) => t.poller_pid(),
        Transport::Stream(_) => None,
    };
    let id = registry::insert(ChannelInfo {
        name: name.to_owned(),
        is_server: true,
        poller_pid,
    });
    Ok(Channel {
        id,
        role: Role::Server,
        transport,
        exports: Vec::new(),
        diagnostics: Box::new(NullSink),
    })
}

/// Create a client channel connected to an existing server's `name`.
pub fn create_client(name: &str, flags: u16) -> Result<Channel> {
    let _ = flags & USER_FLAGS_MASK;
    let transport = open_transport(Role::Client, name)?;
    let poller_pid = match &transport {
        Transport::Shmem(t) => t.poller_pid(),
        Transport::Stream(_) => None,
    };
    let id = registry::insert(ChannelInfo {
        name: name.to_owned(),
        is_server: false,
        poller_pid,
    });
    Ok(Channel {
        id,
        role: Role::Client,
        transport,
        exports: Vec::new(),
        diagnostics: Box::new(NullSink),
    })
}

impl Channel {
    /// Bind a handler to a descriptor so a server channel will dispatch
    /// matching requests to it. Re-exporting the same name replaces the
    /// previous binding, matching the original's "most recent export
    /// wins" behavior for a given name.
    pub fn export(&mut self, descriptor: Descriptor, handler: HandlerFn) -> Result<()> {
        if self.role != Role::Server {
            return Err(Error::Invalid);
        }
        self.exports.retain(|e| e.descriptor.name() != descriptor.name());
        self.exports.push(ExportedProcedure::new(descriptor, handler));
        Ok(())
    }

    /// Remove a previously exported procedure by name. Fails with
    /// [`Error::NotFound`] if no such export exists.
    pub fn unexport(&mut self, name: &str) -> Result<()> {
        let before = self.exports.len();
        self.exports.retain(|e| e.descriptor.name() != name);
        if self.exports.len() == before {
            Err(Error::NotFound)
        } else {
            Ok(())
        }
    }

    /// Call a remote procedure, blocking up to `timeout_ms` milliseconds
    /// for a reply (negative means block indefinitely).
    pub fn call(
        &mut self,
        timeout_ms: i32,
        descriptor: &Descriptor,
        args: &[ArgValue],
    ) -> Result<ReturnValue> {
        if self.role != Role::Client {
            return Err(Error::Invalid);
        }
        client::call(
            &mut self.transport,
            &mut *self.diagnostics,
            timeout_ms,
            descriptor,
            args,
        )
    }

    /// Run one dispatch tick: wait up to `timeout_ms` milliseconds for
    /// readiness, then service every ready client once. Returns the number
    /// of requests serviced.
    pub fn server_action(&mut self, timeout_ms: i32) -> Result<i32> {
        if self.role != Role::Server {
            return Err(Error::Invalid);
        }
        server::server_action(
            &mut self.transport,
            &mut self.exports,
            &mut *self.diagnostics,
            timeout_ms,
        )
    }

    /// The set of descriptors this channel is currently interested in
    /// reading from, for a caller that wants to drive its own `poll()`
    /// loop around `server_action`/`call` instead of blocking inside them.
    pub fn get_ready_set(&self) -> ReadySet {
        self.transport.ready_set()
    }

    /// Install a diagnostic sink to observe protocol-level events on this
    /// channel, replacing the default no-op sink.
    pub fn set_diagnostics(&mut self, sink: impl DiagnosticSink + Send + 'static) {
        self.diagnostics = Box::new(sink);
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    /// Explicitly release the channel's transport and deregister it.
    /// Equivalent to dropping the channel, but lets a caller observe the
    /// registry no longer considers it live afterward.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        registry::remove(self.id);
    }
}
