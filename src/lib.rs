//! # mini-ipc
//!
//! A small RPC library for exposing and calling typed procedures over a
//! Unix-domain stream socket or a System-V/`/dev/mem` shared-memory
//! region. A server [`Channel`] exports named procedures with a fixed
//! argument/return-type signature; a client `Channel` calls them and
//! blocks for a reply within a caller-supplied timeout.

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod marshal;
pub mod packet;
pub mod registry;
pub mod server;
pub mod transport;

pub use channel::{create_client, create_server, Channel};
pub use config::set_poll_interval;
pub use descriptor::{ArgType, ArgValue, Descriptor, HandlerFn, ReturnValue};
pub use diagnostics::{DiagnosticEvent, DiagnosticSink};
pub use error::{Error, RemoteError, Result};
pub use transport::{ReadySet, Role};

/// The current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
