//! Per-channel diagnostics, independent of the ambient `tracing` events in
//! [`crate::logging`]. The original exposed a `minipc_verbose` flag writing
//! to a caller-supplied `FILE *`; this is that knob's Rust shape: a trait
//! object a caller can install on a [`crate::Channel`] to capture a trace
//! of protocol-level events (accepts, dispatches, timeouts) without
//! reconfiguring global log filtering.

use std::io::Write;

/// An event reported to a channel's diagnostic sink, one per interesting
/// protocol step.
#[derive(Debug, Clone)]
pub enum DiagnosticEvent<'a> {
    ClientAccepted { slot: usize },
    ClientRefused,
    ClientDisconnected { slot: usize },
    Dispatched { procedure: &'a str, slot: usize },
    UnknownProcedure { name: &'a str, slot: usize },
    CallSent { procedure: &'a str },
    CallTimedOut { procedure: &'a str, timeout_ms: i32 },
    CallFailed { procedure: &'a str, errno: i32 },
}

/// A sink a caller installs on a channel via
/// [`crate::Channel::set_diagnostics`] to observe protocol-level events.
pub trait DiagnosticSink {
    fn report(&mut self, event: DiagnosticEvent<'_>);
}

/// Report `event` to `sink` and, independently, as a `tracing` event at a
/// level matching its severity: `debug` for routine export/accept traffic,
/// `warn` for short reads and refused clients, `error` for remote failures.
/// Detaching the sink never silences `tracing`, and `tracing` having no
/// subscriber installed never affects the sink.
pub fn emit(sink: &mut dyn DiagnosticSink, event: DiagnosticEvent<'_>) {
    match &event {
        DiagnosticEvent::ClientAccepted { slot } => {
            tracing::debug!(slot, "client accepted")
        }
        DiagnosticEvent::ClientRefused => {
            tracing::warn!("client refused: no free slot")
        }
        DiagnosticEvent::ClientDisconnected { slot } => {
            tracing::debug!(slot, "client disconnected")
        }
        DiagnosticEvent::Dispatched { procedure, slot } => {
            tracing::debug!(procedure, slot, "dispatched request")
        }
        DiagnosticEvent::UnknownProcedure { name, slot } => {
            tracing::warn!(name, slot, "unknown procedure requested")
        }
        DiagnosticEvent::CallSent { procedure } => {
            tracing::debug!(procedure, "call sent")
        }
        DiagnosticEvent::CallTimedOut { procedure, timeout_ms } => {
            tracing::warn!(procedure, timeout_ms, "call timed out")
        }
        DiagnosticEvent::CallFailed { procedure, errno } => {
            tracing::error!(procedure, errno, "call failed")
        }
    }
    sink.report(event);
}

/// The default sink: formats each event as one line and writes it to a
/// caller-supplied `Write`, mirroring the original's `FILE *` callback.
pub struct WriterSink<W: Write> {
    out: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(out: W) -> Self {
        WriterSink { out }
    }
}

impl<W: Write> DiagnosticSink for WriterSink<W> {
    fn report(&mut self, event: DiagnosticEvent<'_>) {
        let line = match event {
            DiagnosticEvent::ClientAccepted { slot } => format!("client accepted: slot {slot}"),
            DiagnosticEvent::ClientRefused => "client refused: no free slot".to_owned(),
            DiagnosticEvent::ClientDisconnected { slot } => {
                format!("client disconnected: slot {slot}")
            }
            DiagnosticEvent::Dispatched { procedure, slot } => {
                format!("dispatched '{procedure}' from slot {slot}")
            }
            DiagnosticEvent::UnknownProcedure { name, slot } => {
                format!("unknown procedure '{name}' requested by slot {slot}")
            }
            DiagnosticEvent::CallSent { procedure } => format!("call sent: '{procedure}'"),
            DiagnosticEvent::CallTimedOut { procedure, timeout_ms } => {
                format!("call '{procedure}' timed out after {timeout_ms}ms")
            }
            DiagnosticEvent::CallFailed { procedure, errno } => {
                format!("call '{procedure}' failed: errno {errno}")
            }
        };
        let _ = writeln!(self.out, "{line}");
    }
}

/// A sink that discards every event, the default for a channel that never
/// calls `set_diagnostics`.
#[derive(Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&mut self, _event: DiagnosticEvent<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_sink_formats_event() {
        let mut buf = Vec::new();
        {
            let mut sink = WriterSink::new(&mut buf);
            sink.report(DiagnosticEvent::Dispatched {
                procedure: "sum",
                slot: 2,
            });
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "dispatched 'sum' from slot 2\n");
    }

    #[test]
    fn null_sink_drops_everything() {
        let mut sink = NullSink;
        sink.report(DiagnosticEvent::CallSent { procedure: "sum" });
    }

    #[test]
    fn emit_reaches_the_sink_independently_of_tracing() {
        let mut buf = Vec::new();
        let mut sink = WriterSink::new(&mut buf);
        emit(&mut sink, DiagnosticEvent::UnknownProcedure { name: "nope", slot: 1 });
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "unknown procedure 'nope' requested by slot 1\n");
    }
}
