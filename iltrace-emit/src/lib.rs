//! Instrumented instruction emission.
//!
//! [`Emitter`] sits in front of any [`CodeGenerator`](iltrace_isa::CodeGenerator)
//! and forwards every call unchanged. While tracing is on, each call first
//! writes one disassembly line to a [`Sink`]. Exception regions are framed
//! with `.try` / `{` / `}` markers and the `leave` the generator inserts on
//! its own shows up as `leave (autogenerated)`.

pub mod emitter;
pub mod format;
pub mod logger;
pub mod region;
pub mod sink;

pub use emitter::Emitter;
pub use format::{LeaveTry, code_pos, format_display, format_operand, trace_line};
pub use logger::{DisasmLog, TraceConfig};
pub use region::ExceptionRegion;
pub use sink::{BufferedFileLog, LogSink, MemorySink, NullSink, Sink};
