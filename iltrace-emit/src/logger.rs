use crate::sink::{NullSink, Sink};

/// Tracing configuration handed to [`DisasmLog`].
#[derive(Clone, Debug, Default)]
pub struct TraceConfig<S> {
    pub debug_enabled: bool,
    pub sink: S,
}

impl<S> TraceConfig<S> {
    pub fn new(debug_enabled: bool, sink: S) -> Self {
        Self {
            debug_enabled,
            sink,
        }
    }

    pub fn enabled(sink: S) -> Self {
        Self::new(true, sink)
    }
}

impl TraceConfig<NullSink> {
    /// No tracing at all.
    pub fn disabled() -> Self {
        Self::new(false, NullSink)
    }
}

/// Decides whether a line reaches the sink.
///
/// Lines and indentation changes are both dropped while tracing is off.
#[derive(Debug)]
pub struct DisasmLog<S> {
    debug_enabled: bool,
    sink: S,
}

impl<S: Sink> DisasmLog<S> {
    pub fn new(config: TraceConfig<S>) -> Self {
        Self {
            debug_enabled: config.debug_enabled,
            sink: config.sink,
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.debug_enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.debug_enabled = enabled;
    }

    pub fn log(&mut self, line: &str) {
        if self.debug_enabled {
            self.sink.append_line(line);
        }
    }

    pub fn indent(&mut self, delta: i32) {
        if self.debug_enabled {
            self.sink.change_indent(delta);
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
