use iltrace_isa::{CodeGenerator, Introspect, Label, TypeRef, opcodes};

use crate::emitter::Emitter;
use crate::format::{LeaveTry, format_display, trace_line};
use crate::sink::Sink;

/// A region boundary passed to [`Emitter::enter_region`] and
/// [`Emitter::exit_region`].
///
/// Callers nest `Try`, then any handlers, then `EndRegion`. The order is
/// not checked here; the code generator rejects what it cannot assemble.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExceptionRegion {
    Try,
    /// `None` is the handler that follows a filter.
    Catch(Option<TypeRef>),
    Filter,
    Fault,
    Finally,
    EndRegion,
}

impl ExceptionRegion {
    /// Header line of a handler region, e.g. `.catch System.Exception`.
    fn handler_marker(&self) -> Option<String> {
        match self {
            Self::Catch(Some(ty)) => Some(format!(".catch {}", ty.full_name())),
            Self::Catch(None) => Some(".catch".to_owned()),
            Self::Filter => Some(".filter".to_owned()),
            Self::Fault => Some(".fault".to_owned()),
            Self::Finally => Some(".finally".to_owned()),
            Self::Try | Self::EndRegion => None,
        }
    }
}

impl<S: Sink> Emitter<S> {
    /// The `leave` the generator inserts by itself when a region closes.
    fn log_synthetic_leave<G: Introspect + ?Sized>(&mut self, il: &G) {
        if self.log.is_enabled() {
            let line = trace_line(il.code_offset(), opcodes::LEAVE, &format_display(&LeaveTry));
            self.log.log(&line);
        }
    }

    /// Open `region`. Returns the block's end label for [`ExceptionRegion::Try`].
    pub fn enter_region<G: CodeGenerator>(
        &mut self,
        il: &mut G,
        region: &ExceptionRegion,
    ) -> Result<Option<Label>, G::Error> {
        let marker = match region {
            ExceptionRegion::EndRegion => return Ok(None),
            ExceptionRegion::Try => {
                self.log.log(".try");
                self.log.log("{");
                self.log.indent(1);
                return il.begin_exception_block().map(Some);
            }
            handler => handler.handler_marker(),
        };

        self.log_synthetic_leave(il);
        self.log.indent(-1);
        self.log.log("} // end try");
        if let Some(marker) = marker {
            self.log.log(&marker);
        }
        self.log.log("{");
        self.log.indent(1);

        match region {
            ExceptionRegion::Catch(catch_type) => il.begin_catch_block(catch_type.as_ref())?,
            ExceptionRegion::Filter => il.begin_except_filter_block()?,
            ExceptionRegion::Fault => il.begin_fault_block()?,
            ExceptionRegion::Finally => il.begin_finally_block()?,
            ExceptionRegion::Try | ExceptionRegion::EndRegion => {}
        }
        Ok(None)
    }

    /// Close the whole block on [`ExceptionRegion::EndRegion`]; other kinds
    /// do nothing.
    pub fn exit_region<G: CodeGenerator>(
        &mut self,
        il: &mut G,
        region: &ExceptionRegion,
    ) -> Result<(), G::Error> {
        if *region != ExceptionRegion::EndRegion {
            return Ok(());
        }
        self.log_synthetic_leave(il);
        self.log.indent(-1);
        self.log.log("} // end handler");
        il.end_exception_block()
    }
}
