use iltrace_isa::{
    CallingConvention, CallingConventions, CodeGenerator, Introspect, Label, LocalVariable,
    MethodRef, OpCode, Operand, TypeRef,
};

use crate::format::{
    code_pos, format_label, format_operand, format_optional_types, format_types, trace_line,
};
use crate::logger::{DisasmLog, TraceConfig};
use crate::sink::Sink;

/// Forwards emission calls to a [`CodeGenerator`], tracing each one first.
///
/// Every operation logs (when tracing is on) and then forwards its
/// arguments unchanged. Errors from the generator are returned as-is.
///
/// ```
/// use iltrace_emit::{Emitter, MemorySink, TraceConfig};
/// use iltrace_isa::{CodeBuffer, Operand, opcodes};
///
/// let mut il = CodeBuffer::new();
/// let mut emitter = Emitter::new(TraceConfig::enabled(MemorySink::new()));
/// emitter.emit(&mut il, opcodes::LDC_I4, &Operand::I32(7))?;
/// emitter.emit(&mut il, opcodes::RET, &Operand::None)?;
/// assert_eq!(emitter.sink().lines(), ["L_0000: ldc.i4 7", "L_0005: ret"]);
/// # Ok::<(), iltrace_isa::AsmError>(())
/// ```
#[derive(Debug)]
pub struct Emitter<S> {
    pub(crate) log: DisasmLog<S>,
}

impl<S: Sink> Emitter<S> {
    pub fn new(config: TraceConfig<S>) -> Self {
        Self {
            log: DisasmLog::new(config),
        }
    }

    pub fn is_tracing(&self) -> bool {
        self.log.is_enabled()
    }

    pub fn set_tracing(&mut self, enabled: bool) {
        self.log.set_enabled(enabled);
    }

    pub fn sink(&self) -> &S {
        self.log.sink()
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.log.sink_mut()
    }

    pub fn into_sink(self) -> S {
        self.log.into_sink()
    }

    /// Log `body` prefixed with the generator's current offset tag.
    fn log_at<G: Introspect + ?Sized>(&mut self, il: &G, body: &str) {
        let line = format!("{}{body}", code_pos(il.code_offset()));
        self.log.log(&line);
    }

    /// Emit `opcode` with `operand`. [`Operand::None`] traces the bare
    /// mnemonic.
    pub fn emit<G: CodeGenerator>(
        &mut self,
        il: &mut G,
        opcode: OpCode,
        operand: &Operand,
    ) -> Result<(), G::Error> {
        if self.log.is_enabled() {
            let argument = if operand.is_none() {
                String::new()
            } else {
                format_operand(operand)
            };
            let line = trace_line(il.code_offset(), opcode, &argument);
            self.log.log(&line);
        }
        il.emit(opcode, operand)
    }

    /// Emit a call with the optional trailing parameter types of a varargs
    /// call site.
    pub fn emit_call<G: CodeGenerator>(
        &mut self,
        il: &mut G,
        opcode: OpCode,
        method: &MethodRef,
        optional_types: Option<&[TypeRef]>,
    ) -> Result<(), G::Error> {
        if self.log.is_enabled() {
            let body = format!(
                "Call {opcode} {method} {}",
                format_optional_types(optional_types)
            );
            self.log_at(il, &body);
        }
        il.emit_call(opcode, method, optional_types)
    }

    /// Emit an indirect call into unmanaged code.
    pub fn emit_calli<G: CodeGenerator>(
        &mut self,
        il: &mut G,
        opcode: OpCode,
        convention: CallingConvention,
        return_type: &TypeRef,
        parameter_types: &[TypeRef],
    ) -> Result<(), G::Error> {
        if self.log.is_enabled() {
            let body = format!(
                "Calli {opcode} {convention} {return_type} {}",
                format_types(parameter_types)
            );
            self.log_at(il, &body);
        }
        il.emit_calli(opcode, convention, return_type, parameter_types)
    }

    /// Emit a managed indirect call, optionally with varargs parameter types.
    pub fn emit_calli_managed<G: CodeGenerator>(
        &mut self,
        il: &mut G,
        opcode: OpCode,
        conventions: CallingConventions,
        return_type: &TypeRef,
        parameter_types: &[TypeRef],
        optional_types: Option<&[TypeRef]>,
    ) -> Result<(), G::Error> {
        if self.log.is_enabled() {
            let body = format!(
                "Calli {opcode} {conventions} {return_type} {} {}",
                format_types(parameter_types),
                format_optional_types(optional_types)
            );
            self.log_at(il, &body);
        }
        il.emit_calli_managed(
            opcode,
            conventions,
            return_type,
            parameter_types,
            optional_types,
        )
    }

    pub fn define_label<G: CodeGenerator>(&mut self, il: &mut G) -> Label {
        il.define_label()
    }

    pub fn mark_label<G: CodeGenerator>(
        &mut self,
        il: &mut G,
        label: Label,
    ) -> Result<(), G::Error> {
        if self.log.is_enabled() {
            self.log_at(il, &format_label(label));
        }
        il.mark_label(label)
    }

    /// Declare a local on the generator, then trace the declaration.
    pub fn declare_local<G: CodeGenerator>(
        &mut self,
        il: &mut G,
        local_type: TypeRef,
        pinned: bool,
    ) -> Result<LocalVariable, G::Error> {
        let local = il.declare_local(local_type, pinned)?;
        self.log_local_variable(il, &local);
        Ok(local)
    }

    /// Trace a local that was just declared on `il`.
    ///
    /// The number shown is the generator's current local count minus one,
    /// wrapping for counts the generator reports out of range.
    pub fn log_local_variable<G: Introspect + ?Sized>(&mut self, il: &G, local: &LocalVariable) {
        if !self.log.is_enabled() {
            return;
        }
        let count = il.current_locals().effective_count();
        let pinned = if local.is_pinned() { "(pinned)" } else { "" };
        let body = format!(
            "Local var {}: {}{pinned}",
            count.wrapping_sub(1),
            local.local_type().full_name()
        );
        self.log_at(il, &body);
    }
}
