//! The assembler boundary: what an emission layer needs from a code stream.

use crate::{
    CallingConvention, CallingConventions, Label, LocalVariable, MethodRef, OpCode, Operand,
    TypeRef,
};

/// Locals as reported by an [`Introspect`] implementation.
///
/// Some code streams can hand out their locals array, others only a raw
/// count. Both values are kept; neither is assumed to agree with the other.
#[derive(Clone, Copy, Debug)]
pub struct LocalsView<'a> {
    pub count: i32,
    pub locals: Option<&'a [LocalVariable]>,
}

impl LocalsView<'_> {
    /// Length of the locals array when one is available and non-empty,
    /// otherwise the raw count.
    pub fn effective_count(&self) -> i32 {
        match self.locals {
            Some(locals) if !locals.is_empty() => {
                i32::try_from(locals.len()).unwrap_or(i32::MAX)
            }
            _ => self.count,
        }
    }
}

/// Read-only counters of an in-progress code stream.
pub trait Introspect {
    /// Number of bytes emitted so far.
    fn code_offset(&self) -> u32;

    fn current_locals(&self) -> LocalsView<'_>;
}

/// An in-progress code stream for one method body.
///
/// Errors are reported through [`Error`](Self::Error) and are expected to
/// reach the caller unchanged.
pub trait CodeGenerator: Introspect {
    type Error;

    /// Emit `opcode` with its inline operand ([`Operand::None`] for none).
    fn emit(&mut self, opcode: OpCode, operand: &Operand) -> Result<(), Self::Error>;

    /// Emit a call, with the optional trailing parameter types of a
    /// varargs call site.
    fn emit_call(
        &mut self,
        opcode: OpCode,
        method: &MethodRef,
        optional_types: Option<&[TypeRef]>,
    ) -> Result<(), Self::Error>;

    /// Emit an indirect call into unmanaged code.
    fn emit_calli(
        &mut self,
        opcode: OpCode,
        convention: CallingConvention,
        return_type: &TypeRef,
        parameter_types: &[TypeRef],
    ) -> Result<(), Self::Error>;

    /// Emit a managed indirect call.
    fn emit_calli_managed(
        &mut self,
        opcode: OpCode,
        conventions: CallingConventions,
        return_type: &TypeRef,
        parameter_types: &[TypeRef],
        optional_types: Option<&[TypeRef]>,
    ) -> Result<(), Self::Error>;

    fn define_label(&mut self) -> Label;

    /// Bind `label` to the current offset.
    fn mark_label(&mut self, label: Label) -> Result<(), Self::Error>;

    fn declare_local(
        &mut self,
        local_type: TypeRef,
        pinned: bool,
    ) -> Result<LocalVariable, Self::Error>;

    /// Open a protected region. Returns the label that ends the whole block.
    fn begin_exception_block(&mut self) -> Result<Label, Self::Error>;

    /// Start a catch handler. `None` is the handler body of a filter.
    fn begin_catch_block(&mut self, catch_type: Option<&TypeRef>) -> Result<(), Self::Error>;

    fn begin_except_filter_block(&mut self) -> Result<(), Self::Error>;

    fn begin_fault_block(&mut self) -> Result<(), Self::Error>;

    fn begin_finally_block(&mut self) -> Result<(), Self::Error>;

    fn end_exception_block(&mut self) -> Result<(), Self::Error>;
}
