//! CIL instruction set definitions and the code-stream boundary.
//!
//! This crate provides the opcode table, the [`Operand`] model accepted by
//! emitters, the [`CodeGenerator`] / [`Introspect`] traits an assembler has
//! to implement, and [`CodeBuffer`], an in-memory reference assembler.

pub mod buffer;
pub mod generator;
pub mod opcode;
pub mod operand;

pub use buffer::{AsmError, ClauseKind, CodeBuffer, ExceptionClause, MethodBody, Token};
pub use generator::{CodeGenerator, Introspect, LocalsView};
pub use opcode::{OpCode, OperandKind, opcodes};
pub use operand::{
    CallSiteSignature, CallingConvention, CallingConventions, ConstructorRef, FieldRef, Label,
    LocalVariable, MethodRef, Operand, TypeRef,
};
