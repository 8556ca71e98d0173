use std::collections::HashMap;

use crate::generator::{CodeGenerator, Introspect, LocalsView};
use crate::opcodes;
use crate::{
    CallSiteSignature, CallingConvention, CallingConventions, ConstructorRef, FieldRef, Label,
    LocalVariable, MethodRef, OpCode, Operand, OperandKind, TypeRef,
};

/// Errors from [`CodeBuffer`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AsmError {
    /// The operand does not have the shape the opcode encodes.
    #[error("{opcode} expects an {expected:?} operand, got {found}")]
    OperandMismatch {
        opcode: OpCode,
        expected: OperandKind,
        found: &'static str,
    },
    /// A local or argument index does not fit the opcode's operand width.
    #[error("index {index} does not fit the operand of {opcode}")]
    LocalOutOfRange { opcode: OpCode, index: u32 },
    #[error("label {0} was not defined by this code stream")]
    InvalidLabel(Label),
    #[error("label {0} is already marked")]
    LabelAlreadyMarked(Label),
    /// A branch references a label that was never bound to an offset.
    #[error("label {0} is not marked")]
    LabelNotMarked(Label),
    /// A short-form branch cannot reach its target.
    #[error("branch at offset {from:#x} to label {label} does not fit a short operand")]
    BranchOutOfRange { from: u32, label: Label },
    #[error("not inside an exception block")]
    NotInExceptionBlock,
    /// `end_exception_block` was called before any handler was opened.
    #[error("exception block has no handler")]
    EmptyTryBlock,
    #[error("filter handlers do not take an exception type")]
    CatchTypeOnFilter,
    #[error("catch block requires an exception type")]
    MissingCatchType,
    #[error("filter block is not followed by its handler")]
    FilterWithoutHandler,
    #[error("optional parameter types given for non-varargs method {0}")]
    NotVarArgs(String),
    #[error("too many local variables")]
    TooManyLocals,
    /// The stream was finished with exception blocks still open.
    #[error("unbalanced exception blocks: {0} still open")]
    UnbalancedExceptionBlocks(usize),
}

/// Handler flavour of a finished exception clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClauseKind {
    Catch(TypeRef),
    Filter { filter_offset: u32 },
    Fault,
    Finally,
}

/// One entry of the exception table, ordered innermost first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionClause {
    pub kind: ClauseKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
}

/// A metadata token handed out for a symbolic operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub value: u32,
    pub text: String,
}

/// The finished output of a [`CodeBuffer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodBody {
    pub code: Vec<u8>,
    pub locals: Vec<LocalVariable>,
    pub clauses: Vec<ExceptionClause>,
    pub tokens: Vec<Token>,
}

// Metadata table ids used in token high bytes.
const TABLE_TYPE_REF: u8 = 0x01;
const TABLE_FIELD: u8 = 0x04;
const TABLE_MEMBER_REF: u8 = 0x0A;
const TABLE_STAND_ALONE_SIG: u8 = 0x11;
const TABLE_USER_STRING: u8 = 0x70;

// Interning keys use fully qualified names. The short display form drops
// namespaces and declaring types, so it cannot tell members apart.

fn full_names(types: &[TypeRef]) -> String {
    let names: Vec<&str> = types.iter().map(TypeRef::full_name).collect();
    names.join(", ")
}

fn field_key(field: &FieldRef) -> String {
    format!("{} {}::{}", field.field_type, field.declaring_type, field.name)
}

fn method_key(method: &MethodRef) -> String {
    let mut params = full_names(&method.parameters);
    if method.is_var_args() {
        if !params.is_empty() {
            params.push_str(", ");
        }
        params.push_str("...");
    }
    format!("{} {}::{}({params})", method.return_type, method.declaring_type, method.name)
}

fn ctor_key(ctor: &ConstructorRef) -> String {
    format!(
        "{} {}::.ctor({})",
        TypeRef::void(),
        ctor.declaring_type,
        full_names(&ctor.parameters)
    )
}

fn signature_key(sig: &CallSiteSignature) -> String {
    format!("{} {}({})", sig.calling_convention, sig.return_type, full_names(&sig.parameters))
}

#[derive(Default)]
struct TokenTable {
    by_key: HashMap<(u8, String), u32>,
    next_row: HashMap<u8, u32>,
    order: Vec<Token>,
}

impl TokenTable {
    fn token(&mut self, table: u8, text: String) -> u32 {
        if let Some(&value) = self.by_key.get(&(table, text.clone())) {
            return value;
        }
        let row = self.next_row.entry(table).or_insert(0);
        *row += 1;
        let value = (u32::from(table) << 24) | *row;
        self.by_key.insert((table, text.clone()), value);
        self.order.push(Token { value, text });
        value
    }
}

struct Fixup {
    label: Label,
    /// Position of the operand bytes within the code.
    at: usize,
    /// Offset the displacement is relative to (end of the instruction).
    base: u32,
    /// Offset of the branching instruction, for diagnostics.
    from: u32,
    short: bool,
}

#[derive(Clone, Debug)]
enum Region {
    Try,
    Catch(TypeRef),
    Filter { filter_offset: u32 },
    FilterHandler { filter_offset: u32 },
    Fault,
    Finally,
}

struct ExceptionFrame {
    try_offset: u32,
    try_end: u32,
    end_label: Label,
    region: Region,
    handler_offset: u32,
}

/// In-memory CIL code stream.
///
/// Branch displacements are patched in [`finish`](Self::finish), which
/// consumes the buffer: a finished stream cannot be emitted into.
///
/// ```
/// use iltrace_isa::{CodeBuffer, CodeGenerator, Operand, opcodes};
///
/// let mut il = CodeBuffer::new();
/// il.emit(opcodes::LDC_I4, &Operand::I32(7))?;
/// il.emit(opcodes::RET, &Operand::None)?;
/// let body = il.finish()?;
/// assert_eq!(body.code, [0x20, 7, 0, 0, 0, 0x2A]);
/// # Ok::<(), iltrace_isa::AsmError>(())
/// ```
#[derive(Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
    locals: Vec<LocalVariable>,
    tokens: TokenTable,
    blocks: Vec<ExceptionFrame>,
    clauses: Vec<ExceptionClause>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    fn check_label(&self, label: Label) -> Result<(), AsmError> {
        if (label.0 as usize) < self.labels.len() {
            Ok(())
        } else {
            Err(AsmError::InvalidLabel(label))
        }
    }

    fn push_branch(&mut self, label: Label, short: bool, base: u32, from: u32) {
        let at = self.code.len();
        if short {
            self.code.push(0);
        } else {
            self.code.extend_from_slice(&[0; 4]);
        }
        self.fixups.push(Fixup {
            label,
            at,
            base,
            from,
            short,
        });
    }

    fn push_token(&mut self, table: u8, text: String) {
        let token = self.tokens.token(table, text);
        self.code.extend_from_slice(&token.to_le_bytes());
    }

    fn push_leave(&mut self, target: Label) {
        let from = self.offset();
        self.code.extend_from_slice(opcodes::LEAVE.encoded());
        self.push_branch(target, false, from + 5, from);
    }

    fn frame(&mut self) -> Result<&mut ExceptionFrame, AsmError> {
        self.blocks.last_mut().ok_or(AsmError::NotInExceptionBlock)
    }

    /// Terminate the current try body or handler with the transition the
    /// region requires and record a finished handler as a clause.
    fn close_region(&mut self) -> Result<(), AsmError> {
        let frame = self.frame()?;
        let region = frame.region.clone();
        let end_label = frame.end_label;
        match region {
            Region::Try | Region::Catch(_) | Region::FilterHandler { .. } => {
                self.push_leave(end_label)
            }
            Region::Filter { .. } => self.code.extend_from_slice(opcodes::ENDFILTER.encoded()),
            Region::Fault | Region::Finally => {
                self.code.extend_from_slice(opcodes::ENDFINALLY.encoded())
            }
        }
        let end = self.offset();
        let frame = self.frame()?;
        let kind = match region {
            Region::Try => {
                frame.try_end = end;
                return Ok(());
            }
            Region::Filter { .. } => return Ok(()),
            Region::Catch(ty) => ClauseKind::Catch(ty),
            Region::FilterHandler { filter_offset } => ClauseKind::Filter { filter_offset },
            Region::Fault => ClauseKind::Fault,
            Region::Finally => ClauseKind::Finally,
        };
        let clause = ExceptionClause {
            kind,
            try_offset: frame.try_offset,
            try_length: frame.try_end - frame.try_offset,
            handler_offset: frame.handler_offset,
            handler_length: end - frame.handler_offset,
        };
        self.clauses.push(clause);
        Ok(())
    }

    /// Close the current region and open `next` at the resulting offset.
    fn open_handler(&mut self, next: Region) -> Result<(), AsmError> {
        if matches!(self.frame()?.region, Region::Filter { .. }) {
            return Err(AsmError::FilterWithoutHandler);
        }
        self.close_region()?;
        let offset = self.offset();
        let frame = self.frame()?;
        frame.handler_offset = offset;
        frame.region = next;
        Ok(())
    }

    fn encode_operand(&mut self, opcode: OpCode, operand: &Operand) -> Result<(), AsmError> {
        let kind = opcode.operand_kind();
        let mismatch = || AsmError::OperandMismatch {
            opcode,
            expected: kind,
            found: operand.kind_name(),
        };
        let start = self.offset();
        let end_of = |operand_size: usize| start + (opcode.size() + operand_size) as u32;

        // Validate before writing so a rejected call leaves the stream intact.
        match (kind, operand) {
            (kind, Operand::Label(l)) if kind.is_branch() => self.check_label(*l)?,
            (OperandKind::InlineSwitch, Operand::Labels(ls)) => {
                for l in ls {
                    self.check_label(*l)?;
                }
            }
            (OperandKind::ShortInlineVar, Operand::Local(local)) if local.index() > 0xFF => {
                return Err(AsmError::LocalOutOfRange {
                    opcode,
                    index: u32::from(local.index()),
                });
            }
            (OperandKind::ShortInlineVar, Operand::U16(index)) if *index > 0xFF => {
                return Err(AsmError::LocalOutOfRange {
                    opcode,
                    index: u32::from(*index),
                });
            }
            _ => {}
        }

        match (kind, operand) {
            (OperandKind::InlineNone, Operand::None) => {
                self.code.extend_from_slice(opcode.encoded());
            }
            (OperandKind::ShortInlineI, Operand::I8(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::ShortInlineI | OperandKind::ShortInlineVar, Operand::U8(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.push(*v);
            }
            (OperandKind::InlineI, Operand::I32(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::InlineI, Operand::U32(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::InlineI8, Operand::I64(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::InlineI8, Operand::U64(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::ShortInlineR, Operand::F32(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::InlineR, Operand::F64(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::InlineString, Operand::String(s)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.push_token(TABLE_USER_STRING, s.clone());
            }
            (OperandKind::InlineBrTarget, Operand::Label(l)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.push_branch(*l, false, end_of(4), start);
            }
            (OperandKind::ShortInlineBrTarget, Operand::Label(l)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.push_branch(*l, true, end_of(1), start);
            }
            (OperandKind::InlineSwitch, Operand::Labels(ls)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code
                    .extend_from_slice(&(ls.len() as u32).to_le_bytes());
                let base = end_of(4 + 4 * ls.len());
                for l in ls {
                    self.push_branch(*l, false, base, start);
                }
            }
            (OperandKind::InlineVar, Operand::Local(local)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&local.index().to_le_bytes());
            }
            (OperandKind::InlineVar, Operand::U16(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::InlineVar, Operand::I16(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::ShortInlineVar, Operand::Local(local)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.push(local.index() as u8);
            }
            (OperandKind::ShortInlineVar, Operand::U16(v)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.code.push(*v as u8);
            }
            (OperandKind::InlineField | OperandKind::InlineTok, Operand::Field(field)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.push_token(TABLE_FIELD, field_key(field));
            }
            (OperandKind::InlineMethod | OperandKind::InlineTok, Operand::Method(method)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.push_token(TABLE_MEMBER_REF, method_key(method));
            }
            (OperandKind::InlineMethod | OperandKind::InlineTok, Operand::Constructor(ctor)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.push_token(TABLE_MEMBER_REF, ctor_key(ctor));
            }
            (OperandKind::InlineType | OperandKind::InlineTok, Operand::Type(ty)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.push_token(TABLE_TYPE_REF, ty.to_string());
            }
            (OperandKind::InlineSig, Operand::Signature(sig)) => {
                self.code.extend_from_slice(opcode.encoded());
                self.push_token(TABLE_STAND_ALONE_SIG, signature_key(sig));
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }

    fn expect_kind(
        opcode: OpCode,
        expected: OperandKind,
        found: &'static str,
    ) -> Result<(), AsmError> {
        if opcode.operand_kind() == expected {
            Ok(())
        } else {
            Err(AsmError::OperandMismatch {
                opcode,
                expected: opcode.operand_kind(),
                found,
            })
        }
    }

    /// Patch branch displacements and return the finished body.
    pub fn finish(mut self) -> Result<MethodBody, AsmError> {
        if !self.blocks.is_empty() {
            return Err(AsmError::UnbalancedExceptionBlocks(self.blocks.len()));
        }
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0 as usize]
                .ok_or(AsmError::LabelNotMarked(fixup.label))?;
            let displacement = i64::from(target) - i64::from(fixup.base);
            if fixup.short {
                let d = i8::try_from(displacement).map_err(|_| AsmError::BranchOutOfRange {
                    from: fixup.from,
                    label: fixup.label,
                })?;
                self.code[fixup.at] = d as u8;
            } else {
                // Offsets are u32, so the difference always fits i32 for
                // streams under 2 GiB.
                let d = displacement as i32;
                self.code[fixup.at..fixup.at + 4].copy_from_slice(&d.to_le_bytes());
            }
        }
        Ok(MethodBody {
            code: self.code,
            locals: self.locals,
            clauses: self.clauses,
            tokens: self.tokens.order,
        })
    }
}

impl Introspect for CodeBuffer {
    fn code_offset(&self) -> u32 {
        self.offset()
    }

    fn current_locals(&self) -> LocalsView<'_> {
        LocalsView {
            count: self.locals.len() as i32,
            locals: Some(&self.locals),
        }
    }
}

impl CodeGenerator for CodeBuffer {
    type Error = AsmError;

    fn emit(&mut self, opcode: OpCode, operand: &Operand) -> Result<(), AsmError> {
        self.encode_operand(opcode, operand)
    }

    fn emit_call(
        &mut self,
        opcode: OpCode,
        method: &MethodRef,
        optional_types: Option<&[TypeRef]>,
    ) -> Result<(), AsmError> {
        Self::expect_kind(opcode, OperandKind::InlineMethod, "method")?;
        let optional = optional_types.unwrap_or_default();
        if !optional.is_empty() && !method.is_var_args() {
            return Err(AsmError::NotVarArgs(method.to_string()));
        }
        let mut key = method_key(method);
        if !optional.is_empty() {
            // A varargs call site gets its own member reference.
            key = format!("{key} [{}]", full_names(optional));
        }
        self.code.extend_from_slice(opcode.encoded());
        self.push_token(TABLE_MEMBER_REF, key);
        Ok(())
    }

    fn emit_calli(
        &mut self,
        opcode: OpCode,
        convention: CallingConvention,
        return_type: &TypeRef,
        parameter_types: &[TypeRef],
    ) -> Result<(), AsmError> {
        Self::expect_kind(opcode, OperandKind::InlineSig, "signature")?;
        let key = format!(
            "unmanaged {convention} {return_type}({})",
            full_names(parameter_types)
        );
        self.code.extend_from_slice(opcode.encoded());
        self.push_token(TABLE_STAND_ALONE_SIG, key);
        Ok(())
    }

    fn emit_calli_managed(
        &mut self,
        opcode: OpCode,
        conventions: CallingConventions,
        return_type: &TypeRef,
        parameter_types: &[TypeRef],
        optional_types: Option<&[TypeRef]>,
    ) -> Result<(), AsmError> {
        Self::expect_kind(opcode, OperandKind::InlineSig, "signature")?;
        let optional = optional_types.unwrap_or_default();
        if !optional.is_empty() && !conventions.contains(CallingConventions::VAR_ARGS) {
            return Err(AsmError::NotVarArgs(format!("calli {conventions}")));
        }
        let mut params: Vec<&str> = parameter_types.iter().map(TypeRef::full_name).collect();
        if !optional.is_empty() {
            params.push("...");
            params.extend(optional.iter().map(TypeRef::full_name));
        }
        let key = format!("{conventions} {return_type}({})", params.join(", "));
        self.code.extend_from_slice(opcode.encoded());
        self.push_token(TABLE_STAND_ALONE_SIG, key);
        Ok(())
    }

    fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    fn mark_label(&mut self, label: Label) -> Result<(), AsmError> {
        self.check_label(label)?;
        let offset = self.offset();
        let slot = &mut self.labels[label.0 as usize];
        if slot.is_some() {
            return Err(AsmError::LabelAlreadyMarked(label));
        }
        *slot = Some(offset);
        Ok(())
    }

    fn declare_local(
        &mut self,
        local_type: TypeRef,
        pinned: bool,
    ) -> Result<LocalVariable, AsmError> {
        let index = u16::try_from(self.locals.len()).map_err(|_| AsmError::TooManyLocals)?;
        let local = LocalVariable::new(index, local_type, pinned);
        self.locals.push(local.clone());
        Ok(local)
    }

    fn begin_exception_block(&mut self) -> Result<Label, AsmError> {
        let end_label = self.define_label();
        let offset = self.offset();
        self.blocks.push(ExceptionFrame {
            try_offset: offset,
            try_end: offset,
            end_label,
            region: Region::Try,
            handler_offset: offset,
        });
        Ok(end_label)
    }

    fn begin_catch_block(&mut self, catch_type: Option<&TypeRef>) -> Result<(), AsmError> {
        if let Region::Filter { filter_offset } = self.frame()?.region {
            if catch_type.is_some() {
                return Err(AsmError::CatchTypeOnFilter);
            }
            self.close_region()?;
            let offset = self.offset();
            let frame = self.frame()?;
            frame.handler_offset = offset;
            frame.region = Region::FilterHandler { filter_offset };
            return Ok(());
        }
        let catch_type = catch_type.ok_or(AsmError::MissingCatchType)?;
        self.open_handler(Region::Catch(catch_type.clone()))
    }

    fn begin_except_filter_block(&mut self) -> Result<(), AsmError> {
        if matches!(self.frame()?.region, Region::Filter { .. }) {
            return Err(AsmError::FilterWithoutHandler);
        }
        self.close_region()?;
        let offset = self.offset();
        let frame = self.frame()?;
        frame.region = Region::Filter {
            filter_offset: offset,
        };
        Ok(())
    }

    fn begin_fault_block(&mut self) -> Result<(), AsmError> {
        self.open_handler(Region::Fault)
    }

    fn begin_finally_block(&mut self) -> Result<(), AsmError> {
        self.open_handler(Region::Finally)
    }

    fn end_exception_block(&mut self) -> Result<(), AsmError> {
        match self.frame()?.region {
            Region::Try => return Err(AsmError::EmptyTryBlock),
            Region::Filter { .. } => return Err(AsmError::FilterWithoutHandler),
            _ => {}
        }
        self.close_region()?;
        if let Some(frame) = self.blocks.pop() {
            self.labels[frame.end_label.0 as usize] = Some(self.offset());
        }
        Ok(())
    }
}
