use iltrace_isa::*;

/// One forwarded call as seen by [`Recorder`].
#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Emit(OpCode, Operand),
    EmitCall(OpCode, String, Option<Vec<TypeRef>>),
    EmitCalli(OpCode, CallingConvention, TypeRef, Vec<TypeRef>),
    EmitCalliManaged(OpCode, CallingConventions, TypeRef, Vec<TypeRef>, Option<Vec<TypeRef>>),
    DefineLabel,
    MarkLabel(Label),
    DeclareLocal(TypeRef, bool),
    BeginTry,
    BeginCatch(Option<TypeRef>),
    BeginFilter,
    BeginFault,
    BeginFinally,
    EndBlock,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Refused(pub &'static str);

/// Code generator that records every call instead of assembling.
///
/// The offset is whatever the test sets. Locals are reported either as an
/// array or as a bare count.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct Recorder {
    pub calls: Vec<Call>,
    pub offset: u32,
    pub locals: Vec<LocalVariable>,
    /// Report only `raw_count`, without the locals array.
    pub count_only: bool,
    pub raw_count: i32,
    /// Fail the next call with this error.
    pub fail_with: Option<Refused>,
    next_label: u32,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(offset: u32) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    fn mint_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn record(&mut self, call: Call) -> Result<(), Refused> {
        self.calls.push(call);
        match self.fail_with.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Introspect for Recorder {
    fn code_offset(&self) -> u32 {
        self.offset
    }

    fn current_locals(&self) -> LocalsView<'_> {
        LocalsView {
            count: self.raw_count,
            locals: (!self.count_only).then_some(self.locals.as_slice()),
        }
    }
}

impl CodeGenerator for Recorder {
    type Error = Refused;

    fn emit(&mut self, opcode: OpCode, operand: &Operand) -> Result<(), Refused> {
        self.record(Call::Emit(opcode, operand.clone()))
    }

    fn emit_call(
        &mut self,
        opcode: OpCode,
        method: &MethodRef,
        optional_types: Option<&[TypeRef]>,
    ) -> Result<(), Refused> {
        self.record(Call::EmitCall(
            opcode,
            method.to_string(),
            optional_types.map(<[TypeRef]>::to_vec),
        ))
    }

    fn emit_calli(
        &mut self,
        opcode: OpCode,
        convention: CallingConvention,
        return_type: &TypeRef,
        parameter_types: &[TypeRef],
    ) -> Result<(), Refused> {
        self.record(Call::EmitCalli(
            opcode,
            convention,
            return_type.clone(),
            parameter_types.to_vec(),
        ))
    }

    fn emit_calli_managed(
        &mut self,
        opcode: OpCode,
        conventions: CallingConventions,
        return_type: &TypeRef,
        parameter_types: &[TypeRef],
        optional_types: Option<&[TypeRef]>,
    ) -> Result<(), Refused> {
        self.record(Call::EmitCalliManaged(
            opcode,
            conventions,
            return_type.clone(),
            parameter_types.to_vec(),
            optional_types.map(<[TypeRef]>::to_vec),
        ))
    }

    fn define_label(&mut self) -> Label {
        self.calls.push(Call::DefineLabel);
        self.mint_label()
    }

    fn mark_label(&mut self, label: Label) -> Result<(), Refused> {
        self.record(Call::MarkLabel(label))
    }

    fn declare_local(
        &mut self,
        local_type: TypeRef,
        pinned: bool,
    ) -> Result<LocalVariable, Refused> {
        self.record(Call::DeclareLocal(local_type.clone(), pinned))?;
        let index = u16::try_from(self.locals.len()).map_err(|_| Refused("too many locals"))?;
        let local = LocalVariable::new(index, local_type, pinned);
        self.locals.push(local.clone());
        self.raw_count += 1;
        Ok(local)
    }

    fn begin_exception_block(&mut self) -> Result<Label, Refused> {
        self.record(Call::BeginTry)?;
        Ok(self.mint_label())
    }

    fn begin_catch_block(&mut self, catch_type: Option<&TypeRef>) -> Result<(), Refused> {
        self.record(Call::BeginCatch(catch_type.cloned()))
    }

    fn begin_except_filter_block(&mut self) -> Result<(), Refused> {
        self.record(Call::BeginFilter)
    }

    fn begin_fault_block(&mut self) -> Result<(), Refused> {
        self.record(Call::BeginFault)
    }

    fn begin_finally_block(&mut self) -> Result<(), Refused> {
        self.record(Call::BeginFinally)
    }

    fn end_exception_block(&mut self) -> Result<(), Refused> {
        self.record(Call::EndBlock)
    }
}

#[allow(dead_code)]
pub fn exception_type() -> TypeRef {
    TypeRef::new("System.Exception")
}
