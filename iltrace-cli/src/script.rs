//! YAML emission scripts.
//!
//! A script is a flat list of steps, each tagged with `do:`. Labels and
//! locals are referred to by name; the runner maps names to the handles
//! minted by the code generator.
//!
//! ```yaml
//! name: guarded
//! steps:
//!   - do: local
//!     name: total
//!     type: System.Int32
//!   - do: try
//!   - do: emit
//!     op: ldc.i4
//!     int: 7
//!   - do: catch
//!     type: System.Exception
//!   - do: emit
//!     op: pop
//!   - do: end
//!   - do: emit
//!     op: ret
//! ```

use std::collections::HashMap;

use iltrace_emit::{Emitter, ExceptionRegion, Sink, TraceConfig};
use iltrace_isa::{
    AsmError, CallingConvention, CallingConventions, CodeBuffer, ConstructorRef, FieldRef, Label,
    LocalVariable, MethodBody, MethodRef, OpCode, Operand, OperandKind, TypeRef,
};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("invalid script: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("step {step}: unknown opcode `{name}`")]
    UnknownOpcode { step: usize, name: String },
    #[error("step {step}: label `{name}` is not defined")]
    UnknownLabel { step: usize, name: String },
    #[error("step {step}: label `{name}` is already defined")]
    DuplicateLabel { step: usize, name: String },
    #[error("step {step}: local `{name}` is not declared")]
    UnknownLocal { step: usize, name: String },
    #[error("step {step}: local `{name}` is already declared")]
    DuplicateLocal { step: usize, name: String },
    #[error("step {step}: more than one operand given for `{op}`")]
    ConflictingOperands { step: usize, op: String },
    #[error("step {step}: {value} does not fit the operand of `{op}`")]
    OutOfRange { step: usize, op: String, value: i64 },
    #[error("step {step}: unknown calling convention `{name}`")]
    UnknownConvention { step: usize, name: String },
    #[error("step {step}: {source}")]
    Asm { step: usize, source: AsmError },
    #[error(transparent)]
    Finish(AsmError),
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Script {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        Ok(serde_yaml::from_str(text)?)
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "do", rename_all = "lowercase")]
pub enum Step {
    Emit(EmitStep),
    Call {
        op: String,
        method: MethodSpec,
        #[serde(default)]
        varargs: Option<Vec<String>>,
    },
    Calli {
        op: String,
        /// Unmanaged convention; when absent the call is managed.
        #[serde(default)]
        unmanaged: Option<String>,
        #[serde(default)]
        conventions: Vec<String>,
        #[serde(default = "void_type")]
        returns: String,
        #[serde(default)]
        params: Vec<String>,
        #[serde(default)]
        varargs: Option<Vec<String>>,
    },
    Label {
        name: String,
    },
    Mark {
        name: String,
    },
    Local {
        name: String,
        #[serde(rename = "type")]
        local_type: String,
        #[serde(default)]
        pinned: bool,
    },
    Try,
    Catch {
        #[serde(rename = "type", default)]
        catch_type: Option<String>,
    },
    Filter,
    Fault,
    Finally,
    End,
}

/// An `emit` step: an opcode plus at most one operand field.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct EmitStep {
    pub op: String,
    pub int: Option<i64>,
    pub long: Option<i64>,
    pub float: Option<f32>,
    pub double: Option<f64>,
    pub string: Option<String>,
    pub target: Option<String>,
    pub targets: Option<Vec<String>>,
    pub local: Option<String>,
    pub arg: Option<u16>,
    pub field: Option<FieldSpec>,
    pub method: Option<MethodSpec>,
    pub ctor: Option<CtorSpec>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub declaring_type: String,
    pub name: String,
    pub field_type: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MethodSpec {
    #[serde(rename = "type")]
    pub declaring_type: String,
    pub name: String,
    #[serde(default = "void_type")]
    pub returns: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub varargs: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CtorSpec {
    #[serde(rename = "type")]
    pub declaring_type: String,
    #[serde(default)]
    pub params: Vec<String>,
}

fn void_type() -> String {
    TypeRef::void().full_name().to_owned()
}

fn types(names: &[String]) -> Vec<TypeRef> {
    names.iter().map(TypeRef::new).collect()
}

impl MethodSpec {
    fn to_ref(&self) -> MethodRef {
        let method = MethodRef::new(
            TypeRef::new(&self.declaring_type),
            &self.name,
            TypeRef::new(&self.returns),
            types(&self.params),
        );
        if self.varargs {
            method.with_calling_convention(CallingConventions::VAR_ARGS)
        } else {
            method
        }
    }
}

fn unmanaged_convention(step: usize, name: &str) -> Result<CallingConvention, ScriptError> {
    Ok(match name {
        "Winapi" => CallingConvention::Winapi,
        "Cdecl" => CallingConvention::Cdecl,
        "StdCall" => CallingConvention::StdCall,
        "ThisCall" => CallingConvention::ThisCall,
        "FastCall" => CallingConvention::FastCall,
        _ => {
            return Err(ScriptError::UnknownConvention {
                step,
                name: name.to_owned(),
            });
        }
    })
}

fn managed_conventions(step: usize, names: &[String]) -> Result<CallingConventions, ScriptError> {
    if names.is_empty() {
        return Ok(CallingConventions::default());
    }
    let mut flags = CallingConventions::empty();
    for name in names {
        flags |= match name.as_str() {
            "Standard" => CallingConventions::STANDARD,
            "VarArgs" => CallingConventions::VAR_ARGS,
            "Any" => CallingConventions::ANY,
            "HasThis" => CallingConventions::HAS_THIS,
            "ExplicitThis" => CallingConventions::EXPLICIT_THIS,
            _ => {
                return Err(ScriptError::UnknownConvention {
                    step,
                    name: name.clone(),
                });
            }
        };
    }
    Ok(flags)
}

/// Replays a [`Script`] through an [`Emitter`] into a [`CodeBuffer`].
pub struct Runner<S> {
    emitter: Emitter<S>,
    il: CodeBuffer,
    labels: HashMap<String, Label>,
    locals: HashMap<String, LocalVariable>,
}

impl<S: Sink> Runner<S> {
    pub fn new(config: TraceConfig<S>) -> Self {
        Self {
            emitter: Emitter::new(config),
            il: CodeBuffer::new(),
            labels: HashMap::new(),
            locals: HashMap::new(),
        }
    }

    /// Run every step, then finish the buffer.
    ///
    /// The sink comes back whether or not the run succeeded, holding the
    /// trace up to the failing step.
    pub fn run(mut self, script: &Script) -> (Result<MethodBody, ScriptError>, S) {
        let result = self.run_steps(script);
        let Runner { emitter, il, .. } = self;
        let result = result.and_then(|()| il.finish().map_err(ScriptError::Finish));
        (result, emitter.into_sink())
    }

    fn run_steps(&mut self, script: &Script) -> Result<(), ScriptError> {
        for (index, step) in script.steps.iter().enumerate() {
            // Steps are numbered from 1 in messages.
            self.step(index + 1, step)?;
        }
        Ok(())
    }

    fn step(&mut self, step: usize, action: &Step) -> Result<(), ScriptError> {
        let asm = |source| ScriptError::Asm { step, source };
        match action {
            Step::Emit(emit) => {
                let opcode = opcode(step, &emit.op)?;
                let operand = self.operand(step, opcode, emit)?;
                self.emitter
                    .emit(&mut self.il, opcode, &operand)
                    .map_err(asm)?;
            }
            Step::Call {
                op,
                method,
                varargs,
            } => {
                let opcode = opcode(step, op)?;
                let optional = varargs.as_deref().map(types);
                self.emitter
                    .emit_call(&mut self.il, opcode, &method.to_ref(), optional.as_deref())
                    .map_err(asm)?;
            }
            Step::Calli {
                op,
                unmanaged,
                conventions,
                returns,
                params,
                varargs,
            } => {
                let opcode = opcode(step, op)?;
                let return_type = TypeRef::new(returns);
                let params = types(params);
                match unmanaged {
                    Some(name) => {
                        let convention = unmanaged_convention(step, name)?;
                        self.emitter
                            .emit_calli(&mut self.il, opcode, convention, &return_type, &params)
                            .map_err(asm)?;
                    }
                    None => {
                        let conventions = managed_conventions(step, conventions)?;
                        let optional = varargs.as_deref().map(types);
                        self.emitter
                            .emit_calli_managed(
                                &mut self.il,
                                opcode,
                                conventions,
                                &return_type,
                                &params,
                                optional.as_deref(),
                            )
                            .map_err(asm)?;
                    }
                }
            }
            Step::Label { name } => {
                if self.labels.contains_key(name) {
                    return Err(ScriptError::DuplicateLabel {
                        step,
                        name: name.clone(),
                    });
                }
                let label = self.emitter.define_label(&mut self.il);
                self.labels.insert(name.clone(), label);
            }
            Step::Mark { name } => {
                let label = self.label(step, name)?;
                self.emitter.mark_label(&mut self.il, label).map_err(asm)?;
            }
            Step::Local {
                name,
                local_type,
                pinned,
            } => {
                if self.locals.contains_key(name) {
                    return Err(ScriptError::DuplicateLocal {
                        step,
                        name: name.clone(),
                    });
                }
                let local = self
                    .emitter
                    .declare_local(&mut self.il, TypeRef::new(local_type), *pinned)
                    .map_err(asm)?;
                self.locals.insert(name.clone(), local);
            }
            Step::Try => self.enter(step, ExceptionRegion::Try)?,
            Step::Catch { catch_type } => self.enter(
                step,
                ExceptionRegion::Catch(catch_type.as_ref().map(TypeRef::new)),
            )?,
            Step::Filter => self.enter(step, ExceptionRegion::Filter)?,
            Step::Fault => self.enter(step, ExceptionRegion::Fault)?,
            Step::Finally => self.enter(step, ExceptionRegion::Finally)?,
            Step::End => {
                self.emitter
                    .exit_region(&mut self.il, &ExceptionRegion::EndRegion)
                    .map_err(asm)?;
            }
        }
        Ok(())
    }

    fn enter(&mut self, step: usize, region: ExceptionRegion) -> Result<(), ScriptError> {
        self.emitter
            .enter_region(&mut self.il, &region)
            .map(drop)
            .map_err(|source| ScriptError::Asm { step, source })
    }

    fn label(&self, step: usize, name: &str) -> Result<Label, ScriptError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| ScriptError::UnknownLabel {
                step,
                name: name.to_owned(),
            })
    }

    /// Pick the operand variant the opcode's operand kind takes.
    fn operand(
        &self,
        step: usize,
        opcode: OpCode,
        emit: &EmitStep,
    ) -> Result<Operand, ScriptError> {
        let given = [
            emit.int.is_some(),
            emit.long.is_some(),
            emit.float.is_some(),
            emit.double.is_some(),
            emit.string.is_some(),
            emit.target.is_some(),
            emit.targets.is_some(),
            emit.local.is_some(),
            emit.arg.is_some(),
            emit.field.is_some(),
            emit.method.is_some(),
            emit.ctor.is_some(),
            emit.type_name.is_some(),
        ];
        if given.iter().filter(|&&g| g).count() > 1 {
            return Err(ScriptError::ConflictingOperands {
                step,
                op: emit.op.clone(),
            });
        }
        let kind = opcode.operand_kind();
        let out_of_range = |value| ScriptError::OutOfRange {
            step,
            op: emit.op.clone(),
            value,
        };

        if let Some(value) = emit.int {
            return Ok(match kind {
                OperandKind::ShortInlineI => {
                    Operand::I8(i8::try_from(value).map_err(|_| out_of_range(value))?)
                }
                _ => Operand::I32(i32::try_from(value).map_err(|_| out_of_range(value))?),
            });
        }
        if let Some(value) = emit.long {
            return Ok(Operand::I64(value));
        }
        if let Some(value) = emit.float {
            return Ok(Operand::F32(value));
        }
        if let Some(value) = emit.double {
            return Ok(Operand::F64(value));
        }
        if let Some(s) = &emit.string {
            return Ok(Operand::String(s.clone()));
        }
        if let Some(name) = &emit.target {
            return Ok(Operand::Label(self.label(step, name)?));
        }
        if let Some(names) = &emit.targets {
            let labels = names
                .iter()
                .map(|name| self.label(step, name))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Operand::Labels(labels));
        }
        if let Some(name) = &emit.local {
            let local = self
                .locals
                .get(name)
                .cloned()
                .ok_or_else(|| ScriptError::UnknownLocal {
                    step,
                    name: name.clone(),
                })?;
            return Ok(Operand::Local(local));
        }
        if let Some(index) = emit.arg {
            return Ok(match kind {
                OperandKind::ShortInlineVar => Operand::U8(
                    u8::try_from(index).map_err(|_| out_of_range(i64::from(index)))?,
                ),
                _ => Operand::U16(index),
            });
        }
        if let Some(field) = &emit.field {
            return Ok(Operand::Field(FieldRef::new(
                TypeRef::new(&field.declaring_type),
                &field.name,
                TypeRef::new(&field.field_type),
            )));
        }
        if let Some(method) = &emit.method {
            return Ok(Operand::Method(method.to_ref()));
        }
        if let Some(ctor) = &emit.ctor {
            return Ok(Operand::Constructor(ConstructorRef::new(
                TypeRef::new(&ctor.declaring_type),
                types(&ctor.params),
            )));
        }
        if let Some(name) = &emit.type_name {
            return Ok(Operand::Type(TypeRef::new(name)));
        }
        Ok(Operand::None)
    }
}

fn opcode(step: usize, name: &str) -> Result<OpCode, ScriptError> {
    OpCode::from_mnemonic(name).ok_or_else(|| ScriptError::UnknownOpcode {
        step,
        name: name.to_owned(),
    })
}
