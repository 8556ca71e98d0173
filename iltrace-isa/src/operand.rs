//! Operand model: labels, locals, symbolic references and the [`Operand`]
//! union accepted by the emitter.

use std::fmt;

/// A branch target or exception-block entry point minted by the assembler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl Label {
    #[inline]
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A symbolic type reference, displayed by its full name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef {
    full_name: String,
}

impl TypeRef {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
        }
    }

    /// `System.Void`.
    pub fn void() -> Self {
        Self::new("System.Void")
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The name without its namespace, e.g. `Int32` for `System.Int32`.
    pub fn name(&self) -> &str {
        match self.full_name.rsplit_once('.') {
            Some((_, name)) if !name.is_empty() => name,
            _ => &self.full_name,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[TypeRef]) -> fmt::Result {
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(p.name())?;
    }
    Ok(())
}

bitflags::bitflags! {
    /// Managed calling convention flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CallingConventions: u8 {
        const STANDARD = 0x01;
        const VAR_ARGS = 0x02;
        const ANY = 0x03;
        const HAS_THIS = 0x20;
        const EXPLICIT_THIS = 0x40;
    }
}

impl Default for CallingConventions {
    fn default() -> Self {
        CallingConventions::STANDARD
    }
}

impl fmt::Display for CallingConventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(CallingConventions::ANY) {
            parts.push("Any");
        } else if self.contains(CallingConventions::VAR_ARGS) {
            parts.push("VarArgs");
        } else if self.contains(CallingConventions::STANDARD) {
            parts.push("Standard");
        }
        if self.contains(CallingConventions::HAS_THIS) {
            parts.push("HasThis");
        }
        if self.contains(CallingConventions::EXPLICIT_THIS) {
            parts.push("ExplicitThis");
        }
        if parts.is_empty() {
            return f.write_str("0");
        }
        f.write_str(&parts.join(", "))
    }
}

/// Unmanaged calling convention for indirect calls into native code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    Winapi = 1,
    Cdecl = 2,
    StdCall = 3,
    ThisCall = 4,
    FastCall = 5,
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallingConvention::Winapi => "Winapi",
            CallingConvention::Cdecl => "Cdecl",
            CallingConvention::StdCall => "StdCall",
            CallingConvention::ThisCall => "ThisCall",
            CallingConvention::FastCall => "FastCall",
        };
        f.write_str(s)
    }
}

/// A field reference: `<type> <name>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub declaring_type: TypeRef,
    pub name: String,
    pub field_type: TypeRef,
}

impl FieldRef {
    pub fn new(declaring_type: TypeRef, name: impl Into<String>, field_type: TypeRef) -> Self {
        Self {
            declaring_type,
            name: name.into(),
            field_type,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field_type.name(), self.name)
    }
}

/// A method reference: `<return> <name>(<params>)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub declaring_type: TypeRef,
    pub name: String,
    pub return_type: TypeRef,
    pub parameters: Vec<TypeRef>,
    pub calling_convention: CallingConventions,
}

impl MethodRef {
    pub fn new(
        declaring_type: TypeRef,
        name: impl Into<String>,
        return_type: TypeRef,
        parameters: Vec<TypeRef>,
    ) -> Self {
        Self {
            declaring_type,
            name: name.into(),
            return_type,
            parameters,
            calling_convention: CallingConventions::STANDARD,
        }
    }

    pub fn with_calling_convention(mut self, calling_convention: CallingConventions) -> Self {
        self.calling_convention = calling_convention;
        self
    }

    pub fn is_var_args(&self) -> bool {
        self.calling_convention
            .contains(CallingConventions::VAR_ARGS)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type.name(), self.name)?;
        write_params(f, &self.parameters)?;
        if self.is_var_args() {
            if !self.parameters.is_empty() {
                f.write_str(", ")?;
            }
            f.write_str("...")?;
        }
        f.write_str(")")
    }
}

/// A constructor reference: `Void .ctor(<params>)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConstructorRef {
    pub declaring_type: TypeRef,
    pub parameters: Vec<TypeRef>,
}

impl ConstructorRef {
    pub fn new(declaring_type: TypeRef, parameters: Vec<TypeRef>) -> Self {
        Self {
            declaring_type,
            parameters,
        }
    }
}

impl fmt::Display for ConstructorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Void .ctor(")?;
        write_params(f, &self.parameters)?;
        f.write_str(")")
    }
}

/// A standalone call-site signature, the operand of `calli`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallSiteSignature {
    pub calling_convention: CallingConventions,
    pub return_type: TypeRef,
    pub parameters: Vec<TypeRef>,
}

impl CallSiteSignature {
    pub fn new(
        calling_convention: CallingConventions,
        return_type: TypeRef,
        parameters: Vec<TypeRef>,
    ) -> Self {
        Self {
            calling_convention,
            return_type,
            parameters,
        }
    }
}

impl fmt::Display for CallSiteSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.calling_convention, self.return_type.name())?;
        write_params(f, &self.parameters)?;
        f.write_str(")")
    }
}

/// A local variable slot, numbered in declaration order by the assembler.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalVariable {
    index: u16,
    local_type: TypeRef,
    pinned: bool,
}

impl LocalVariable {
    pub fn new(index: u16, local_type: TypeRef, pinned: bool) -> Self {
        Self {
            index,
            local_type,
            pinned,
        }
    }

    #[inline]
    pub fn index(&self) -> u16 {
        self.index
    }

    #[inline]
    pub fn local_type(&self) -> &TypeRef {
        &self.local_type
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

/// The argument that accompanies an instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    None,
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Label(Label),
    Labels(Vec<Label>),
    Local(LocalVariable),
    Field(FieldRef),
    Method(MethodRef),
    Constructor(ConstructorRef),
    Type(TypeRef),
    Signature(CallSiteSignature),
}

impl Operand {
    /// Short name of the variant, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operand::None => "none",
            Operand::I8(_) => "int8",
            Operand::U8(_) => "uint8",
            Operand::I16(_) => "int16",
            Operand::U16(_) => "uint16",
            Operand::I32(_) => "int32",
            Operand::U32(_) => "uint32",
            Operand::I64(_) => "int64",
            Operand::U64(_) => "uint64",
            Operand::F32(_) => "float32",
            Operand::F64(_) => "float64",
            Operand::String(_) => "string",
            Operand::Label(_) => "label",
            Operand::Labels(_) => "label list",
            Operand::Local(_) => "local",
            Operand::Field(_) => "field",
            Operand::Method(_) => "method",
            Operand::Constructor(_) => "constructor",
            Operand::Type(_) => "type",
            Operand::Signature(_) => "signature",
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }
}

macro_rules! operand_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Operand {
            fn from(v: $ty) -> Self {
                Operand::$variant(v)
            }
        })*
    };
}

operand_from! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
    Label => Label,
    Vec<Label> => Labels,
    LocalVariable => Local,
    FieldRef => Field,
    MethodRef => Method,
    ConstructorRef => Constructor,
    TypeRef => Type,
    CallSiteSignature => Signature,
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::String(v.to_owned())
    }
}
