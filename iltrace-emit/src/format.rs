//! Operand and trace-line rendering.

use std::fmt;

use iltrace_isa::{Label, OpCode, Operand, TypeRef};

/// Stand-in operand for a `leave` the assembler inserts on its own.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeaveTry;

impl fmt::Display for LeaveTry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(autogenerated)")
    }
}

/// Offset tag that starts every instruction line, e.g. `L_002a: `.
pub fn code_pos(offset: u32) -> String {
    format!("L_{offset:04x}: ")
}

/// Default rendering: the value's `Display` output, whitespace-trimmed.
pub fn format_display<T: fmt::Display + ?Sized>(value: &T) -> String {
    value.to_string().trim().to_owned()
}

pub fn format_label(label: Label) -> String {
    format!("Label{}", label.id())
}

/// Render an operand. Never fails; unknown shapes fall back to
/// [`format_display`].
pub fn format_operand(operand: &Operand) -> String {
    match operand {
        Operand::None => "NULL".to_owned(),
        Operand::String(s) => format!("\"{s}\""),
        Operand::Label(label) => format_label(*label),
        Operand::Labels(labels) => {
            let ids: Vec<String> = labels.iter().map(|l| l.id().to_string()).collect();
            format!("Labels{}", ids.join(","))
        }
        Operand::Local(local) => format!("{} ({})", local.index(), local.local_type()),
        Operand::I8(v) => format_display(v),
        Operand::U8(v) => format_display(v),
        Operand::I16(v) => format_display(v),
        Operand::U16(v) => format_display(v),
        Operand::I32(v) => format_display(v),
        Operand::U32(v) => format_display(v),
        Operand::I64(v) => format_display(v),
        Operand::U64(v) => format_display(v),
        Operand::F32(v) => format_display(v),
        Operand::F64(v) => format_display(v),
        Operand::Field(field) => format_display(field),
        Operand::Method(method) => format_display(method),
        Operand::Constructor(ctor) => format_display(ctor),
        Operand::Type(ty) => format_display(ty),
        Operand::Signature(sig) => format_display(sig),
    }
}

/// Render a type list as `[A, B]`.
pub fn format_types(types: &[TypeRef]) -> String {
    let names: Vec<&str> = types.iter().map(TypeRef::full_name).collect();
    format!("[{}]", names.join(", "))
}

/// Like [`format_types`], with `NULL` for an absent list.
pub fn format_optional_types(types: Option<&[TypeRef]>) -> String {
    types.map_or_else(|| "NULL".to_owned(), format_types)
}

/// `offset-tag + mnemonic`, followed by one space and `argument` when the
/// argument is non-empty.
pub fn trace_line(offset: u32, opcode: OpCode, argument: &str) -> String {
    let space = if argument.is_empty() { "" } else { " " };
    format!("{}{opcode}{space}{argument}", code_pos(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use iltrace_isa::{
        CallSiteSignature, CallingConventions, ConstructorRef, FieldRef, LocalVariable,
        MethodRef, opcodes,
    };

    #[test]
    fn none_is_null() {
        assert_eq!(format_operand(&Operand::None), "NULL");
    }

    #[test]
    fn strings_are_quoted_verbatim() {
        assert_eq!(format_operand(&Operand::from("abc")), "\"abc\"");
        assert_eq!(format_operand(&Operand::from("a\"b")), "\"a\"b\"");
        assert_eq!(format_operand(&Operand::from("  x ")), "\"  x \"");
    }

    #[test]
    fn locals_show_ordinal_and_type() {
        let local = LocalVariable::new(2, TypeRef::new("Int32"), false);
        assert_eq!(format_operand(&Operand::Local(local)), "2 (Int32)");
        let pinned = LocalVariable::new(0, TypeRef::new("System.Byte*"), true);
        assert_eq!(format_operand(&Operand::Local(pinned)), "0 (System.Byte*)");
    }

    #[test]
    fn labels() {
        assert_eq!(format_operand(&Operand::Label(Label(3))), "Label3");
        assert_eq!(
            format_operand(&Operand::Labels(vec![Label(0), Label(4), Label(1)])),
            "Labels0,4,1"
        );
        assert_eq!(format_operand(&Operand::Labels(vec![])), "Labels");
    }

    #[test]
    fn numbers_use_default_rendering() {
        assert_eq!(format_operand(&Operand::I8(-5)), "-5");
        assert_eq!(format_operand(&Operand::U64(u64::MAX)), "18446744073709551615");
        assert_eq!(format_operand(&Operand::F32(1.5)), "1.5");
        assert_eq!(format_operand(&Operand::F64(-0.25)), "-0.25");
    }

    #[test]
    fn references_use_display() {
        let string = TypeRef::new("System.String");
        let demo = TypeRef::new("Demo.Widget");
        assert_eq!(format_operand(&Operand::Type(string.clone())), "System.String");
        assert_eq!(
            format_operand(&Operand::Field(FieldRef::new(demo.clone(), "name", string.clone()))),
            "String name"
        );
        assert_eq!(
            format_operand(&Operand::Method(MethodRef::new(
                demo.clone(),
                "Run",
                TypeRef::void(),
                vec![string.clone(), TypeRef::new("System.Int32")],
            ))),
            "Void Run(String, Int32)"
        );
        assert_eq!(
            format_operand(&Operand::Constructor(ConstructorRef::new(demo, vec![]))),
            "Void .ctor()"
        );
        assert_eq!(
            format_operand(&Operand::Signature(CallSiteSignature::new(
                CallingConventions::HAS_THIS | CallingConventions::STANDARD,
                string,
                vec![],
            ))),
            "Standard, HasThis String()"
        );
    }

    #[test]
    fn default_rendering_is_trimmed() {
        assert_eq!(format_display(&TypeRef::new("  Padded.Type \n")), "Padded.Type");
        assert_eq!(format_display(&LeaveTry), "(autogenerated)");
    }

    #[test]
    fn offset_tag() {
        assert_eq!(code_pos(0x2A), "L_002a: ");
        assert_eq!(code_pos(0), "L_0000: ");
        assert_eq!(code_pos(0x12345), "L_12345: ");
    }

    #[test]
    fn trace_lines() {
        assert_eq!(trace_line(0, opcodes::LDC_I4, "7"), "L_0000: ldc.i4 7");
        assert_eq!(trace_line(2, opcodes::RET, ""), "L_0002: ret");
        assert_eq!(
            trace_line(0x10, opcodes::LEAVE, &format_display(&LeaveTry)),
            "L_0010: leave (autogenerated)"
        );
    }

    #[test]
    fn type_lists() {
        let types = [TypeRef::new("System.Int32"), TypeRef::new("System.String")];
        assert_eq!(format_types(&types), "[System.Int32, System.String]");
        assert_eq!(format_optional_types(None), "NULL");
        assert_eq!(format_optional_types(Some(&[])), "[]");
    }
}
