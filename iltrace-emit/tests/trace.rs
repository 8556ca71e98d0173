mod common;

use common::{Call, Recorder, Refused, exception_type};
use iltrace_emit::*;
use iltrace_isa::*;

fn traced() -> Emitter<MemorySink> {
    Emitter::new(TraceConfig::enabled(MemorySink::new()))
}

fn string_type() -> TypeRef {
    TypeRef::new("System.String")
}

#[test]
fn instructions_are_traced_then_forwarded() {
    let mut il = Recorder::new();
    let mut emitter = traced();
    emitter.emit(&mut il, opcodes::LDC_I4, &Operand::I32(7)).unwrap();
    il.offset = 2;
    emitter.emit(&mut il, opcodes::RET, &Operand::None).unwrap();

    assert_eq!(emitter.sink().lines(), ["L_0000: ldc.i4 7", "L_0002: ret"]);
    assert_eq!(
        il.calls,
        [
            Call::Emit(opcodes::LDC_I4, Operand::I32(7)),
            Call::Emit(opcodes::RET, Operand::None),
        ]
    );
}

#[test]
fn operands_use_the_formatter() {
    let mut il = Recorder::at(0x1f);
    let mut emitter = traced();
    emitter.emit(&mut il, opcodes::LDSTR, &Operand::from("hi")).unwrap();
    emitter
        .emit(&mut il, opcodes::SWITCH, &Operand::Labels(vec![Label(0), Label(2)]))
        .unwrap();
    let local = LocalVariable::new(1, TypeRef::new("Int32"), false);
    emitter.emit(&mut il, opcodes::STLOC_S, &Operand::Local(local)).unwrap();

    assert_eq!(
        emitter.sink().lines(),
        [
            "L_001f: ldstr \"hi\"",
            "L_001f: switch Labels0,2",
            "L_001f: stloc.s 1 (Int32)",
        ]
    );
}

#[test]
fn disabled_tracing_forwards_identically() {
    let body = |emitter: &mut Emitter<MemorySink>, il: &mut Recorder| -> Result<(), Refused> {
        emitter.enter_region(il, &ExceptionRegion::Try)?;
        emitter.emit(il, opcodes::NOP, &Operand::None)?;
        let label = emitter.define_label(il);
        emitter.mark_label(il, label)?;
        emitter.declare_local(il, string_type(), false)?;
        emitter.enter_region(il, &ExceptionRegion::Finally)?;
        emitter.exit_region(il, &ExceptionRegion::EndRegion)
    };

    let mut on = traced();
    let mut il_on = Recorder::new();
    body(&mut on, &mut il_on).unwrap();

    let mut off = Emitter::new(TraceConfig::new(false, MemorySink::new()));
    let mut il_off = Recorder::new();
    body(&mut off, &mut il_off).unwrap();

    assert_eq!(il_on.calls, il_off.calls);
    assert!(!on.sink().lines().is_empty());
    assert!(off.sink().lines().is_empty());
    assert_eq!(off.sink().level(), 0);
}

#[test]
fn errors_propagate_unchanged() {
    let mut il = Recorder::new();
    let mut emitter = traced();

    il.fail_with = Some(Refused("bad opcode"));
    assert_eq!(
        emitter.emit(&mut il, opcodes::NOP, &Operand::None),
        Err(Refused("bad opcode"))
    );

    il.fail_with = Some(Refused("no block"));
    assert_eq!(
        emitter.enter_region(&mut il, &ExceptionRegion::Try),
        Err(Refused("no block"))
    );

    il.fail_with = Some(Refused("no local"));
    assert_eq!(
        emitter.declare_local(&mut il, string_type(), false),
        Err(Refused("no local"))
    );
    // The failed declaration is never traced.
    assert!(!emitter.sink().lines().iter().any(|l| l.contains("Local var")));
}

#[test]
fn try_catch_framing() {
    let mut il = Recorder::new();
    let mut emitter = traced();

    let end = emitter.enter_region(&mut il, &ExceptionRegion::Try).unwrap();
    assert_eq!(end, Some(Label(0)));
    emitter.emit(&mut il, opcodes::NOP, &Operand::None).unwrap();
    il.offset = 1;
    let none = emitter
        .enter_region(&mut il, &ExceptionRegion::Catch(Some(exception_type())))
        .unwrap();
    assert_eq!(none, None);
    il.offset = 6;
    emitter.emit(&mut il, opcodes::POP, &Operand::None).unwrap();
    il.offset = 7;
    emitter.exit_region(&mut il, &ExceptionRegion::EndRegion).unwrap();

    assert_eq!(
        emitter.sink().lines(),
        [
            ".try",
            "{",
            "\tL_0000: nop",
            "\tL_0001: leave (autogenerated)",
            "} // end try",
            ".catch System.Exception",
            "{",
            "\tL_0006: pop",
            "\tL_0007: leave (autogenerated)",
            "} // end handler",
        ]
    );
    assert_eq!(emitter.sink().level(), 0);
    assert_eq!(
        il.calls,
        [
            Call::BeginTry,
            Call::Emit(opcodes::NOP, Operand::None),
            Call::BeginCatch(Some(exception_type())),
            Call::Emit(opcodes::POP, Operand::None),
            Call::EndBlock,
        ]
    );
}

#[test]
fn handler_markers() {
    let mut il = Recorder::new();
    let mut emitter = traced();
    emitter.enter_region(&mut il, &ExceptionRegion::Try).unwrap();
    emitter.enter_region(&mut il, &ExceptionRegion::Filter).unwrap();
    emitter.enter_region(&mut il, &ExceptionRegion::Catch(None)).unwrap();
    emitter.exit_region(&mut il, &ExceptionRegion::EndRegion).unwrap();
    emitter.enter_region(&mut il, &ExceptionRegion::Try).unwrap();
    emitter.enter_region(&mut il, &ExceptionRegion::Fault).unwrap();
    emitter.exit_region(&mut il, &ExceptionRegion::EndRegion).unwrap();

    let markers: Vec<&str> = emitter
        .sink()
        .lines()
        .iter()
        .map(String::as_str)
        .filter(|l| l.starts_with('.'))
        .collect();
    assert_eq!(markers, [".try", ".filter", ".catch", ".try", ".fault"]);
    assert_eq!(
        il.calls,
        [
            Call::BeginTry,
            Call::BeginFilter,
            Call::BeginCatch(None),
            Call::EndBlock,
            Call::BeginTry,
            Call::BeginFault,
            Call::EndBlock,
        ]
    );
}

#[test]
fn nested_regions_indent_by_depth() {
    let mut il = Recorder::new();
    let mut emitter = traced();
    emitter.enter_region(&mut il, &ExceptionRegion::Try).unwrap();
    emitter.enter_region(&mut il, &ExceptionRegion::Try).unwrap();
    emitter.emit(&mut il, opcodes::NOP, &Operand::None).unwrap();
    assert_eq!(emitter.sink().level(), 2);
    emitter.enter_region(&mut il, &ExceptionRegion::Finally).unwrap();
    emitter.exit_region(&mut il, &ExceptionRegion::EndRegion).unwrap();
    assert_eq!(emitter.sink().level(), 1);
    emitter.enter_region(&mut il, &ExceptionRegion::Finally).unwrap();
    emitter.exit_region(&mut il, &ExceptionRegion::EndRegion).unwrap();
    assert_eq!(emitter.sink().level(), 0);

    let lines = emitter.sink().lines();
    assert_eq!(lines[2], "\t.try");
    assert_eq!(lines[4], "\t\tL_0000: nop");
    assert_eq!(lines.last().map(String::as_str), Some("} // end handler"));
}

#[test]
fn end_region_on_enter_and_handlers_on_exit_do_nothing() {
    let mut il = Recorder::new();
    let mut emitter = traced();
    assert_eq!(
        emitter.enter_region(&mut il, &ExceptionRegion::EndRegion),
        Ok(None)
    );
    for region in [
        ExceptionRegion::Try,
        ExceptionRegion::Catch(Some(exception_type())),
        ExceptionRegion::Filter,
        ExceptionRegion::Fault,
        ExceptionRegion::Finally,
    ] {
        assert_eq!(emitter.exit_region(&mut il, &region), Ok(()));
    }
    assert!(il.calls.is_empty());
    assert!(emitter.sink().lines().is_empty());
}

#[test]
fn labels() {
    let mut il = Recorder::at(0x10);
    let mut emitter = traced();
    let first = emitter.define_label(&mut il);
    let second = emitter.define_label(&mut il);
    assert_eq!((first, second), (Label(0), Label(1)));
    emitter.mark_label(&mut il, second).unwrap();
    emitter.emit(&mut il, opcodes::BR, &Operand::Label(second)).unwrap();

    assert_eq!(emitter.sink().lines(), ["L_0010: Label1", "L_0010: br Label1"]);
    assert_eq!(
        il.calls,
        [
            Call::DefineLabel,
            Call::DefineLabel,
            Call::MarkLabel(Label(1)),
            Call::Emit(opcodes::BR, Operand::Label(Label(1))),
        ]
    );
}

#[test]
fn locals_use_array_length() {
    let mut il = Recorder::new();
    let mut emitter = traced();
    emitter.declare_local(&mut il, TypeRef::new("System.Int32"), false).unwrap();
    let pinned = emitter
        .declare_local(&mut il, TypeRef::new("System.Byte*"), true)
        .unwrap();
    assert_eq!(pinned.index(), 1);
    assert_eq!(
        emitter.sink().lines(),
        [
            "L_0000: Local var 0: System.Int32",
            "L_0000: Local var 1: System.Byte*(pinned)",
        ]
    );
}

#[test]
fn locals_fall_back_to_raw_count() {
    let mut il = Recorder::new();
    il.count_only = true;
    il.raw_count = 4;
    let mut emitter = traced();
    emitter.declare_local(&mut il, string_type(), false).unwrap();
    assert_eq!(emitter.sink().lines(), ["L_0000: Local var 4: System.String"]);
}

#[test]
fn external_locals_can_be_logged() {
    let mut il = Recorder::at(3);
    il.raw_count = 1;
    il.count_only = true;
    let mut emitter = traced();
    let local = LocalVariable::new(0, string_type(), true);
    emitter.log_local_variable(&il, &local);
    assert_eq!(emitter.sink().lines(), ["L_0003: Local var 0: System.String(pinned)"]);
    assert!(il.calls.is_empty());
}

#[test]
fn out_of_range_raw_count_wraps() {
    let mut il = Recorder::new();
    il.count_only = true;
    il.raw_count = i32::MIN;
    let mut emitter = traced();
    let local = LocalVariable::new(0, string_type(), false);
    emitter.log_local_variable(&il, &local);
    il.raw_count = 0;
    emitter.log_local_variable(&il, &local);
    assert_eq!(
        emitter.sink().lines(),
        [
            "L_0000: Local var 2147483647: System.String",
            "L_0000: Local var -1: System.String",
        ]
    );
}

#[test]
fn calls() {
    let mut il = Recorder::at(0x20);
    let mut emitter = traced();
    let method = MethodRef::new(
        TypeRef::new("Demo.Console"),
        "Write",
        TypeRef::void(),
        vec![string_type()],
    )
    .with_calling_convention(CallingConventions::VAR_ARGS);
    let extra = [TypeRef::new("System.Int32")];

    emitter.emit_call(&mut il, opcodes::CALL, &method, Some(&extra)).unwrap();
    emitter.emit_call(&mut il, opcodes::CALL, &method, None).unwrap();
    emitter
        .emit_calli(
            &mut il,
            opcodes::CALLI,
            CallingConvention::StdCall,
            &TypeRef::new("System.Int32"),
            &[TypeRef::new("System.IntPtr"), string_type()],
        )
        .unwrap();
    emitter
        .emit_calli_managed(
            &mut il,
            opcodes::CALLI,
            CallingConventions::STANDARD | CallingConventions::HAS_THIS,
            &TypeRef::void(),
            &[],
            None,
        )
        .unwrap();

    assert_eq!(
        emitter.sink().lines(),
        [
            "L_0020: Call call Void Write(String, ...) [System.Int32]",
            "L_0020: Call call Void Write(String, ...) NULL",
            "L_0020: Calli calli StdCall System.Int32 [System.IntPtr, System.String]",
            "L_0020: Calli calli Standard, HasThis System.Void [] NULL",
        ]
    );
    assert_eq!(il.calls.len(), 4);
    assert_eq!(
        il.calls[0],
        Call::EmitCall(
            opcodes::CALL,
            "Void Write(String, ...)".to_owned(),
            Some(extra.to_vec())
        )
    );
}

#[test]
fn tracing_can_be_toggled() {
    let mut il = Recorder::new();
    let mut emitter = traced();
    assert!(emitter.is_tracing());
    emitter.set_tracing(false);
    emitter.emit(&mut il, opcodes::NOP, &Operand::None).unwrap();
    emitter.set_tracing(true);
    emitter.emit(&mut il, opcodes::RET, &Operand::None).unwrap();
    assert_eq!(emitter.into_sink().into_lines(), ["L_0000: ret"]);
    assert_eq!(il.calls.len(), 2);
}

#[test]
fn borrowed_sink_stays_with_caller() {
    let mut sink = MemorySink::new();
    {
        let mut il = Recorder::new();
        let mut emitter = Emitter::new(TraceConfig::enabled(&mut sink));
        emitter.emit(&mut il, opcodes::NOP, &Operand::None).unwrap();
    }
    assert_eq!(sink.lines(), ["L_0000: nop"]);
}
