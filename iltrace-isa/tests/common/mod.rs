use iltrace_isa::*;

/// Run `body` against a fresh [`CodeBuffer`] and finish it.
pub fn assemble(body: impl FnOnce(&mut CodeBuffer) -> Result<(), AsmError>) -> MethodBody {
    let mut il = CodeBuffer::new();
    body(&mut il).unwrap();
    il.finish().unwrap()
}

/// Like [`assemble`], but return the error raised while emitting or finishing.
#[allow(dead_code)]
pub fn assemble_err(body: impl FnOnce(&mut CodeBuffer) -> Result<(), AsmError>) -> AsmError {
    let mut il = CodeBuffer::new();
    match body(&mut il) {
        Err(e) => e,
        Ok(()) => il.finish().unwrap_err(),
    }
}

#[allow(dead_code)]
pub fn exception_type() -> TypeRef {
    TypeRef::new("System.Exception")
}
