//! Glue between the four pipeline stages — lex, parse, compile, run — plus
//! the recursive module loader `IMPORT` hands off to.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::binary::Binary;
use crate::error::Result;
use crate::front;
use crate::value::ModuleHandle;
use crate::vm::Vm;
use crate::RillError;

/// Lex, parse, and compile a single source string into a [`Binary`]. Does
/// not execute it.
pub fn compile_source(source: &str, file: &str) -> Result<Binary> {
    let program = front::parse(file, source)?;
    crate::compiler::compile(&program, file, source)
}

/// Compile and run a top-level source file, writing `print` output to `out`.
pub fn run_file(path: &Path, out: &mut dyn Write) -> Result<()> {
    let source = std::fs::read_to_string(path)?;
    let file = path.to_string_lossy().into_owned();
    let binary = compile_source(&source, &file)?;
    let base_dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    // Seed the cycle guard with the top-level file itself, so a script that
    // imports its own path is caught the same way a nested self-import
    // would be, instead of recursing until the stack overflows.
    let mut imports = HashSet::new();
    if let Ok(canonical) = path.canonicalize() {
        imports.insert(canonical);
    }

    let mut vm = Vm::with_imports(binary, out, base_dir, imports);
    vm.run()
}

/// Resolve, compile, and run an imported module, returning it as a
/// [`ModuleHandle`] plus the (possibly further-extended) in-flight import
/// set, threaded through by value since a nested import may itself recurse.
///
/// `imports` tracks paths currently being compiled, not paths already
/// finished — it is a cycle guard, not a cache, so a diamond (non-cyclic)
/// re-import of the same module from two different sites is allowed.
pub fn import_module(
    path: &str,
    base_dir: &Path,
    mut imports: HashSet<PathBuf>,
    out: &mut dyn Write,
) -> Result<(ModuleHandle, HashSet<PathBuf>)> {
    let mut full_path = base_dir.join(path);
    if full_path.extension().is_none() {
        full_path.set_extension("rill");
    }
    let canonical = full_path.canonicalize().unwrap_or_else(|_| full_path.clone());

    if imports.contains(&canonical) {
        return Err(RillError::Runtime(format!("cyclic import of '{path}'")));
    }
    imports.insert(canonical.clone());

    let source = std::fs::read_to_string(&full_path)?;
    let file = full_path.to_string_lossy().into_owned();
    let binary = compile_source(&source, &file)?;
    let exports = binary.symbols.clone();

    let module_name = full_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    let module_base_dir = full_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut vm = Vm::with_imports(binary, out, module_base_dir, imports);
    vm.run()?;
    let (data, mut imports) = vm.into_parts();
    imports.remove(&canonical);

    Ok((
        ModuleHandle {
            name: crate::common::Id::new(module_name),
            exports,
            data,
        },
        imports,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_source_rejects_arity_mismatches() {
        let err = compile_source("fn add(a, b) { return a + b }\nadd(1)", "<test>").unwrap_err();
        assert!(matches!(err, RillError::Semantic(_)));
    }

    #[test]
    fn run_file_reports_io_errors_for_missing_paths() {
        let mut out = Vec::new();
        let err = run_file(Path::new("/nonexistent/path/does/not/exist.rill"), &mut out).unwrap_err();
        assert!(matches!(err, RillError::Io(_)));
    }
}
