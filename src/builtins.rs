//! The built-in dispatch table invoked by `CALL_DYNAMIC`.
//!
//! spec.md §4.2's built-in ABI ("reads `$0` for arg count, pops arguments
//! left-to-right, pushes exactly one result") is symbol-resolution flavor:
//! the original looks up `builtin__<name>` via a platform dynamic loader.
//! This process never links against itself, so the idiomatic-Rust reading is
//! an in-process registry — a `HashMap` from name to function pointer,
//! populated once at VM construction — rather than `dlsym`. The individual
//! built-ins (`print`, `time`, `tuple`, `range`, `iter`, `type`, `int`,
//! `string`) are grounded on `original_source/src/lang/builtins.c`'s
//! `builtin__print`/`builtin__time`/etc; `__module_get` has no counterpart
//! there — it backs `compiler::codegen`'s lowering of member access and is a
//! supplemental addition (see DESIGN.md).

use std::collections::HashMap;
use std::io::Write;

use crate::error::{RillError, Result};
use crate::value::Value;
use crate::vm::Vm;

/// A built-in reads its argument count from `$0` (passed explicitly here
/// rather than re-read from the register, since the caller already decoded
/// it to dispatch), pops that many values left-to-right off the evaluation
/// stack, and pushes exactly one result.
pub type BuiltinFn = fn(&mut Vm<'_>, usize) -> Result<()>;

pub struct BuiltinTable(HashMap<&'static str, BuiltinFn>);

impl BuiltinTable {
    pub fn new() -> Self {
        let mut table: HashMap<&'static str, BuiltinFn> = HashMap::new();
        table.insert("print", builtin_print);
        table.insert("time", builtin_time);
        table.insert("tuple", builtin_tuple);
        table.insert("range", builtin_range);
        table.insert("iter", builtin_iter);
        table.insert("type", builtin_type);
        table.insert("int", builtin_int);
        table.insert("string", builtin_string);
        table.insert("__module_get", builtin_module_get);
        BuiltinTable(table)
    }

    pub fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.0.get(name).copied()
    }
}

impl Default for BuiltinTable {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_arity(name: &str, nargs: usize, expected: usize) -> Result<()> {
    if nargs != expected {
        Err(RillError::Runtime(format!(
            "'{name}' expects {expected} argument(s), found {nargs}"
        )))
    } else {
        Ok(())
    }
}

fn builtin_print(vm: &mut Vm<'_>, nargs: usize) -> Result<()> {
    expect_arity("print", nargs, 1)?;
    let value = vm.pop_stack()?;
    writeln!(vm.out, "{value}").map_err(RillError::Io)?;
    vm.push_stack(Value::Bool(true));
    Ok(())
}

fn builtin_time(vm: &mut Vm<'_>, nargs: usize) -> Result<()> {
    expect_arity("time", nargs, 0)?;
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| RillError::Runtime(format!("system clock error: {e}")))?
        .as_secs();
    vm.push_stack(Value::Int(secs as i32));
    Ok(())
}

fn builtin_tuple(vm: &mut Vm<'_>, nargs: usize) -> Result<()> {
    let mut items = Vec::with_capacity(nargs);
    for _ in 0..nargs {
        items.push(vm.pop_stack()?);
    }
    vm.push_stack(Value::tuple(items));
    Ok(())
}

/// Materializes an inclusive `begin..end` range as a tuple of ints —
/// scenario 5's `1..3` must print `1`, `2`, `3`, i.e. both endpoints are in
/// range.
fn builtin_range(vm: &mut Vm<'_>, nargs: usize) -> Result<()> {
    expect_arity("range", nargs, 2)?;
    let begin = vm.pop_stack()?;
    let end = vm.pop_stack()?;
    let (b, e) = match (as_int(&begin), as_int(&end)) {
        (Some(b), Some(e)) => (b, e),
        _ => return Err(RillError::Runtime("'range' expects integer bounds".to_string())),
    };
    let items = (b..=e).map(Value::Int).collect();
    vm.push_stack(Value::tuple(items));
    Ok(())
}

/// Wraps a tuple in a fresh iterator; passes an existing iterator through
/// unchanged, so `for` can call it uniformly over both `range()` results and
/// plain tuple literals.
fn builtin_iter(vm: &mut Vm<'_>, nargs: usize) -> Result<()> {
    expect_arity("iter", nargs, 1)?;
    let value = vm.pop_stack()?;
    let wrapped = match &value {
        Value::Iterator(_) => value,
        Value::Tuple(t) => {
            let len = t.0.len() as i64;
            Value::iterator(value.clone(), len)
        }
        other => {
            return Err(RillError::Runtime(format!(
                "'{}' is not iterable",
                other.type_name()
            )))
        }
    };
    vm.push_stack(wrapped);
    Ok(())
}

fn builtin_type(vm: &mut Vm<'_>, nargs: usize) -> Result<()> {
    expect_arity("type", nargs, 1)?;
    let value = vm.pop_stack()?;
    vm.push_stack(Value::string(value.type_name()));
    Ok(())
}

fn builtin_int(vm: &mut Vm<'_>, nargs: usize) -> Result<()> {
    expect_arity("int", nargs, 1)?;
    let value = vm.pop_stack()?;
    let result = match &value {
        Value::Int(_) => value,
        Value::Float(x) => Value::Int(*x as i32),
        Value::Bool(b) => Value::Int(if *b { 1 } else { 0 }),
        Value::String(s) => s
            .0
            .trim()
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|_| RillError::Runtime(format!("cannot convert \"{}\" to int", s.0)))?,
        other => {
            return Err(RillError::Runtime(format!(
                "cannot convert a value of type {} to int",
                other.type_name()
            )))
        }
    };
    vm.push_stack(result);
    Ok(())
}

fn builtin_string(vm: &mut Vm<'_>, nargs: usize) -> Result<()> {
    expect_arity("string", nargs, 1)?;
    let value = vm.pop_stack()?;
    vm.push_stack(Value::string(value.to_string()));
    Ok(())
}

/// Backs `a.b` member access: resolves `b` against the exported-symbol map
/// of the module value `a`, reading the symbol's current value out of that
/// module's own data pool.
fn builtin_module_get(vm: &mut Vm<'_>, nargs: usize) -> Result<()> {
    expect_arity("__module_get", nargs, 2)?;
    let object = vm.pop_stack()?;
    let name = vm.pop_stack()?;
    let name = match name {
        Value::String(s) => s.0.clone(),
        other => {
            return Err(RillError::Runtime(format!(
                "member name must be a string, found {}",
                other.type_name()
            )))
        }
    };
    let module = match object {
        Value::Module(m) => m,
        other => {
            return Err(RillError::Runtime(format!(
                "'.' requires a module, found {}",
                other.type_name()
            )))
        }
    };
    let record = module
        .exports
        .get(&name)
        .ok_or_else(|| RillError::Runtime(format!("module '{}' has no exported symbol '{name}'", module.name)))?;
    let value = match record.location {
        crate::binary::ExportedLocation::Memory(addr) => module.data.get(addr as usize),
        _ => {
            return Err(RillError::Runtime(format!(
                "exported symbol '{name}' has no readable value"
            )))
        }
    };
    vm.push_stack(value);
    Ok(())
}

fn as_int(value: &Value) -> Option<i32> {
    match value {
        Value::Int(n) => Some(*n),
        Value::Float(x) => Some(*x as i32),
        Value::Bool(b) => Some(if *b { 1 } else { 0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn run_and_capture(source: &str) -> String {
        let binary = crate::pipeline::compile_source(source, "<test>").unwrap();
        let mut out = Vec::new();
        {
            let mut vm = Vm::new(binary, &mut out, PathBuf::from("."));
            vm.run().unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn print_returns_true_and_writes_a_trailing_newline() {
        assert_eq!(run_and_capture("print(1)"), "1\n");
    }

    #[test]
    fn range_is_inclusive_of_both_endpoints() {
        assert_eq!(run_and_capture("for i in 1..3 { print(i) }"), "1\n2\n3\n");
    }

    #[test]
    fn type_reports_the_runtime_tag() {
        assert_eq!(run_and_capture("print(type(1))"), "int\n");
        assert_eq!(run_and_capture("print(type(\"x\"))"), "string\n");
        assert_eq!(run_and_capture("print(type((1, 2)))"), "tuple\n");
    }

    #[test]
    fn int_and_string_convert_between_representations() {
        assert_eq!(run_and_capture("print(int(\"41\") + 1)"), "42\n");
        assert_eq!(run_and_capture("print(string(7) + \"!\")"), "7!\n");
    }
}
