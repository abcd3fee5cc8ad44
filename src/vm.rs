//! The virtual machine: register file, evaluation stack, call stack, call
//! frames, and the opcode dispatch loop.
//!
//! Grounded on `original_source/src/machine/vm.c`'s dispatch switch for the
//! arithmetic/logic/comparison opcodes (mixed int/float/string coercion, the
//! conditional-skip `EQUAL`/`LESSTHAN` encoding) and on spec-derived
//! semantics for `CALL`/`CALL_DYNAMIC`/`RETURN`/`IMPORT`/`DEREF`, which the
//! retrieved C sources declare but never implement.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use crate::binary::Binary;
use crate::bytecode::{Instruction, Reg, LOAD_STACK_BIT};
use crate::builtins::BuiltinTable;
use crate::error::{RillError, Result};
use crate::value::{FunctionPrototype, Memory, Value};

const NUM_REGISTERS: usize = 256;

/// Per-call state: the cloned prototype being executed, the address to
/// resume at, and the save buffer protecting the caller's values of any
/// local registers beyond the arguments (spec §4.3's "lazily allocated save
/// buffer").
struct Frame {
    proto: Rc<FunctionPrototype>,
    return_region: usize,
    return_pc: usize,
    save_buffer: Vec<Value>,
}

/// Executes a [`Binary`]. Generic over the output sink so `print` can be
/// captured by tests instead of always writing to real stdout.
pub struct Vm<'a> {
    data: Memory,
    registers: Vec<Value>,
    eval_stack: Vec<Value>,
    call_stack: Vec<Frame>,
    current_frame: Option<Frame>,
    code: crate::bytecode::CodeCollection,
    region: usize,
    pc: usize,
    builtins: BuiltinTable,
    pub(crate) out: &'a mut dyn Write,
    base_dir: PathBuf,
    imports: HashSet<PathBuf>,
}

impl<'a> Vm<'a> {
    pub fn new(binary: Binary, out: &'a mut dyn Write, base_dir: PathBuf) -> Self {
        Vm::with_imports(binary, out, base_dir, HashSet::new())
    }

    pub(crate) fn with_imports(
        binary: Binary,
        out: &'a mut dyn Write,
        base_dir: PathBuf,
        imports: HashSet<PathBuf>,
    ) -> Self {
        Vm {
            data: binary.data,
            registers: vec![Value::Absent; NUM_REGISTERS],
            eval_stack: Vec::new(),
            call_stack: Vec::new(),
            current_frame: None,
            code: binary.code,
            region: 0,
            pc: 0,
            builtins: BuiltinTable::new(),
            out,
            base_dir,
            imports,
        }
    }

    /// Consume the VM after execution, handing back the post-run data pool
    /// and the accumulated in-flight import set (for the caller — typically
    /// `pipeline::import_module` — to fold back into its own tracking).
    pub(crate) fn into_parts(self) -> (Memory, HashSet<PathBuf>) {
        (self.data, self.imports)
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            let block_len = self.code.block(self.region).len();
            if self.pc >= block_len {
                if self.current_frame.is_some() {
                    return Err(RillError::Runtime(
                        "reached end of function body without a RETURN".to_string(),
                    ));
                }
                return Ok(());
            }
            self.step()?;
        }
    }

    fn fetch(&self) -> Instruction {
        self.code.block(self.region).instructions[self.pc].clone()
    }

    fn step(&mut self) -> Result<()> {
        let instruction = self.fetch();
        self.pc += 1;

        match instruction {
            Instruction::Nil { a } => self.set_reg(a, Value::Nil),
            Instruction::Load { a, w } => self.exec_load(a, w),
            Instruction::Loadv { a, w } => self.set_reg(a, Value::Int(w as i32)),
            Instruction::Store { a, w } => self.data.set(w as usize, self.reg(a).clone()),
            Instruction::Move { a, b } => self.set_reg(a, self.reg(b).clone()),

            Instruction::Push { a } => self.eval_stack.push(self.reg(a).clone()),
            Instruction::Pop { a } => {
                let value = self.pop_stack()?;
                self.set_reg(a, value);
            }
            Instruction::Restore { n } => self.exec_restore(n)?,

            Instruction::Jmp { a } => self.exec_jmp(a)?,

            Instruction::Add { a, b, c } => self.exec_binary_arith(a, b, c, Self::numeric_add)?,
            Instruction::Sub { a, b, c } => self.exec_binary_arith(a, b, c, Self::numeric_sub)?,
            Instruction::Mul { a, b, c } => self.exec_binary_arith(a, b, c, Self::numeric_mul)?,
            Instruction::Div { a, b, c } => self.exec_binary_arith(a, b, c, Self::numeric_div)?,
            Instruction::Modulo { a, b, c } => self.exec_binary_arith(a, b, c, Self::numeric_mod)?,
            Instruction::Negate { a, b } => self.exec_negate(a, b)?,

            Instruction::And { a, b, c } => {
                let v = Value::Bool(self.reg(b).truthy() && self.reg(c).truthy());
                self.set_reg(a, v);
            }
            Instruction::Or { a, b, c } => {
                let v = Value::Bool(self.reg(b).truthy() || self.reg(c).truthy());
                self.set_reg(a, v);
            }
            Instruction::Not { a, b } => {
                let v = Value::Bool(!self.reg(b).truthy());
                self.set_reg(a, v);
            }

            Instruction::Equal { cond, b, c } => {
                let result = values_equal(self.reg(b), self.reg(c));
                if result as u8 != cond {
                    self.pc += 1;
                }
            }
            Instruction::LessThan { cond, b, c } => {
                let result = values_less_than(self.reg(b), self.reg(c))?;
                if result as u8 != cond {
                    self.pc += 1;
                }
            }

            Instruction::Deref { a, b, n } => self.exec_deref(a, b, n)?,

            Instruction::Call { w } => self.exec_call(w)?,
            Instruction::CallDynamic { w } => self.exec_call_dynamic(w)?,
            Instruction::Return { a } => self.exec_return(a)?,

            Instruction::Import { w } => self.exec_import(w)?,
        }
        Ok(())
    }

    fn reg(&self, r: Reg) -> &Value {
        &self.registers[r as usize]
    }

    fn set_reg(&mut self, r: Reg, value: Value) {
        self.registers[r as usize] = value;
    }

    pub(crate) fn pop_stack(&mut self) -> Result<Value> {
        self.eval_stack
            .pop()
            .ok_or_else(|| RillError::Runtime("evaluation stack underflow".to_string()))
    }

    pub(crate) fn push_stack(&mut self, value: Value) {
        self.eval_stack.push(value);
    }

    fn exec_load(&mut self, a: Reg, w: u16) {
        if a & LOAD_STACK_BIT != 0 {
            let index = w as usize;
            let value = self.eval_stack.get(index).cloned().unwrap_or(Value::Absent);
            self.set_reg(a & !LOAD_STACK_BIT, value);
        } else {
            let value = self.data.get(w as usize);
            self.set_reg(a, value);
        }
    }

    fn exec_restore(&mut self, n: u8) -> Result<()> {
        // Each logical (key, value) pair is encoded as two consecutive
        // pushes: the register index (as an int) then the value — see
        // DESIGN.md for why this resolves spec.md §9's open question about
        // what RESTORE's "key" actually is. The compiler never emits this
        // opcode itself (it uses explicit POPs, per §4.2.2); RESTORE exists
        // for bytecode completeness and for hand-assembled programs.
        for _ in 0..n {
            let value = self.pop_stack()?;
            let key = self.pop_stack()?;
            let reg = match key {
                Value::Int(r) => r as usize,
                other => {
                    return Err(RillError::Runtime(format!(
                        "RESTORE key must be an int register index, found {}",
                        other.type_name()
                    )))
                }
            };
            if reg >= NUM_REGISTERS {
                return Err(RillError::Runtime(format!("RESTORE register index {reg} out of range")));
            }
            self.registers[reg] = value;
        }
        Ok(())
    }

    fn exec_jmp(&mut self, a: Reg) -> Result<()> {
        let delta = match self.reg(a) {
            Value::Int(n) => *n as i64,
            other => {
                return Err(RillError::Runtime(format!(
                    "JMP target register holds {}, not an int distance",
                    other.type_name()
                )))
            }
        };
        let target = self.pc as i64 + delta;
        if target < 0 {
            return Err(RillError::Runtime("JMP target is negative".to_string()));
        }
        self.pc = target as usize;
        Ok(())
    }

    fn numeric_add(l: &Value, r: &Value) -> Result<Value> {
        if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
            return Ok(Value::string(format!("{l}{r}")));
        }
        binary_numeric(l, r, |a, b| a + b, |a, b| a.wrapping_add(b))
    }

    fn numeric_sub(l: &Value, r: &Value) -> Result<Value> {
        binary_numeric(l, r, |a, b| a - b, |a, b| a.wrapping_sub(b))
    }

    fn numeric_mul(l: &Value, r: &Value) -> Result<Value> {
        binary_numeric(l, r, |a, b| a * b, |a, b| a.wrapping_mul(b))
    }

    fn numeric_div(l: &Value, r: &Value) -> Result<Value> {
        let (a, b) = numeric_pair(l, r)?;
        Ok(Value::Float(a / b))
    }

    fn numeric_mod(l: &Value, r: &Value) -> Result<Value> {
        let (a, b) = numeric_pair(l, r)?;
        Ok(Value::Int((a as i64 % b as i64) as i32))
    }

    fn exec_binary_arith(
        &mut self,
        a: Reg,
        b: Reg,
        c: Reg,
        op: fn(&Value, &Value) -> Result<Value>,
    ) -> Result<()> {
        let result = op(self.reg(b), self.reg(c))?;
        self.set_reg(a, result);
        Ok(())
    }

    fn exec_negate(&mut self, a: Reg, b: Reg) -> Result<()> {
        let result = match self.reg(b) {
            Value::Int(n) => Value::Int(-n),
            Value::Float(x) => Value::Float(-x),
            other => {
                return Err(RillError::Runtime(format!(
                    "cannot negate a value of type {}",
                    other.type_name()
                )))
            }
        };
        self.set_reg(a, result);
        Ok(())
    }

    fn exec_deref(&mut self, a: Reg, b: Reg, n: u8) -> Result<()> {
        let iterator = match self.reg(b) {
            Value::Iterator(it) => it.clone(),
            other => {
                return Err(RillError::Runtime(format!(
                    "DEREF target is not an iterator (found {})",
                    other.type_name()
                )))
            }
        };
        let mut it = iterator.borrow_mut();
        if it.exhausted() {
            drop(it);
            self.set_reg(a, Value::Nil);
            return Ok(());
        }
        let element = match &it.iterable {
            Value::Tuple(t) => t.0.get(it.index as usize).cloned().unwrap_or(Value::Nil),
            other => {
                return Err(RillError::Runtime(format!(
                    "cannot iterate over a value of type {}",
                    other.type_name()
                )))
            }
        };
        it.index += n as i64;
        drop(it);
        self.set_reg(a, element);
        Ok(())
    }

    fn exec_call(&mut self, w: u16) -> Result<()> {
        let proto = match self.data.get(w as usize) {
            Value::Function(p) => p,
            other => {
                return Err(RillError::Runtime(format!(
                    "CALL target at data[{w}] is not a function (found {})",
                    other.type_name()
                )))
            }
        };

        let nargs = proto.nargs as usize;
        let mut save_buffer = Vec::with_capacity(proto.locals.len().saturating_sub(nargs));
        for &reg in &proto.locals[nargs..] {
            save_buffer.push(self.registers[reg as usize].clone());
        }

        let frame = Frame {
            proto: proto.clone(),
            return_region: self.region,
            return_pc: self.pc,
            save_buffer,
        };
        if let Some(previous) = self.current_frame.take() {
            self.call_stack.push(previous);
        }
        self.region = proto.entry.region;
        self.pc = proto.entry.offset;
        self.current_frame = Some(frame);
        Ok(())
    }

    fn exec_return(&mut self, a: Reg) -> Result<()> {
        let result = self.reg(a).clone();
        self.push_stack(result);

        let frame = self
            .current_frame
            .take()
            .ok_or_else(|| RillError::Runtime("RETURN with no active call frame".to_string()))?;

        let nargs = frame.proto.nargs as usize;
        for (slot, &reg) in frame.proto.locals[nargs..].iter().enumerate() {
            self.registers[reg as usize] = frame.save_buffer[slot].clone();
        }

        self.region = frame.return_region;
        self.pc = frame.return_pc;
        self.current_frame = self.call_stack.pop();
        Ok(())
    }

    fn exec_call_dynamic(&mut self, w: u16) -> Result<()> {
        let name = match self.data.get(w as usize) {
            Value::String(s) => s.0.clone(),
            other => {
                return Err(RillError::Runtime(format!(
                    "CALL_DYNAMIC target at data[{w}] is not a string (found {})",
                    other.type_name()
                )))
            }
        };
        let builtin = self
            .builtins
            .get(&name)
            .ok_or_else(|| RillError::Runtime(format!("unknown built-in '{name}'")))?;
        let nargs = match self.reg(0) {
            Value::Int(n) => *n as usize,
            other => {
                return Err(RillError::Runtime(format!(
                    "$0 holds {} at CALL_DYNAMIC, not an argument count",
                    other.type_name()
                )))
            }
        };
        builtin(self, nargs)
    }

    fn exec_import(&mut self, w: u16) -> Result<()> {
        let path = match self.data.get(w as usize) {
            Value::String(s) => s.0.clone(),
            other => {
                return Err(RillError::Runtime(format!(
                    "IMPORT target at data[{w}] is not a string (found {})",
                    other.type_name()
                )))
            }
        };
        let imports = std::mem::take(&mut self.imports);
        let (module, imports) = crate::pipeline::import_module(&path, &self.base_dir, imports, self.out)?;
        self.imports = imports;
        self.data.set(w as usize, Value::Module(Rc::new(module)));
        Ok(())
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Nil, Value::Nil) => true,
        (Value::Nil, _) | (_, Value::Nil) => false,
        (Value::String(a), Value::String(b)) => a.0 == b.0,
        _ if l.is_numberish() && r.is_numberish() => l.as_f64() == r.as_f64(),
        _ => false,
    }
}

fn values_less_than(l: &Value, r: &Value) -> Result<bool> {
    if l.is_numberish() && r.is_numberish() {
        Ok(l.as_f64().unwrap() < r.as_f64().unwrap())
    } else {
        Err(RillError::Runtime(format!(
            "'<' requires numeric operands, found {} and {}",
            l.type_name(),
            r.type_name()
        )))
    }
}

fn numeric_pair(l: &Value, r: &Value) -> Result<(f64, f64)> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(RillError::Runtime(format!(
            "expected numeric operands, found {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

/// Shared int/float promotion: if either operand is a float, run `on_float`
/// over the promoted pair; otherwise run `on_int` over the truncated ints.
fn binary_numeric(
    l: &Value,
    r: &Value,
    on_float: fn(f64, f64) -> f64,
    on_int: fn(i32, i32) -> i32,
) -> Result<Value> {
    let (a, b) = numeric_pair(l, r)?;
    if matches!(l, Value::Float(_)) || matches!(r, Value::Float(_)) {
        Ok(Value::Float(on_float(a, b)))
    } else {
        Ok(Value::Int(on_int(a as i32, b as i32)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::compile_source;

    fn run_and_capture(source: &str) -> String {
        let binary = compile_source(source, "<test>").unwrap();
        let mut out = Vec::new();
        {
            let mut vm = Vm::new(binary, &mut out, PathBuf::from("."));
            vm.run().unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run_and_capture("print(1 + 2 * 3)"), "7\n");
    }

    #[test]
    fn variable_reassignment() {
        assert_eq!(run_and_capture("var x = 2\nx = x + 40\nprint(x)"), "42\n");
    }

    #[test]
    fn function_call() {
        assert_eq!(
            run_and_capture("fn add(a, b) { return a + b }\nprint(add(3, 4))"),
            "7\n"
        );
    }

    #[test]
    fn recursive_fibonacci() {
        let src = "fn fib(n) { if n < 2 { return n }\nreturn fib(n-1) + fib(n-2) }\nprint(fib(10))";
        assert_eq!(run_and_capture(src), "55\n");
    }

    #[test]
    fn for_loop_over_inclusive_range() {
        assert_eq!(run_and_capture("for i in 1..3 { print(i) }"), "1\n2\n3\n");
    }

    #[test]
    fn tuple_literal_printing() {
        assert_eq!(run_and_capture("print((1, 2, 3))"), "(1, 2, 3)\n");
    }

    #[test]
    fn string_concatenation_and_immutability() {
        assert_eq!(run_and_capture("let s = \"foo\" + \"bar\"\nprint(s)"), "foobar\n");

        let program = crate::front::parse("<test>", "let s = \"x\"\ns = \"y\"").unwrap();
        let err = crate::compiler::compile(&program, "<test>", "let s = \"x\"\ns = \"y\"").unwrap_err();
        assert!(format!("{err}").contains("immutable"));
    }

    #[test]
    fn boolean_not_identity() {
        assert_eq!(run_and_capture("print(!!true)"), "true\n");
        assert_eq!(run_and_capture("print(!!0)"), "false\n");
    }

    #[test]
    fn iteration_exhausts_after_length_elements() {
        let binary = compile_source("for x in (1, 2) { print(x) }", "<test>").unwrap();
        let mut out = Vec::new();
        let mut vm = Vm::new(binary, &mut out, PathBuf::from("."));
        vm.run().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1\n2\n");
    }
}
