//! AST → bytecode lowering under a stack-discipline register allocator.
//!
//! Grounded on `original_source/src/compiler/compile.c`'s `rp`/`mp` pointer
//! management and register-spill pattern around binary operands (bump `rp`
//! for the right operand, restore it, write the result back to the
//! now-current `rp`), generalized here to the complete AST shape `rill`
//! supports: control flow, function declarations and calls, tuples, ranges,
//! and modules.

use std::rc::Rc;

use crate::binary::{Binary, ExportedKind, ExportedLocation, SymbolRecord};
use crate::bytecode::{Instruction, Reg};
use crate::common::Id;
use crate::compiler::symbol::{Location, Symbol, SymbolKind, SymbolTable};
use crate::error::{Diagnostic, RillError, Result};
use crate::front::ast::{BinOp, DeclKind, Expr, Literal, Program, Span, Stmt, UnOp};
use crate::value::{CodeAddress, FunctionPrototype, Value};

/// Lower a parsed program into a complete [`Binary`].
pub fn compile(program: &Program, file: &str, source: &str) -> Result<Binary> {
    let mut compiler = Compiler::new(file, source);
    for stmt in &program.stmts {
        compiler.compile_stmt(stmt)?;
    }
    Ok(compiler.finish())
}

/// Which template to expand a comparison into (spec §4.2's
/// "three-instruction template": `LOAD false; compare; LOAD true; MOVE`).
enum CompareKind {
    Eq,
    Ne,
    Lt,
    Gt,
}

struct Compiler<'src> {
    file: String,
    source: &'src str,
    symbols: SymbolTable,
    binary: Binary,
    current_block: usize,
    rp: Reg,
    mp: u16,
}

impl<'src> Compiler<'src> {
    fn new(file: &str, source: &'src str) -> Self {
        let mut binary = Binary::new();
        binary.data.set(0, Value::Bool(false));
        binary.data.set(1, Value::Bool(true));
        Compiler {
            file: file.to_string(),
            source,
            symbols: SymbolTable::new(),
            binary,
            current_block: 0,
            rp: 1,
            mp: 2,
        }
    }

    /// Only `/exported/`-marked function declarations are recorded into
    /// `binary.symbols` (done inline in `compile_fn_decl`); every other
    /// root-scope binding is module-private.
    fn finish(self) -> Binary {
        self.binary
    }

    fn error_at(&self, span: Span, message: impl Into<String>) -> RillError {
        let source_line = self
            .source
            .lines()
            .nth(span.line.saturating_sub(1))
            .unwrap_or("")
            .to_string();
        RillError::Semantic(Diagnostic::new(self.file.clone(), span.line, span.col, source_line, message))
    }

    fn block(&mut self) -> &mut crate::bytecode::CodeBlock {
        self.binary.code.block_mut(self.current_block)
    }

    fn emit(&mut self, instruction: Instruction) -> usize {
        self.block().write(instruction)
    }

    fn code_len(&mut self) -> usize {
        self.block().len()
    }

    fn patch_loadv(&mut self, index: usize, distance: i16) {
        self.block().patch_loadv(index, distance);
    }

    fn last_is_return(&mut self) -> bool {
        matches!(
            self.block().instructions.last(),
            Some(Instruction::Return { .. })
        )
    }

    fn alloc_data(&mut self, value: Value) -> u16 {
        let slot = self.mp;
        self.binary.data.set(slot as usize, value);
        self.mp += 1;
        slot
    }

    /// Reserve (or reuse) a data-pool slot for a built-in's name, caching
    /// the mapping in the root scope so repeated calls don't re-allocate.
    fn builtin_slot(&mut self, name: &str) -> u16 {
        let id = Id::new(name.to_string());
        if let Some(sym) = self.symbols.get_root(id) {
            if let Location::Builtin(slot) = sym.location {
                return slot as u16;
            }
        }
        let slot = self.alloc_data(Value::string(name.to_string()));
        self.symbols
            .set_root(Symbol::new(id, SymbolKind::Function, Location::Builtin(slot as u32)));
        slot
    }

    // -- statements -------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(e) => {
                let saved = self.rp;
                self.compile_expr(e)?;
                self.rp = saved;
            }
            Stmt::Declare { kind, name, init, .. } => self.compile_declare(*kind, *name, init.as_ref())?,
            Stmt::Assign { name, value, span } => {
                let saved = self.rp;
                self.compile_assign(*name, value, *span)?;
                self.rp = saved;
            }
            Stmt::Return(value, _) => {
                let saved = self.rp;
                self.compile_return(value.as_ref())?;
                self.rp = saved;
            }
            Stmt::FnDecl {
                name,
                exported,
                args,
                body,
                span,
            } => self.compile_fn_decl(*name, *exported, args, body, *span)?,
            Stmt::If { cond, body, .. } => {
                let saved = self.rp;
                self.compile_if(cond, body)?;
                self.rp = saved;
            }
            Stmt::For {
                var, iterable, body, ..
            } => {
                let saved = self.rp;
                self.compile_for(*var, iterable, body)?;
                self.rp = saved;
            }
            Stmt::Import { path, span } => self.compile_import(path, *span)?,
        }
        Ok(())
    }

    fn compile_declare(&mut self, kind: DeclKind, name: Id, init: Option<&Expr>) -> Result<()> {
        match init {
            Some(expr) => {
                let loc = self.compile_expr(expr)?;
                if loc != self.rp {
                    self.emit(Instruction::Move { a: self.rp, b: loc });
                }
                let symbol_kind = match kind {
                    DeclKind::Var => SymbolKind::Variable,
                    DeclKind::Let => SymbolKind::Constant,
                };
                self.symbols.set(Symbol::new(name, symbol_kind, Location::Register(self.rp)));
                self.rp += 1;
            }
            None => {
                self.symbols.set(Symbol::new(name, SymbolKind::Variable, Location::None));
            }
        }
        Ok(())
    }

    fn compile_assign(&mut self, name: Id, value: &Expr, span: Span) -> Result<()> {
        let symbol = self
            .symbols
            .get(name)
            .cloned()
            .ok_or_else(|| self.error_at(span, format!("undeclared identifier '{name}'")))?;
        if symbol.is_constant() {
            return Err(self.error_at(span, format!("cannot assign to immutable binding '{name}'")));
        }
        let dest = match symbol.location {
            Location::Register(r) => r,
            _ => return Err(self.error_at(span, format!("'{name}' is not assignable"))),
        };
        let loc = self.compile_expr(value)?;
        if loc != dest {
            self.emit(Instruction::Move { a: dest, b: loc });
        }
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&Expr>) -> Result<()> {
        let loc = match value {
            Some(expr) => self.compile_expr(expr)?,
            None => {
                self.emit(Instruction::Nil { a: self.rp });
                self.rp
            }
        };
        self.emit(Instruction::Return { a: loc });
        Ok(())
    }

    fn compile_fn_decl(
        &mut self,
        name: Id,
        exported: bool,
        args: &[Id],
        body: &[Stmt],
        span: Span,
    ) -> Result<()> {
        let region = self.binary.code.add_block();
        let low_reg = self.rp;
        let nargs = args.len() as u8;
        let proto_slot = self.mp;
        self.mp += 1;

        // Bind in the enclosing scope before compiling the body so the
        // declaration can call itself recursively and so sibling statements
        // can call it too.
        self.symbols
            .set(Symbol::new(name, SymbolKind::Function, Location::Memory(proto_slot as u32)));

        let saved_block = self.current_block;
        let saved_rp = self.rp;
        self.current_block = region;
        self.symbols.enter_scope();

        for (i, arg_name) in args.iter().enumerate() {
            let reg = low_reg + i as u8;
            self.symbols
                .set(Symbol::new(*arg_name, SymbolKind::Variable, Location::Register(reg)));
        }
        self.rp = low_reg + nargs;

        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        if !self.last_is_return() {
            self.emit(Instruction::Nil { a: self.rp });
            self.emit(Instruction::Return { a: self.rp });
        }

        let locals: Vec<u8> = (low_reg..self.rp).collect();
        self.symbols.exit_scope();
        self.current_block = saved_block;
        self.rp = saved_rp;

        self.binary.data.set(
            proto_slot as usize,
            Value::Function(Rc::new(FunctionPrototype {
                name,
                entry: CodeAddress { region, offset: 0 },
                nargs,
                locals,
                low_reg,
            })),
        );

        if exported {
            self.binary.symbols.0.insert(
                name.to_string(),
                SymbolRecord {
                    kind: ExportedKind::Function,
                    location: ExportedLocation::Memory(proto_slot as u32),
                },
            );
        }
        let _ = span;
        Ok(())
    }

    fn compile_if(&mut self, cond: &Expr, body: &[Stmt]) -> Result<()> {
        let cond_loc = self.compile_expr(cond)?;
        let t = self.rp + 1;
        let s = self.rp + 2;
        let loadv_index = self.emit(Instruction::Loadv { a: t, w: 0 });
        self.emit(Instruction::Load { a: s, w: 1 });
        self.emit(Instruction::Equal {
            cond: 0,
            b: cond_loc,
            c: s,
        });
        let jmp_index = self.emit(Instruction::Jmp { a: t });

        self.symbols.enter_scope();
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        self.symbols.exit_scope();

        let distance = (self.code_len() - (jmp_index + 1)) as i16;
        self.patch_loadv(loadv_index, distance);
        Ok(())
    }

    fn compile_for(&mut self, var: Id, iterable: &Expr, body: &[Stmt]) -> Result<()> {
        let base = self.rp;
        let iterable_loc = self.compile_expr(iterable)?;
        let iter_loc = self.compile_builtin_call_with_locs("iter", &[iterable_loc]);

        let var_reg = base + 1;
        let nil_reg = base + 2;
        let exit_t = base + 3;
        let back_t = base + 4;

        let deref_index = self.code_len();
        self.emit(Instruction::Deref {
            a: var_reg,
            b: iter_loc,
            n: 1,
        });
        self.emit(Instruction::Nil { a: nil_reg });
        let exit_loadv_index = self.emit(Instruction::Loadv { a: exit_t, w: 0 });
        self.emit(Instruction::Equal {
            cond: 1,
            b: var_reg,
            c: nil_reg,
        });
        let exit_jmp_index = self.emit(Instruction::Jmp { a: exit_t });

        self.rp = base + 5;
        self.symbols.enter_scope();
        self.symbols
            .set(Symbol::new(var, SymbolKind::Variable, Location::Register(var_reg)));
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        self.symbols.exit_scope();

        let back_loadv_index = self.emit(Instruction::Loadv { a: back_t, w: 0 });
        let back_jmp_index = self.emit(Instruction::Jmp { a: back_t });

        let back_distance = deref_index as i64 - (back_jmp_index as i64 + 1);
        self.patch_loadv(back_loadv_index, back_distance as i16);

        let exit_distance = (self.code_len() - (exit_jmp_index + 1)) as i16;
        self.patch_loadv(exit_loadv_index, exit_distance);

        self.rp = base;
        Ok(())
    }

    fn compile_import(&mut self, path: &str, _span: Span) -> Result<()> {
        let slot = self.alloc_data(Value::string(path.to_string()));
        self.emit(Instruction::Import { w: slot });
        let module_name = path
            .rsplit('/')
            .next()
            .unwrap_or(path)
            .trim_end_matches(".rill")
            .to_string();
        self.symbols.set(Symbol::new(
            Id::new(module_name),
            SymbolKind::Module,
            Location::Memory(slot as u32),
        ));
        Ok(())
    }

    // -- expressions ------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<Reg> {
        match expr {
            Expr::Literal(lit, _) => Ok(self.compile_literal(lit)),
            Expr::Var(name, span) => self.compile_var(*name, *span),
            Expr::Unary { op, operand, .. } => self.compile_unary(*op, operand),
            Expr::Binary { op, left, right, .. } => self.compile_binary(*op, left, right),
            Expr::Group(inner) => self.compile_expr(inner),
            Expr::Tuple(items, _) => self.compile_builtin_call("tuple", items),
            Expr::Range { begin, end, .. } => {
                let args = [(**begin).clone(), (**end).clone()];
                self.compile_builtin_call("range", &args)
            }
            Expr::Call { name, args, span } => self.compile_call(*name, args, *span),
            Expr::Member { object, name, .. } => self.compile_member(object, *name),
        }
    }

    fn compile_literal(&mut self, literal: &Literal) -> Reg {
        match literal {
            Literal::Int(n) => {
                self.emit(Instruction::Loadv {
                    a: self.rp,
                    w: *n as i16,
                });
            }
            Literal::Float(x) => {
                let slot = self.alloc_data(Value::Float(*x));
                self.emit(Instruction::Load { a: self.rp, w: slot });
            }
            Literal::String(s) => {
                let slot = self.alloc_data(Value::string(s.clone()));
                self.emit(Instruction::Load { a: self.rp, w: slot });
            }
            Literal::Bool(b) => {
                self.emit(Instruction::Load {
                    a: self.rp,
                    w: if *b { 1 } else { 0 },
                });
            }
            Literal::Nil => {
                self.emit(Instruction::Nil { a: self.rp });
            }
        }
        self.rp
    }

    fn compile_var(&mut self, name: Id, span: Span) -> Result<Reg> {
        let symbol = self
            .symbols
            .get(name)
            .cloned()
            .ok_or_else(|| self.error_at(span, format!("undeclared identifier '{name}'")))?;
        match symbol.location {
            Location::Register(r) => Ok(r),
            Location::Memory(addr) => {
                self.emit(Instruction::Load {
                    a: self.rp,
                    w: addr as u16,
                });
                let reg = self.rp;
                self.symbols
                    .set(Symbol::new(name, symbol.kind, Location::Register(reg)));
                Ok(reg)
            }
            Location::None | Location::Undefined => {
                Err(self.error_at(span, format!("use of uninitialized variable '{name}'")))
            }
            Location::Code(_) | Location::Builtin(_) => {
                Err(self.error_at(span, format!("'{name}' cannot be used as a value")))
            }
        }
    }

    fn compile_unary(&mut self, op: UnOp, operand: &Expr) -> Result<Reg> {
        let loc = self.compile_expr(operand)?;
        match op {
            UnOp::Neg => self.emit(Instruction::Negate { a: self.rp, b: loc }),
            UnOp::Not => self.emit(Instruction::Not { a: self.rp, b: loc }),
        };
        Ok(self.rp)
    }

    fn compile_binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Result<Reg> {
        match op {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt => {
                let (left_loc, right_loc) = self.compile_operand_pair(left, right)?;
                let kind = match op {
                    BinOp::Eq => CompareKind::Eq,
                    BinOp::Ne => CompareKind::Ne,
                    BinOp::Lt => CompareKind::Lt,
                    BinOp::Gt => CompareKind::Gt,
                    _ => unreachable!(),
                };
                self.compile_compare_template(kind, left_loc, right_loc, self.rp);
                Ok(self.rp)
            }
            BinOp::Le => {
                let (left_loc, right_loc) = self.compile_operand_pair(left, right)?;
                let t1 = self.rp + 2;
                let t2 = self.rp + 3;
                self.compile_compare_template(CompareKind::Lt, left_loc, right_loc, t1);
                self.compile_compare_template(CompareKind::Eq, left_loc, right_loc, t2);
                self.emit(Instruction::Or {
                    a: self.rp,
                    b: t1,
                    c: t2,
                });
                Ok(self.rp)
            }
            BinOp::Ge => {
                let (left_loc, right_loc) = self.compile_operand_pair(left, right)?;
                let t1 = self.rp + 2;
                let t2 = self.rp + 3;
                self.compile_compare_template(CompareKind::Gt, left_loc, right_loc, t1);
                self.compile_compare_template(CompareKind::Eq, left_loc, right_loc, t2);
                self.emit(Instruction::Or {
                    a: self.rp,
                    b: t1,
                    c: t2,
                });
                Ok(self.rp)
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::And | BinOp::Or => {
                let (left_loc, right_loc) = self.compile_operand_pair(left, right)?;
                let a = self.rp;
                let instruction = match op {
                    BinOp::Add => Instruction::Add { a, b: left_loc, c: right_loc },
                    BinOp::Sub => Instruction::Sub { a, b: left_loc, c: right_loc },
                    BinOp::Mul => Instruction::Mul { a, b: left_loc, c: right_loc },
                    BinOp::Div => Instruction::Div { a, b: left_loc, c: right_loc },
                    BinOp::Mod => Instruction::Modulo { a, b: left_loc, c: right_loc },
                    BinOp::And => Instruction::And { a, b: left_loc, c: right_loc },
                    BinOp::Or => Instruction::Or { a, b: left_loc, c: right_loc },
                    _ => unreachable!(),
                };
                self.emit(instruction);
                Ok(a)
            }
        }
    }

    /// Compile `left` into `$rp`, bump `rp`, compile `right` into the bumped
    /// register, then restore `rp` — the register-spill dance every binary
    /// operator shares.
    fn compile_operand_pair(&mut self, left: &Expr, right: &Expr) -> Result<(Reg, Reg)> {
        let left_loc = self.compile_expr(left)?;
        self.rp += 1;
        let right_loc = self.compile_expr(right)?;
        self.rp -= 1;
        Ok((left_loc, right_loc))
    }

    /// `LOAD false; <compare>; LOAD true; MOVE target, temp` — spec §4.2's
    /// three-instruction comparison template, parameterized over which
    /// register receives the boolean so `<=`/`>=` can build two of these and
    /// OR the results together.
    fn compile_compare_template(&mut self, kind: CompareKind, left: Reg, right: Reg, target: Reg) {
        self.emit(Instruction::Load { a: target, w: 0 });
        match kind {
            CompareKind::Eq => {
                self.emit(Instruction::Equal {
                    cond: 1,
                    b: left,
                    c: right,
                });
            }
            CompareKind::Ne => {
                self.emit(Instruction::Equal {
                    cond: 0,
                    b: left,
                    c: right,
                });
            }
            CompareKind::Lt => {
                self.emit(Instruction::LessThan {
                    cond: 1,
                    b: left,
                    c: right,
                });
            }
            CompareKind::Gt => {
                self.emit(Instruction::LessThan {
                    cond: 1,
                    b: right,
                    c: left,
                });
            }
        }
        self.emit(Instruction::Load { a: target, w: 1 });
    }

    fn compile_call(&mut self, name: Id, args: &[Expr], span: Span) -> Result<Reg> {
        if let Some(symbol) = self.symbols.get(name).cloned() {
            if symbol.kind == SymbolKind::Function {
                if let Location::Memory(slot) = symbol.location {
                    if let Value::Function(proto) = self.binary.data.get(slot as usize) {
                        if proto.nargs as usize != args.len() {
                            return Err(self.error_at(
                                span,
                                format!(
                                    "'{name}' expects {} argument(s), found {}",
                                    proto.nargs,
                                    args.len()
                                ),
                            ));
                        }
                        return self.compile_native_call(slot as u16, &proto, args);
                    }
                }
            }
        }
        self.compile_builtin_call(name.as_str(), args)
    }

    fn compile_native_call(&mut self, proto_slot: u16, proto: &Rc<FunctionPrototype>, args: &[Expr]) -> Result<Reg> {
        let entry_rp = self.rp;
        let low_reg = proto.low_reg;
        let nargs = proto.nargs;

        let mut saved = Vec::new();
        for i in 0..nargs {
            let reg = low_reg + i;
            if reg < entry_rp {
                self.emit(Instruction::Push { a: reg });
                saved.push(reg);
            }
        }

        for (i, arg) in args.iter().enumerate() {
            let target = low_reg + i as u8;
            self.rp = target;
            let loc = self.compile_expr(arg)?;
            if loc != target {
                self.emit(Instruction::Move { a: target, b: loc });
            }
        }

        self.emit(Instruction::Call { w: proto_slot });
        self.rp = entry_rp;
        self.emit(Instruction::Pop { a: self.rp });

        for &reg in saved.iter().rev() {
            self.emit(Instruction::Pop { a: reg });
        }
        Ok(self.rp)
    }

    fn compile_builtin_call(&mut self, name: &str, args: &[Expr]) -> Result<Reg> {
        let base = self.rp;
        let mut locs = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            self.rp = base + i as u8;
            let loc = self.compile_expr(arg)?;
            if loc != self.rp {
                self.emit(Instruction::Move { a: self.rp, b: loc });
            }
            locs.push(self.rp);
        }
        self.rp = base;
        Ok(self.compile_builtin_call_with_locs(name, &locs))
    }

    fn compile_builtin_call_with_locs(&mut self, name: &str, arg_locs: &[Reg]) -> Reg {
        for &loc in arg_locs.iter().rev() {
            self.emit(Instruction::Push { a: loc });
        }
        self.emit(Instruction::Loadv {
            a: 0,
            w: arg_locs.len() as i16,
        });
        let slot = self.builtin_slot(name);
        self.emit(Instruction::CallDynamic { w: slot });
        self.emit(Instruction::Pop { a: self.rp });
        self.rp
    }

    fn compile_member(&mut self, object: &Expr, name: Id) -> Result<Reg> {
        let obj_loc = self.compile_expr(object)?;
        let name_slot = self.alloc_data(Value::string(name.to_string()));
        let name_reg = self.rp + 1;
        self.emit(Instruction::Load {
            a: name_reg,
            w: name_slot,
        });
        Ok(self.compile_builtin_call_with_locs("__module_get", &[obj_loc, name_reg]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse;

    fn compile_src(src: &str) -> Binary {
        let program = parse("<test>", src).unwrap();
        compile(&program, "<test>", src).unwrap()
    }

    #[test]
    fn data_pool_reserves_canonical_booleans() {
        let binary = compile_src("print(1)");
        assert_eq!(binary.data.get(0).truthy(), false);
        assert_eq!(binary.data.get(1).truthy(), true);
    }

    #[test]
    fn register_pointer_does_not_leak_across_statements() {
        // Three independent expression-statements; if `rp` leaked, the third
        // statement's LOADV target would creep upward each time.
        let binary = compile_src("1 + 2\n3 + 4\n5 + 6");
        let block = binary.code.block(0);
        let targets: Vec<Reg> = block
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Add { a, .. } => Some(*a),
                _ => None,
            })
            .collect();
        assert!(targets.iter().all(|&r| r == targets[0]));
    }

    #[test]
    fn function_locals_start_at_low_reg_and_are_monotonic() {
        let binary = compile_src("fn add(a, b) { var c = a + b\nreturn c }\nprint(add(1, 2))");
        let proto = match binary.data.get(2) {
            Value::Function(p) => p,
            other => panic!("expected function prototype, got {other:?}"),
        };
        assert_eq!(proto.locals[0], proto.low_reg);
        for pair in proto.locals.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn arity_mismatch_is_a_compile_error() {
        let program = parse("<test>", "fn add(a, b) { return a + b }\nprint(add(1))").unwrap();
        let err = compile(&program, "<test>", "fn add(a, b) { return a + b }\nprint(add(1))").unwrap_err();
        match err {
            RillError::Semantic(_) => {}
            other => panic!("expected a semantic error, got {other:?}"),
        }
        let _ = program;
    }

    #[test]
    fn assigning_to_a_let_binding_mentions_immutability() {
        let program = parse("<test>", "let s = \"foo\"\ns = \"bar\"").unwrap();
        let err = compile(&program, "<test>", "let s = \"foo\"\ns = \"bar\"").unwrap_err();
        assert!(format!("{err}").contains("immutable"));
        let _ = program;
    }

    #[test]
    fn if_compiles_a_skippable_jump_over_the_body() {
        let binary = compile_src("if true { print(1) }");
        let block = binary.code.block(0);
        assert!(block
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Equal { cond: 0, .. })));
        assert!(block.instructions.iter().any(|i| matches!(i, Instruction::Jmp { .. })));
    }
}
