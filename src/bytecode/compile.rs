use crate::bytecode::compile_error::{CompileError, SyntaxKind};
use crate::bytecode::op::{BinaryOp, UnaryOp};
use crate::bytecode::{BytecodeProgram, Op};
use crate::frontend::scanner::{Scanner, is_ident_start};
use crate::frontend::syntax::SyntaxChecker;
use crate::lang::{Builtin, FunctionDescriptor, FunctionRegistry, NameResolver};

/// Default evaluation-stack limit for compiled programs.
pub const DEFAULT_STACK_LIMIT: usize = 1024;

/// Default limit on nested groups, call argument lists and exponents.
pub const DEFAULT_NESTING_LIMIT: usize = 256;

/// Compiles a formula against a registry and a variable resolver.
pub fn compile(
    expr: &str,
    registry: &FunctionRegistry,
    resolver: &dyn NameResolver,
) -> Result<BytecodeProgram, CompileError> {
    Compiler::new(registry, resolver).compile(expr)
}

/// Expression compiler.
///
/// `compile` runs the syntax-validation pass, then generates bytecode by
/// precedence climbing:
///
/// ```text
/// expression := add (',' add)*
/// add        := mult (('+'|'-') mult)*
/// mult       := unaryMinus (('*'|'/'|'%') unaryMinus)*
/// unaryMinus := '-' pow | pow
/// pow        := element ('^' unaryMinus)*
/// element    := '(' expression ')' | number | function '(' expression ')' | variable
/// ```
///
/// `pow` recurses through `unaryMinus`, so `^` is right-associative and
/// `-2^2` compiles as `-(2^2)`.
///
/// Generation recurses once per `(`, call or `^`; past the nesting limit it
/// fails with [`CompileError::NestingLimit`] instead of exhausting the
/// native stack.
pub struct Compiler<'a> {
    registry: &'a FunctionRegistry,
    resolver: &'a dyn NameResolver,
    stack_limit: usize,
    nesting_limit: usize,
    allow_assignment: bool,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a FunctionRegistry, resolver: &'a dyn NameResolver) -> Self {
        Compiler {
            registry,
            resolver,
            stack_limit: DEFAULT_STACK_LIMIT,
            nesting_limit: DEFAULT_NESTING_LIMIT,
            allow_assignment: false,
        }
    }

    pub fn with_stack_limit(mut self, limit: usize) -> Self {
        self.stack_limit = limit;
        self
    }

    pub fn with_nesting_limit(mut self, limit: usize) -> Self {
        self.nesting_limit = limit;
        self
    }

    /// Accept `name = expr` statements, compiled to a trailing `Assign`.
    pub fn allow_assignment(mut self, allow: bool) -> Self {
        self.allow_assignment = allow;
        self
    }

    /// Validates, then generates.
    pub fn compile(&self, expr: &str) -> Result<BytecodeProgram, CompileError> {
        SyntaxChecker::new(expr, self.registry, self.resolver)
            .allow_assignment(self.allow_assignment)
            .check()?;
        self.generate(expr)
    }

    /// Generates bytecode without the validation pass.
    ///
    /// Generation still rejects anything it cannot compile; the validation
    /// pass only adds earlier, more precise offsets.
    pub fn generate(&self, expr: &str) -> Result<BytecodeProgram, CompileError> {
        let program = CodeGen::new(self, expr).program()?;
        tracing::debug!(
            expr,
            ops = program.len(),
            max_stack = program.max_stack_depth(),
            "compiled expression"
        );
        Ok(program)
    }
}

/// Generation state for one expression.
struct CodeGen<'a> {
    registry: &'a FunctionRegistry,
    resolver: &'a dyn NameResolver,
    stack_limit: usize,
    nesting_limit: usize,
    allow_assignment: bool,

    source: &'a str,
    scanner: Scanner,

    ops: Vec<Op>,
    scalars: Vec<f64>,
    vectors: Vec<[f64; 3]>,

    /// Values on the stack after the ops emitted so far.
    sp: usize,
    max_sp: usize,
    /// Open groups, calls and exponents.
    nesting: usize,
}

impl<'a> CodeGen<'a> {
    fn new(compiler: &Compiler<'a>, source: &'a str) -> Self {
        CodeGen {
            registry: compiler.registry,
            resolver: compiler.resolver,
            stack_limit: compiler.stack_limit,
            nesting_limit: compiler.nesting_limit,
            allow_assignment: compiler.allow_assignment,
            source,
            scanner: Scanner::new(source),
            ops: Vec::new(),
            scalars: Vec::new(),
            vectors: Vec::new(),
            sp: 0,
            max_sp: 0,
            nesting: 0,
        }
    }

    fn program(mut self) -> Result<BytecodeProgram, CompileError> {
        if self.scanner.is_empty() {
            return Err(self.syntax_at(0, SyntaxKind::Empty));
        }

        let target = if self.allow_assignment {
            self.assignment_target()?
        } else {
            None
        };

        let start = self.scanner.offset();
        let comma = self.expression()?;

        if let Some(ch) = self.scanner.current() {
            let offset = self.scanner.offset();
            return Err(if ch == ')' {
                CompileError::syntax(self.source, offset, SyntaxKind::UnmatchedClose)
            } else {
                CompileError::unknown_token(self.source, offset)
            });
        }
        if self.sp != 1 {
            return Err(CompileError::syntax(
                self.source,
                comma.unwrap_or(start),
                SyntaxKind::MisplacedComma,
            ));
        }

        if let Some(index) = target {
            self.ops.push(Op::Assign(index));
        }

        Ok(BytecodeProgram::from_compiled(
            self.source,
            self.ops,
            self.scalars,
            self.vectors,
            self.max_sp,
        ))
    }

    /// Consumes `name =` if the statement has one.
    fn assignment_target(&mut self) -> Result<Option<usize>, CompileError> {
        let Some(eq) = self.scanner.find('=', 0) else {
            return Ok(None);
        };

        let name = self.scanner.read_identifier();
        let Some(name) = name.filter(|_| self.scanner.pos() == eq) else {
            return Err(self.syntax_at(0, SyntaxKind::BadAssignment));
        };
        let Some(index) = self.resolver.resolve_index(&name) else {
            return Err(self.syntax_at(0, SyntaxKind::UnknownName));
        };

        self.scanner.advance(); // consume '='
        Ok(Some(index))
    }

    /// Returns the offset of the first top-level comma, if any.
    fn expression(&mut self) -> Result<Option<usize>, CompileError> {
        self.add()?;

        let mut comma = None;
        while self.scanner.current() == Some(',') {
            comma.get_or_insert(self.scanner.offset());
            self.scanner.advance();
            self.add()?;
        }
        Ok(comma)
    }

    fn add(&mut self) -> Result<(), CompileError> {
        self.mult()?;
        while let Some(op) = self.peek_binary(&[BinaryOp::Add, BinaryOp::Sub]) {
            self.scanner.advance();
            self.mult()?;
            self.emit_binary(op);
        }
        Ok(())
    }

    fn mult(&mut self) -> Result<(), CompileError> {
        self.unary_minus()?;
        while let Some(op) = self.peek_binary(&[BinaryOp::Mul, BinaryOp::Div, BinaryOp::Mod]) {
            self.scanner.advance();
            self.unary_minus()?;
            self.emit_binary(op);
        }
        Ok(())
    }

    fn unary_minus(&mut self) -> Result<(), CompileError> {
        if self.scanner.current() == Some('-') {
            self.scanner.advance();
            self.pow()?;
            self.negate_top();
            Ok(())
        } else {
            self.pow()
        }
    }

    fn pow(&mut self) -> Result<(), CompileError> {
        self.element()?;
        while self.scanner.current() == Some('^') {
            self.descend(self.scanner.offset())?;
            self.scanner.advance();
            self.unary_minus()?;
            self.emit_binary(BinaryOp::Pow);
            self.nesting -= 1;
        }
        Ok(())
    }

    fn element(&mut self) -> Result<(), CompileError> {
        let offset = self.scanner.offset();

        match self.scanner.current() {
            Some('(') => {
                self.descend(offset)?;
                self.scanner.advance();
                let before = self.sp;
                let comma = self.expression()?;
                self.expect_close()?;
                if self.sp != before + 1 {
                    return Err(CompileError::syntax(
                        self.source,
                        comma.unwrap_or(offset),
                        SyntaxKind::MisplacedComma,
                    ));
                }
                self.nesting -= 1;
                Ok(())
            }
            Some(c) if c.is_ascii_digit() || c == '.' => match self.scanner.read_number() {
                Some(value) => self.push_scalar(value),
                None => Err(CompileError::syntax(self.source, offset, SyntaxKind::BadNumber)),
            },
            Some(c) if is_ident_start(c) => {
                let name = self.scanner.read_identifier().unwrap_or_default();
                let registry = self.registry;

                if self.scanner.current() == Some('(') {
                    if let Some(desc) = registry.lookup_by_name(&name) {
                        return self.call(desc, offset);
                    }
                }
                if let Some(index) = self.resolver.resolve_index(&name) {
                    return self.push(Op::PushVar(index));
                }
                if registry.contains(&name) {
                    let after = self.scanner.offset();
                    return Err(CompileError::syntax(
                        self.source,
                        after,
                        SyntaxKind::MissingCallParen,
                    ));
                }
                Err(CompileError::syntax(self.source, offset, SyntaxKind::UnknownName))
            }
            _ => Err(CompileError::unknown_token(self.source, offset)),
        }
    }

    /// Compiles `name(args)`; the cursor is on `(`.
    fn call(&mut self, desc: &FunctionDescriptor, offset: usize) -> Result<(), CompileError> {
        self.descend(self.scanner.offset())?;
        self.scanner.advance(); // consume '('
        if self.scanner.current() == Some(')') {
            let at = self.scanner.offset();
            return Err(CompileError::syntax(self.source, at, SyntaxKind::EmptyCall));
        }

        let before = self.sp;
        self.expression()?;
        self.expect_close()?;
        self.nesting -= 1;

        let actual = self.sp - before;
        if actual != desc.arity {
            return Err(CompileError::ArityMismatch {
                expr: self.source.to_string(),
                offset,
                function: desc.name.clone(),
                expected: desc.arity,
                actual,
            });
        }

        if desc.opcode == Builtin::Vec3d && self.fold_vec3d() {
            return Ok(());
        }

        self.ops.push(Op::Call {
            func: desc.opcode,
            arity: desc.arity,
        });
        self.sp = self.sp + 1 - desc.arity;
        Ok(())
    }

    /// Opens one nesting level at `offset`.
    fn descend(&mut self, offset: usize) -> Result<(), CompileError> {
        if self.nesting >= self.nesting_limit {
            return Err(CompileError::NestingLimit {
                expr: self.source.to_string(),
                offset,
                limit: self.nesting_limit,
            });
        }
        self.nesting += 1;
        Ok(())
    }

    fn expect_close(&mut self) -> Result<(), CompileError> {
        match self.scanner.current() {
            Some(')') => {
                self.scanner.advance();
                Ok(())
            }
            None => Err(self.syntax_at(self.scanner.len(), SyntaxKind::Unclosed)),
            Some(_) => Err(CompileError::unknown_token(self.source, self.scanner.offset())),
        }
    }

    fn peek_binary(&self, allowed: &[BinaryOp]) -> Option<BinaryOp> {
        self.scanner
            .current()
            .and_then(BinaryOp::from_symbol)
            .filter(|op| allowed.contains(op))
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn push(&mut self, op: Op) -> Result<(), CompileError> {
        self.ops.push(op);
        self.sp += 1;
        self.max_sp = self.max_sp.max(self.sp);
        if self.sp > self.stack_limit {
            return Err(CompileError::StackLimit {
                expr: self.source.to_string(),
                depth: self.sp,
                limit: self.stack_limit,
            });
        }
        Ok(())
    }

    fn push_scalar(&mut self, value: f64) -> Result<(), CompileError> {
        let index = self.scalars.len();
        self.scalars.push(value);
        self.push(Op::PushScalar(index))
    }

    fn emit_binary(&mut self, op: BinaryOp) {
        self.ops.push(Op::Binary(op));
        self.sp -= 1;
    }

    /// Negates the operand just compiled.
    ///
    /// An immediate operand is negated in its pool; a negated operand loses
    /// its negation. Otherwise a `Neg` is emitted.
    fn negate_top(&mut self) {
        match self.ops.last().copied() {
            Some(Op::PushScalar(index)) => {
                if let Some(x) = self.scalars.get_mut(index) {
                    *x = -*x;
                }
            }
            Some(Op::PushVector(index)) => {
                if let Some(v) = self.vectors.get_mut(index) {
                    v.iter_mut().for_each(|c| *c = -*c);
                }
            }
            Some(Op::Unary(UnaryOp::Neg)) => {
                self.ops.pop();
            }
            _ => self.ops.push(Op::Unary(UnaryOp::Neg)),
        }
    }

    /// `vec3d` of three immediates becomes one vector immediate.
    ///
    /// Each argument leaves one value, so three trailing scalar pushes are
    /// exactly the three arguments, and they own the last three pool entries.
    fn fold_vec3d(&mut self) -> bool {
        let n = self.ops.len();
        if n < 3 || !self.ops[n - 3..].iter().all(|op| matches!(op, Op::PushScalar(_))) {
            return false;
        }

        let m = self.scalars.len();
        let v = [self.scalars[m - 3], self.scalars[m - 2], self.scalars[m - 1]];
        self.scalars.truncate(m - 3);
        self.ops.truncate(n - 3);

        self.ops.push(Op::PushVector(self.vectors.len()));
        self.vectors.push(v);
        self.sp -= 2;
        true
    }

    fn syntax_at(&self, pos: usize, kind: SyntaxKind) -> CompileError {
        CompileError::syntax(self.source, self.scanner.offset_at(pos), kind)
    }
}
