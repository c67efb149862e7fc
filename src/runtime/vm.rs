use std::ops::Deref;
use std::sync::Arc;

use tracing::trace;

use crate::bytecode::{BytecodeProgram, Op};
use crate::lang::{NameResolver, Value};
use crate::runtime::builtins;
use crate::runtime::runtime_error::EngineError;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Longest chain of formulas reading other formulas.
    pub max_formula_depth: usize,
    /// Largest evaluation stack a single program may ask for.
    pub max_stack_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_formula_depth: 512,
            max_stack_depth: 1024,
        }
    }
}

/// What a variable read yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Value(Value),
    /// Evaluated in place of the read.
    Formula(Arc<BytecodeProgram>),
}

/// Where `PushVar` reads from. Names are only used in diagnostics.
pub trait VariableSource: NameResolver {
    fn slot(&self, index: usize) -> Result<Slot, EngineError>;
}

/// A source that also accepts `Assign`.
pub trait VariableSink: VariableSource {
    fn assign_var(&mut self, index: usize, value: Value) -> Result<(), EngineError>;
}

/// Stack machine for compiled expressions.
///
/// Reading a formula variable runs the formula's program on the same value
/// stack. Formulas in progress are kept as a list of activations on the
/// heap, so a long chain of formulas never deepens the native stack. Reading
/// a formula that is already in progress is a [`EngineError::FormulaCycle`];
/// a chain longer than `max_formula_depth` is a
/// [`EngineError::RecursionLimit`].
#[derive(Debug, Clone, Default)]
pub struct Vm {
    config: VmConfig,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Vm { config }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Current value of variable `index`, evaluating it if it is a formula.
    pub fn read<S>(&self, source: &S, index: usize) -> Result<Value, EngineError>
    where
        S: VariableSource + ?Sized,
    {
        match source.slot(index)? {
            Slot::Value(value) => Ok(value),
            Slot::Formula(program) => {
                self.run(Code::Shared(program), Some(index), &mut ReadOnly(source))
            }
        }
    }

    /// Runs a program that may only read variables. An `Assign` fails with
    /// [`EngineError::ReadOnlyAssignment`].
    pub fn execute<S>(&self, program: &BytecodeProgram, source: &S) -> Result<Value, EngineError>
    where
        S: VariableSource + ?Sized,
    {
        self.run(Code::Borrowed(program), None, &mut ReadOnly(source))
    }

    /// Runs a program whose `Assign` instructions write through `sink`.
    pub fn execute_mut<S>(&self, program: &BytecodeProgram, sink: &mut S) -> Result<Value, EngineError>
    where
        S: VariableSink + ?Sized,
    {
        self.run(Code::Borrowed(program), None, &mut Writable(sink))
    }

    fn run<F: Frame>(
        &self,
        program: Code<'_>,
        var: Option<usize>,
        frame: &mut F,
    ) -> Result<Value, EngineError> {
        let mut calls = Vec::new();
        let mut stack = Vec::with_capacity(program.max_stack_depth());

        self.enter(&mut calls, program, var, 0, frame)
            .and_then(|()| self.dispatch(&mut calls, &mut stack, frame))
            .map_err(|err| unwind(err, &calls, frame))
    }

    /// Pushes an activation for `program`, which evaluates variable `var`
    /// when it is a formula read.
    fn enter<'p, F: Frame>(
        &self,
        calls: &mut Vec<Activation<'p>>,
        program: Code<'p>,
        var: Option<usize>,
        base: usize,
        frame: &F,
    ) -> Result<(), EngineError> {
        if let Some(index) = var {
            if let Some(start) = calls.iter().position(|a| a.var == Some(index)) {
                let mut names: Vec<String> = calls[start..]
                    .iter()
                    .filter_map(|a| a.var)
                    .map(|i| frame.name(i))
                    .collect();
                names.push(frame.name(index));
                return Err(EngineError::FormulaCycle { names });
            }

            let limit = self.config.max_formula_depth;
            if calls.iter().filter(|a| a.var.is_some()).count() >= limit {
                let outermost = calls.iter().find_map(|a| a.var).unwrap_or(index);
                return Err(EngineError::RecursionLimit {
                    name: frame.name(outermost),
                    limit,
                });
            }
        }

        if program.max_stack_depth() > self.config.max_stack_depth {
            return Err(EngineError::Internal(format!(
                "program '{}' needs a stack of {}, the limit is {}",
                program.source(),
                program.max_stack_depth(),
                self.config.max_stack_depth
            )));
        }

        trace!(
            expr = program.source(),
            depth = calls.len(),
            ops = program.len(),
            "vm run"
        );

        calls.push(Activation {
            program,
            var,
            ip: 0,
            base,
            scalar_cursor: 0,
            vector_cursor: 0,
        });
        Ok(())
    }

    fn dispatch<'p, F: Frame>(
        &self,
        calls: &mut Vec<Activation<'p>>,
        stack: &mut Vec<Value>,
        frame: &mut F,
    ) -> Result<Value, EngineError> {
        loop {
            let Some(top) = calls.last_mut() else {
                return Err(EngineError::Internal("no program to run".to_string()));
            };
            debug_assert!(stack.len() - top.base <= top.program.max_stack_depth());

            let ip = top.ip;
            let Some(&op) = top.program.ops().get(ip) else {
                if stack.len() != top.base + 1 {
                    return Err(EngineError::Internal(format!(
                        "program '{}' did not leave exactly one value",
                        top.program.source()
                    )));
                }
                calls.pop();
                if calls.is_empty() {
                    return stack.pop().ok_or_else(|| underflow(ip));
                }
                continue;
            };
            top.ip += 1;

            match op {
                Op::PushScalar(index) => {
                    let x = pool_entry(top.program.scalars(), index, &mut top.scalar_cursor, ip)?;
                    stack.push(Value::Scalar(x));
                }
                Op::PushVector(index) => {
                    let v = pool_entry(top.program.vectors(), index, &mut top.vector_cursor, ip)?;
                    stack.push(Value::Vector(v));
                }
                Op::PushVar(index) => match frame.read(index)? {
                    Slot::Value(value) => stack.push(value),
                    Slot::Formula(program) => {
                        let base = stack.len();
                        self.enter(calls, Code::Shared(program), Some(index), base, frame)?;
                    }
                },
                Op::Unary(unary) => {
                    let a = pop(stack, top.base, ip)?;
                    stack.push(builtins::unary(unary, a)?);
                }
                Op::Binary(binary) => {
                    let b = pop(stack, top.base, ip)?;
                    let a = pop(stack, top.base, ip)?;
                    stack.push(builtins::binary(binary, a, b)?);
                }
                Op::Call { func, arity } => {
                    let Some(base) = stack.len().checked_sub(arity).filter(|&b| b >= top.base)
                    else {
                        return Err(underflow(ip));
                    };
                    let result = builtins::call(func, &stack[base..])?;
                    stack.truncate(base);
                    stack.push(result);
                }
                Op::Assign(index) => {
                    if stack.len() <= top.base {
                        return Err(underflow(ip));
                    }
                    let value = *stack.last().ok_or_else(|| underflow(ip))?;
                    frame.assign(index, value)?;
                }
            }
        }
    }
}

/// Wraps `err` in the formulas that were in progress, innermost first.
fn unwind<F: Frame>(mut err: EngineError, calls: &[Activation<'_>], frame: &F) -> EngineError {
    for index in calls.iter().rev().filter_map(|a| a.var) {
        err = err.within(&frame.name(index));
    }
    err
}

/// One program in progress.
struct Activation<'p> {
    program: Code<'p>,
    /// The formula variable being evaluated; `None` for a program run
    /// directly.
    var: Option<usize>,
    ip: usize,
    /// Stack height when the program started.
    base: usize,
    scalar_cursor: usize,
    vector_cursor: usize,
}

enum Code<'p> {
    Borrowed(&'p BytecodeProgram),
    Shared(Arc<BytecodeProgram>),
}

impl Deref for Code<'_> {
    type Target = BytecodeProgram;

    fn deref(&self) -> &BytecodeProgram {
        match self {
            Code::Borrowed(program) => *program,
            Code::Shared(program) => &**program,
        }
    }
}

fn pool_entry<T: Copy>(
    pool: &[T],
    index: usize,
    cursor: &mut usize,
    ip: usize,
) -> Result<T, EngineError> {
    if index != *cursor {
        return Err(EngineError::Internal(format!(
            "immediate #{} out of order at ip={}, expected #{}",
            index, ip, cursor
        )));
    }
    let value = pool.get(index).copied().ok_or_else(|| {
        EngineError::Internal(format!("immediate #{} missing at ip={}", index, ip))
    })?;
    *cursor += 1;
    Ok(value)
}

/// Pops a value that belongs to the current program.
fn pop(stack: &mut Vec<Value>, base: usize, ip: usize) -> Result<Value, EngineError> {
    if stack.len() <= base {
        return Err(underflow(ip));
    }
    stack.pop().ok_or_else(|| underflow(ip))
}

fn underflow(ip: usize) -> EngineError {
    EngineError::Internal(format!("stack underflow at ip={}", ip))
}

// Variable access for one run: read-only or writable.
trait Frame {
    fn read(&self, index: usize) -> Result<Slot, EngineError>;
    fn assign(&mut self, index: usize, value: Value) -> Result<(), EngineError>;
    fn name(&self, index: usize) -> String;
}

fn display_name<S: NameResolver + ?Sized>(source: &S, index: usize) -> String {
    source
        .name_of(index)
        .map_or_else(|| format!("#{}", index), str::to_string)
}

struct ReadOnly<'s, S: ?Sized>(&'s S);

impl<S: VariableSource + ?Sized> Frame for ReadOnly<'_, S> {
    fn read(&self, index: usize) -> Result<Slot, EngineError> {
        self.0.slot(index)
    }

    fn assign(&mut self, index: usize, _value: Value) -> Result<(), EngineError> {
        Err(EngineError::ReadOnlyAssignment { index })
    }

    fn name(&self, index: usize) -> String {
        display_name(self.0, index)
    }
}

struct Writable<'s, S: ?Sized>(&'s mut S);

impl<S: VariableSink + ?Sized> Frame for Writable<'_, S> {
    fn read(&self, index: usize) -> Result<Slot, EngineError> {
        self.0.slot(index)
    }

    fn assign(&mut self, index: usize, value: Value) -> Result<(), EngineError> {
        self.0.assign_var(index, value)
    }

    fn name(&self, index: usize) -> String {
        display_name(&*self.0, index)
    }
}
