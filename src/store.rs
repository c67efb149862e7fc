use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bytecode::disasm;
use crate::bytecode::{BytecodeProgram, CompileError, Compiler};
use crate::frontend::scanner::is_identifier;
use crate::lang::{FromValue, FunctionRegistry, NameResolver, Value};
use crate::runtime::{EngineError, Slot, VariableSink, VariableSource, Vm, VmConfig};

/// What a variable currently holds.
#[derive(Debug, Clone, PartialEq)]
pub enum VarKind {
    /// Declared, never written.
    Unset,
    Literal(Value),
    /// Re-evaluated on every read.
    Formula(Arc<BytecodeProgram>),
}

impl VarKind {
    fn label(&self) -> &'static str {
        match self {
            VarKind::Unset => "unset",
            VarKind::Literal(_) => "literal",
            VarKind::Formula(_) => "formula",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    index: usize,
    kind: VarKind,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> &VarKind {
        &self.kind
    }

    pub fn is_set(&self) -> bool {
        !matches!(self.kind, VarKind::Unset)
    }

    pub fn is_formula(&self) -> bool {
        matches!(self.kind, VarKind::Formula(_))
    }

    /// Source text of a formula.
    pub fn formula(&self) -> Option<&str> {
        match &self.kind {
            VarKind::Formula(program) => Some(program.source()),
            _ => None,
        }
    }
}

/// Name-indexed table of literal and formula variables.
///
/// Indices are handed out on first definition and never change; redefining a
/// name replaces its contents in place, so compiled formulas that refer to it
/// see the new definition on their next evaluation. Nothing is cached.
///
/// Names must be identifiers (`[A-Za-z_][A-Za-z0-9_]*`), since any other
/// name could never appear in a formula.
///
/// Writes take `&mut self` and reads take `&self`. A store shared by
/// reference across threads is therefore read-only for all of them.
#[derive(Debug, Clone)]
pub struct VariableStore {
    vars: Vec<Variable>,
    index: HashMap<String, usize>,
    registry: FunctionRegistry,
    vm: Vm,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableStore {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self::with_registry(FunctionRegistry::with_builtins(), config)
    }

    pub fn with_registry(registry: FunctionRegistry, config: VmConfig) -> Self {
        VariableStore {
            vars: Vec::new(),
            index: HashMap::new(),
            registry,
            vm: Vm::with_config(config),
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &VmConfig {
        self.vm.config()
    }

    // =========================================================================
    // Definition
    // =========================================================================

    /// Creates an unset variable, or returns the index of an existing one
    /// without touching it.
    pub fn declare(&mut self, name: &str) -> Result<usize, CompileError> {
        match self.index.get(name) {
            Some(&index) => Ok(index),
            None => self.define(name, VarKind::Unset),
        }
    }

    pub fn add_literal(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<usize, CompileError> {
        self.define(name, VarKind::Literal(value.into()))
    }

    /// Binds an already compiled program. It is not evaluated here.
    pub fn bind_formula(
        &mut self,
        name: &str,
        program: BytecodeProgram,
    ) -> Result<usize, CompileError> {
        self.define(name, VarKind::Formula(Arc::new(program)))
    }

    /// Compiles `expr` against the variables defined so far and binds it.
    ///
    /// On failure the store is unchanged.
    pub fn add_formula(&mut self, name: &str, expr: &str) -> Result<usize, CompileError> {
        check_name(name)?;
        let program = self.compiler().compile(expr)?;
        self.bind_formula(name, program)
    }

    /// Gives `to` the definition of `from`. A formula stays live: the copy
    /// evaluates the same expression, not its current value.
    pub fn copy_var(&mut self, from: &str, to: &str) -> Result<usize, EngineError> {
        let kind = self
            .get(from)
            .map(|var| var.kind.clone())
            .ok_or_else(|| EngineError::UnknownVariable {
                name: from.to_string(),
            })?;
        self.define(to, kind).map_err(EngineError::from)
    }

    fn define(&mut self, name: &str, kind: VarKind) -> Result<usize, CompileError> {
        if let Some(&index) = self.index.get(name) {
            let var = &mut self.vars[index];
            if var.is_set() && var.is_formula() != matches!(kind, VarKind::Formula(_)) {
                warn!(
                    name,
                    from = var.kind.label(),
                    to = kind.label(),
                    "variable changes between literal and formula"
                );
            }
            debug!(name, index, kind = kind.label(), "variable redefined");
            var.kind = kind;
            return Ok(index);
        }

        check_name(name)?;
        let index = self.vars.len();
        debug!(name, index, kind = kind.label(), "variable declared");
        self.vars.push(Variable {
            name: name.to_string(),
            index,
            kind,
        });
        self.index.insert(name.to_string(), index);
        Ok(index)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn has_var(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.index.get(name).map(|&index| &self.vars[index])
    }

    /// Variables in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.vars.iter().map(Variable::name).collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// A compiler resolving names against this store.
    pub fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.registry, self).with_stack_limit(self.config().max_stack_depth)
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Current value of variable `index`; formulas are evaluated.
    pub fn read_typed(&self, index: usize) -> Result<Value, EngineError> {
        self.vm.read(self, index)
    }

    pub fn eval(&self, name: &str) -> Result<Value, EngineError> {
        let index = self
            .resolve_index(name)
            .ok_or_else(|| EngineError::UnknownVariable {
                name: name.to_string(),
            })?;
        self.read_typed(index)
    }

    /// Reads `name` as `f64` or `[f64; 3]`. A value of the other kind is a
    /// type mismatch, never a conversion.
    pub fn eval_var<T: FromValue>(&self, name: &str) -> Result<T, EngineError> {
        let value = self.eval(name)?;
        T::from_value(value).ok_or_else(|| {
            EngineError::type_mismatch(format!(
                "'{}' holds a {}, a {} was requested",
                name,
                value.type_name(),
                T::KIND
            ))
        })
    }

    pub fn eval_scalar(&self, name: &str) -> Result<f64, EngineError> {
        self.eval_var(name)
    }

    pub fn eval_vector(&self, name: &str) -> Result<[f64; 3], EngineError> {
        self.eval_var(name)
    }

    /// Compiles and runs an expression without changing the store.
    pub fn evaluate(&self, expr: &str) -> Result<Value, EngineError> {
        let program = self.compiler().compile(expr)?;
        self.vm.execute(&program, self)
    }

    /// Compiles and runs an expression or a `name = expr` statement.
    ///
    /// A statement stores the result as a literal in `name`, declaring it
    /// first if needed. If compilation fails nothing is declared.
    pub fn eval_expr(&mut self, expr: &str) -> Result<Value, EngineError> {
        let target = statement_target(expr).filter(|name| !self.has_var(name));

        let program = match target {
            Some(name) => {
                let resolver = PendingTarget { store: self, name };
                Compiler::new(&self.registry, &resolver)
                    .with_stack_limit(self.config().max_stack_depth)
                    .allow_assignment(true)
                    .compile(expr)?
            }
            None => self.compiler().allow_assignment(true).compile(expr)?,
        };

        if let Some(name) = target {
            self.declare(name)?;
        }

        let vm = self.vm.clone();
        vm.execute_mut(&program, self)
    }

    /// Writes one line per variable: its value, or why it has none.
    pub fn write_all(&self, out: &mut dyn Write) -> io::Result<()> {
        let width = self.vars.iter().map(|v| v.name.len()).max().unwrap_or(0);

        for var in &self.vars {
            let value = match &var.kind {
                VarKind::Unset => "<unset>".to_string(),
                _ => match self.read_typed(var.index) {
                    Ok(value) => value.to_string(),
                    Err(err) => format!("<error: {}>", err.root_cause()),
                },
            };
            match var.formula() {
                Some(source) => {
                    writeln!(out, "{:<width$} = {:<24} # {}", var.name, value, source)?
                }
                None => writeln!(out, "{:<width$} = {}", var.name, value)?,
            }
        }
        Ok(())
    }

    /// Bytecode listing of a formula variable.
    pub fn disassemble(&self, name: &str) -> Option<String> {
        match &self.get(name)?.kind {
            VarKind::Formula(program) => {
                Some(disasm::disassemble(program, &self.registry, self))
            }
            _ => None,
        }
    }
}

fn check_name(name: &str) -> Result<(), CompileError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(CompileError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// The left-hand name of a `name = expr` statement.
fn statement_target(expr: &str) -> Option<&str> {
    let (lhs, _) = expr.split_once('=')?;
    let name = lhs.trim();
    is_identifier(name).then_some(name)
}

/// Resolves an assignment target that will be declared once the statement
/// compiles.
struct PendingTarget<'a> {
    store: &'a VariableStore,
    name: &'a str,
}

impl NameResolver for PendingTarget<'_> {
    fn resolve_index(&self, name: &str) -> Option<usize> {
        self.store
            .resolve_index(name)
            .or_else(|| (name == self.name).then_some(self.store.len()))
    }
}

impl NameResolver for VariableStore {
    fn resolve_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn name_of(&self, index: usize) -> Option<&str> {
        self.vars.get(index).map(Variable::name)
    }
}

impl VariableSource for VariableStore {
    fn slot(&self, index: usize) -> Result<Slot, EngineError> {
        let var = self.vars.get(index).ok_or_else(|| {
            EngineError::Internal(format!("variable index {} out of range", index))
        })?;

        match &var.kind {
            VarKind::Unset => Err(EngineError::UnsetVariable {
                index,
                name: var.name.clone(),
            }),
            VarKind::Literal(value) => Ok(Slot::Value(*value)),
            VarKind::Formula(program) => Ok(Slot::Formula(Arc::clone(program))),
        }
    }
}

impl VariableSink for VariableStore {
    /// `Assign` writes a literal, replacing whatever the variable held.
    fn assign_var(&mut self, index: usize, value: Value) -> Result<(), EngineError> {
        let name = self
            .vars
            .get(index)
            .map(|var| var.name.clone())
            .ok_or_else(|| {
                EngineError::Internal(format!("assignment to unknown variable #{}", index))
            })?;
        self.add_literal(&name, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::SyntaxKind;

    fn assert_scalar(store: &VariableStore, name: &str, expected: f64) {
        let actual = store.eval_scalar(name).unwrap();
        assert!(
            (actual - expected).abs() < 1e-12,
            "{}: expected {}, got {}",
            name,
            expected,
            actual
        );
    }

    #[test]
    fn test_literal_round_trip() {
        let mut store = VariableStore::new();
        store.add_literal("x", 3.5).unwrap();
        store.add_literal("v", [1.0, 2.0, 3.0]).unwrap();

        assert_eq!(store.eval_scalar("x").unwrap(), 3.5);
        assert_eq!(store.eval_vector("v").unwrap(), [1.0, 2.0, 3.0]);
        assert_eq!(store.eval_var::<f64>("x").unwrap(), 3.5);
    }

    #[test]
    fn test_indices_are_stable() {
        let mut store = VariableStore::new();
        assert_eq!(store.add_literal("a", 1.0).unwrap(), 0);
        assert_eq!(store.add_literal("b", 2.0).unwrap(), 1);
        assert_eq!(store.add_literal("a", 5.0).unwrap(), 0);
        assert_eq!(store.add_formula("a", "b * 2").unwrap(), 0);
        assert_eq!(store.len(), 2);
        assert_eq!(store.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_live_reevaluation() {
        let mut store = VariableStore::new();
        store.add_literal("radius", 2.0).unwrap();
        store.add_formula("area", "3 * radius^2").unwrap();
        assert_scalar(&store, "area", 12.0);

        store.add_literal("radius", 3.0).unwrap();
        assert_scalar(&store, "area", 27.0);

        // redefining an upstream literal as a formula is also seen
        store.add_literal("scale", 0.5).unwrap();
        store.add_formula("radius", "scale * 4").unwrap();
        assert_scalar(&store, "area", 12.0);
    }

    #[test]
    fn test_formula_chain() {
        let mut store = VariableStore::new();
        store.add_literal("a", 1.0).unwrap();
        store.add_formula("b", "a + 1").unwrap();
        store.add_formula("c", "b * 10").unwrap();
        store.add_formula("origin", "vec3d(c, 0, -c)").unwrap();

        assert_scalar(&store, "c", 20.0);
        assert_eq!(store.eval_vector("origin").unwrap(), [20.0, 0.0, -20.0]);
    }

    #[test]
    fn test_mixed_scaling() {
        let mut store = VariableStore::new();
        store.add_literal("d", [1.0, 2.0, 2.0]).unwrap();
        store.add_formula("left", "2 * d").unwrap();
        store.add_formula("right", "d * 2").unwrap();
        store.add_formula("len", "sqrt(dot(d, d))").unwrap();

        assert_eq!(store.eval_vector("left").unwrap(), [2.0, 4.0, 4.0]);
        assert_eq!(store.eval_vector("right").unwrap(), [2.0, 4.0, 4.0]);
        assert_scalar(&store, "len", 3.0);
    }

    #[test]
    fn test_type_mismatch_on_read() {
        let mut store = VariableStore::new();
        store.add_formula("v", "vec3d(1, 2, 3)").unwrap();

        let err = store.eval_scalar("v").unwrap_err();
        assert_eq!(
            err.to_string(),
            "type mismatch: 'v' holds a vector, a scalar was requested"
        );
    }

    #[test]
    fn test_unknown_variable() {
        let store = VariableStore::new();
        assert!(matches!(
            store.eval_scalar("nope"),
            Err(EngineError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_compile_errors_leave_store_unchanged() {
        let mut store = VariableStore::new();
        store.add_literal("x", 1.0).unwrap();

        let err = store.add_formula("y", "x + zz").unwrap_err();
        assert_eq!(err, CompileError::syntax("x + zz", 4, SyntaxKind::UnknownName));
        assert!(!store.has_var("y"));

        let err = store.add_formula("y", "atan2(1)").unwrap_err();
        assert!(matches!(err, CompileError::ArityMismatch { .. }));
        assert!(!store.has_var("y"));
    }

    #[test]
    fn test_unset_variable_error_chain() {
        let mut store = VariableStore::new();
        store.declare("thickness").unwrap();
        store.add_formula("outer", "2 * thickness").unwrap();
        store.add_formula("shell", "outer + 1").unwrap();

        let err = store.eval_scalar("shell").unwrap_err();
        assert_eq!(err.variable_chain(), vec!["shell", "outer", "thickness"]);
        assert!(matches!(
            err.root_cause(),
            EngineError::UnsetVariable { index: 0, .. }
        ));

        store.add_literal("thickness", 0.5).unwrap();
        assert_scalar(&store, "shell", 2.0);
    }

    #[test]
    fn test_domain_errors_surface() {
        let mut store = VariableStore::new();
        store.add_literal("x", -1.0).unwrap();
        store.add_formula("r", "sqrt(x)").unwrap();

        let err = store.eval_scalar("r").unwrap_err();
        assert!(matches!(
            err.root_cause(),
            EngineError::DomainError { .. }
        ));
        assert_eq!(err.variable_chain(), vec!["r"]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut store = VariableStore::new();
        store.add_literal("n", 1.0).unwrap();
        store.add_formula("n", "n + 1").unwrap();

        let err = store.eval_scalar("n").unwrap_err();
        assert!(matches!(
            &err,
            EngineError::FormulaCycle { names } if names == &["n", "n"]
        ));
    }

    #[test]
    fn test_mutual_reference_names_both_variables() {
        let mut store = VariableStore::new();
        store.declare("ping").unwrap();
        store.add_formula("pong", "ping * 2").unwrap();
        store.add_formula("ping", "pong + 1").unwrap();
        store.add_formula("total", "ping + 0").unwrap();

        let err = store.eval_scalar("ping").unwrap_err();
        assert_eq!(err.to_string(), "formula cycle: ping -> pong -> ping");

        // a formula outside the cycle stays in the chain
        let err = store.eval_scalar("total").unwrap_err();
        assert_eq!(err.variable_chain(), vec!["total", "ping", "pong"]);
        assert!(err.hint().is_some());
    }

    fn chain(store: &mut VariableStore, len: usize) {
        store.add_literal("v0", 0.0).unwrap();
        for i in 1..=len {
            store
                .add_formula(&format!("v{}", i), &format!("v{} + 1", i - 1))
                .unwrap();
        }
    }

    #[test]
    fn test_long_acyclic_chain_at_default_config() {
        let mut store = VariableStore::new();
        chain(&mut store, 300);

        assert_scalar(&store, "v200", 200.0);
        assert_scalar(&store, "v300", 300.0);
        assert_eq!(store.evaluate("v300 * 2").unwrap(), Value::Scalar(600.0));
    }

    #[test]
    fn test_chain_past_depth_limit_names_outermost() {
        let mut store = VariableStore::with_config(VmConfig {
            max_formula_depth: 8,
            ..VmConfig::default()
        });
        chain(&mut store, 20);

        assert_scalar(&store, "v8", 8.0);
        let err = store.eval_scalar("v20").unwrap_err();
        assert!(matches!(
            &err,
            EngineError::RecursionLimit { name, limit: 8 } if name == "v20"
        ));
        assert_eq!(err.variable_chain(), vec!["v20"]);
    }

    #[test]
    fn test_unset_at_bottom_of_long_chain() {
        let mut store = VariableStore::new();
        store.declare("v0").unwrap();
        for i in 1..=300 {
            store
                .add_formula(&format!("v{}", i), &format!("v{} + 1", i - 1))
                .unwrap();
        }
        let err = store.eval_scalar("v300").unwrap_err();
        let chain = err.variable_chain();
        assert_eq!(chain.len(), 301);
        assert_eq!(chain.first(), Some(&"v300"));
        assert_eq!(chain.last(), Some(&"v0"));
    }

    #[test]
    fn test_names_must_be_identifiers() {
        let mut store = VariableStore::new();
        store.add_literal("a", 1.0).unwrap();

        for name in ["", "b c", "2x", "x-y"] {
            let invalid = CompileError::InvalidName {
                name: name.to_string(),
            };
            assert_eq!(store.add_formula(name, "a").unwrap_err(), invalid);
            assert_eq!(store.add_literal(name, 1.0).unwrap_err(), invalid);
            assert_eq!(store.declare(name).unwrap_err(), invalid);
        }
        assert!(matches!(
            store.copy_var("a", "not ok"),
            Err(EngineError::Compile(CompileError::InvalidName { .. }))
        ));
        assert_eq!(store.names(), vec!["a"]);
    }

    #[test]
    fn test_copy_var_keeps_formula_live() {
        let mut store = VariableStore::new();
        store.add_literal("a", 1.0).unwrap();
        store.add_formula("b", "a * 3").unwrap();
        store.copy_var("b", "c").unwrap();

        store.add_literal("a", 2.0).unwrap();
        assert_scalar(&store, "c", 6.0);

        assert!(matches!(
            store.copy_var("missing", "d"),
            Err(EngineError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_evaluate_is_read_only() {
        let mut store = VariableStore::new();
        store.add_literal("a", 4.0).unwrap();

        assert_eq!(store.evaluate("a / 8").unwrap(), Value::Scalar(0.5));
        assert!(matches!(
            store.evaluate("a = 2"),
            Err(EngineError::Compile(CompileError::Syntax {
                kind: SyntaxKind::BadAssignment,
                ..
            }))
        ));
    }

    #[test]
    fn test_eval_expr_statement() {
        let mut store = VariableStore::new();
        store.add_literal("a", 4.0).unwrap();
        store.add_formula("twice", "a * 2").unwrap();

        let value = store.eval_expr("b = twice + 1").unwrap();
        assert_eq!(value, Value::Scalar(9.0));

        // `b` holds the value, not the formula
        store.add_literal("a", 0.0).unwrap();
        assert_scalar(&store, "b", 9.0);
        assert!(!store.get("b").unwrap().is_formula());

        // an existing formula is overwritten with a literal
        store.eval_expr("twice = 7").unwrap();
        assert_eq!(store.get("twice").unwrap().kind(), &VarKind::Literal(Value::Scalar(7.0)));

        assert_eq!(store.eval_expr("a + 1").unwrap(), Value::Scalar(1.0));
    }

    #[test]
    fn test_eval_expr_failure_declares_nothing() {
        let mut store = VariableStore::new();
        assert!(store.eval_expr("fresh = nope + 1").is_err());
        assert!(!store.has_var("fresh"));
    }

    #[test]
    fn test_parallel_readers() {
        let mut store = VariableStore::new();
        store.add_literal("base", 1.5).unwrap();
        store.add_formula("doubled", "base * 2").unwrap();
        store.add_formula("offset", "vec3d(doubled, 0, 0)").unwrap();

        let store = &store;
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(move || {
                    for _ in 0..100 {
                        assert_eq!(store.eval_scalar("doubled").unwrap(), 3.0);
                        assert_eq!(store.eval_vector("offset").unwrap(), [3.0, 0.0, 0.0]);
                    }
                });
            }
        });
    }

    #[test]
    fn test_write_all() {
        let mut store = VariableStore::new();
        store.add_literal("a", 2.0).unwrap();
        store.add_formula("bb", "a * 2").unwrap();
        store.declare("c").unwrap();
        store.add_formula("d", "sqrt(-a)").unwrap();

        let mut out = Vec::new();
        store.write_all(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "a  = 2");
        assert!(lines[1].starts_with("bb = 4 "));
        assert!(lines[1].ends_with("# a * 2"));
        assert_eq!(lines[2], "c  = <unset>");
        assert!(lines[3].contains("<error: domain error: sqrt is undefined for -2>"));
    }

    #[test]
    fn test_disassemble_formula() {
        let mut store = VariableStore::new();
        store.add_literal("a", 2.0).unwrap();
        store.add_formula("b", "a * 2").unwrap();

        let text = store.disassemble("b").unwrap();
        assert!(text.contains("PUSH_VAR    a (#0)"));
        assert!(store.disassemble("a").is_none());
        assert!(store.disassemble("zz").is_none());
    }
}
