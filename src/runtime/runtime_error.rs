use thiserror::Error;

use crate::bytecode::CompileError;

/// Failure while reading or evaluating a variable.
///
/// Formula evaluation wraps every failure in [`EngineError::InFormula`] on
/// the way out, so an error from deep inside a chain of formulas keeps the
/// names it passed through.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("variable '{name}' (#{index}) is declared but was never set")]
    UnsetVariable { index: usize, name: String },

    #[error("type mismatch: {context}")]
    TypeMismatch { context: String },

    #[error("domain error: {operation} is undefined for {argument}")]
    DomainError { operation: String, argument: String },

    #[error("division by zero in {operation}")]
    DivisionByZero { operation: String },

    /// `name` is the outermost formula of the chain.
    #[error("formulas read from '{name}' nest deeper than {limit} levels")]
    RecursionLimit { name: String, limit: usize },

    /// A formula read while it was already being evaluated. `names` runs
    /// from the first formula of the cycle back to itself.
    #[error("formula cycle: {}", .names.join(" -> "))]
    FormulaCycle { names: Vec<String> },

    #[error("cannot assign variable #{index} during a read-only evaluation")]
    ReadOnlyAssignment { index: usize },

    #[error("in formula '{name}': {source}")]
    InFormula {
        name: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn type_mismatch(context: impl Into<String>) -> Self {
        EngineError::TypeMismatch {
            context: context.into(),
        }
    }

    pub fn domain(operation: impl Into<String>, argument: impl std::fmt::Display) -> Self {
        EngineError::DomainError {
            operation: operation.into(),
            argument: argument.to_string(),
        }
    }

    pub fn division_by_zero(operation: impl Into<String>) -> Self {
        EngineError::DivisionByZero {
            operation: operation.into(),
        }
    }

    /// Records that the error surfaced while evaluating formula `name`.
    ///
    /// A recursion-limit error is returned unchanged, and so is a cycle
    /// that already lists `name`.
    pub fn within(self, name: &str) -> Self {
        match self {
            EngineError::RecursionLimit { .. } => self,
            EngineError::FormulaCycle { ref names } if names.iter().any(|n| n == name) => self,
            other => EngineError::InFormula {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Variables the failure passed through, outermost first, ending with
    /// the variable that could not be read when there is one.
    pub fn variable_chain(&self) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self;
        while let EngineError::InFormula { name, source } = current {
            chain.push(name.as_str());
            current = source;
        }
        match current {
            EngineError::UnsetVariable { name, .. }
            | EngineError::UnknownVariable { name }
            | EngineError::RecursionLimit { name, .. } => chain.push(name.as_str()),
            EngineError::FormulaCycle { names } => {
                let members = names.len().saturating_sub(1);
                chain.extend(names[..members].iter().map(String::as_str));
            }
            _ => {}
        }
        chain
    }

    /// The innermost error, below every `InFormula` wrapper.
    pub fn root_cause(&self) -> &EngineError {
        let mut current = self;
        while let EngineError::InFormula { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self.root_cause() {
            EngineError::UnsetVariable { .. } => {
                Some("give the variable a value before evaluating formulas that use it")
            }
            EngineError::RecursionLimit { .. } => {
                Some("shorten the chain of formulas or raise VmConfig::max_formula_depth")
            }
            EngineError::FormulaCycle { .. } => {
                Some("a formula refers to itself, directly or through others")
            }
            EngineError::TypeMismatch { .. } => {
                Some("dot() and vec3d() are the only functions that take or build vectors")
            }
            EngineError::Compile(err) => err.hint(),
            _ => None,
        }
    }
}
