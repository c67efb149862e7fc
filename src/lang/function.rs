use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frontend::scanner::is_identifier;

// =============================================================================
// BUILTIN - closed set of callable function opcodes
// =============================================================================

/// Opcode of a built-in function.
///
/// The set is closed: the VM dispatches with an exhaustive `match`, so a new
/// variant cannot be registered without also being given semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    // rounding / misc
    Abs,
    Ceil,
    Floor,
    Int,
    Inv,
    Sqrt,
    Exp,
    Log,
    Log10,
    Max,
    Min,

    // trigonometric (radians)
    Sin,
    Cos,
    Tan,
    Cot,
    Sec,
    Csc,
    Asin,
    Acos,
    Atan,
    Atan2,

    // trigonometric (degrees)
    SinD,
    CosD,
    TanD,
    CotD,
    SecD,
    CscD,

    // hyperbolic
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,

    // angle conversion
    Deg2Rad,
    Rad2Deg,

    // vectors
    Dot,
    Vec3d,
}

impl Builtin {
    /// Number of operands the function pops from the stack.
    pub fn arity(self) -> usize {
        use Builtin::*;
        match self {
            Atan2 | Dot | Max | Min => 2,
            Vec3d => 3,
            Abs | Ceil | Floor | Int | Inv | Sqrt | Exp | Log | Log10 | Sin | Cos | Tan | Cot
            | Sec | Csc | Asin | Acos | Atan | SinD | CosD | TanD | CotD | SecD | CscD | Sinh
            | Cosh | Tanh | Asinh | Acosh | Atanh | Deg2Rad | Rad2Deg => 1,
        }
    }

    /// Canonical name, as registered by [`FunctionRegistry::with_builtins`].
    pub fn canonical_name(self) -> &'static str {
        use Builtin::*;
        match self {
            Abs => "abs",
            Ceil => "ceil",
            Floor => "floor",
            Int => "int",
            Inv => "inv",
            Sqrt => "sqrt",
            Exp => "exp",
            Log => "log",
            Log10 => "log10",
            Max => "max",
            Min => "min",
            Sin => "sin",
            Cos => "cos",
            Tan => "tan",
            Cot => "cot",
            Sec => "sec",
            Csc => "csc",
            Asin => "asin",
            Acos => "acos",
            Atan => "atan",
            Atan2 => "atan2",
            SinD => "sind",
            CosD => "cosd",
            TanD => "tand",
            CotD => "cotd",
            SecD => "secd",
            CscD => "cscd",
            Sinh => "sinh",
            Cosh => "cosh",
            Tanh => "tanh",
            Asinh => "asinh",
            Acosh => "acosh",
            Atanh => "atanh",
            Deg2Rad => "deg2rad",
            Rad2Deg => "rad2deg",
            Dot => "dot",
            Vec3d => "vec3d",
        }
    }

    pub const ALL: [Builtin; 37] = {
        use Builtin::*;
        [
            Abs, Acos, Acosh, Asin, Asinh, Atan, Atan2, Atanh, Ceil, Cos, CosD, Cosh, Cot, CotD,
            Csc, CscD, Deg2Rad, Dot, Exp, Floor, Int, Inv, Log, Log10, Max, Min, Rad2Deg, Sec,
            SecD, Sin, SinD, Sinh, Sqrt, Tan, TanD, Tanh, Vec3d,
        ]
    };
}

// =============================================================================
// REGISTRY
// =============================================================================

/// A registered callable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: String,
    pub opcode: Builtin,
    pub arity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("'{name}' is not a valid function name")]
    InvalidName { name: String },

    #[error("function '{name}' is already registered as {existing:?}/{existing_arity}")]
    NameConflict {
        name: String,
        existing: Builtin,
        existing_arity: usize,
    },

    #[error("function '{name}': {opcode:?} takes {expected} argument(s), not {given}")]
    ArityConflict {
        name: String,
        opcode: Builtin,
        expected: usize,
        given: usize,
    },
}

/// Catalogue of callable function names.
///
/// Owned by whoever compiles expressions (normally the `VariableStore`);
/// there is no process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    by_name: HashMap<String, FunctionDescriptor>,
    by_opcode: HashMap<Builtin, FunctionDescriptor>,
}

impl FunctionRegistry {
    /// An empty registry. Expressions compiled against it can call nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every [`Builtin`] under its canonical
    /// name, plus the `rad` / `deg` conversion aliases.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for func in Builtin::ALL {
            registry.insert(func.canonical_name(), func);
        }
        registry.insert("rad", Builtin::Deg2Rad);
        registry.insert("deg", Builtin::Rad2Deg);
        registry
    }

    fn insert(&mut self, name: &str, opcode: Builtin) {
        let desc = FunctionDescriptor {
            name: name.to_string(),
            opcode,
            arity: opcode.arity(),
        };
        self.by_opcode.entry(opcode).or_insert_with(|| desc.clone());
        self.by_name.insert(desc.name.clone(), desc);
    }

    /// Registers `name` as a call of `opcode`.
    ///
    /// Returns `Ok(true)` on a new registration and `Ok(false)` when the
    /// identical descriptor was already present.
    pub fn register(
        &mut self,
        name: &str,
        opcode: Builtin,
        arity: usize,
    ) -> Result<bool, RegistryError> {
        if !is_identifier(name) {
            return Err(RegistryError::InvalidName {
                name: name.to_string(),
            });
        }
        if arity != opcode.arity() {
            return Err(RegistryError::ArityConflict {
                name: name.to_string(),
                opcode,
                expected: opcode.arity(),
                given: arity,
            });
        }

        if let Some(existing) = self.by_name.get(name) {
            if existing.opcode == opcode {
                return Ok(false);
            }
            return Err(RegistryError::NameConflict {
                name: name.to_string(),
                existing: existing.opcode,
                existing_arity: existing.arity,
            });
        }

        tracing::debug!(name, ?opcode, arity, "function registered");
        self.insert(name, opcode);
        Ok(true)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.by_name.get(name)
    }

    /// Reverse lookup, for diagnostics. Returns the first name registered
    /// for the opcode.
    pub fn lookup_by_opcode(&self, opcode: Builtin) -> Option<&FunctionDescriptor> {
        self.by_opcode.get(&opcode)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Registered names in alphabetical order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
