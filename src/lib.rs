//! Named-variable formula engine.
//!
//! Variables hold either a literal value or a formula over other variables.
//! Formulas are compiled once to bytecode and re-run on every read, so a
//! change upstream is visible at the next query.
//!
//! ```
//! use deckvars::VariableStore;
//!
//! let mut store = VariableStore::new();
//! store.add_literal("radius", 2.0).unwrap();
//! store.add_formula("area", "3 * radius^2").unwrap();
//! assert_eq!(store.eval_scalar("area").unwrap(), 12.0);
//!
//! store.add_literal("radius", 1.0).unwrap();
//! assert_eq!(store.eval_scalar("area").unwrap(), 3.0);
//! ```

pub mod bytecode;
pub mod frontend;
pub mod lang;
pub mod runtime;
pub mod store;

pub use bytecode::{BytecodeProgram, CompileError, Compiler};
pub use frontend::deck::{DeckError, DeckReport, load_deck};
pub use lang::{Builtin, FunctionRegistry, Value};
pub use runtime::{EngineError, VmConfig};
pub use store::{VarKind, Variable, VariableStore};
