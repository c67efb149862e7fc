//! # Formula language core types
//!
//! Values that live on the evaluation stack and in the variable store, the
//! catalogue of callable functions, and the name-resolution seam shared by
//! the compiler and the store.

pub mod function;
pub mod names;
pub mod value;

pub use function::{Builtin, FunctionDescriptor, FunctionRegistry, RegistryError};
pub use names::{NameResolver, NoVariables};
pub use value::{FromValue, Value, ValueKind};
