pub mod builtins;
pub mod runtime_error;
pub mod vm;

pub use runtime_error::EngineError;
pub use vm::{Slot, VariableSink, VariableSource, Vm, VmConfig};
