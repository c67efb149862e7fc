pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod stack_check;

pub use compile::{Compiler, compile};
pub use compile_error::{CompileError, SyntaxKind};
pub use ir::{BytecodeProgram, ProgramError};
pub use op::Op;
