use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bytecode::Op;
use crate::bytecode::stack_check::{StackCheckError, check_program};

/// A compiled expression.
///
/// Immediate constants live in two pools, consumed in order by the
/// `PushScalar` / `PushVector` instructions. `max_stack_depth` sizes the
/// evaluation stack up front.
///
/// Every constructor verifies the program with the stack checker, so a
/// `BytecodeProgram` in hand always leaves exactly one value and never
/// underflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytecodeProgram {
    source: String,
    ops: Vec<Op>,
    scalars: Vec<f64>,
    vectors: Vec<[f64; 3]>,
    max_stack_depth: usize,
}

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("cannot encode program: {0}")]
    Encode(postcard::Error),

    #[error("cannot decode program: {0}")]
    Decode(postcard::Error),

    #[error(transparent)]
    Check(#[from] StackCheckError),
}

impl BytecodeProgram {
    /// Assembles a program from its parts, computing `max_stack_depth`.
    pub fn from_parts(
        source: impl Into<String>,
        ops: Vec<Op>,
        scalars: Vec<f64>,
        vectors: Vec<[f64; 3]>,
    ) -> Result<Self, StackCheckError> {
        let max_stack_depth = check_program(&ops, scalars.len(), vectors.len())?;
        Ok(BytecodeProgram {
            source: source.into(),
            ops,
            scalars,
            vectors,
            max_stack_depth,
        })
    }

    /// Compiler output, whose depth was tracked during generation. The
    /// tracked depth can exceed what the final ops need after folding.
    pub(crate) fn from_compiled(
        source: &str,
        ops: Vec<Op>,
        scalars: Vec<f64>,
        vectors: Vec<[f64; 3]>,
        max_stack_depth: usize,
    ) -> Self {
        debug_assert!(
            check_program(&ops, scalars.len(), vectors.len())
                .is_ok_and(|needed| needed <= max_stack_depth),
            "compiler emitted an unbalanced program for {:?}",
            source
        );
        BytecodeProgram {
            source: source.to_string(),
            ops,
            scalars,
            vectors,
            max_stack_depth,
        }
    }

    /// Original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn scalars(&self) -> &[f64] {
        &self.scalars
    }

    pub fn vectors(&self) -> &[[f64; 3]] {
        &self.vectors
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True if running the program writes to the variable store.
    pub fn has_assignment(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, Op::Assign(_)))
    }

    /// Encodes the program with postcard.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProgramError> {
        postcard::to_allocvec(self).map_err(ProgramError::Encode)
    }

    /// Decodes a program and re-verifies it; the declared stack depth must
    /// cover what the instructions actually need.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramError> {
        let program: BytecodeProgram = postcard::from_bytes(bytes).map_err(ProgramError::Decode)?;
        let needed = check_program(&program.ops, program.scalars.len(), program.vectors.len())?;
        if needed > program.max_stack_depth {
            return Err(ProgramError::Check(StackCheckError {
                message: format!(
                    "declared stack depth {} is below the required {}",
                    program.max_stack_depth, needed
                ),
            }));
        }
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::BinaryOp;

    fn sample() -> BytecodeProgram {
        BytecodeProgram::from_parts(
            "2*x + x",
            vec![
                Op::PushScalar(0),
                Op::PushVar(4),
                Op::Binary(BinaryOp::Mul),
                Op::PushVar(4),
                Op::Binary(BinaryOp::Add),
            ],
            vec![2.0],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_from_parts_computes_depth() {
        let program = sample();
        assert_eq!(program.max_stack_depth(), 2);
        assert_eq!(program.len(), 5);
        assert_eq!(program.source(), "2*x + x");
        assert!(!program.has_assignment());
    }

    #[test]
    fn test_from_parts_rejects_malformed() {
        let result = BytecodeProgram::from_parts("", vec![Op::Binary(BinaryOp::Add)], vec![], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bytes_round_trip() {
        let program = sample();
        let bytes = program.to_bytes().unwrap();
        let decoded = BytecodeProgram::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let err = BytecodeProgram::from_bytes(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, ProgramError::Decode(_)));
    }

    #[test]
    fn test_from_bytes_rechecks_stack_depth() {
        let mut program = sample();
        program.max_stack_depth = 1;
        let bytes = program.to_bytes().unwrap();

        let err = BytecodeProgram::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ProgramError::Check(_)));
        assert!(err.to_string().contains("below the required 2"));
    }
}
