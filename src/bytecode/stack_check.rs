use thiserror::Error;

use crate::bytecode::Op;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stack-check error: {message}")]
pub struct StackCheckError {
    pub message: String,
}

impl StackCheckError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Statically verifies a straight-line program and returns its maximum
/// stack height.
///
/// Checks, in one linear scan:
/// - no instruction pops more than the stack holds
/// - immediate pushes consume their pools in order (`PushScalar(i)` is the
///   i-th scalar push), and every pool entry is used
/// - every call passes its builtin's fixed arity
/// - exactly one value is left at the end
///
/// Without jumps, a linear scan is a complete check.
pub fn check_program(
    ops: &[Op],
    scalar_count: usize,
    vector_count: usize,
) -> Result<usize, StackCheckError> {
    let mut height: usize = 0;
    let mut max_height: usize = 0;
    let mut scalar_cursor = 0;
    let mut vector_cursor = 0;

    for (ip, op) in ops.iter().enumerate() {
        match op {
            Op::PushScalar(index) => {
                if *index != scalar_cursor || *index >= scalar_count {
                    return Err(StackCheckError::new(format!(
                        "scalar pool out of order at ip={}: expected #{}, found #{} (pool size {})",
                        ip, scalar_cursor, index, scalar_count
                    )));
                }
                scalar_cursor += 1;
            }
            Op::PushVector(index) => {
                if *index != vector_cursor || *index >= vector_count {
                    return Err(StackCheckError::new(format!(
                        "vector pool out of order at ip={}: expected #{}, found #{} (pool size {})",
                        ip, vector_cursor, index, vector_count
                    )));
                }
                vector_cursor += 1;
            }
            Op::Call { func, arity } if *arity != func.arity() => {
                return Err(StackCheckError::new(format!(
                    "call of {:?} at ip={} passes {} argument(s), expected {}",
                    func,
                    ip,
                    arity,
                    func.arity()
                )));
            }
            _ => {}
        }

        let (pops, pushes) = op.effect();
        if pops > height {
            return Err(StackCheckError::new(format!(
                "stack underflow at ip={}, op={:?}, needed {} items",
                ip, op, pops
            )));
        }
        height = height - pops + pushes;
        max_height = max_height.max(height);
    }

    if height != 1 {
        return Err(StackCheckError::new(format!(
            "program leaves {} values on the stack, expected 1",
            height
        )));
    }

    if scalar_cursor != scalar_count || vector_cursor != vector_count {
        return Err(StackCheckError::new(format!(
            "unused pool entries: {}/{} scalars, {}/{} vectors pushed",
            scalar_cursor, scalar_count, vector_cursor, vector_count
        )));
    }

    Ok(max_height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::BinaryOp;
    use crate::lang::Builtin;

    #[test]
    fn test_simple_ops() {
        let ops = vec![
            Op::PushScalar(0),
            Op::PushScalar(1),
            Op::Binary(BinaryOp::Add),
        ];
        assert_eq!(check_program(&ops, 2, 0), Ok(2));
    }

    #[test]
    fn test_underflow() {
        let ops = vec![Op::PushScalar(0), Op::Binary(BinaryOp::Add)];
        let result = check_program(&ops, 1, 0);
        assert!(result.unwrap_err().message.contains("underflow"));
    }

    #[test]
    fn test_empty_program_leaves_nothing() {
        let result = check_program(&[], 0, 0);
        assert!(result.unwrap_err().message.contains("leaves 0 values"));
    }

    #[test]
    fn test_extra_values() {
        let ops = vec![Op::PushScalar(0), Op::PushVar(3)];
        assert!(check_program(&ops, 1, 0).is_err());
    }

    #[test]
    fn test_pool_order() {
        let ops = vec![
            Op::PushScalar(1),
            Op::PushScalar(0),
            Op::Binary(BinaryOp::Sub),
        ];
        let err = check_program(&ops, 2, 0).unwrap_err();
        assert!(err.message.contains("out of order"));
    }

    #[test]
    fn test_pool_index_past_end() {
        let ops = vec![Op::PushVector(0)];
        assert!(check_program(&ops, 0, 0).is_err());
    }

    #[test]
    fn test_unused_pool_entries() {
        let ops = vec![Op::PushScalar(0)];
        let err = check_program(&ops, 2, 0).unwrap_err();
        assert!(err.message.contains("unused"));
    }

    #[test]
    fn test_call_arity() {
        let ops = vec![
            Op::PushScalar(0),
            Op::PushScalar(1),
            Op::PushScalar(2),
            Op::Call {
                func: Builtin::Vec3d,
                arity: 3,
            },
        ];
        assert_eq!(check_program(&ops, 3, 0), Ok(3));

        let ops = vec![
            Op::PushScalar(0),
            Op::Call {
                func: Builtin::Atan2,
                arity: 1,
            },
        ];
        let err = check_program(&ops, 1, 0).unwrap_err();
        assert!(err.message.contains("expected 2"));
    }

    #[test]
    fn test_assign_keeps_value() {
        let ops = vec![Op::PushVar(0), Op::Assign(1)];
        assert_eq!(check_program(&ops, 0, 0), Ok(1));
    }
}
