use serde::{Deserialize, Serialize};

use crate::lang::Builtin;

// =============================================================================
// OP - Bytecode instructions
// =============================================================================

/// One bytecode instruction.
///
/// Programs are straight-line: there is no jump, so every instruction runs
/// exactly once, in order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Push `scalars[index]`.                  ( -- s )
    PushScalar(usize),

    /// Push `vectors[index]`.                  ( -- v )
    PushVector(usize),

    /// Push the current value of variable `index`. ( -- x )
    PushVar(usize),

    /// ( a -- r )
    Unary(UnaryOp),

    /// ( a b -- r )
    Binary(BinaryOp),

    /// Call a builtin with `arity` operands.   ( a1 .. an -- r )
    Call { func: Builtin, arity: usize },

    /// Store the top of stack into variable `index` without popping it.
    /// ( x -- x )
    Assign(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
        }
    }
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
        }
    }

    pub fn from_symbol(ch: char) -> Option<Self> {
        Some(match ch {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            '/' => BinaryOp::Div,
            '%' => BinaryOp::Mod,
            '^' => BinaryOp::Pow,
            _ => return None,
        })
    }
}

impl Op {
    /// Returns (pops, pushes) for an op.
    ///
    /// `Assign` peeks, which is modelled as popping and re-pushing the value.
    pub fn effect(&self) -> (usize, usize) {
        match self {
            Op::PushScalar(_) | Op::PushVector(_) | Op::PushVar(_) => (0, 1),
            Op::Unary(_) => (1, 1),
            Op::Binary(_) => (2, 1),
            Op::Call { arity, .. } => (*arity, 1),
            Op::Assign(_) => (1, 1),
        }
    }
}
