use crate::bytecode::op::{BinaryOp, UnaryOp};
use crate::lang::{Builtin, Value};
use crate::runtime::runtime_error::EngineError;

use Value::{Scalar, Vector};

// =============================================================================
// Operators
// =============================================================================

pub fn unary(op: UnaryOp, value: Value) -> Result<Value, EngineError> {
    match op {
        UnaryOp::Neg => Ok(match value {
            Scalar(x) => Scalar(-x),
            Vector(v) => Vector(v.map(|c| -c)),
        }),
    }
}

/// Applies a binary operator.
///
/// `+` and `-` need operands of the same kind. `*` and `/` also scale a
/// vector by a scalar from either side; scalar / vector divides the scalar
/// by each component. `%` and `^` are scalar only.
pub fn binary(op: BinaryOp, a: Value, b: Value) -> Result<Value, EngineError> {
    use BinaryOp::*;

    let symbol = op.symbol();
    let result = match (op, a, b) {
        (Add, Scalar(x), Scalar(y)) => Scalar(x + y),
        (Add, Vector(u), Vector(v)) => Vector(zip(u, v, |x, y| x + y)),

        (Sub, Scalar(x), Scalar(y)) => Scalar(x - y),
        (Sub, Vector(u), Vector(v)) => Vector(zip(u, v, |x, y| x - y)),

        (Mul, Scalar(x), Scalar(y)) => Scalar(x * y),
        (Mul, Vector(u), Vector(v)) => Vector(zip(u, v, |x, y| x * y)),
        (Mul, Scalar(s), Vector(v)) | (Mul, Vector(v), Scalar(s)) => Vector(v.map(|c| c * s)),

        (Div, Scalar(x), Scalar(y)) => {
            nonzero(symbol, &[y])?;
            Scalar(x / y)
        }
        (Div, Vector(u), Vector(v)) => {
            nonzero(symbol, &v)?;
            Vector(zip(u, v, |x, y| x / y))
        }
        (Div, Vector(v), Scalar(s)) => {
            nonzero(symbol, &[s])?;
            Vector(v.map(|c| c / s))
        }
        (Div, Scalar(s), Vector(v)) => {
            nonzero(symbol, &v)?;
            Vector(v.map(|c| s / c))
        }

        (Mod, Scalar(x), Scalar(y)) => {
            nonzero(symbol, &[y])?;
            Scalar(x % y)
        }
        (Pow, Scalar(x), Scalar(y)) => Scalar(x.powf(y)),

        (_, a, b) => {
            return Err(EngineError::type_mismatch(format!(
                "{} {} {} is not defined",
                a.type_name(),
                symbol,
                b.type_name()
            )));
        }
    };

    finite(symbol, result, || format!("({}, {})", a, b))
}

fn zip(u: [f64; 3], v: [f64; 3], f: impl Fn(f64, f64) -> f64) -> [f64; 3] {
    [f(u[0], v[0]), f(u[1], v[1]), f(u[2], v[2])]
}

fn nonzero(operation: &str, divisors: &[f64]) -> Result<(), EngineError> {
    if divisors.contains(&0.0) {
        return Err(EngineError::division_by_zero(operation));
    }
    Ok(())
}

/// NaN and infinities never leave the VM.
fn finite<A: std::fmt::Display>(
    operation: &str,
    value: Value,
    argument: impl FnOnce() -> A,
) -> Result<Value, EngineError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::domain(operation, argument()))
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Calls a builtin on operands in call order.
pub fn call(func: Builtin, args: &[Value]) -> Result<Value, EngineError> {
    let name = func.canonical_name();

    match func {
        Builtin::Dot => {
            let [u, v] = operands::<_, 2>(name, args, Value::as_vector, "vector")?;
            let dot = u[0] * v[0] + u[1] * v[1] + u[2] * v[2];
            finite(name, Scalar(dot), || describe(args))
        }
        Builtin::Vec3d => {
            let [x, y, z] = operands::<_, 3>(name, args, Value::as_scalar, "scalar")?;
            Ok(Vector([x, y, z]))
        }
        Builtin::Atan2 | Builtin::Max | Builtin::Min => {
            let [a, b] = operands::<_, 2>(name, args, Value::as_scalar, "scalar")?;
            let result = match func {
                Builtin::Atan2 => a.atan2(b),
                Builtin::Max => a.max(b),
                _ => a.min(b),
            };
            finite(name, Scalar(result), || describe(args))
        }
        _ => {
            let [x] = operands::<_, 1>(name, args, Value::as_scalar, "scalar")?;
            let result = scalar_function(func, x)?;
            finite(name, Scalar(result), || x)
        }
    }
}

fn scalar_function(func: Builtin, x: f64) -> Result<f64, EngineError> {
    use Builtin::*;

    let name = func.canonical_name();
    let require = |ok: bool| {
        if ok {
            Ok(())
        } else {
            Err(EngineError::domain(name, x))
        }
    };
    // cot, sec, csc and their degree variants
    let reciprocal = |denominator: f64| {
        if denominator == 0.0 {
            Err(EngineError::domain(name, x))
        } else {
            Ok(1.0 / denominator)
        }
    };

    Ok(match func {
        Abs => x.abs(),
        Ceil => x.ceil(),
        Floor => x.floor(),
        Int => x.trunc(),
        Inv => {
            if x == 0.0 {
                return Err(EngineError::division_by_zero(name));
            }
            1.0 / x
        }
        Sqrt => {
            require(x >= 0.0)?;
            x.sqrt()
        }
        Exp => x.exp(),
        Log => {
            require(x > 0.0)?;
            x.ln()
        }
        Log10 => {
            require(x > 0.0)?;
            x.log10()
        }

        Sin => x.sin(),
        Cos => x.cos(),
        Tan => x.tan(),
        Cot => reciprocal(x.tan())?,
        Sec => reciprocal(x.cos())?,
        Csc => reciprocal(x.sin())?,
        Asin => {
            require((-1.0..=1.0).contains(&x))?;
            x.asin()
        }
        Acos => {
            require((-1.0..=1.0).contains(&x))?;
            x.acos()
        }
        Atan => x.atan(),

        SinD => x.to_radians().sin(),
        CosD => x.to_radians().cos(),
        TanD => x.to_radians().tan(),
        CotD => reciprocal(x.to_radians().tan())?,
        SecD => reciprocal(x.to_radians().cos())?,
        CscD => reciprocal(x.to_radians().sin())?,

        Sinh => x.sinh(),
        Cosh => x.cosh(),
        Tanh => x.tanh(),
        Asinh => x.asinh(),
        Acosh => {
            require(x >= 1.0)?;
            x.acosh()
        }
        Atanh => {
            require(x.abs() < 1.0)?;
            x.atanh()
        }

        Deg2Rad => x.to_radians(),
        Rad2Deg => x.to_degrees(),

        Atan2 | Max | Min | Dot | Vec3d => {
            return Err(EngineError::Internal(format!(
                "{} dispatched as a one-operand function",
                name
            )));
        }
    })
}

/// Extracts exactly `N` operands of one kind.
fn operands<T: Copy + Default, const N: usize>(
    name: &str,
    args: &[Value],
    extract: fn(&Value) -> Option<T>,
    expected: &str,
) -> Result<[T; N], EngineError> {
    if args.len() != N {
        return Err(EngineError::Internal(format!(
            "{} called with {} operands, expected {}",
            name,
            args.len(),
            N
        )));
    }

    let mut out = [T::default(); N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = extract(arg).ok_or_else(|| {
            EngineError::type_mismatch(format!(
                "{}() takes {} arguments, got {}",
                name,
                expected,
                describe(args)
            ))
        })?;
    }
    Ok(out)
}

fn describe(args: &[Value]) -> String {
    let kinds: Vec<&str> = args.iter().map(Value::type_name).collect();
    format!("({})", kinds.join(", "))
}
