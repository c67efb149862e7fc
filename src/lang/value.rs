use serde::{Deserialize, Serialize};

/// Runtime value of a variable or of an evaluation stack slot.
///
/// Every value is either a plain number or a 3-component vector. The tag
/// travels with the value, so a slot can never disagree with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit floating-point number.
    Scalar(f64),

    /// Cartesian 3-vector `(x, y, z)`.
    Vector([f64; 3]),
}

/// The kind of a [`Value`], used in type-mismatch diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Scalar,
    Vector,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Scalar => "scalar",
            ValueKind::Vector => "vector",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Scalar(_) => ValueKind::Scalar,
            Value::Vector(_) => ValueKind::Vector,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(x) => Some(*x),
            Value::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<[f64; 3]> {
        match self {
            Value::Vector(v) => Some(*v),
            Value::Scalar(_) => None,
        }
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Scalar(x) => x.is_finite(),
            Value::Vector(v) => v.iter().all(|c| c.is_finite()),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Scalar(x)
    }
}

impl From<[f64; 3]> for Value {
    fn from(v: [f64; 3]) -> Self {
        Value::Vector(v)
    }
}

impl From<(f64, f64, f64)> for Value {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Value::Vector([x, y, z])
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Scalar(x) => write!(f, "{}", x),
            Value::Vector([x, y, z]) => write!(f, "({}, {}, {})", x, y, z),
        }
    }
}

/// Conversion from a dynamically typed [`Value`] into the type a caller asked for.
///
/// Used by `VariableStore::eval_var` so a typed read reports a mismatch
/// instead of coercing.
pub trait FromValue: Sized {
    const KIND: ValueKind;

    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for f64 {
    const KIND: ValueKind = ValueKind::Scalar;

    fn from_value(value: Value) -> Option<Self> {
        value.as_scalar()
    }
}

impl FromValue for [f64; 3] {
    const KIND: ValueKind = ValueKind::Vector;

    fn from_value(value: Value) -> Option<Self> {
        value.as_vector()
    }
}
