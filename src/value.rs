// Runtime values for the decoder and expression evaluator
//
// A closed variant, pure data: field metadata (identifier, bit offset,
// engineering side) lives on Field, not here. Arithmetic between integers
// of unlike signedness coerces to the left operand's kind; comparisons are
// only defined within numeric kinds and between same-kind values, anything
// else compares as "not equal".

use std::cmp::Ordering;
use std::fmt;

use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Real(f64),
    Bytes(Vec<u8>),
    Str(String),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Real(_) => "real",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "string",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Uint(_) | Value::Real(_))
    }

    /// Compare two values. None means the kinds are incompatible, which
    /// callers treat as "not equal" (and ordering operators as false).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_numeric() && other.is_numeric() {
            if matches!(self, Value::Real(_)) || matches!(other, Value::Real(_)) {
                return self.as_f64().partial_cmp(&other.as_f64());
            }
            return Some(self.as_i128().cmp(&other.as_i128()));
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Truth of a value: numbers are true iff non-zero, strings and byte
    /// runs iff non-empty, null is false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Uint(v) => *v != 0,
            Value::Real(v) => *v != 0.0,
            Value::Bytes(v) => !v.is_empty(),
            Value::Str(v) => !v.is_empty(),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Int(v) => *v,
            Value::Uint(v) => *v as i64,
            Value::Real(v) => *v as i64,
            _ => 0,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match self {
            Value::Int(v) => *v as u64,
            Value::Uint(v) => *v,
            Value::Real(v) => *v as u64,
            _ => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(v) => *v as f64,
            Value::Uint(v) => *v as f64,
            Value::Real(v) => *v,
            _ => 0.0,
        }
    }

    fn as_i128(&self) -> i128 {
        match self {
            Value::Int(v) => *v as i128,
            Value::Uint(v) => *v as i128,
            Value::Real(v) => *v as i128,
            _ => 0,
        }
    }

    /// Stringification used by concatenation and dynamic file names.
    pub fn as_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Uint(v) => v.to_string(),
            Value::Real(v) => format_real(*v),
            Value::Bytes(v) => to_hex(v),
            Value::Str(v) => v.clone(),
        }
    }

    pub fn add(&self, rhs: &Value) -> Result<Value, DecodeError> {
        if let Value::Str(s) = self {
            let mut out = s.clone();
            out.push_str(&rhs.as_string());
            return Ok(Value::Str(out));
        }
        if matches!(rhs, Value::Str(_)) && self.is_numeric() {
            let mut out = self.as_string();
            out.push_str(&rhs.as_string());
            return Ok(Value::Str(out));
        }
        self.numeric_op(rhs, "+", |a, b| a.wrapping_add(b), |a, b| a.wrapping_add(b), |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Value) -> Result<Value, DecodeError> {
        self.numeric_op(rhs, "-", |a, b| a.wrapping_sub(b), |a, b| a.wrapping_sub(b), |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Value) -> Result<Value, DecodeError> {
        self.numeric_op(rhs, "*", |a, b| a.wrapping_mul(b), |a, b| a.wrapping_mul(b), |a, b| a * b)
    }

    pub fn div(&self, rhs: &Value) -> Result<Value, DecodeError> {
        self.check_zero(rhs, "/")?;
        self.numeric_op(rhs, "/", |a, b| a.wrapping_div(b), |a, b| a / b, |a, b| a / b)
    }

    pub fn rem(&self, rhs: &Value) -> Result<Value, DecodeError> {
        if matches!(self, Value::Real(_)) || matches!(rhs, Value::Real(_)) {
            return Err(unsupported("%", self, rhs));
        }
        self.check_zero(rhs, "%")?;
        self.numeric_op(rhs, "%", |a, b| a.wrapping_rem(b), |a, b| a % b, |a, b| a % b)
    }

    /// Integer-kinded left operands divide by the divisor coerced to their
    /// kind; a zero there is an error rather than a panic.
    fn check_zero(&self, rhs: &Value, op: &str) -> Result<(), DecodeError> {
        let zero = match self {
            Value::Int(_) => rhs.is_numeric() && rhs.as_i64() == 0,
            Value::Uint(_) => rhs.is_numeric() && rhs.as_u64() == 0,
            _ => false,
        };
        if zero {
            return Err(DecodeError::new(format!("{}: division by zero", op)));
        }
        Ok(())
    }

    /// Left-kind coercion: the result takes the left operand's kind.
    fn numeric_op(
        &self,
        rhs: &Value,
        op: &str,
        f_int: impl Fn(i64, i64) -> i64,
        f_uint: impl Fn(u64, u64) -> u64,
        f_real: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, DecodeError> {
        if !self.is_numeric() || !rhs.is_numeric() {
            return Err(unsupported(op, self, rhs));
        }
        let out = match self {
            Value::Int(a) => Value::Int(f_int(*a, rhs.as_i64())),
            Value::Uint(a) => Value::Uint(f_uint(*a, rhs.as_u64())),
            Value::Real(a) => Value::Real(f_real(*a, rhs.as_f64())),
            _ => unreachable!(),
        };
        Ok(out)
    }

    fn integer_op(
        &self,
        rhs: &Value,
        op: &str,
        f_int: impl Fn(i64, i64) -> i64,
        f_uint: impl Fn(u64, u64) -> u64,
    ) -> Result<Value, DecodeError> {
        match (self, rhs) {
            (Value::Int(a), b) if b.is_integer() => Ok(Value::Int(f_int(*a, b.as_i64()))),
            (Value::Uint(a), b) if b.is_integer() => Ok(Value::Uint(f_uint(*a, b.as_u64()))),
            _ => Err(unsupported(op, self, rhs)),
        }
    }

    fn is_integer(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Uint(_))
    }

    pub fn bit_and(&self, rhs: &Value) -> Result<Value, DecodeError> {
        self.integer_op(rhs, "&", |a, b| a & b, |a, b| a & b)
    }

    pub fn bit_or(&self, rhs: &Value) -> Result<Value, DecodeError> {
        self.integer_op(rhs, "|", |a, b| a | b, |a, b| a | b)
    }

    pub fn shl(&self, rhs: &Value) -> Result<Value, DecodeError> {
        self.integer_op(
            rhs,
            "<<",
            |a, b| a.wrapping_shl(b as u32),
            |a, b| a.wrapping_shl(b as u32),
        )
    }

    pub fn shr(&self, rhs: &Value) -> Result<Value, DecodeError> {
        self.integer_op(
            rhs,
            ">>",
            |a, b| a.wrapping_shr(b as u32),
            |a, b| a.wrapping_shr(b as u32),
        )
    }

    /// Unary minus. Defined on signed integers and reals.
    pub fn neg(&self) -> Result<Value, DecodeError> {
        match self {
            Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
            Value::Real(v) => Ok(Value::Real(-v)),
            _ => Err(DecodeError::new(format!(
                "unsupported operation: -{}",
                self.kind_name()
            ))),
        }
    }

    /// Raw formatting: decimal integers, shortest-form reals, lowercase hex
    /// bytes, sanitized strings with non-printables replaced by `*`.
    pub fn format_raw(&self, escape_quotes: bool) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Uint(v) => v.to_string(),
            Value::Real(v) => format_real(*v),
            Value::Bytes(v) => to_hex(v),
            Value::Str(v) => {
                let mut out = String::with_capacity(v.len());
                for c in v.chars() {
                    let c = if c == char::REPLACEMENT_CHARACTER || c.is_control() {
                        '*'
                    } else {
                        c
                    };
                    if c == '"' && escape_quotes {
                        out.push('"');
                    }
                    out.push(c);
                }
                out
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_raw(false))
    }
}

fn unsupported(op: &str, lhs: &Value, rhs: &Value) -> DecodeError {
    DecodeError::new(format!(
        "unsupported operation: {} {} {}",
        lhs.kind_name(),
        op,
        rhs.kind_name()
    ))
}

/// Shortest-form float rendering, switching to exponent notation outside
/// the comfortable decimal range.
pub fn format_real(v: f64) -> String {
    let a = v.abs();
    if v != 0.0 && (a < 1e-4 || a >= 1e21) {
        format!("{:e}", v)
    } else {
        format!("{}", v)
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
