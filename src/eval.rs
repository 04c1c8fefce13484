// Expression evaluation against decoder state
//
// Identifiers resolve through the environment (then the defined
// constants); `$`-identifiers route to the decoder's built-in variables.
// `&&` and `||` short-circuit, and the ternary evaluates only the branch
// it takes. Assignment defines a fresh zero-length field and yields the
// assigned value.

use crate::decode::Decoder;
use crate::error::DecodeError;
use crate::parser::ast::{BinOp, Expr, ExprKind, UnaryOp};
use crate::value::Value;
use std::cmp::Ordering;

pub(crate) fn eval(expr: &Expr, st: &mut Decoder<'_>) -> Result<Value, DecodeError> {
    match &expr.kind {
        ExprKind::Int(v) => Ok(Value::Int(*v)),
        ExprKind::Float(v) => Ok(Value::Real(*v)),
        ExprKind::Str(s) => Ok(Value::Str(s.clone())),
        ExprKind::Bool(b) => Ok(Value::Bool(*b)),
        ExprKind::Ident(n) => st.resolve_ident(*n),
        ExprKind::Internal(n) => st.internal_value(*n),
        ExprKind::Member { field, attr } => eval_member(*field, *attr, st),
        ExprKind::Unary { op, operand } => {
            let v = eval(operand, st)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                UnaryOp::Neg => v.neg(),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, st),
        ExprKind::Ternary {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, st)?.truthy() {
                eval(then, st)
            } else {
                eval(otherwise, st)
            }
        }
        ExprKind::Assign { target, value } => {
            let v = eval(value, st)?;
            st.define_assigned(*target, v.clone());
            Ok(v)
        }
    }
}

fn eval_member(
    field: crate::name::Name,
    attr: crate::name::Name,
    st: &mut Decoder<'_>,
) -> Result<Value, DecodeError> {
    let names = st.names();
    let interner = st.interner();
    let f = st.lookup_field(field).ok_or_else(|| {
        DecodeError::new(format!("{}: field not defined", interner.resolve(field)))
    })?;
    if attr == names.raw {
        Ok(f.raw.clone())
    } else if attr == names.eng {
        Ok(f.eng().clone())
    } else if attr == names.id {
        Ok(Value::Str(interner.resolve(f.id).to_string()))
    } else if attr == names.pos {
        Ok(Value::Int(f.pos as i64))
    } else if attr == names.len {
        Ok(Value::Int(f.len as i64))
    } else {
        Err(DecodeError::new(format!(
            "unknown attribute {}",
            interner.resolve(attr)
        )))
    }
}

fn eval_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    st: &mut Decoder<'_>,
) -> Result<Value, DecodeError> {
    // Logical connectives decide without touching the right operand when
    // the left already settles the answer.
    match op {
        BinOp::And => {
            if !eval(lhs, st)?.truthy() {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(eval(rhs, st)?.truthy()));
        }
        BinOp::Or => {
            if eval(lhs, st)?.truthy() {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(eval(rhs, st)?.truthy()));
        }
        _ => {}
    }

    let left = eval(lhs, st)?;
    let right = eval(rhs, st)?;
    if op.is_comparison() {
        let cmp = left.compare(&right);
        let ok = match op {
            BinOp::Eq => cmp == Some(Ordering::Equal),
            BinOp::Ne => cmp != Some(Ordering::Equal),
            BinOp::Lt => cmp == Some(Ordering::Less),
            BinOp::Le => matches!(cmp, Some(Ordering::Less) | Some(Ordering::Equal)),
            BinOp::Gt => cmp == Some(Ordering::Greater),
            BinOp::Ge => matches!(cmp, Some(Ordering::Greater) | Some(Ordering::Equal)),
            _ => false,
        };
        return Ok(Value::Bool(ok));
    }
    match op {
        BinOp::Add => left.add(&right),
        BinOp::Sub => left.sub(&right),
        BinOp::Mul => left.mul(&right),
        BinOp::Div => left.div(&right),
        BinOp::Rem => left.rem(&right),
        BinOp::BitAnd => left.bit_and(&right),
        BinOp::BitOr => left.bit_or(&right),
        BinOp::Shl => left.shl(&right),
        BinOp::Shr => left.shr(&right),
        _ => Err(DecodeError::new(format!(
            "unsupported operator {}",
            op.as_str()
        ))),
    }
}
