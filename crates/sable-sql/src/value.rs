//! Column types, values, and their byte encodings.
//!
//! A record is a fixed-width byte buffer; each field is the encoding of
//! one value at its column's offset. Encoding is a pure function of
//! `(value, type, length)` and is lossless within the type.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use sable_common::{SableError, SableResult};

/// Type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColType {
    /// 4-byte signed integer.
    Int,
    /// 4-byte float.
    Float,
    /// Fixed-length character string, zero-padded.
    Char,
}

impl ColType {
    /// Returns true for the two numeric families that widen into each
    /// other.
    #[inline]
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, ColType::Int | ColType::Float)
    }
}

impl fmt::Display for ColType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColType::Int => write!(f, "INT"),
            ColType::Float => write!(f, "FLOAT"),
            ColType::Char => write!(f, "CHAR"),
        }
    }
}

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
}

impl CompOp {
    /// The operator with its operands swapped (`a < b` ⇔ `b > a`).
    #[must_use]
    pub fn swapped(self) -> Self {
        match self {
            CompOp::Eq => CompOp::Eq,
            CompOp::Ne => CompOp::Ne,
            CompOp::Lt => CompOp::Gt,
            CompOp::Gt => CompOp::Lt,
            CompOp::Le => CompOp::Ge,
            CompOp::Ge => CompOp::Le,
        }
    }

    /// Applies the operator to a comparison result.
    #[must_use]
    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Ne => ord != Ordering::Equal,
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Le => ord != Ordering::Greater,
            CompOp::Ge => ord != Ordering::Less,
        }
    }

    /// True for the four range operators.
    #[must_use]
    pub fn is_range(self) -> bool {
        matches!(self, CompOp::Lt | CompOp::Gt | CompOp::Le | CompOp::Ge)
    }
}

impl fmt::Display for CompOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompOp::Eq => "=",
            CompOp::Ne => "<>",
            CompOp::Lt => "<",
            CompOp::Gt => ">",
            CompOp::Le => "<=",
            CompOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

/// A typed literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Integer literal.
    Int(i32),
    /// Float literal.
    Float(f32),
    /// String literal.
    Str(String),
}

impl Value {
    /// The column type family of this value.
    #[must_use]
    pub fn col_type(&self) -> ColType {
        match self {
            Value::Int(_) => ColType::Int,
            Value::Float(_) => ColType::Float,
            Value::Str(_) => ColType::Char,
        }
    }

    /// Coerces the value to a target column type. The only permitted
    /// conversion is widening INT to FLOAT.
    pub fn coerce_to(&self, target: ColType) -> SableResult<Value> {
        match (self, target) {
            (Value::Int(v), ColType::Float) => Ok(Value::Float(*v as f32)),
            (v, t) if v.col_type() == t => Ok(v.clone()),
            (v, t) => Err(SableError::incompatible(
                t.to_string(),
                v.col_type().to_string(),
            )),
        }
    }

    /// Encodes the value into its raw field form for a column of
    /// `(col_type, len)`. CHAR values shorter than `len` are
    /// zero-padded; longer ones are rejected.
    pub fn encode(&self, col_type: ColType, len: usize) -> SableResult<Vec<u8>> {
        match (self, col_type) {
            (Value::Int(v), ColType::Int) => Ok(v.to_le_bytes().to_vec()),
            (Value::Float(v), ColType::Float) => Ok(v.to_le_bytes().to_vec()),
            (Value::Str(s), ColType::Char) => {
                let bytes = s.as_bytes();
                if bytes.len() > len {
                    return Err(SableError::incompatible(
                        format!("CHAR({len})"),
                        format!("string of {} bytes", bytes.len()),
                    ));
                }
                let mut out = vec![0u8; len];
                out[..bytes.len()].copy_from_slice(bytes);
                Ok(out)
            }
            (v, t) => Err(SableError::incompatible(
                t.to_string(),
                v.col_type().to_string(),
            )),
        }
    }

    /// Decodes a raw field back into a value. CHAR decoding stops at
    /// the first NUL, mirroring the fixed-width padding.
    pub fn decode(raw: &[u8], col_type: ColType) -> Value {
        match col_type {
            ColType::Int => Value::Int(i32::from_le_bytes(raw[..4].try_into().unwrap())),
            ColType::Float => Value::Float(f32::from_le_bytes(raw[..4].try_into().unwrap())),
            ColType::Char => {
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Value::Str(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Str(s) => write!(f, "'{s}'"),
        }
    }
}

/// Formats a float the way conditions are printed: one decimal place
/// for whole values, up to six significant digits otherwise.
pub fn format_float(v: f32) -> String {
    if v == v.trunc() && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        let s = format!("{v:.6}");
        let s = s.trim_end_matches('0');
        let s = s.strip_suffix('.').unwrap_or(s);
        s.to_string()
    }
}

/// Compares two raw fields of possibly different numeric types.
/// INT and FLOAT compare numerically after widening; CHAR compares
/// byte-lexicographically over the full width; any other mix is a type
/// error.
pub fn compare_raw(
    lhs: &[u8],
    lhs_type: ColType,
    rhs: &[u8],
    rhs_type: ColType,
) -> SableResult<Ordering> {
    if lhs_type.is_numeric() && rhs_type.is_numeric() && lhs_type != rhs_type {
        let lv = widen(lhs, lhs_type);
        let rv = widen(rhs, rhs_type);
        return Ok(lv.total_cmp(&rv));
    }
    if lhs_type != rhs_type {
        return Err(SableError::incompatible(
            lhs_type.to_string(),
            rhs_type.to_string(),
        ));
    }
    Ok(match lhs_type {
        ColType::Int => {
            let lv = i32::from_le_bytes(lhs[..4].try_into().unwrap());
            let rv = i32::from_le_bytes(rhs[..4].try_into().unwrap());
            lv.cmp(&rv)
        }
        ColType::Float => {
            let lv = f32::from_le_bytes(lhs[..4].try_into().unwrap());
            let rv = f32::from_le_bytes(rhs[..4].try_into().unwrap());
            lv.total_cmp(&rv)
        }
        ColType::Char => {
            let len = lhs.len().min(rhs.len());
            lhs[..len].cmp(&rhs[..len])
        }
    })
}

fn widen(raw: &[u8], col_type: ColType) -> f32 {
    match col_type {
        ColType::Int => i32::from_le_bytes(raw[..4].try_into().unwrap()) as f32,
        ColType::Float => f32::from_le_bytes(raw[..4].try_into().unwrap()),
        ColType::Char => unreachable!("widen called on CHAR"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let v = Value::Int(-42);
        let raw = v.encode(ColType::Int, 4).unwrap();
        assert_eq!(Value::decode(&raw, ColType::Int), v);

        let v = Value::Float(3.25);
        let raw = v.encode(ColType::Float, 4).unwrap();
        assert_eq!(Value::decode(&raw, ColType::Float), v);

        let v = Value::Str("ab".into());
        let raw = v.encode(ColType::Char, 5).unwrap();
        assert_eq!(raw, b"ab\0\0\0");
        assert_eq!(Value::decode(&raw, ColType::Char), v);
    }

    #[test]
    fn test_char_overflow_rejected() {
        let v = Value::Str("toolong".into());
        assert!(v.encode(ColType::Char, 3).is_err());
    }

    #[test]
    fn test_int_widens_to_float() {
        let v = Value::Int(3).coerce_to(ColType::Float).unwrap();
        assert_eq!(v, Value::Float(3.0));
        // But not the reverse.
        assert!(Value::Float(3.0).coerce_to(ColType::Int).is_err());
        assert!(Value::Str("x".into()).coerce_to(ColType::Int).is_err());
    }

    #[test]
    fn test_mixed_numeric_compare() {
        let int3 = Value::Int(3).encode(ColType::Int, 4).unwrap();
        let float3 = Value::Float(3.0).encode(ColType::Float, 4).unwrap();
        let float35 = Value::Float(3.5).encode(ColType::Float, 4).unwrap();

        assert_eq!(
            compare_raw(&int3, ColType::Int, &float3, ColType::Float).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            compare_raw(&float35, ColType::Float, &int3, ColType::Int).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_char_int_compare_is_error() {
        let c = Value::Str("a".into()).encode(ColType::Char, 1).unwrap();
        let i = Value::Int(1).encode(ColType::Int, 4).unwrap();
        assert!(compare_raw(&c, ColType::Char, &i, ColType::Int).is_err());
    }

    #[test]
    fn test_float_display() {
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(3.5), "3.5");
        assert_eq!(format_float(0.125), "0.125");
    }

    #[test]
    fn test_op_holds() {
        assert!(CompOp::Le.holds(Ordering::Equal));
        assert!(CompOp::Le.holds(Ordering::Less));
        assert!(!CompOp::Lt.holds(Ordering::Equal));
        assert!(CompOp::Ne.holds(Ordering::Greater));
        assert_eq!(CompOp::Ge.swapped(), CompOp::Le);
    }
}
