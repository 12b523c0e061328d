//! # Runtime Value Representation
//!
//! `Value` is the runtime representation of a column value flowing through
//! the executor. Variants map one-to-one onto the storable [`DataType`]s.
//!
//! ## Comparison Semantics
//!
//! Two orderings are exposed:
//!
//! - [`Value::compare`] implements SQL comparison: NULL compared to anything
//!   is unknown (`None`), integers and floats cross-compare numerically.
//! - [`Value::sort_cmp`] is the total order used by ORDER BY: NULL sorts
//!   before every non-NULL value, values of the same type compare naturally,
//!   and mixed types fall back to a deterministic type rank
//!   (Boolean < numeric < Text < Blob) rather than erroring.

use std::cmp::Ordering;

use super::DataType;

/// Runtime column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Text(_) => DataType::Text,
            Value::Blob(_) => DataType::Blob,
            Value::Boolean(_) => DataType::Boolean,
        }
    }

    /// Rank used to break ties between values of different types in
    /// [`Value::sort_cmp`]. Numeric types share a rank so they compare
    /// by magnitude instead.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Blob(_) => 4,
        }
    }

    /// SQL three-valued comparison: `None` when either side is NULL or the
    /// types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order for sorting: NULL first, then by value within a type,
    /// then by type rank across types.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        if let Some(ord) = self.compare(other) {
            return ord;
        }

        // Mixed incomparable types: NaN-free deterministic fallback.
        self.type_rank().cmp(&other.type_rank())
    }

    /// Encodes the value into `key` for DISTINCT tracking. The encoding is
    /// injective per type (tag byte + canonical payload).
    pub fn encode_key(&self, key: &mut Vec<u8>) {
        key.push(self.data_type().as_byte());
        match self {
            Value::Null => {}
            Value::Integer(i) => key.extend_from_slice(&i.to_le_bytes()),
            Value::Float(f) => key.extend_from_slice(&f.to_bits().to_le_bytes()),
            Value::Text(s) => {
                key.extend_from_slice(&(s.len() as u32).to_le_bytes());
                key.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                key.extend_from_slice(&(b.len() as u32).to_le_bytes());
                key.extend_from_slice(b);
            }
            Value::Boolean(b) => key.push(*b as u8),
        }
    }

    /// Approximate in-memory footprint, used when operators charge
    /// materialized rows against the query memory budget.
    pub fn approx_size(&self) -> usize {
        let payload = match self {
            Value::Text(s) => s.len(),
            Value::Blob(b) => b.len(),
            _ => 0,
        };
        std::mem::size_of::<Value>() + payload
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Blob(b) => write!(f, "x'{}'", hex(b)),
            Value::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_compares_unknown() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
        assert_eq!(Value::Integer(1).compare(&Value::Null), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn numeric_cross_type_comparison() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Float(3.0).compare(&Value::Integer(3)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn sort_cmp_places_null_first() {
        assert_eq!(Value::Null.sort_cmp(&Value::Integer(i64::MIN)), Ordering::Less);
        assert_eq!(Value::Text(String::new()).sort_cmp(&Value::Null), Ordering::Greater);
        assert_eq!(Value::Null.sort_cmp(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn sort_cmp_mixed_types_is_deterministic() {
        let a = Value::Boolean(true);
        let b = Value::Text("a".into());
        assert_eq!(a.sort_cmp(&b), Ordering::Less);
        assert_eq!(b.sort_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn encode_key_distinguishes_types() {
        let mut k1 = Vec::new();
        let mut k2 = Vec::new();
        Value::Integer(1).encode_key(&mut k1);
        Value::Boolean(true).encode_key(&mut k2);
        assert_ne!(k1, k2);
    }
}
