//! Triple values and their total ordering.
//!
//! Values carry no type information beyond their own variant; cross-type
//! comparisons are made deterministic by a total-order byte encoding:
//! null < booleans < numbers < strings < arrays. Missing values (an entity
//! that has no triple for the attribute) sort before everything, which the
//! encoding reserves tag `0x00` for.
//!
//! The same encoding backs sort keys, cursor comparison and the range-index
//! keys of store implementations, so the three agree by construction.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Encoding tag for a missing value.
const TAG_MISSING: u8 = 0x00;
const TAG_NULL: u8 = 0x01;
const TAG_BOOLEAN: u8 = 0x02;
const TAG_NUMBER: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_ARRAY: u8 = 0x05;

/// A triple value.
///
/// `Array` never appears in stored triples; it exists for filter arguments
/// (`in` / `nin` lists).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    /// Rank used for cross-type ordering.
    const fn rank(&self) -> u8 {
        match self {
            Self::Null => TAG_NULL,
            Self::Boolean(_) => TAG_BOOLEAN,
            Self::Number(_) => TAG_NUMBER,
            Self::String(_) => TAG_STRING,
            Self::Array(_) => TAG_ARRAY,
        }
    }

    /// Total-order comparison across all value types.
    #[must_use]
    pub fn cmp_total(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.cmp_total(y) {
                        Ordering::Equal => {}
                        unequal => return unequal,
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    /// Equality under the total order.
    #[must_use]
    pub fn eq_total(&self, other: &Self) -> bool {
        self.cmp_total(other) == Ordering::Equal
    }

    /// Append the order-preserving byte encoding of this value.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(TAG_NULL),
            Self::Boolean(b) => {
                out.push(TAG_BOOLEAN);
                out.push(u8::from(*b));
            }
            Self::Number(n) => {
                out.push(TAG_NUMBER);
                out.extend_from_slice(&encode_f64(*n));
            }
            Self::String(s) => {
                out.push(TAG_STRING);
                encode_str(s, out);
            }
            Self::Array(items) => {
                out.push(TAG_ARRAY);
                for item in items {
                    item.encode_into(out);
                }
                // Empty terminator so a prefix array sorts first.
                out.push(TAG_MISSING);
            }
        }
    }

    /// Order-preserving byte encoding of this value.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Canonical string form used when a value becomes a path segment
    /// (set-member triples keep the member value in the attribute path).
    #[must_use]
    pub fn to_segment(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Boolean(b) => b.to_string(),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::String(s) => s.as_str().to_owned(),
            Self::Array(_) => String::new(),
        }
    }
}

/// Encode an optional value: `None` (missing) sorts before everything.
#[must_use]
pub fn encode_optional(value: Option<&Value>) -> Vec<u8> {
    match value {
        None => vec![TAG_MISSING],
        Some(v) => v.encode(),
    }
}

/// Compare optional values: missing sorts as MIN.
#[must_use]
pub fn cmp_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp_total(y),
    }
}

/// Order-preserving encoding of an f64.
///
/// Positive numbers get their sign bit flipped, negatives are fully
/// inverted, so the big-endian byte order matches numeric order.
fn encode_f64(n: f64) -> [u8; 8] {
    let bits = n.to_bits();
    let mapped = if bits >> 63 == 1 {
        !bits
    } else {
        bits ^ (1 << 63)
    };
    mapped.to_be_bytes()
}

/// Escape and terminate a string so concatenated encodings stay ordered.
///
/// `0x00` bytes are escaped as `0x00 0xFF`; the terminator is `0x00 0x00`.
fn encode_str(s: &str, out: &mut Vec<u8>) {
    for b in s.as_bytes() {
        if *b == 0x00 {
            out.push(0x00);
            out.push(0xFF);
        } else {
            out.push(*b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

/// SQL-style `like` match: `%` matches any run, `_` a single character.
#[must_use]
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    // Backtrack points for the most recent `%`.
    let mut star_pi = usize::MAX;
    let mut star_ti = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star_pi = pi;
            star_ti = ti;
            pi += 1;
        } else if star_pi != usize::MAX {
            pi = star_pi + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}
