//! Primitive conversions
//!
//! The pure parts of ToNumber / ToString / ToInt32. Conversions that can
//! run script (valueOf / toString on objects) live in the interpreter,
//! which has the context to make calls.

use crate::value::Value;

/// ToNumber for values that are already primitive. Objects convert to
/// NaN here; the interpreter runs ToPrimitive first when it matters.
pub fn to_number(value: &Value) -> f64 {
    if let Some(n) = value.as_number() {
        return n;
    }
    if value.is_undefined() || value.is_hole() {
        return f64::NAN;
    }
    if value.is_null() {
        return 0.0;
    }
    if let Some(b) = value.as_boolean() {
        return if b { 1.0 } else { 0.0 };
    }
    if let Some(s) = value.as_string() {
        return parse_number(s.as_str());
    }
    f64::NAN
}

/// String-to-number per the numeric literal grammar: trimmed, empty is
/// zero, hex/octal/binary prefixes, Infinity
pub fn parse_number(input: &str) -> f64 {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return match i64::from_str_radix(hex, 16) {
            Ok(n) => n as f64,
            Err(_) => f64::NAN,
        };
    }
    if let Some(oct) = trimmed.strip_prefix("0o").or_else(|| trimmed.strip_prefix("0O")) {
        return match i64::from_str_radix(oct, 8) {
            Ok(n) => n as f64,
            Err(_) => f64::NAN,
        };
    }
    if let Some(bin) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        return match i64::from_str_radix(bin, 2) {
            Ok(n) => n as f64,
            Err(_) => f64::NAN,
        };
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// ToString for primitives. Objects render their tag; script-visible
/// object stringification goes through the interpreter's ToPrimitive.
pub fn to_display_string(value: &Value) -> String {
    if value.is_undefined() || value.is_hole() {
        return "undefined".to_string();
    }
    if value.is_null() {
        return "null".to_string();
    }
    if let Some(b) = value.as_boolean() {
        return b.to_string();
    }
    if let Some(n) = value.as_number() {
        return number_to_string(n);
    }
    if let Some(s) = value.as_string() {
        return s.as_str().to_string();
    }
    if let Some(sym) = value.as_symbol() {
        return format!("{:?}", sym);
    }
    if let Some(b) = value.as_bigint() {
        return format!("{}", b.value);
    }
    if value.is_array() {
        return "[object Array]".to_string();
    }
    if value.is_callable() {
        return "function".to_string();
    }
    "[object Object]".to_string()
}

/// Number formatting: integral doubles print without a fraction, the
/// rest use the shortest round-trip form.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{}", n as i64);
    }
    format!("{}", n)
}

/// ToInt32 (for bitwise operators): modulo 2^32 with sign wrap
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let n = n.trunc();
    let m = n.rem_euclid(4294967296.0);
    if m >= 2147483648.0 {
        (m - 4294967296.0) as i32
    } else {
        m as i32
    }
}

/// ToUint32 (for `>>>`)
pub fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_number_primitives() {
        assert_eq!(to_number(&Value::null()), 0.0);
        assert!(to_number(&Value::undefined()).is_nan());
        assert_eq!(to_number(&Value::boolean(true)), 1.0);
        assert_eq!(to_number(&Value::str("  42  ")), 42.0);
        assert_eq!(to_number(&Value::str("")), 0.0);
        assert_eq!(to_number(&Value::str("0x10")), 16.0);
        assert!(to_number(&Value::str("12abc")).is_nan());
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
    }

    #[test]
    fn test_to_int32_wrapping() {
        assert_eq!(to_int32(0.0), 0);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(4294967296.0), 0);
        assert_eq!(to_int32(2147483648.0), -2147483648);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn test_to_uint32() {
        assert_eq!(to_uint32(-1.0), u32::MAX);
    }
}
