//! Lenient deserializers for loosely-typed queue payloads.
//!
//! The queue API hands out numbers either as JSON numbers or as numeric
//! strings, and occasionally as `null`/`""`. These helpers fold all of those
//! into a plain integer, defaulting to zero.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Interpret a JSON value the way a loose `parseInt` would.
pub fn value_to_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => parse_leading_int(s),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

/// Parse the leading integer of a string (`"12px"` -> 12, `"abc"` -> 0).
fn parse_leading_int(s: &str) -> i64 {
    let s = s.trim();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

/// Deserialize an integer that may arrive as a number, string, bool or null.
pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(value_to_i64).unwrap_or(0))
}

/// Deserialize a 0/1 flag that may arrive in any of the lenient forms.
pub fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_i64(deserializer).map(|n| n == 1)
}

/// Deserialize a string that may be `null` or a number.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_i64() {
        assert_eq!(value_to_i64(&json!(3)), 3);
        assert_eq!(value_to_i64(&json!("42")), 42);
        assert_eq!(value_to_i64(&json!(" 7 ")), 7);
        assert_eq!(value_to_i64(&json!("12px")), 12);
        assert_eq!(value_to_i64(&json!("-5")), -5);
        assert_eq!(value_to_i64(&json!("")), 0);
        assert_eq!(value_to_i64(&json!(null)), 0);
        assert_eq!(value_to_i64(&json!(true)), 1);
        assert_eq!(value_to_i64(&json!(2.9)), 2);
    }

    #[test]
    fn test_lenient_fields() {
        #[derive(Deserialize)]
        struct Probe {
            #[serde(default, deserialize_with = "lenient_i64")]
            n: i64,
            #[serde(default, deserialize_with = "lenient_flag")]
            flag: bool,
            #[serde(default, deserialize_with = "lenient_string")]
            s: String,
        }

        let p: Probe = serde_json::from_value(json!({"n": "9", "flag": "1", "s": 15})).unwrap();
        assert_eq!(p.n, 9);
        assert!(p.flag);
        assert_eq!(p.s, "15");

        let p: Probe = serde_json::from_value(json!({"n": null, "flag": 0, "s": null})).unwrap();
        assert_eq!(p.n, 0);
        assert!(!p.flag);
        assert_eq!(p.s, "");

        let p: Probe = serde_json::from_value(json!({})).unwrap();
        assert_eq!(p.n, 0);
    }
}
