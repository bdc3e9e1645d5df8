use serde_json::Value;

use crate::models::{id_from_value, money_from_value, Money};

pub(crate) fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
}

/// Comparison form of a transfer reference: hyphens and whitespace removed,
/// upper-cased. Banks routinely strip punctuation from transfer notes.
pub(crate) fn normalize_reference(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_money(v: &Value, keys: &[&str]) -> Option<Money> {
    keys.iter()
        .find_map(|key| v.get(*key).and_then(money_from_value))
}

pub(crate) fn value_id(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| v.get(*key).and_then(id_from_value))
}

/// Unwrap the `{ "data": ... }` envelope some endpoints use.
pub(crate) fn unwrap_data(v: Value) -> Value {
    match v {
        Value::Object(mut obj) if obj.contains_key("data") => {
            obj.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Format an amount with `.` thousands separators, e.g. `150.000`.
pub(crate) fn format_vnd(amount: Money) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}
