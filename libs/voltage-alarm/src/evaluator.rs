//! Rule evaluation
//!
//! Pure functions mapping (rule, extracted value) to activation flags. One
//! flag per rule for THRESHOLD and DIRECT, one per configured bit for
//! BIT_VALUE. State transitions are decided elsewhere (`ActivationState::advance`).

use serde_json::Value;

use crate::types::{BitRule, RuleConfig, RuleKind, StateKey, ThresholdLimits};

/// Activation flag for one state key
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFlag {
    pub key: StateKey,
    /// Custom name of the rule or bit
    pub label: String,
    pub active: bool,
}

/// Why a rule produced no observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// THRESHOLD value not coercible to a finite number
    NotNumeric,
    /// BIT_VALUE value not coercible to an integer
    NotInteger,
}

/// Outcome of evaluating one rule against one value
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Skipped(SkipReason),
    Flags(Vec<KeyFlag>),
}

impl Evaluation {
    fn single(rule: &RuleConfig, active: bool) -> Self {
        Evaluation::Flags(vec![KeyFlag {
            key: StateKey::rule(rule.id),
            label: rule.name.clone(),
            active,
        }])
    }
}

/// Evaluate a rule against its extracted value
pub fn evaluate(rule: &RuleConfig, value: &Value) -> Evaluation {
    match &rule.kind {
        RuleKind::Threshold(limits) => match coerce_number(value) {
            Some(number) => Evaluation::single(rule, threshold_active(limits, number)),
            None => Evaluation::Skipped(SkipReason::NotNumeric),
        },
        RuleKind::Direct => Evaluation::single(rule, direct_active(value)),
        RuleKind::BitValue { bits } => match coerce_integer(value) {
            Some(raw) => Evaluation::Flags(bit_flags(rule.id, bits, raw)),
            None => Evaluation::Skipped(SkipReason::NotInteger),
        },
    }
}

/// `max_only`: above max. Otherwise: below min or above max.
/// Absent bounds never trip.
pub fn threshold_active(limits: &ThresholdLimits, value: f64) -> bool {
    let above = limits.max.is_some_and(|max| value > max);
    if limits.max_only {
        return above;
    }
    let below = limits.min.is_some_and(|min| value < min);
    below || above
}

/// `true` or the number 1; anything else is inactive
pub fn direct_active(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

pub fn bit_active(raw: i64, position: u8) -> bool {
    position < 64 && (raw >> position) & 1 == 1
}

fn bit_flags(rule_id: i64, bits: &[BitRule], raw: i64) -> Vec<KeyFlag> {
    bits.iter()
        .map(|bit| KeyFlag {
            key: StateKey::bit(rule_id, bit.position),
            label: bit.name.clone(),
            active: bit_active(raw, bit.position),
        })
        .collect()
}

/// JSON number or trimmed numeric string, finite only
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// JSON integer, integral float, decimal or `0x` hex string
pub fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            if let Some(u) = n.as_u64() {
                return i64::try_from(u).ok();
            }
            let f = n.as_f64()?;
            if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                Some(f as i64)
            } else {
                None
            }
        },
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16).ok(),
                None => s.parse::<i64>().ok(),
            }
        },
        _ => None,
    }
}
