//! Textual rule values resolved against an element's descriptor into
//! typed, writable integers. Kept separate from the Binder's event
//! handling per the original design: value resolution is a second pass
//! over immutable-until-then rules.

use thiserror::Error;

use crate::model::Descriptor;

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("value {0:?} is not a parseable number")]
    NotParseable(String),
    #[error("value {0} is out of range [{1}..{2}]")]
    OutOfRange(i64, i64, i64),
    #[error("value {0} is not aligned to step {1}")]
    NotAligned(i64, i64),
    #[error("enum value {0:?} is not one of the element's names")]
    UnknownEnumName(String),
    #[error("boolean value {0:?} is not recognized")]
    UnknownBool(String),
}

/// `f = min + p/100 * (max - min)`, clamped and step-snapped per spec.
pub fn value_from_percent(percent: i64, min: i64, max: i64, step: i64) -> i64 {
    if percent >= 100 {
        return max;
    }
    if percent <= 0 {
        return min;
    }
    let f = min as f64 + (percent as f64 / 100.0) * (max - min) as f64;
    if step != 0 {
        let floor = f.floor() as i64;
        let remainder = (floor - min).rem_euclid(step);
        let snapped = floor + ((step - remainder) % step);
        snapped.min(max)
    } else {
        (f.ceil() as i64).min(max)
    }
}

enum ParsedInt {
    Raw(i64),
    Percent(i64),
}

fn parse_int_value_str(value_str: &str) -> Result<ParsedInt, ValueError> {
    let trimmed = value_str.trim();
    if let Some(digits) = trimmed.strip_suffix('%') {
        digits
            .parse()
            .map(ParsedInt::Percent)
            .map_err(|_| ValueError::NotParseable(value_str.to_string()))
    } else if let Some(digits) = trimmed.strip_suffix(['U', 'u']) {
        digits
            .parse()
            .map(ParsedInt::Raw)
            .map_err(|_| ValueError::NotParseable(value_str.to_string()))
    } else {
        trimmed
            .parse()
            .map(ParsedInt::Raw)
            .map_err(|_| ValueError::NotParseable(value_str.to_string()))
    }
}

pub fn resolve_int(value_str: &str, min: i64, max: i64, step: i64) -> Result<i64, ValueError> {
    match parse_int_value_str(value_str)? {
        ParsedInt::Percent(p) => Ok(value_from_percent(p, min, max, step)),
        ParsedInt::Raw(v) => {
            if v < min || v > max {
                return Err(ValueError::OutOfRange(v, min, max));
            }
            if step != 0 && (v - min) % step != 0 {
                return Err(ValueError::NotAligned(v, step));
            }
            Ok(v)
        }
    }
}

pub fn resolve_enum(value_str: &str, names: &[String]) -> Result<i64, ValueError> {
    names
        .iter()
        .position(|n| n == value_str)
        .map(|idx| idx as i64)
        .ok_or_else(|| ValueError::UnknownEnumName(value_str.to_string()))
}

pub fn resolve_bool(value_str: &str) -> Result<i64, ValueError> {
    let lower = value_str.to_ascii_lowercase();
    match lower.as_str() {
        "true" | "yes" | "on" => Ok(1),
        "false" | "no" | "off" => Ok(0),
        _ => Err(ValueError::UnknownBool(value_str.to_string())),
    }
}

/// Resolve `value_str` against the element's descriptor, dispatching on type.
pub fn resolve(value_str: &str, descriptor: &Descriptor) -> Result<i64, ValueError> {
    match descriptor {
        Descriptor::Int { min, max, step } => resolve_int(value_str, *min, *max, *step),
        Descriptor::Enum { names } => resolve_enum(value_str, names),
        Descriptor::Bool => resolve_bool(value_str),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_round_trip_no_step() {
        assert_eq!(value_from_percent(50, 0, 100, 0), 50);
        assert_eq!(value_from_percent(100, 0, 100, 0), 100);
        assert_eq!(value_from_percent(0, 0, 100, 0), 0);
        assert_eq!(value_from_percent(110, 0, 100, 0), 100);
    }

    #[test]
    fn percent_snaps_to_step() {
        assert_eq!(value_from_percent(12, 0, 100, 5), 15);
    }

    #[test]
    fn raw_int_out_of_range_is_rejected() {
        let err = resolve_int("150U", 0, 100, 0).unwrap_err();
        assert!(matches!(err, ValueError::OutOfRange(150, 0, 100)));
    }

    #[test]
    fn raw_int_must_align_to_step() {
        assert!(resolve_int("11", 0, 100, 5).is_err());
        assert!(resolve_int("10", 0, 100, 5).is_ok());
    }

    #[test]
    fn enum_matches_exact_name() {
        let names = vec!["Off".to_string(), "Mic".to_string(), "Line".to_string()];
        assert_eq!(resolve_enum("Mic", &names).unwrap(), 1);
        assert!(resolve_enum("mic", &names).is_err());
    }

    #[test]
    fn bool_is_case_insensitive() {
        assert_eq!(resolve_bool("ON").unwrap(), 1);
        assert_eq!(resolve_bool("Off").unwrap(), 0);
        assert!(resolve_bool("nope").is_err());
    }
}
