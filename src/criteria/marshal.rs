//! The logical-type -> [`WireValue`] tagging table (§4.C), parameterized by
//! [`Compatibility`] so a deployment reading a dataset written by an older
//! generation of this pipeline can opt into the legacy tag choices without
//! forking the marshaller.

use crate::criteria::model::{RawValue, WireValue};
use crate::error::DynaQueryError;
use crate::metadata::model::{LogicalType, PropertyRef};

/// `NATIVE` produces the tag DynamoDB's own SDK types would pick; `LEGACY`
/// reproduces the tag choices of a previous generation of this pipeline so
/// it can read data that generation wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compatibility {
    #[default]
    Native,
    Legacy,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MarshalConfig {
    pub compatibility: Compatibility,
}

fn type_mismatch(property: &PropertyRef, expected: &str, found: &RawValue) -> DynaQueryError {
    DynaQueryError::Metadata {
        entity: "<unresolved>",
        message: format!(
            "property {:?} expects {expected}, found {found:?}",
            property.property
        ),
    }
}

/// Marshals one scalar value according to `property.logical_type` and the
/// configured [`Compatibility`] (the Default-mode/Compat-mode table).
pub fn marshal_scalar(
    property: &PropertyRef,
    config: MarshalConfig,
    value: &RawValue,
) -> Result<WireValue, DynaQueryError> {
    use Compatibility::*;
    use LogicalType::*;

    Ok(match (property.logical_type, value) {
        (String, RawValue::Str(s)) => WireValue::S(s.clone()),
        (Integer, RawValue::Int(n)) => WireValue::N(n.to_string()),
        (Floating, RawValue::Float(f)) => WireValue::N(format_float(*f)),
        (Bytes, RawValue::Bytes(b)) => WireValue::B(b.clone()),
        (Boolean, RawValue::Bool(b)) => match config.compatibility {
            Native => WireValue::Bool(*b),
            Legacy => WireValue::N(if *b { "1" } else { "0" }.to_string()),
        },
        (Instant, RawValue::Instant(ts)) => match config.compatibility {
            // `AutoSi` preserves up to nanosecond resolution without padding
            // a millisecond-precision value out to nine digits, matching
            // the literal wire form §8 scenario 5 requires.
            Native => WireValue::S(ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)),
            Legacy => WireValue::S(ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        },
        (Date, RawValue::Date(ts)) => match config.compatibility {
            Native => WireValue::N(ts.timestamp_millis().to_string()),
            Legacy => WireValue::S(ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        },
        (Other, _) => {
            return Err(DynaQueryError::Metadata {
                entity: "<unresolved>",
                message: format!(
                    "property {:?} has no converter registered for its logical type",
                    property.property
                ),
            })
        }
        (expected, found) => return Err(type_mismatch(property, &format!("{expected:?}"), found)),
    })
}

/// Marshals a homogeneous collection of values for `IN` / `BETWEEN`, or for
/// a set-typed property. Booleans inside a collection always become an
/// `NS` of `"1"`/`"0"` regardless of [`Compatibility`] (§9 Open Question).
pub fn marshal_collection(
    property: &PropertyRef,
    config: MarshalConfig,
    values: &[RawValue],
) -> Result<Vec<WireValue>, DynaQueryError> {
    values
        .iter()
        .map(|v| match (property.logical_type, v) {
            (LogicalType::Boolean, RawValue::Bool(b)) => {
                Ok(WireValue::N(if *b { "1" } else { "0" }.to_string()))
            }
            _ => marshal_scalar(property, config, v),
        })
        .collect()
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.0}")
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_prop() -> PropertyRef {
        PropertyRef {
            property: "name",
            attribute: "name",
            logical_type: LogicalType::String,
        }
    }

    fn bool_prop() -> PropertyRef {
        PropertyRef {
            property: "active",
            attribute: "active",
            logical_type: LogicalType::Boolean,
        }
    }

    #[test]
    fn native_boolean_is_bool_tag() {
        let config = MarshalConfig { compatibility: Compatibility::Native };
        let wire = marshal_scalar(&bool_prop(), config, &RawValue::Bool(true)).unwrap();
        assert_eq!(wire, WireValue::Bool(true));
    }

    #[test]
    fn legacy_boolean_is_numeric_tag() {
        let config = MarshalConfig { compatibility: Compatibility::Legacy };
        let wire = marshal_scalar(&bool_prop(), config, &RawValue::Bool(false)).unwrap();
        assert_eq!(wire, WireValue::N("0".to_string()));
    }

    #[test]
    fn boolean_collection_is_always_numeric_set() {
        let config = MarshalConfig { compatibility: Compatibility::Native };
        let wire = marshal_collection(
            &bool_prop(),
            config,
            &[RawValue::Bool(true), RawValue::Bool(false)],
        )
        .unwrap();
        assert_eq!(
            wire,
            vec![WireValue::N("1".to_string()), WireValue::N("0".to_string())]
        );
    }

    #[test]
    fn string_marshals_identically_in_both_modes() {
        let value = RawValue::Str("abc".to_string());
        let native = marshal_scalar(
            &string_prop(),
            MarshalConfig { compatibility: Compatibility::Native },
            &value,
        )
        .unwrap();
        let legacy = marshal_scalar(
            &string_prop(),
            MarshalConfig { compatibility: Compatibility::Legacy },
            &value,
        )
        .unwrap();
        assert_eq!(native, legacy);
    }

    #[test]
    fn instant_native_uses_nanosecond_precision() {
        let prop = PropertyRef {
            property: "timestamp",
            attribute: "timestamp",
            logical_type: LogicalType::Instant,
        };
        let ts = chrono::DateTime::parse_from_rfc3339("1970-01-01T00:00:00.001Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let wire = marshal_scalar(
            &prop,
            MarshalConfig { compatibility: Compatibility::Native },
            &RawValue::Instant(ts),
        )
        .unwrap();
        assert_eq!(wire, WireValue::S("1970-01-01T00:00:00.001Z".to_string()));
    }
}
