// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric shapes
//!
//! A shape describes one metric family the station emits: the key that
//! identifies it and the ordered fields to pull out of the record. Shapes
//! are declared as plain data in [`STANDARD_SHAPES`] and compiled once into
//! a [`ShapeTable`].
//!
//! | Shape | Fields | Topics |
//! |-------|--------|--------|
//! | `humidity_temperature` | humidity, temperature | `dht/humidity`, `dht/temperature` |
//! | `wind_angle` | wind_angle | `dht/wind_angle` |
//! | `wind_speed` | wind_speed | `dht/wind_speed` |

use regex::Regex;

use crate::error::MalformedRecordError;

/// One field of a shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Key as it appears in the record, e.g. `temperature_f`
    pub key: &'static str,
    /// Field name used for aggregation, e.g. `temperature`
    pub name: &'static str,
    /// Topic path below the topic base, e.g. `dht/temperature`
    pub topic: &'static str,
}

/// Declarative description of a metric family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeSpec {
    /// Shape name
    pub name: &'static str,
    /// Fields in publish order; the first key identifies the shape
    pub fields: &'static [FieldSpec],
}

/// Shapes emitted by the weather station firmware, in evaluation order
pub const STANDARD_SHAPES: &[ShapeSpec] = &[
    ShapeSpec {
        name: "humidity_temperature",
        fields: &[
            FieldSpec {
                key: "humidity",
                name: "humidity",
                topic: "dht/humidity",
            },
            FieldSpec {
                key: "temperature_f",
                name: "temperature",
                topic: "dht/temperature",
            },
        ],
    },
    ShapeSpec {
        name: "wind_angle",
        fields: &[FieldSpec {
            key: "wind_angle",
            name: "wind_angle",
            topic: "dht/wind_angle",
        }],
    },
    ShapeSpec {
        name: "wind_speed",
        fields: &[FieldSpec {
            key: "wind_speed",
            name: "wind_speed",
            topic: "dht/wind_speed",
        }],
    },
];

/// A value pulled out of a record by a shape
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    /// Field the value belongs to
    pub field: &'static FieldSpec,
    /// Parsed value
    pub value: f64,
    /// Value text exactly as it appeared in the record
    pub raw: String,
}

#[derive(Debug)]
struct FieldRule {
    spec: &'static FieldSpec,
    capture: Regex,
}

/// A compiled [`ShapeSpec`]: recognition predicate plus extraction rule
#[derive(Debug)]
pub struct MetricShape {
    spec: &'static ShapeSpec,
    recognizer: Regex,
    rules: Vec<FieldRule>,
}

impl MetricShape {
    /// Compile a shape description
    ///
    /// # Panics
    ///
    /// Panics if `spec` declares no fields.
    pub fn compile(spec: &'static ShapeSpec) -> Self {
        let primary = spec
            .fields
            .first()
            .unwrap_or_else(|| panic!("shape '{}' declares no fields", spec.name));

        Self {
            spec,
            recognizer: key_pattern(primary.key, ""),
            rules: spec
                .fields
                .iter()
                .map(|field| FieldRule {
                    spec: field,
                    // Value token: a quoted string or everything up to , } ] or whitespace
                    capture: key_pattern(field.key, r#"\s*("(?:[^"\\]|\\.)*"|[^,}\]\s]+)"#),
                })
                .collect(),
        }
    }

    /// Shape name
    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    /// Fields in publish order
    pub fn fields(&self) -> &'static [FieldSpec] {
        self.spec.fields
    }

    /// Does the record carry this metric family?
    pub fn recognizes(&self, record: &str) -> bool {
        self.recognizer.is_match(record)
    }

    /// Extract every field, or nothing
    ///
    /// # Errors
    ///
    /// The first field that is missing, unparsable, or not finite.
    pub fn extract(&self, record: &str) -> Result<Vec<FieldValue>, MalformedRecordError> {
        self.rules
            .iter()
            .map(|rule| {
                let raw = rule
                    .capture
                    .captures(record)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str())
                    .ok_or(MalformedRecordError::MissingField {
                        shape: self.spec.name,
                        field: rule.spec.name,
                    })?;

                let value: f64 = raw.parse().map_err(|_| MalformedRecordError::NotANumber {
                    shape: self.spec.name,
                    field: rule.spec.name,
                    raw: raw.to_string(),
                })?;

                if !value.is_finite() {
                    return Err(MalformedRecordError::NonFinite {
                        shape: self.spec.name,
                        field: rule.spec.name,
                        raw: raw.to_string(),
                    });
                }

                Ok(FieldValue {
                    field: rule.spec,
                    value,
                    raw: raw.to_string(),
                })
            })
            .collect()
    }
}

/// `"key"` followed by a colon, then `tail`
fn key_pattern(key: &str, tail: &str) -> Regex {
    let pattern = format!(r#""{}"\s*:{}"#, regex::escape(key), tail);
    // Keys are escaped and the tails are fixed literals
    Regex::new(&pattern).unwrap_or_else(|e| panic!("invalid shape pattern {}: {}", pattern, e))
}

/// Ordered, immutable set of compiled shapes
#[derive(Debug)]
pub struct ShapeTable {
    shapes: Vec<MetricShape>,
}

impl ShapeTable {
    /// Compile a table from shape descriptions, preserving their order
    pub fn new(specs: &'static [ShapeSpec]) -> Self {
        Self {
            shapes: specs.iter().map(MetricShape::compile).collect(),
        }
    }

    /// The weather station table
    pub fn standard() -> Self {
        Self::new(STANDARD_SHAPES)
    }

    /// Shapes in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = &MetricShape> {
        self.shapes.iter()
    }

    /// Number of shapes
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// True when the table has no shapes
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Look up a field by its aggregation name
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.shapes
            .iter()
            .flat_map(|shape| shape.fields().iter())
            .find(|field| field.name == name)
    }
}

impl Default for ShapeTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(name: &str) -> MetricShape {
        let spec = STANDARD_SHAPES
            .iter()
            .find(|s| s.name == name)
            .expect("unknown shape");
        MetricShape::compile(spec)
    }

    #[test]
    fn test_standard_table_order() {
        let table = ShapeTable::standard();
        let names: Vec<_> = table.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["humidity_temperature", "wind_angle", "wind_speed"]
        );
    }

    #[test]
    fn test_recognition_requires_key_and_colon() {
        let dht = shape("humidity_temperature");
        assert!(dht.recognizes(r#"{"humidity": 45.20, "temperature_f": 71.30}"#));
        assert!(dht.recognizes(r#"{"humidity":45.2}"#));
        assert!(!dht.recognizes(r#"{"adc0": 1.65}"#));
        assert!(!dht.recognizes("humidity is high"));
    }

    #[test]
    fn test_extract_humidity_temperature() {
        let dht = shape("humidity_temperature");
        let values = dht
            .extract(r#"{"humidity": 45.20, "temperature_f": 71.30}"#)
            .unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(values[0].field.name, "humidity");
        assert_eq!(values[0].raw, "45.20");
        assert_eq!(values[0].value, 45.2);
        assert_eq!(values[1].field.name, "temperature");
        assert_eq!(values[1].field.topic, "dht/temperature");
        assert_eq!(values[1].raw, "71.30");
    }

    #[test]
    fn test_extract_tolerates_spacing_and_extra_keys() {
        let speed = shape("wind_speed");
        let values = speed
            .extract(r#"{"wind_speed":12.57, "gpio_cb_count": 4}"#)
            .unwrap();
        assert_eq!(values[0].raw, "12.57");

        let negative = shape("humidity_temperature")
            .extract(r#"{"temperature_f" : -4.5, "humidity" :  30}"#)
            .unwrap();
        assert_eq!(negative[0].value, 30.0);
        assert_eq!(negative[1].value, -4.5);
    }

    #[test]
    fn test_quoted_value_is_malformed() {
        let err = shape("humidity_temperature")
            .extract(r#"{"humidity": "oops", "temperature_f": 71.30}"#)
            .unwrap_err();
        assert_eq!(
            err,
            MalformedRecordError::NotANumber {
                shape: "humidity_temperature",
                field: "humidity",
                raw: "\"oops\"".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_secondary_field_is_malformed() {
        let err = shape("humidity_temperature")
            .extract(r#"{"humidity": 45.20}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            MalformedRecordError::MissingField {
                field: "temperature",
                ..
            }
        ));
    }

    #[test]
    fn test_non_finite_value_is_malformed() {
        let err = shape("wind_angle")
            .extract(r#"{"wind_angle": NaN}"#)
            .unwrap_err();
        assert!(matches!(err, MalformedRecordError::NonFinite { .. }));

        let err = shape("wind_angle")
            .extract(r#"{"wind_angle": inf}"#)
            .unwrap_err();
        assert!(matches!(err, MalformedRecordError::NonFinite { .. }));
    }

    #[test]
    fn test_field_lookup() {
        let table = ShapeTable::standard();
        assert_eq!(table.field("temperature").unwrap().key, "temperature_f");
        assert_eq!(table.field("wind_speed").unwrap().topic, "dht/wind_speed");
        assert!(table.field("adc0").is_none());
    }
}
