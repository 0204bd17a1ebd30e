// Telemetry Forwarder - Serial sensor to pub/sub forwarding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric extraction
//!
//! The [`MetricExtractor`] runs every shape of its table against a record.
//! Shapes are independent: a malformed match for one shape never prevents
//! another shape from matching the same record.

use crate::error::MalformedRecordError;
use crate::shape::{FieldValue, ShapeTable};

/// A metric value extracted from a record
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Shape that produced the value
    pub metric: &'static str,
    /// Field name, the aggregation key
    pub field: &'static str,
    /// Topic path below the topic base
    pub topic: &'static str,
    /// Parsed value
    pub value: f64,
    /// Value text as received, used as the immediate payload
    pub raw: String,
}

/// Outcome of running the shape table against one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    samples: Vec<MetricSample>,
    errors: Vec<MalformedRecordError>,
    recognized: usize,
}

impl Extraction {
    /// Extracted values, grouped by shape in table order, fields in declared order
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// Shapes that recognized the record but failed to extract
    pub fn errors(&self) -> &[MalformedRecordError] {
        &self.errors
    }

    /// Number of shapes whose predicate matched
    pub fn recognized(&self) -> usize {
        self.recognized
    }

    /// No shape recognized the record
    pub fn is_unrecognized(&self) -> bool {
        self.recognized == 0
    }

    /// `(metric, field, value)` triples
    pub fn metrics(&self) -> impl Iterator<Item = (&'static str, &'static str, f64)> + '_ {
        self.samples.iter().map(|s| (s.metric, s.field, s.value))
    }
}

/// Classifies records against a [`ShapeTable`]
#[derive(Debug, Default)]
pub struct MetricExtractor {
    table: ShapeTable,
}

impl MetricExtractor {
    /// Create an extractor over the weather station shapes
    pub fn new() -> Self {
        Self::with_table(ShapeTable::standard())
    }

    /// Create an extractor over a custom table
    pub fn with_table(table: ShapeTable) -> Self {
        Self { table }
    }

    /// The shape table in use
    pub fn table(&self) -> &ShapeTable {
        &self.table
    }

    /// Run every shape against `record`
    pub fn extract(&self, record: &str) -> Extraction {
        let mut extraction = Extraction::default();

        for shape in self.table.iter() {
            if !shape.recognizes(record) {
                continue;
            }
            extraction.recognized += 1;

            match shape.extract(record) {
                Ok(values) => {
                    extraction
                        .samples
                        .extend(values.into_iter().map(|v| to_sample(shape.name(), v)));
                }
                Err(e) => extraction.errors.push(e),
            }
        }

        extraction
    }
}

fn to_sample(metric: &'static str, value: FieldValue) -> MetricSample {
    MetricSample {
        metric,
        field: value.field.name,
        topic: value.field.topic,
        value: value.value,
        raw: value.raw,
    }
}
