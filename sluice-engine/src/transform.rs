//! Transform chain
//!
//! An ordered list of pure record-to-record functions. Every record of every
//! batch goes through every transform, in registration order.
//!
//! Transforms are either closures registered from code or named specs parsed
//! from text (CLI flags, config files) with [`TransformSpec::parse`].

use serde_json::Value;
use sluice_core::{Record, RecordBatch};
use std::fmt;
use std::sync::Arc;

use crate::error::{EtlError, Result};

/// A pure record-to-record function
pub type TransformFn = Arc<dyn Fn(Record) -> Record + Send + Sync>;

/// A named transform
#[derive(Clone)]
pub struct Transform {
    name: String,
    func: TransformFn,
}

impl Transform {
    /// Wraps a closure as a transform
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Record) -> Record + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, record: Record) -> Record {
        (self.func)(record)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").field("name", &self.name).finish()
    }
}

impl From<TransformSpec> for Transform {
    fn from(spec: TransformSpec) -> Self {
        spec.into_transform()
    }
}

/// Ordered sequence of transforms
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    transforms: Vec<Transform>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transform: Transform) {
        self.transforms.push(transform);
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.transforms.iter().map(Transform::name).collect()
    }

    /// Runs one record through every transform in order
    pub fn apply(&self, record: Record) -> Record {
        self.transforms
            .iter()
            .fold(record, |record, transform| transform.apply(record))
    }

    /// Produces a new batch with every record transformed
    pub fn apply_batch(&self, batch: RecordBatch) -> RecordBatch {
        if self.transforms.is_empty() {
            return batch;
        }
        batch.map(|record| self.apply(record))
    }
}

/// Built-in transform parsed from text
///
/// Syntax: `kind:arguments`
/// - `rename:from=to`
/// - `drop:field`
/// - `set:field=value` (value parsed as JSON, falling back to a string)
/// - `concat:target=a+b+c` (space-joined)
/// - `digits:field` (keeps only ASCII digits)
/// - `upper:field`, `lower:field`
#[derive(Debug, Clone, PartialEq)]
pub enum TransformSpec {
    Rename { from: String, to: String },
    Drop { field: String },
    Set { field: String, value: Value },
    Concat { target: String, fields: Vec<String> },
    Digits { field: String },
    Upper { field: String },
    Lower { field: String },
}

impl TransformSpec {
    /// Parses a transform spec
    ///
    /// # Errors
    /// Returns `EtlError::Configuration` for unknown kinds or malformed arguments
    pub fn parse(spec: &str) -> Result<Self> {
        let (kind, args) = spec
            .split_once(':')
            .ok_or_else(|| EtlError::configuration(format!("transform '{}' must look like kind:args", spec)))?;
        let args = args.trim();

        let field = |args: &str| -> Result<String> {
            if args.is_empty() {
                Err(EtlError::configuration(format!("transform '{}' needs a field name", spec)))
            } else {
                Ok(args.to_string())
            }
        };

        let pair = |args: &str| -> Result<(String, String)> {
            match args.split_once('=') {
                Some((left, right)) if !left.trim().is_empty() => {
                    Ok((left.trim().to_string(), right.trim().to_string()))
                }
                _ => Err(EtlError::configuration(format!(
                    "transform '{}' needs arguments of the form key=value",
                    spec
                ))),
            }
        };

        match kind.trim() {
            "rename" => {
                let (from, to) = pair(args)?;
                if to.is_empty() {
                    return Err(EtlError::configuration(format!(
                        "transform '{}' needs a target field name",
                        spec
                    )));
                }
                Ok(TransformSpec::Rename { from, to })
            }
            "drop" => Ok(TransformSpec::Drop { field: field(args)? }),
            "set" => {
                let (field, raw) = pair(args)?;
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                Ok(TransformSpec::Set { field, value })
            }
            "concat" => {
                let (target, sources) = pair(args)?;
                let fields: Vec<String> = sources
                    .split('+')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                if fields.is_empty() {
                    return Err(EtlError::configuration(format!(
                        "transform '{}' needs at least one source field",
                        spec
                    )));
                }
                Ok(TransformSpec::Concat { target, fields })
            }
            "digits" => Ok(TransformSpec::Digits { field: field(args)? }),
            "upper" => Ok(TransformSpec::Upper { field: field(args)? }),
            "lower" => Ok(TransformSpec::Lower { field: field(args)? }),
            other => Err(EtlError::configuration(format!(
                "unknown transform '{}'",
                other
            ))),
        }
    }

    /// Applies this spec to a record
    pub fn apply(&self, mut record: Record) -> Record {
        match self {
            TransformSpec::Rename { from, to } => {
                if let Some(value) = record.shift_remove(from) {
                    record.insert(to.clone(), value);
                }
            }
            TransformSpec::Drop { field } => {
                record.shift_remove(field);
            }
            TransformSpec::Set { field, value } => {
                record.insert(field.clone(), value.clone());
            }
            TransformSpec::Concat { target, fields } => {
                let joined = fields
                    .iter()
                    .filter_map(|f| record.get(f).map(display_value))
                    .collect::<Vec<_>>()
                    .join(" ");
                record.insert(target.clone(), Value::String(joined));
            }
            TransformSpec::Digits { field } => {
                map_string(&mut record, field, |s| {
                    s.chars().filter(char::is_ascii_digit).collect()
                });
            }
            TransformSpec::Upper { field } => map_string(&mut record, field, |s| s.to_uppercase()),
            TransformSpec::Lower { field } => map_string(&mut record, field, |s| s.to_lowercase()),
        }
        record
    }

    fn name(&self) -> String {
        match self {
            TransformSpec::Rename { from, to } => format!("rename:{}={}", from, to),
            TransformSpec::Drop { field } => format!("drop:{}", field),
            TransformSpec::Set { field, value } => format!("set:{}={}", field, value),
            TransformSpec::Concat { target, fields } => {
                format!("concat:{}={}", target, fields.join("+"))
            }
            TransformSpec::Digits { field } => format!("digits:{}", field),
            TransformSpec::Upper { field } => format!("upper:{}", field),
            TransformSpec::Lower { field } => format!("lower:{}", field),
        }
    }

    pub fn into_transform(self) -> Transform {
        let name = self.name();
        Transform::new(name, move |record| self.apply(record))
    }
}

/// Renders a JSON value the way a flat file would show it
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn map_string<F>(record: &mut Record, field: &str, f: F)
where
    F: Fn(&str) -> String,
{
    if let Some(value) = record.get_mut(field) {
        let mapped = f(&display_value(value));
        *value = Value::String(mapped);
    }
}
