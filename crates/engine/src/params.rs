//! Declarative strategy parameter schemas
//!
//! Every strategy publishes an ordered list of `ParamSpec`s. Incoming
//! parameter maps are normalized against that list before a strategy is
//! built: defaults are filled in, integral floats become ints, ranges and
//! select options are enforced and unknown names are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{ParamError, ParamResult};

/// Raw parameter map as supplied by a caller or an external definition
pub type StrategyParams = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    Select,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Int => "int",
            ParamKind::Float => "float",
            ParamKind::Bool => "bool",
            ParamKind::Select => "select",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ParamKind::Int => "an integer",
            ParamKind::Float => "a number",
            ParamKind::Bool => "a boolean",
            ParamKind::Select => "a string option",
        }
    }
}

/// One entry of a strategy's parameter schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    /// `None` marks the parameter as required
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    fn new(name: &str, label: &str, kind: ParamKind, default: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            default,
            min: None,
            max: None,
            options: Vec::new(),
            description: String::new(),
        }
    }

    pub fn int(name: &str, label: &str, default: i64, min: i64, max: i64) -> Self {
        let mut spec = Self::new(name, label, ParamKind::Int, Some(Value::from(default)));
        spec.min = Some(min as f64);
        spec.max = Some(max as f64);
        spec
    }

    pub fn float(name: &str, label: &str, default: f64, min: f64, max: f64) -> Self {
        let mut spec = Self::new(name, label, ParamKind::Float, Some(Value::from(default)));
        spec.min = Some(min);
        spec.max = Some(max);
        spec
    }

    /// A float without a default that callers must always supply
    pub fn required_float(name: &str, label: &str, min: f64, max: f64) -> Self {
        let mut spec = Self::new(name, label, ParamKind::Float, None);
        spec.min = Some(min);
        spec.max = Some(max);
        spec
    }

    pub fn flag(name: &str, label: &str, default: bool) -> Self {
        Self::new(name, label, ParamKind::Bool, Some(Value::from(default)))
    }

    pub fn select(name: &str, label: &str, default: &str, options: &[&str]) -> Self {
        let mut spec = Self::new(name, label, ParamKind::Select, Some(Value::from(default)));
        spec.options = options.iter().map(|o| o.to_string()).collect();
        spec
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    /// Coerce and range-check a single value against this spec
    pub fn check(&self, value: &Value) -> ParamResult<Value> {
        let wrong_type = || ParamError::WrongType {
            name: self.name.clone(),
            expected: self.kind.label(),
            got: value.to_string(),
        };

        let coerced = match self.kind {
            ParamKind::Int => {
                let n = match value.as_i64() {
                    Some(n) => n,
                    None => match value.as_f64() {
                        Some(f) if f.is_finite() && f.fract() == 0.0 => f as i64,
                        _ => return Err(wrong_type()),
                    },
                };
                self.check_range(n as f64)?;
                Value::from(n)
            }
            ParamKind::Float => {
                let f = value.as_f64().ok_or_else(wrong_type)?;
                if !f.is_finite() {
                    return Err(wrong_type());
                }
                self.check_range(f)?;
                Value::from(f)
            }
            ParamKind::Bool => Value::from(value.as_bool().ok_or_else(wrong_type)?),
            ParamKind::Select => {
                let s = value.as_str().ok_or_else(wrong_type)?;
                if !self.options.iter().any(|o| o == s) {
                    return Err(ParamError::NotAnOption {
                        name: self.name.clone(),
                        value: s.to_string(),
                        options: self.options.clone(),
                    });
                }
                Value::from(s)
            }
        };
        Ok(coerced)
    }

    fn check_range(&self, value: f64) -> ParamResult<()> {
        let min = self.min.unwrap_or(f64::NEG_INFINITY);
        let max = self.max.unwrap_or(f64::INFINITY);
        if value < min || value > max {
            return Err(ParamError::OutOfRange {
                name: self.name.clone(),
                value,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// Check that a schema is complete and self-consistent
pub fn validate_schema(schema: &[ParamSpec]) -> ParamResult<()> {
    let mut seen = HashSet::new();
    for spec in schema {
        let fail = |reason: &str| ParamError::Schema {
            name: spec.name.clone(),
            reason: reason.to_string(),
        };

        if spec.name.trim().is_empty() {
            return Err(fail("empty parameter name"));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(fail("duplicate parameter name"));
        }
        if let (Some(min), Some(max)) = (spec.min, spec.max) {
            if min > max {
                return Err(fail("min is greater than max"));
            }
        }
        if spec.kind == ParamKind::Select && spec.options.is_empty() {
            return Err(fail("select parameter without options"));
        }
        if let Some(default) = &spec.default {
            spec.check(default).map_err(|e| ParamError::Schema {
                name: spec.name.clone(),
                reason: format!("bad default: {}", e),
            })?;
        }
    }
    Ok(())
}

/// Normalize a raw parameter map against a schema
pub fn normalize(schema: &[ParamSpec], params: &StrategyParams) -> ParamResult<ResolvedParams> {
    if let Some(unknown) = params
        .keys()
        .find(|key| !schema.iter().any(|spec| &spec.name == *key))
    {
        return Err(ParamError::Unknown(unknown.clone()));
    }

    let mut values = StrategyParams::new();
    for spec in schema {
        let value = match params.get(&spec.name).filter(|v| !v.is_null()) {
            Some(raw) => spec.check(raw)?,
            None => match &spec.default {
                Some(default) => spec.check(default)?,
                None => return Err(ParamError::Missing(spec.name.clone())),
            },
        };
        values.insert(spec.name.clone(), value);
    }
    Ok(ResolvedParams { values })
}

/// Replace schema defaults with preset values. Used for external
/// definitions that specialize a built-in strategy.
pub fn with_defaults(schema: &[ParamSpec], preset: &StrategyParams) -> ParamResult<Vec<ParamSpec>> {
    let mut out = schema.to_vec();
    for (name, raw) in preset {
        let spec = out
            .iter_mut()
            .find(|spec| &spec.name == name)
            .ok_or_else(|| ParamError::Unknown(name.clone()))?;
        spec.default = Some(spec.check(raw)?);
    }
    Ok(out)
}

/// A parameter map that passed `normalize`: every schema entry is present
/// with the right type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedParams {
    values: StrategyParams,
}

impl ResolvedParams {
    pub fn as_map(&self) -> &StrategyParams {
        &self.values
    }

    fn get(&self, name: &str) -> ParamResult<&Value> {
        self.values
            .get(name)
            .ok_or_else(|| ParamError::Missing(name.to_string()))
    }

    fn wrong(name: &str, expected: &'static str, got: &Value) -> ParamError {
        ParamError::WrongType {
            name: name.to_string(),
            expected,
            got: got.to_string(),
        }
    }

    pub fn int(&self, name: &str) -> ParamResult<i64> {
        let v = self.get(name)?;
        v.as_i64().ok_or_else(|| Self::wrong(name, "an integer", v))
    }

    /// An integer parameter used as a window length
    pub fn period(&self, name: &str) -> ParamResult<usize> {
        let n = self.int(name)?;
        usize::try_from(n)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ParamError::Constraint(format!("`{}` must be a positive period", name)))
    }

    pub fn float(&self, name: &str) -> ParamResult<f64> {
        let v = self.get(name)?;
        v.as_f64().ok_or_else(|| Self::wrong(name, "a number", v))
    }

    pub fn flag(&self, name: &str) -> ParamResult<bool> {
        let v = self.get(name)?;
        v.as_bool().ok_or_else(|| Self::wrong(name, "a boolean", v))
    }

    pub fn choice(&self, name: &str) -> ParamResult<&str> {
        let v = self.get(name)?;
        v.as_str().ok_or_else(|| Self::wrong(name, "a string option", v))
    }
}
