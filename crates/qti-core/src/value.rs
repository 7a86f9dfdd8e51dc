use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{BaseType, Cardinality};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Identifier(String),
    Pair(String, String),
    DirectedPair(String, String),
    Point(f64, f64),
    Duration(f64),
    File(String),
}

/// Formats a float so that integral values collapse to their integer
/// spelling, keeping numeric comparison keys stable across `3`, `3.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl Scalar {
    pub fn parse(base_type: BaseType, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match base_type {
            BaseType::Boolean => match raw {
                "true" | "1" => Some(Self::Bool(true)),
                "false" | "0" => Some(Self::Bool(false)),
                _ => None,
            },
            BaseType::Integer => raw.parse::<i64>().ok().map(Self::Int),
            BaseType::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Self::Float),
            BaseType::String => Some(Self::Str(raw.to_string())),
            BaseType::Identifier => {
                if raw.is_empty() {
                    None
                } else {
                    Some(Self::Identifier(raw.to_string()))
                }
            }
            BaseType::Pair => split_two_tokens(raw).map(|(a, b)| Self::Pair(a, b)),
            BaseType::DirectedPair => split_two_tokens(raw).map(|(a, b)| Self::DirectedPair(a, b)),
            BaseType::Point => {
                let (a, b) = split_two_tokens(raw)?;
                let x = a.parse::<f64>().ok().filter(|value| value.is_finite())?;
                let y = b.parse::<f64>().ok().filter(|value| value.is_finite())?;
                Some(Self::Point(x, y))
            }
            BaseType::Duration => raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Self::Duration),
            BaseType::File => Some(Self::File(raw.to_string())),
        }
    }

    pub fn base_type(&self) -> BaseType {
        match self {
            Self::Bool(_) => BaseType::Boolean,
            Self::Int(_) => BaseType::Integer,
            Self::Float(_) => BaseType::Float,
            Self::Str(_) => BaseType::String,
            Self::Identifier(_) => BaseType::Identifier,
            Self::Pair(_, _) => BaseType::Pair,
            Self::DirectedPair(_, _) => BaseType::DirectedPair,
            Self::Point(_, _) => BaseType::Point,
            Self::Duration(_) => BaseType::Duration,
            Self::File(_) => BaseType::File,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) | Self::Duration(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    /// Normalized comparison/mapping key. Pair members sort because pairs
    /// are unordered; directedPair members keep their order.
    pub fn key(&self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => format_number(*value),
            Self::Str(value) | Self::Identifier(value) | Self::File(value) => value.clone(),
            Self::Pair(a, b) => {
                if a <= b {
                    format!("{} {}", a, b)
                } else {
                    format!("{} {}", b, a)
                }
            }
            Self::DirectedPair(a, b) => format!("{} {}", a, b),
            Self::Point(x, y) => format!("{} {}", format_number(*x), format_number(*y)),
            Self::Duration(value) => format_number(*value),
        }
    }

    pub fn key_folded(&self) -> String {
        self.key().to_lowercase()
    }

    /// Interprets the scalar as a 2D point, parsing string-ish payloads of
    /// the form "x y". Returns None when no finite coordinate pair exists.
    pub fn as_point(&self) -> Option<(f64, f64)> {
        match self {
            Self::Point(x, y) => Some((*x, *y)),
            Self::Str(raw) | Self::Identifier(raw) => {
                let (a, b) = split_two_tokens(raw)?;
                let x = a.parse::<f64>().ok().filter(|value| value.is_finite())?;
                let y = b.parse::<f64>().ok().filter(|value| value.is_finite())?;
                Some((x, y))
            }
            _ => None,
        }
    }
}

fn split_two_tokens(raw: &str) -> Option<(String, String)> {
    let mut parts = raw.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((first.to_string(), second.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QtiValue {
    Null,
    Invalid {
        reason: String,
    },
    Single {
        base_type: BaseType,
        value: Scalar,
    },
    Container {
        base_type: BaseType,
        cardinality: Cardinality,
        values: Vec<Scalar>,
    },
    Record {
        fields: BTreeMap<String, QtiValue>,
    },
}

impl QtiValue {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self::Single {
            base_type: BaseType::Boolean,
            value: Scalar::Bool(value),
        }
    }

    pub fn integer(value: i64) -> Self {
        Self::Single {
            base_type: BaseType::Integer,
            value: Scalar::Int(value),
        }
    }

    pub fn float(value: f64) -> Self {
        Self::Single {
            base_type: BaseType::Float,
            value: Scalar::Float(value),
        }
    }

    pub fn identifier(value: impl Into<String>) -> Self {
        Self::Single {
            base_type: BaseType::Identifier,
            value: Scalar::Identifier(value.into()),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::Single {
            base_type: BaseType::String,
            value: Scalar::Str(value.into()),
        }
    }

    pub fn duration(value: f64) -> Self {
        Self::Single {
            base_type: BaseType::Duration,
            value: Scalar::Duration(value),
        }
    }

    pub fn single(value: Scalar) -> Self {
        Self::Single {
            base_type: value.base_type(),
            value,
        }
    }

    /// Empty containers collapse to Null.
    pub fn container(base_type: BaseType, cardinality: Cardinality, values: Vec<Scalar>) -> Self {
        if values.is_empty() {
            return Self::Null;
        }
        Self::Container {
            base_type,
            cardinality,
            values,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }

    pub fn base_type(&self) -> Option<BaseType> {
        match self {
            Self::Single { base_type, .. } | Self::Container { base_type, .. } => Some(*base_type),
            _ => None,
        }
    }

    pub fn cardinality(&self) -> Option<Cardinality> {
        match self {
            Self::Single { .. } => Some(Cardinality::Single),
            Self::Container { cardinality, .. } => Some(*cardinality),
            Self::Record { .. } => Some(Cardinality::Record),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Single {
                value: Scalar::Bool(value),
                ..
            } => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Single { value, .. } => value.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Single {
                value: Scalar::Str(value),
                ..
            }
            | Self::Single {
                value: Scalar::Identifier(value),
                ..
            }
            | Self::Single {
                value: Scalar::File(value),
                ..
            } => Some(value.as_str()),
            _ => None,
        }
    }

    /// Concrete boolean truth: only a single boolean `true` qualifies.
    pub fn is_true(&self) -> bool {
        self.as_bool() == Some(true)
    }

    /// Flattens single values and containers into a scalar list.
    pub fn scalars(&self) -> Option<Vec<Scalar>> {
        match self {
            Self::Single { value, .. } => Some(vec![value.clone()]),
            Self::Container { values, .. } => Some(values.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_parse_covers_every_base_type() {
        assert_eq!(
            Scalar::parse(BaseType::Boolean, "true"),
            Some(Scalar::Bool(true))
        );
        assert_eq!(Scalar::parse(BaseType::Integer, " 42 "), Some(Scalar::Int(42)));
        assert_eq!(Scalar::parse(BaseType::Float, "2.5"), Some(Scalar::Float(2.5)));
        assert_eq!(
            Scalar::parse(BaseType::Pair, "A B"),
            Some(Scalar::Pair("A".to_string(), "B".to_string()))
        );
        assert_eq!(
            Scalar::parse(BaseType::Point, "10 20"),
            Some(Scalar::Point(10.0, 20.0))
        );
        assert_eq!(Scalar::parse(BaseType::Integer, "x"), None);
        assert_eq!(Scalar::parse(BaseType::Float, "inf"), None);
        assert_eq!(Scalar::parse(BaseType::Point, "1 2 3"), None);
    }

    #[test]
    fn pair_keys_are_unordered_and_directed_pair_keys_are_not() {
        let ab = Scalar::Pair("A".to_string(), "B".to_string());
        let ba = Scalar::Pair("B".to_string(), "A".to_string());
        assert_eq!(ab.key(), ba.key());

        let dab = Scalar::DirectedPair("A".to_string(), "B".to_string());
        let dba = Scalar::DirectedPair("B".to_string(), "A".to_string());
        assert_ne!(dab.key(), dba.key());
    }

    #[test]
    fn numeric_keys_collapse_int_and_integral_float() {
        assert_eq!(Scalar::Int(3).key(), Scalar::Float(3.0).key());
        assert_ne!(Scalar::Float(3.5).key(), Scalar::Float(3.0).key());
    }

    #[test]
    fn empty_container_collapses_to_null() {
        let value = QtiValue::container(BaseType::Integer, Cardinality::Multiple, Vec::new());
        assert!(value.is_null());
    }

    #[test]
    fn truthiness_requires_concrete_true() {
        assert!(QtiValue::boolean(true).is_true());
        assert!(!QtiValue::boolean(false).is_true());
        assert!(!QtiValue::Null.is_true());
        assert!(!QtiValue::invalid("nope").is_true());
        assert!(!QtiValue::integer(1).is_true());
    }

    #[test]
    fn point_parsing_from_string_payloads() {
        let raw = Scalar::Str("3 4".to_string());
        assert_eq!(raw.as_point(), Some((3.0, 4.0)));
        let bad = Scalar::Str("three four".to_string());
        assert_eq!(bad.as_point(), None);
    }

    #[test]
    fn values_round_trip_through_serde() {
        let values = vec![
            QtiValue::Null,
            QtiValue::invalid("bad input"),
            QtiValue::boolean(true),
            QtiValue::container(
                BaseType::Pair,
                Cardinality::Multiple,
                vec![Scalar::Pair("A".to_string(), "B".to_string())],
            ),
        ];
        for value in values {
            let encoded = serde_json::to_string(&value).expect("value should serialize");
            let decoded: QtiValue =
                serde_json::from_str(&encoded).expect("value should deserialize");
            assert_eq!(decoded, value);
        }
    }
}
