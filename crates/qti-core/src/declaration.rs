use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{BaseType, Cardinality, DeclarationKind, Shape};
use crate::value::{QtiValue, Scalar};

pub const NUM_ATTEMPTS: &str = "numAttempts";
pub const COMPLETION_STATUS: &str = "completionStatus";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub map_key: String,
    pub mapped_value: f64,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub default_value: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub entries: Vec<MapEntry>,
}

impl Mapping {
    pub fn clamp(&self, total: f64) -> f64 {
        let mut total = total;
        if let Some(lower) = self.lower_bound {
            total = total.max(lower);
        }
        if let Some(upper) = self.upper_bound {
            total = total.min(upper);
        }
        total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaMapEntry {
    pub shape: Shape,
    pub coords: Vec<f64>,
    pub mapped_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaMapping {
    pub default_value: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub entries: Vec<AreaMapEntry>,
}

impl AreaMapping {
    pub fn clamp(&self, total: f64) -> f64 {
        let mut total = total;
        if let Some(lower) = self.lower_bound {
            total = total.max(lower);
        }
        if let Some(upper) = self.upper_bound {
            total = total.min(upper);
        }
        total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchTableEntry {
    pub source: Scalar,
    pub target: Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchTable {
    pub default_value: Option<Scalar>,
    pub entries: Vec<MatchTableEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationEntry {
    pub source_value: f64,
    pub target_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationTable {
    /// Only "linear" is evaluable; anything else resolves to Invalid.
    pub method: String,
    pub default_value: Option<Scalar>,
    /// Sorted by source_value at build time.
    pub entries: Vec<InterpolationEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LookupTable {
    Match(MatchTable),
    Interpolation(InterpolationTable),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub identifier: String,
    pub kind: DeclarationKind,
    pub base_type: Option<BaseType>,
    pub cardinality: Cardinality,
    pub default_value: QtiValue,
    pub correct_response: QtiValue,
    pub mapping: Option<Mapping>,
    pub area_mapping: Option<AreaMapping>,
    pub lookup_table: Option<LookupTable>,
    pub value: QtiValue,
}

impl VariableDeclaration {
    pub fn new(
        identifier: impl Into<String>,
        kind: DeclarationKind,
        base_type: Option<BaseType>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            base_type,
            cardinality,
            default_value: QtiValue::Null,
            correct_response: QtiValue::Null,
            mapping: None,
            area_mapping: None,
            lookup_table: None,
            value: QtiValue::Null,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeclarationContext {
    declarations: BTreeMap<String, VariableDeclaration>,
}

impl DeclarationContext {
    /// Creates the store with the stateful built-ins every item carries.
    pub fn new() -> Self {
        let mut ctx = Self {
            declarations: BTreeMap::new(),
        };

        let mut attempts = VariableDeclaration::new(
            NUM_ATTEMPTS,
            DeclarationKind::Response,
            Some(BaseType::Integer),
            Cardinality::Single,
        );
        attempts.default_value = QtiValue::integer(0);
        attempts.value = QtiValue::integer(0);
        ctx.declarations.insert(NUM_ATTEMPTS.to_string(), attempts);

        let mut status = VariableDeclaration::new(
            COMPLETION_STATUS,
            DeclarationKind::Outcome,
            Some(BaseType::Identifier),
            Cardinality::Single,
        );
        status.default_value = QtiValue::identifier("not_attempted");
        status.value = QtiValue::identifier("not_attempted");
        ctx.declarations.insert(COMPLETION_STATUS.to_string(), status);

        ctx
    }

    pub fn declare(&mut self, declaration: VariableDeclaration) {
        self.declarations
            .insert(declaration.identifier.clone(), declaration);
    }

    pub fn get_declaration(&self, identifier: &str) -> Option<&VariableDeclaration> {
        self.declarations.get(identifier)
    }

    pub fn get_value(&self, identifier: &str) -> QtiValue {
        self.declarations
            .get(identifier)
            .map(|declaration| declaration.value.clone())
            .unwrap_or(QtiValue::Null)
    }

    /// Unknown identifiers are ignored: execution never raises, and a
    /// build-time coverage gap has already failed loudly in the builder.
    pub fn set_value(&mut self, identifier: &str, value: QtiValue) {
        if let Some(declaration) = self.declarations.get_mut(identifier) {
            declaration.value = value;
        }
    }

    pub fn get_correct_response(&self, identifier: &str) -> QtiValue {
        self.declarations
            .get(identifier)
            .map(|declaration| declaration.correct_response.clone())
            .unwrap_or(QtiValue::Null)
    }

    pub fn set_correct_response(&mut self, identifier: &str, value: QtiValue) {
        if let Some(declaration) = self.declarations.get_mut(identifier) {
            declaration.correct_response = value;
        }
    }

    pub fn get_default_value(&self, identifier: &str) -> QtiValue {
        self.declarations
            .get(identifier)
            .map(|declaration| declaration.default_value.clone())
            .unwrap_or(QtiValue::Null)
    }

    pub fn set_default_value(&mut self, identifier: &str, value: QtiValue) {
        if let Some(declaration) = self.declarations.get_mut(identifier) {
            declaration.default_value = value;
        }
    }

    pub fn reset_to_default(&mut self, identifier: &str) {
        if let Some(declaration) = self.declarations.get_mut(identifier) {
            declaration.value = declaration.default_value.clone();
        }
    }

    /// Resets every declaration of the given kind to its default, except
    /// the stateful built-ins which survive across processing runs.
    pub fn reset_kind_to_defaults(&mut self, kind: DeclarationKind) {
        for declaration in self.declarations.values_mut() {
            if declaration.kind != kind {
                continue;
            }
            if declaration.identifier == NUM_ATTEMPTS
                || declaration.identifier == COMPLETION_STATUS
            {
                continue;
            }
            declaration.value = declaration.default_value.clone();
        }
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.declarations.keys().map(String::as_str)
    }

    pub fn declarations(&self) -> impl Iterator<Item = &VariableDeclaration> {
        self.declarations.values()
    }
}
