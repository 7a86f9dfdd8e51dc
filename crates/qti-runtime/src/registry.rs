use std::collections::BTreeMap;

use qti_core::{QtiError, QtiValue};

#[derive(Debug, Clone, Copy)]
pub struct CustomOperatorCall<'a> {
    pub class: Option<&'a str>,
    pub definition: Option<&'a str>,
}

pub type CustomOperatorFn = dyn Fn(&[QtiValue]) -> Result<QtiValue, QtiError> + Send + Sync;

/// Host-supplied handlers for `customOperator` nodes, keyed by operator
/// class or definition URI. Handler errors never surface: the evaluator
/// converts them to Null so one misbehaving extension cannot abort
/// scoring of the whole item.
pub trait CustomOperatorRegistry: Send + Sync {
    fn resolve(&self, call: &CustomOperatorCall<'_>) -> Option<&CustomOperatorFn>;
}

#[derive(Debug, Default)]
pub struct EmptyCustomOperatorRegistry;

impl CustomOperatorRegistry for EmptyCustomOperatorRegistry {
    fn resolve(&self, _call: &CustomOperatorCall<'_>) -> Option<&CustomOperatorFn> {
        None
    }
}

#[derive(Default)]
pub struct MapCustomOperatorRegistry {
    handlers: BTreeMap<String, Box<CustomOperatorFn>>,
}

impl MapCustomOperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        key: impl Into<String>,
        handler: impl Fn(&[QtiValue]) -> Result<QtiValue, QtiError> + Send + Sync + 'static,
    ) {
        self.handlers.insert(key.into(), Box::new(handler));
    }
}

impl CustomOperatorRegistry for MapCustomOperatorRegistry {
    /// Class takes precedence over definition URI.
    fn resolve(&self, call: &CustomOperatorCall<'_>) -> Option<&CustomOperatorFn> {
        if let Some(class) = call.class {
            if let Some(handler) = self.handlers.get(class) {
                return Some(handler.as_ref());
            }
        }
        if let Some(definition) = call.definition {
            if let Some(handler) = self.handlers.get(definition) {
                return Some(handler.as_ref());
            }
        }
        None
    }
}
