use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{CrmError, Result};

type TransformFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Named field-value transforms looked up by tag from a [`FieldMapping`]'s
/// `transform` field. Looking up a name that was never registered is an
/// error — a mapping must never silently pass a value through unmapped.
///
/// [`FieldMapping`]: crate::types::FieldMapping
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFn>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            transforms: HashMap::new(),
        };
        registry.register("identity", |v| Ok(v.clone()));
        registry.register("to_string", |v| Ok(Value::String(stringify(v))));
        registry.register("to_upper", |v| Ok(Value::String(stringify(v).to_uppercase())));
        registry.register("to_lower", |v| Ok(Value::String(stringify(v).to_lowercase())));
        registry.register("trim", |v| Ok(Value::String(stringify(v).trim().to_string())));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, f: impl Fn(&Value) -> Result<Value> + Send + Sync + 'static) {
        self.transforms.insert(name.into(), Arc::new(f));
    }

    pub fn apply(&self, name: &str, value: &Value) -> Result<Value> {
        self.transforms
            .get(name)
            .ok_or_else(|| CrmError::UnknownTransform(name.to_string()))
            .and_then(|f| f(value))
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_transform_errors() {
        let registry = TransformRegistry::new();
        assert!(registry.apply("nonexistent", &Value::Null).is_err());
    }

    #[test]
    fn to_upper_transforms_strings() {
        let registry = TransformRegistry::new();
        let out = registry.apply("to_upper", &Value::String("hi".into())).unwrap();
        assert_eq!(out, Value::String("HI".into()));
    }
}
