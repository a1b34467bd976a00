//! Provider registry — name-addressed catalog of model descriptors indexed
//! by capability and by provider. Read-mostly: after the configuration
//! phase it is effectively immutable, so readers do not lock.

use std::collections::{HashMap, HashSet};

use orchestrator_core::ModelName;

use crate::capability::Capability;
use crate::model::ModelDescriptor;

pub struct ProviderRegistry {
    by_name: HashMap<ModelName, ModelDescriptor>,
    /// Insertion order, used as the tie-break for candidate lists.
    insertion_order: Vec<ModelName>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    pub fn register(&mut self, descriptor: ModelDescriptor) {
        if !self.by_name.contains_key(&descriptor.name) {
            self.insertion_order.push(descriptor.name.clone());
        }
        self.by_name.insert(descriptor.name.clone(), descriptor);
    }

    pub fn lookup(&self, name: &ModelName) -> Option<&ModelDescriptor> {
        self.by_name.get(name)
    }

    /// Every registered descriptor, active or not, in insertion order.
    pub fn all(&self) -> Vec<&ModelDescriptor> {
        self.insertion_order
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .collect()
    }

    /// Active descriptors supporting `capability`, in registry (insertion)
    /// order.
    pub fn candidates_for(&self, capability: Capability) -> Vec<&ModelDescriptor> {
        self.insertion_order
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .filter(|d| d.active && d.supports(capability))
            .collect()
    }

    /// Deterministic fallback chain starting at `name`: walks each
    /// descriptor's `fallback_models` list, skipping inactive and
    /// already-visited entries, terminating at the first descriptor with
    /// no remaining active, unvisited fallback.
    pub fn fallback_chain(&self, name: &ModelName) -> Vec<ModelName> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = match self.by_name.get(name) {
            Some(d) if d.active => Some(d),
            _ => return chain,
        };

        while let Some(descriptor) = cursor {
            if !visited.insert(descriptor.name.clone()) {
                break;
            }
            chain.push(descriptor.name.clone());

            cursor = descriptor
                .fallback_models
                .iter()
                .find_map(|fallback_name| {
                    self.by_name.get(fallback_name).filter(|d| {
                        d.active && !visited.contains(&d.name)
                    })
                });
        }

        chain
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GenerationParams, ModelType};
    use std::collections::HashSet as Set;

    fn descriptor(name: &str, fallbacks: &[&str]) -> ModelDescriptor {
        let mut caps = Set::new();
        caps.insert(Capability::ChatCompletion);
        ModelDescriptor {
            name: ModelName::new(name),
            provider: "test".to_string(),
            model_type: ModelType::Chat,
            capabilities: caps,
            max_tokens: 4096,
            context_window: 128_000,
            generation: GenerationParams::default(),
            cost_per_1k_tokens: 0.01,
            request_timeout_ms: 5000,
            retry_count: 1,
            fallback_models: fallbacks.iter().map(|s| ModelName::new(*s)).collect(),
            active: true,
        }
    }

    #[test]
    fn fallback_chain_starts_with_self_and_has_no_duplicates() {
        let mut reg = ProviderRegistry::new();
        reg.register(descriptor("a", &["b", "c"]));
        reg.register(descriptor("b", &["c"]));
        reg.register(descriptor("c", &[]));

        let chain = reg.fallback_chain(&ModelName::new("a"));
        let names: Vec<String> = chain.iter().map(|m| m.to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn fallback_chain_is_cycle_safe() {
        let mut reg = ProviderRegistry::new();
        reg.register(descriptor("a", &["b"]));
        reg.register(descriptor("b", &["a"]));

        let chain = reg.fallback_chain(&ModelName::new("a"));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn candidates_for_respects_insertion_order() {
        let mut reg = ProviderRegistry::new();
        reg.register(descriptor("a", &[]));
        reg.register(descriptor("b", &[]));
        let candidates = reg.candidates_for(Capability::ChatCompletion);
        assert_eq!(candidates[0].name.to_string(), "a");
        assert_eq!(candidates[1].name.to_string(), "b");
    }
}
