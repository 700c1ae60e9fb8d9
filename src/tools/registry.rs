//! Name-indexed set of registered actions.

use std::collections::HashMap;
use std::sync::Arc;

use super::action::{Action, Typed, TypedAction};
use super::types::ActionDescriptor;
use crate::error::{ForemanError, Result};

/// Actions available to a scheduler run, in registration order.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: Vec<Arc<dyn Action>>,
    by_name: HashMap<String, usize>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Names must be unique.
    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<()> {
        let name = action.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(ForemanError::Configuration(format!(
                "action '{name}' registered twice"
            )));
        }
        self.by_name.insert(name, self.actions.len());
        self.actions.push(action);
        Ok(())
    }

    pub fn register_typed<T: TypedAction>(&mut self, action: T) -> Result<()> {
        self.register(Arc::new(Typed(action)))
    }

    /// Builder-style registration.
    pub fn with(mut self, action: impl Action + 'static) -> Result<Self> {
        self.register(Arc::new(action))?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.by_name.get(name).map(|idx| &self.actions[*idx])
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|action| action.name())
    }

    /// Descriptors handed to the planner.
    pub fn descriptors(&self) -> Vec<ActionDescriptor> {
        self.actions
            .iter()
            .map(|action| ActionDescriptor {
                name: action.name().to_string(),
                description: action.description().to_string(),
                parameters: action.parameters().schema.clone(),
                risky: action.risk().is_some(),
                risk_category: action.risk().map(|risk| risk.category.clone()),
            })
            .collect()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
