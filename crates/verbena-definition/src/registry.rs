use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::definition::WorkflowDefinition;
use crate::error::ValidationError;

/// Error type for definition registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("definition '{definition_id}' not found for tenant '{tenant}'")]
  NotFound { tenant: String, definition_id: String },

  #[error("definition rejected: {0}")]
  Invalid(#[from] ValidationError),
}

/// Read-mostly registry of validated workflow definitions, keyed by
/// `(tenant, definition_id)`.
///
/// `register` validates; invalid definitions never become visible to the
/// execution path.
#[async_trait]
pub trait DefinitionRegistry: Send + Sync {
  /// Validate and register a definition. Re-registering replaces the
  /// previous version.
  async fn register(&self, definition: WorkflowDefinition) -> Result<(), RegistryError>;

  /// Fetch a registered definition.
  async fn get(
    &self,
    tenant: &str,
    definition_id: &str,
  ) -> Result<Arc<WorkflowDefinition>, RegistryError>;
}

/// In-memory definition registry.
#[derive(Default)]
pub struct InMemoryDefinitionRegistry {
  definitions: RwLock<HashMap<(String, String), Arc<WorkflowDefinition>>>,
}

impl InMemoryDefinitionRegistry {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl DefinitionRegistry for InMemoryDefinitionRegistry {
  async fn register(&self, definition: WorkflowDefinition) -> Result<(), RegistryError> {
    definition.validate()?;
    let key = (definition.tenant.clone(), definition.definition_id.clone());
    self
      .definitions
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(key, Arc::new(definition));
    Ok(())
  }

  async fn get(
    &self,
    tenant: &str,
    definition_id: &str,
  ) -> Result<Arc<WorkflowDefinition>, RegistryError> {
    self
      .definitions
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(&(tenant.to_string(), definition_id.to_string()))
      .cloned()
      .ok_or_else(|| RegistryError::NotFound {
        tenant: tenant.to_string(),
        definition_id: definition_id.to_string(),
      })
  }
}
