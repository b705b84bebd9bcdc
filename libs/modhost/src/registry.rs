use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::contracts::Module;

pub struct ModuleEntry {
    pub name: String,
    pub module: Arc<dyn Module>,
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Modules in registration order. Lifecycle phases walk this list front to back.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleEntry>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.module.clone())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Collects modules and every naming problem; `build` reports them all at once.
#[derive(Default)]
pub struct RegistryBuilder {
    modules: Vec<ModuleEntry>,
    seen: HashSet<String>,
    errors: Vec<String>,
}

/// Module names become URL segments, config namespaces and env prefixes.
fn valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl RegistryBuilder {
    pub fn register(&mut self, module: Arc<dyn Module>) {
        let name = module.name();
        if !valid_module_name(&name) {
            self.errors.push(format!(
                "Module name '{name}' is invalid: use lowercase letters, digits and '_'"
            ));
            return;
        }
        if !self.seen.insert(name.clone()) {
            self.errors
                .push(format!("Module '{name}' is already registered"));
            return;
        }
        self.modules.push(ModuleEntry { name, module });
    }

    pub fn build(self) -> Result<ModuleRegistry, RegistryError> {
        if !self.errors.is_empty() {
            return Err(RegistryError::InvalidRegistryConfiguration {
                errors: self.errors,
            });
        }

        tracing::info!(
            modules = ?self.modules.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            "Module order resolved (registration)"
        );

        Ok(ModuleRegistry {
            modules: self.modules,
        })
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid registry configuration:\n{errors:#?}")]
    InvalidRegistryConfiguration { errors: Vec<String> },
}
