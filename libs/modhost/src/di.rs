//! Minimal name-keyed dependency container.
//!
//! Modules add [`Definition`]s while preparing; the host builds every
//! definition once, eagerly and in registration order, before any module is
//! finalized. A definition may resolve the ones registered before it.

use std::any::{type_name, Any};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

type Instance = Arc<dyn Any + Send + Sync>;
type BuildFn = Box<dyn FnOnce(&Container) -> anyhow::Result<Instance> + Send>;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("definition name must not be empty")]
    EmptyName,
    #[error("definition '{0}' is already registered")]
    Duplicate(String),
    #[error("no definition named '{0}'")]
    NotFound(String),
    #[error("definition '{name}' is not a {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },
    #[error("failed to build definition '{name}'")]
    Build {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A named recipe for one shared value.
pub struct Definition {
    name: String,
    build: BuildFn,
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Definition {
    pub fn new<T, F>(name: impl Into<String>, build: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Container) -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            name: name.into(),
            build: Box::new(move |c| build(c).map(|v| Arc::new(v) as Instance)),
        }
    }

    /// A definition that needs nothing from the container.
    pub fn value<T>(name: impl Into<String>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::new(name, move |_| Ok(value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default)]
pub struct ContainerBuilder {
    defs: Vec<Definition>,
    names: HashSet<String>,
}

impl ContainerBuilder {
    /// Queue definitions; the whole batch is rejected if any name is empty or taken.
    pub fn add(&mut self, defs: impl IntoIterator<Item = Definition>) -> Result<(), ContainerError> {
        let defs: Vec<Definition> = defs.into_iter().collect();

        let mut batch = HashSet::new();
        for def in &defs {
            if def.name.is_empty() {
                return Err(ContainerError::EmptyName);
            }
            if self.names.contains(&def.name) || !batch.insert(def.name.as_str()) {
                return Err(ContainerError::Duplicate(def.name.clone()));
            }
        }

        for def in defs {
            self.names.insert(def.name.clone());
            self.defs.push(def);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn build(self) -> Result<Container, ContainerError> {
        let mut container = Container::default();
        for def in self.defs {
            let instance = (def.build)(&container).map_err(|source| ContainerError::Build {
                name: def.name.clone(),
                source,
            })?;
            tracing::debug!(definition = %def.name, "Definition built");
            container.instances.insert(def.name, instance);
        }
        Ok(container)
    }
}

/// Built values, read-only after construction.
#[derive(Default)]
pub struct Container {
    instances: HashMap<String, Instance>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.instances.keys().collect();
        names.sort();
        f.debug_struct("Container").field("names", &names).finish()
    }
}

impl Container {
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, ContainerError>
    where
        T: Send + Sync + 'static,
    {
        let instance = self
            .instances
            .get(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_owned()))?;
        Arc::clone(instance)
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                name: name.to_owned(),
                expected: type_name::<T>(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeting(String);

    #[test]
    fn later_definitions_resolve_earlier_ones() {
        let mut b = ContainerBuilder::default();
        b.add([Definition::value("world", "mars".to_string())])
            .unwrap();
        b.add([Definition::new("greeting", |c: &Container| {
            let world = c.get::<String>("world")?;
            Ok(Greeting(format!("hello {world}")))
        })])
        .unwrap();

        let c = b.build().unwrap();
        assert_eq!(c.get::<Greeting>("greeting").unwrap().0, "hello mars");
    }

    #[test]
    fn duplicate_and_empty_names_are_rejected() {
        let mut b = ContainerBuilder::default();
        b.add([Definition::value("a", 1u32)]).unwrap();

        let err = b.add([Definition::value("a", 2u32)]).unwrap_err();
        assert!(matches!(err, ContainerError::Duplicate(ref n) if n == "a"));

        let err = b
            .add([Definition::value("b", 1u32), Definition::value("b", 2u32)])
            .unwrap_err();
        assert!(matches!(err, ContainerError::Duplicate(_)));
        // rejected batch left nothing behind
        assert_eq!(b.len(), 1);

        assert!(matches!(
            b.add([Definition::value("", 0u8)]),
            Err(ContainerError::EmptyName)
        ));
    }

    #[test]
    fn lookups_report_missing_and_mistyped() {
        let mut b = ContainerBuilder::default();
        b.add([Definition::value("n", 7u64)]).unwrap();
        let c = b.build().unwrap();

        assert_eq!(*c.get::<u64>("n").unwrap(), 7);
        assert!(matches!(c.get::<u64>("x"), Err(ContainerError::NotFound(_))));
        assert!(matches!(
            c.get::<String>("n"),
            Err(ContainerError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn build_failure_names_the_definition() {
        let mut b = ContainerBuilder::default();
        b.add([Definition::new("broken", |_c: &Container| {
            Err::<u8, _>(anyhow::anyhow!("no luck"))
        })])
        .unwrap();
        let err = b.build().unwrap_err();
        assert!(matches!(err, ContainerError::Build { ref name, .. } if name == "broken"));
    }
}
