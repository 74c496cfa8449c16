// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The object container.
//!
//! Manifest objects are indexed at [`Container::load`] and built lazily on
//! first [`Container::resolve`].  Each kind is built by a [`Factory`] looked up
//! in a [`FactoryRegistry`]; factories resolve their own dependencies through
//! the [`Resolver`] they are handed, which carries the construction stack used
//! for cycle detection.  Built objects are cached as [`Component`]s, one per
//! identity, behind a per-identity once-gate.

mod component;
mod registry;

#[cfg(test)]
mod tests;

pub use component::Component;
pub use registry::{Factory, FactoryRegistry};

use log::LevelFilter;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;

use crate::error::{ErrorHandler, ErrorKind, GatewayError};
use crate::logging::ComponentLogger;
use crate::manifest::{Identity, ManifestObject, ObjectKey, Reference};
use crate::{debug_fmt, trace_fmt};

type Gate = Arc<OnceCell<Arc<Component>>>;

/// Holds every loaded object and the singletons built from them.
#[derive(Debug)]
pub struct Container {
    registry: Arc<FactoryRegistry>,
    objects: RwLock<HashMap<ObjectKey, Arc<ManifestObject>>>,
    order: RwLock<Vec<ObjectKey>>,
    gates: RwLock<HashMap<ObjectKey, Gate>>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// A container backed by the process-wide registry.
    pub fn new() -> Self {
        Self::with_registry(FactoryRegistry::global())
    }

    pub fn with_registry(registry: Arc<FactoryRegistry>) -> Self {
        Self {
            registry,
            objects: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            gates: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<FactoryRegistry> {
        &self.registry
    }

    /// Index objects by identity.
    ///
    /// Fails on duplicates, on references to identities that are not loaded
    /// and on reference cycles.  Nothing is indexed when any check fails.
    pub fn load(&self, manifest: Vec<ManifestObject>) -> Result<(), GatewayError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| GatewayError::internal("container object index poisoned"))?;
        let mut order = self
            .order
            .write()
            .map_err(|_| GatewayError::internal("container object index poisoned"))?;

        let mut staged: HashMap<ObjectKey, Arc<ManifestObject>> = objects.clone();
        let mut staged_order = order.clone();
        for object in manifest {
            let key = object.identity.key();
            if staged.contains_key(&key) {
                return Err(GatewayError::new(
                    ErrorKind::DuplicateIdentity,
                    format!("object {key} is declared more than once"),
                ));
            }
            staged_order.push(key.clone());
            staged.insert(key, Arc::new(object));
        }

        check_references(&staged, &staged_order)?;
        check_cycles(&staged, &staged_order)?;

        debug_fmt!("Container", "Loaded {} object(s)", staged.len() - objects.len());
        *objects = staged;
        *order = staged_order;
        Ok(())
    }

    /// Identities in load order.
    pub fn identities(&self) -> Vec<Identity> {
        let objects = match self.objects.read() {
            Ok(o) => o,
            Err(_) => return Vec::new(),
        };
        self.order
            .read()
            .map(|order| {
                order
                    .iter()
                    .filter_map(|k| objects.get(k).map(|o| o.identity.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn object(&self, reference: &Reference) -> Option<Arc<ManifestObject>> {
        self.objects.read().ok()?.get(&reference.key()).cloned()
    }

    /// Resolve a reference to the capability `T`.
    pub async fn resolve<T>(&self, reference: &Reference) -> Result<Arc<T>, GatewayError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Resolver::root(self).resolve::<T>(reference).await
    }

    /// Build every object matching `predicate`, in load order, and return
    /// those providing `T`.
    pub async fn resolve_all<T, P>(&self, predicate: P) -> Result<Vec<(Identity, Arc<T>)>, GatewayError>
    where
        T: ?Sized + Send + Sync + 'static,
        P: Fn(&Identity) -> bool + Send,
    {
        let selected: Vec<Identity> = self.identities().into_iter().filter(|id| predicate(id)).collect();
        let mut resolved = Vec::with_capacity(selected.len());
        for identity in selected {
            let value = self.resolve::<T>(&identity).await?;
            resolved.push((identity, value));
        }
        Ok(resolved)
    }

    fn gate(&self, key: &ObjectKey) -> Result<Gate, GatewayError> {
        if let Some(gate) = self
            .gates
            .read()
            .map_err(|_| GatewayError::internal("container gates poisoned"))?
            .get(key)
        {
            return Ok(gate.clone());
        }
        let mut gates = self
            .gates
            .write()
            .map_err(|_| GatewayError::internal("container gates poisoned"))?;
        Ok(gates.entry(key.clone()).or_default().clone())
    }

    async fn component(&self, reference: &Reference, stack: &[Identity]) -> Result<Arc<Component>, GatewayError> {
        let object = self.object(reference).ok_or_else(|| {
            GatewayError::new(
                ErrorKind::ReferenceUnresolved,
                format!("{reference} is not declared in the manifest"),
            )
        })?;
        if object.identity.api_version != reference.api_version {
            return Err(GatewayError::new(
                ErrorKind::ReferenceUnresolved,
                format!(
                    "{reference} is declared with apiVersion {}",
                    object.identity.api_version
                ),
            ));
        }

        if let Some(pos) = stack.iter().position(|id| id.key() == object.identity.key()) {
            let cycle = stack[pos..]
                .iter()
                .chain(std::iter::once(&object.identity))
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(GatewayError::new(ErrorKind::CyclicReference, format!("reference cycle {cycle}")));
        }

        let gate = self.gate(&object.identity.key())?;
        let component = gate
            .get_or_try_init(|| async {
                let factory = self.registry.get(&object.identity.api_version, &object.identity.kind)?;
                let mut child_stack = stack.to_vec();
                child_stack.push(object.identity.clone());
                let resolver = Resolver {
                    container: self,
                    stack: child_stack,
                };
                trace_fmt!("Container", "Creating {}", object.identity);
                factory
                    .create(&resolver, &object)
                    .await
                    .map(Arc::new)
                    .map_err(|e| e.with_context(format!("failed to create {}", object.identity)))
            })
            .await?;
        Ok(component.clone())
    }
}

/// Handed to factories to resolve their dependencies.
#[derive(Debug)]
pub struct Resolver<'a> {
    container: &'a Container,
    stack: Vec<Identity>,
}

impl<'a> Resolver<'a> {
    fn root(container: &'a Container) -> Self {
        Self {
            container,
            stack: Vec::new(),
        }
    }

    /// Identities currently under construction, outermost first.
    pub fn stack(&self) -> &[Identity] {
        &self.stack
    }

    pub async fn resolve<T>(&self, reference: &Reference) -> Result<Arc<T>, GatewayError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let component = self.container.component(reference, &self.stack).await?;
        component.get::<T>().ok_or_else(|| {
            GatewayError::new(
                ErrorKind::TypeMismatch,
                format!("{reference} does not provide {}", std::any::type_name::<T>()),
            )
        })
    }

    pub async fn resolve_opt<T>(&self, reference: Option<&Reference>) -> Result<Option<Arc<T>>, GatewayError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match reference {
            Some(r) => self.resolve::<T>(r).await.map(Some),
            None => Ok(None),
        }
    }

    /// Resolve references in order.
    pub async fn resolve_each<T>(&self, references: &[Reference]) -> Result<Vec<Arc<T>>, GatewayError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let mut out = Vec::with_capacity(references.len());
        for reference in references {
            out.push(self.resolve::<T>(reference).await?);
        }
        Ok(out)
    }

    /// The logger for `object`: an explicit spec reference wins over
    /// `metadata.logger`; without either the component logs under its kind.
    pub async fn logger(
        &self,
        object: &ManifestObject,
        explicit: Option<&Reference>,
    ) -> Result<ComponentLogger, GatewayError> {
        match explicit.or(object.metadata.logger.as_ref()) {
            Some(r) => Ok(self.resolve::<ComponentLogger>(r).await?.as_ref().clone()),
            None => Ok(ComponentLogger::new(
                format!("gatehouse::{}", object.kind()),
                LevelFilter::Trace,
            )),
        }
    }

    /// The configured error handler, or the default one.
    pub async fn error_handler(&self, reference: Option<&Reference>) -> Result<Arc<ErrorHandler>, GatewayError> {
        Ok(self
            .resolve_opt::<ErrorHandler>(reference)
            .await?
            .unwrap_or_else(|| Arc::new(ErrorHandler::default())))
    }
}

fn check_references(objects: &HashMap<ObjectKey, Arc<ManifestObject>>, order: &[ObjectKey]) -> Result<(), GatewayError> {
    for key in order {
        let Some(object) = objects.get(key) else { continue };
        for reference in object.references() {
            match objects.get(&reference.key()) {
                Some(target) if target.identity.api_version == reference.api_version => {}
                _ => {
                    return Err(GatewayError::new(
                        ErrorKind::ReferenceUnresolved,
                        format!("{} references {reference}, which is not declared", object.identity),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_cycles(objects: &HashMap<ObjectKey, Arc<ManifestObject>>, order: &[ObjectKey]) -> Result<(), GatewayError> {
    let mut done: HashSet<ObjectKey> = HashSet::new();
    for key in order {
        let mut path = Vec::new();
        visit(key, objects, &mut path, &mut done)?;
    }
    Ok(())
}

fn visit(
    key: &ObjectKey,
    objects: &HashMap<ObjectKey, Arc<ManifestObject>>,
    path: &mut Vec<ObjectKey>,
    done: &mut HashSet<ObjectKey>,
) -> Result<(), GatewayError> {
    if done.contains(key) {
        return Ok(());
    }
    if let Some(pos) = path.iter().position(|k| k == key) {
        let cycle = path[pos..]
            .iter()
            .chain(std::iter::once(key))
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(GatewayError::new(ErrorKind::CyclicReference, format!("reference cycle {cycle}")));
    }
    path.push(key.clone());
    if let Some(object) = objects.get(key) {
        for reference in object.references() {
            visit(&reference.key(), objects, path, done)?;
        }
    }
    path.pop();
    done.insert(key.clone());
    Ok(())
}

/// Error for a factory handed an object whose spec is not its kind's.
pub fn unexpected_spec(object: &ManifestObject) -> GatewayError {
    GatewayError::new(
        ErrorKind::TypeMismatch,
        format!("{} carries a spec for a different kind", object.identity),
    )
}
