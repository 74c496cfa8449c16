// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A built object, viewed through the capabilities it provides.
///
/// A factory registers each capability as an `Arc<T>`; trait objects are
/// registered under their `dyn` type, so one value can be provided as both
/// `dyn Middleware` and `dyn Handler`.
#[derive(Default)]
pub struct Component {
    capabilities: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    names: Vec<&'static str>,
}

impl Component {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide<T>(mut self, value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.capabilities.insert(TypeId::of::<Arc<T>>(), Box::new(value));
        self.names.push(std::any::type_name::<T>());
        self
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.capabilities
            .get(&TypeId::of::<Arc<T>>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub fn provides<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.capabilities.contains_key(&TypeId::of::<Arc<T>>())
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component").field("provides", &self.names).finish()
    }
}
