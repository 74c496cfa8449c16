// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Terminal handlers.
//!
//! Each handler kind provides `dyn Handler` plus the [`Routes`] it is
//! mounted on, so servers can bind it without knowing its concrete type.

pub mod echo;
pub mod meter;

#[cfg(test)]
mod tests;

pub use echo::{EchoHandler, EchoHandlerFactory};
pub use meter::{PrometheusMeter, PrometheusMeterFactory};

use crate::manifest::RoutesSpec;
use crate::pipeline::Routes;

impl From<&RoutesSpec> for Routes {
    fn from(spec: &RoutesSpec) -> Self {
        Routes {
            patterns: spec.patterns.clone(),
            methods: spec.methods.clone(),
        }
    }
}
