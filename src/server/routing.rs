// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Path routing for one server.
//!
//! A pattern ending in `/` matches that subtree (and the bare path without
//! the slash); any other pattern matches only itself.  The longest matching
//! pattern wins.  When it matches but no route under it accepts the method,
//! the request fails with `MethodNotAllowed` and an `Allow` header.

use crate::error::{ErrorKind, GatewayError};
use crate::pipeline::{HttpMethod, Pipeline, Routes};

#[derive(Debug, Clone)]
struct Route {
    pattern: String,
    methods: Vec<HttpMethod>,
    pipeline: Pipeline,
}

impl Route {
    fn allows(&self, method: HttpMethod) -> bool {
        self.methods.is_empty() || self.methods.contains(&method)
    }
}

pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('/') {
        Some(subtree) => path == subtree || path.starts_with(pattern),
        None => path == pattern,
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `pipeline` on every pattern of `routes`.
    pub fn add(&mut self, routes: &Routes, pipeline: Pipeline) {
        for pattern in &routes.patterns {
            self.routes.push(Route {
                pattern: pattern.clone(),
                methods: routes.methods.clone(),
                pipeline: pipeline.clone(),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The matched pattern and its pipeline.
    pub fn route(&self, method: HttpMethod, path: &str) -> Result<(&str, &Pipeline), GatewayError> {
        let longest = self
            .routes
            .iter()
            .filter(|r| pattern_matches(&r.pattern, path))
            .map(|r| r.pattern.len())
            .max()
            .ok_or_else(|| GatewayError::new(ErrorKind::NotFound, format!("no route for {path}")))?;

        let candidates: Vec<&Route> = self
            .routes
            .iter()
            .filter(|r| r.pattern.len() == longest && pattern_matches(&r.pattern, path))
            .collect();
        if let Some(route) = candidates.iter().find(|r| r.allows(method)) {
            return Ok((&route.pattern, &route.pipeline));
        }

        let mut allowed: Vec<&str> = candidates
            .iter()
            .flat_map(|r| r.methods.iter().map(HttpMethod::as_str))
            .collect();
        allowed.sort_unstable();
        allowed.dedup();
        Err(
            GatewayError::new(ErrorKind::MethodNotAllowed, format!("{method} is not allowed on {path}"))
                .with_header("Allow", allowed.join(", ")),
        )
    }
}
