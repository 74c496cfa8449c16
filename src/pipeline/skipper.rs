// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conditional bypass of middleware and tripperware.
//!
//! Matchers compare a request path against their patterns; a matcher holds
//! when any pattern matches:
//!
//! * `Exact` – the path equals the pattern.
//! * `Prefix` – the path starts with the pattern.
//! * `Suffix` – the path ends with the pattern.
//! * `Contains` – the pattern occurs anywhere in the path.
//! * `Path` – segment-wise comparison split on `/`.  A `*` segment matches
//!   exactly one segment, a trailing `**` matches zero or more segments, any
//!   other segment must be equal.
//! * `Regex` – the regular expression finds a match in the path (anchor it
//!   with `^…$` for a full match).

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

use super::{GatewayRequest, GatewayResponse, Handler, HttpMethod, Middleware, Next, NextTrip, RoundTripper, Tripperware};
use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::{ErrorKind, GatewayError};
use crate::manifest::{APP_V1, KIND_SKIPPER, KindSpec, ManifestObject, MatchType, MatcherSpec, SkipConditionSpec};
use crate::trace_fmt;

#[derive(Debug, Clone)]
enum Pattern {
    Literal(String),
    Segments(Vec<String>),
    Regex(Regex),
}

/// A compiled path matcher.
#[derive(Debug, Clone)]
pub struct Matcher {
    match_type: MatchType,
    patterns: Vec<Pattern>,
}

impl Matcher {
    pub fn new(match_type: MatchType, patterns: &[String]) -> Result<Self, GatewayError> {
        let patterns = patterns
            .iter()
            .map(|p| match match_type {
                MatchType::Regex => Regex::new(p)
                    .map(Pattern::Regex)
                    .map_err(|e| GatewayError::wrap(ErrorKind::ManifestInvalid, format!("invalid regex '{p}'"), e)),
                MatchType::Path => Ok(Pattern::Segments(split_segments(p))),
                _ => Ok(Pattern::Literal(p.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { match_type, patterns })
    }

    pub fn from_spec(spec: &MatcherSpec) -> Result<Self, GatewayError> {
        Self::new(spec.match_type, &spec.patterns)
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| match (self.match_type, pattern) {
            (MatchType::Exact, Pattern::Literal(p)) => path == p,
            (MatchType::Prefix, Pattern::Literal(p)) => path.starts_with(p.as_str()),
            (MatchType::Suffix, Pattern::Literal(p)) => path.ends_with(p.as_str()),
            (MatchType::Contains, Pattern::Literal(p)) => path.contains(p.as_str()),
            (_, Pattern::Segments(segments)) => match_segments(segments, &split_segments(path)),
            (_, Pattern::Regex(re)) => re.is_match(path),
            _ => false,
        })
    }
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn match_segments(pattern: &[String], path: &[String]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((head, rest)) if head == "**" && rest.is_empty() => true,
        Some((head, rest)) => match path.split_first() {
            Some((segment, path_rest)) => (head == "*" || head == segment) && match_segments(rest, path_rest),
            None => false,
        },
    }
}

/// One skip condition: a matcher optionally restricted to methods.
#[derive(Debug, Clone)]
pub struct SkipCondition {
    matcher: Matcher,
    methods: Vec<HttpMethod>,
}

impl SkipCondition {
    pub fn new(matcher: Matcher, methods: Vec<HttpMethod>) -> Self {
        Self { matcher, methods }
    }

    pub fn from_spec(spec: &SkipConditionSpec) -> Result<Self, GatewayError> {
        Ok(Self::new(Matcher::from_spec(&spec.matcher)?, spec.methods.clone()))
    }

    pub fn matches(&self, method: HttpMethod, path: &str) -> bool {
        (self.methods.is_empty() || self.methods.contains(&method)) && self.matcher.matches(path)
    }
}

/// Bypasses the wrapped middleware (or tripperware) when any condition
/// matches; otherwise runs it in declaration order.
#[derive(Debug, Clone)]
pub struct Skipper {
    conditions: Vec<SkipCondition>,
    middleware: Vec<Arc<dyn Middleware>>,
    tripperware: Vec<Arc<dyn Tripperware>>,
}

impl Skipper {
    pub fn new(conditions: Vec<SkipCondition>) -> Self {
        Self {
            conditions,
            middleware: Vec::new(),
            tripperware: Vec::new(),
        }
    }

    pub fn wrap_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn wrap_tripperware(mut self, tripperware: Arc<dyn Tripperware>) -> Self {
        self.tripperware.push(tripperware);
        self
    }

    pub fn should_skip(&self, method: HttpMethod, path: &str) -> bool {
        self.conditions.iter().any(|c| c.matches(method, path))
    }
}

#[async_trait]
impl Middleware for Skipper {
    fn name(&self) -> &str {
        KIND_SKIPPER
    }

    async fn handle(&self, req: GatewayRequest, next: &dyn Handler) -> Result<GatewayResponse, GatewayError> {
        if self.should_skip(req.method, &req.path) {
            trace_fmt!("Skipper", "Skipping {} middleware for {} {}", self.middleware.len(), req.method, req.path);
            return next.handle(req).await;
        }
        Next::new(&self.middleware, next).handle(req).await
    }
}

#[async_trait]
impl Tripperware for Skipper {
    fn name(&self) -> &str {
        KIND_SKIPPER
    }

    async fn round_trip(
        &self,
        req: reqwest::Request,
        next: &dyn RoundTripper,
    ) -> Result<reqwest::Response, GatewayError> {
        let method = HttpMethod::from(req.method());
        if self.should_skip(method, req.url().path()) {
            return next.round_trip(req).await;
        }
        NextTrip::new(&self.tripperware, next).round_trip(req).await
    }
}

/// Builds `app/v1 Skipper` objects.
#[derive(Debug, Default)]
pub struct SkipperFactory;

#[async_trait]
impl Factory for SkipperFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_SKIPPER
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::Skipper(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let conditions = spec
            .skip_conditions
            .iter()
            .map(SkipCondition::from_spec)
            .collect::<Result<Vec<_>, _>>()?;

        let skipper = Arc::new(Skipper {
            conditions,
            middleware: resolver.resolve_each::<dyn Middleware>(&spec.middleware).await?,
            tripperware: resolver.resolve_each::<dyn Tripperware>(&spec.tripperware).await?,
        });

        let mut component = Component::new();
        if !spec.middleware.is_empty() {
            component = component.provide::<dyn Middleware>(skipper.clone());
        }
        if !spec.tripperware.is_empty() {
            component = component.provide::<dyn Tripperware>(skipper.clone());
        }
        Ok(component.provide(skipper))
    }
}
