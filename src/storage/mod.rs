// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Redis connection settings (`app/v1 RedisClient`).
//!
//! The wire protocol lives outside this crate.  A [`RedisClient`] holds the
//! validated universal-client options and the topology they select, ready to
//! be handed to a protocol library by whoever consumes it.


use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::container::{Component, Factory, Resolver, unexpected_spec};
use crate::error::GatewayError;
use crate::manifest::{APP_V1, KIND_REDIS_CLIENT, KindSpec, ManifestObject, RedisClientSpec};

/// Which kind of deployment the options describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisMode {
    /// One node.
    Single,
    /// Sentinel-managed primary, chosen by `masterName`.
    Failover,
    /// Several cluster nodes.
    Cluster,
}

impl RedisMode {
    pub fn detect(spec: &RedisClientSpec) -> Self {
        if spec.master_name.is_some() {
            RedisMode::Failover
        } else if spec.addrs.len() > 1 {
            RedisMode::Cluster
        } else {
            RedisMode::Single
        }
    }
}

impl fmt::Display for RedisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RedisMode::Single => "single",
            RedisMode::Failover => "failover",
            RedisMode::Cluster => "cluster",
        })
    }
}

#[derive(Clone)]
pub struct RedisClient {
    mode: RedisMode,
    options: RedisClientSpec,
}

impl fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisClient")
            .field("mode", &self.mode)
            .field("addrs", &self.options.addrs)
            .field("db", &self.options.db)
            .field("password", &self.options.password.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl RedisClient {
    pub fn new(spec: &RedisClientSpec) -> Self {
        Self {
            mode: RedisMode::detect(spec),
            options: spec.clone(),
        }
    }

    pub fn mode(&self) -> RedisMode {
        self.mode
    }

    pub fn options(&self) -> &RedisClientSpec {
        &self.options
    }

    /// Addresses to dial.  Cluster and failover modes use all of them; a
    /// single-node client only the first.
    pub fn addrs(&self) -> &[String] {
        match self.mode {
            RedisMode::Single => &self.options.addrs[..self.options.addrs.len().min(1)],
            _ => &self.options.addrs,
        }
    }

    /// Per-command deadline; zero means none.
    pub fn timeout(&self) -> Option<Duration> {
        self.options.timeout.map(|d| d.as_duration()).filter(|d| !d.is_zero())
    }

    /// Default time-to-live of stored entries; zero means no expiry.
    pub fn expiration(&self) -> Option<Duration> {
        self.options.expiration.map(|d| d.as_duration()).filter(|d| !d.is_zero())
    }

    /// `-1` disables retries.
    pub fn retries(&self) -> u32 {
        u32::try_from(self.options.max_retries).unwrap_or(0)
    }
}

/// Builds `app/v1 RedisClient` objects.
#[derive(Debug, Default)]
pub struct RedisClientFactory;

#[async_trait]
impl Factory for RedisClientFactory {
    fn api_version(&self) -> &'static str {
        APP_V1
    }

    fn kind(&self) -> &'static str {
        KIND_REDIS_CLIENT
    }

    async fn create(&self, resolver: &Resolver<'_>, object: &ManifestObject) -> Result<Component, GatewayError> {
        let KindSpec::RedisClient(spec) = &object.spec else {
            return Err(unexpected_spec(object));
        };
        let client = RedisClient::new(spec);
        resolver
            .logger(object, None)
            .await?
            .info(format_args!("{} configured for {} mode at {:?}", object.identity, client.mode(), client.addrs()));
        Ok(Component::new().provide(Arc::new(client)))
    }
}
