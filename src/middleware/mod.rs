// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in middleware kinds.
//!
//! Authentication middleware store the authenticated claims in the request
//! context under their `claimsKey`; [`authz::OpaAuthz`] reads them back from
//! the same key as the `auth` field of its policy input.

pub mod authz;
pub mod basic;
pub mod bearer;
pub mod credentials;
pub mod digest;
pub mod tracking;


use serde_json::Value;

use crate::pipeline::GatewayRequest;

pub use authz::{OpaAuthz, OpaAuthzFactory};
pub use basic::{BasicAuthn, BasicAuthnFactory};
pub use bearer::{BearerAuthn, BearerAuthnFactory};
pub use credentials::{CredentialOptions, CredentialStore};
pub use digest::{DigestAuthn, DigestAuthnFactory};
pub use tracking::{Tracking, TrackingFactory};

/// The parameter of an `Authorization: <scheme> <param>` header when the
/// scheme matches, ignoring case.
pub fn authorization_param<'a>(req: &'a GatewayRequest, scheme: &str) -> Option<&'a str> {
    let value = req.header("authorization")?.trim_start();
    let (given, param) = value.split_once(' ')?;
    given.eq_ignore_ascii_case(scheme).then(|| param.trim_start())
}

pub async fn store_claims(req: &GatewayRequest, key: &str, claims: Value) {
    req.context.write().await.attributes.insert(key.to_string(), claims);
}

/// Claims stored under `key` by an earlier middleware.
pub async fn claims(req: &GatewayRequest, key: &str) -> Option<Value> {
    req.context.read().await.attributes.get(key).cloned()
}
