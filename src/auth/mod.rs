// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Authentication Module
//!
//! JWT session authentication for the pool ledger API.
//!
//! ## Auth Flow
//!
//! 1. The gateway authenticates the user and issues a session JWT carrying
//!    `sub`, `tenant_id`, `broker_id` and `role` claims
//! 2. Clients send `Authorization: Bearer <JWT>`
//! 3. This service verifies the signature (HS256 shared secret) and expiry,
//!    then builds a [`RequestContext`] handlers can trust
//!
//! ## Security
//!
//! - All non-health endpoints require authentication
//! - Scope (tenant/broker) comes from the token, never the request body
//! - Clock skew tolerance is 60 seconds

pub mod context;
pub mod error;
pub mod extractor;
pub mod roles;

pub use context::RequestContext;
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth, OpsOnly};
pub use roles::Role;
