//! # Kollab - Multi-tenant Collaboration Backend
//!
//! A collaboration backend serving documents, wiki pages, tasks, projects,
//! teams, and files. The engineering core is a workspace access-control and
//! caching layer that turns per-request database hot paths into O(1) cache
//! lookups while preserving read-after-write consistency across interleaved
//! administrative mutations.
//!
//! ## Architecture
//!
//! - `cache`: typed cache client, stampede-guarded read aggregator,
//!   distributed mutex, deterministic invalidation
//! - `membership`: role lattice and the cache-fronted membership resolver
//! - `ratelimit`: fixed-window shared-counter limiter with static buckets
//! - `auth`: opaque sessions, CSRF protection, password policy,
//!   system-admin override
//! - `db`: connection pool and the transactional write helper
//! - `http`: the ordered request pipeline and the feature route surface
//! - `observability`: Prometheus registry and health probe types
//!
//! ## Consistency model
//!
//! Every cache namespace has one TTL band and enumerated invalidation
//! triggers. Writes commit first and invalidate strictly after, so a
//! stampede can never repopulate pre-commit state; membership decisions
//! additionally re-verify stale negative sentinels against the source of
//! truth.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod membership;
pub mod models;
pub mod observability;
pub mod ratelimit;
