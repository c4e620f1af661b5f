//! stackr-lib: Service registry and dependency resolution for stackr
//!
//! This crate turns a catalog of service definitions, gathered from several
//! prioritized sources, into an ordered deployment plan:
//! - `sources`: where definitions come from (embedded bundle, local directory, git)
//! - `registry`: priority-ordered lookup across sources
//! - `resolve`: conditional inclusion, override merging and install ordering
//! - `lock`: reproducible snapshots of a resolved plan and drift detection

pub mod cache;
pub mod config;
pub mod consts;
pub mod loader;
pub mod lock;
pub mod platform;
pub mod registry;
pub mod resolve;
pub mod sources;
pub mod util;
pub mod validate;
