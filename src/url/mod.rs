//! URL handling module for Sumi-Tide
//!
//! This module provides URL normalization, scheme safety checks, host keys for
//! per-host bookkeeping, and allowed-domain matching.

mod domain;
mod matcher;
mod normalize;

pub use domain::{extract_host, host_key, origin_of};
pub use matcher::matches_domain;
pub use normalize::{is_safe_scheme, normalize_url};
