//! URL helpers shared by the loader, image discovery and output stages
//!
//! - Domain extraction and wildcard matching (tracker blocking, cookie scope)
//! - Resolving relative references found in rendered HTML
//! - Filesystem-safe slugs for article output directories

mod domain;
mod matcher;
mod resolve;

pub use domain::{cookie_domain_matches, extract_domain};
pub use matcher::{matches_any, matches_wildcard};
pub use resolve::{resolve_reference, slug_for_url};
