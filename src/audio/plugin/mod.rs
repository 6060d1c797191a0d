//! CLAP processing-unit provider
//!
//! - `clap_sys`: FFI structures
//! - `clap_host`: a loaded plugin driven as a processing unit
//! - `discovery`: locating bundles on disk

pub mod clap_host;
pub mod clap_sys;
pub mod discovery;

pub use clap_host::ClapUnit;
pub use discovery::{default_search_paths, ClapProvider};
