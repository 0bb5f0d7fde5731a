//! Input Data Configuration
//!
//! Parsing and derivation of the data tables driving a generation run:
//!
//! - [`model`]: the YAML input data format and its derived lookups
//! - [`registry`]: the optional SQLite exposure-to-patch registry and
//!   blacklist files

pub mod model;
pub mod registry;

pub use model::{Data, InputData, RefCatalog, Repos, TaskConfigs};
pub use registry::{load_blacklist, PatchRegistry};
