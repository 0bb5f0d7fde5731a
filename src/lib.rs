//! DaxGen - Abstract Workflow Generator
//!
//! Generates Pegasus DAX descriptions of astronomical image-processing
//! campaigns: single-frame processing of HSC exposures, sky-map
//! construction, per-patch coaddition, source merging and forced
//! photometry. The generated document is a directed acyclic graph of
//! abstract jobs and file nodes, handed to an external workflow
//! scheduler for execution on a computing grid.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`config`]: input data tables (YAML) and auxiliary lookups
//! - [`mapper`]: dataset-location resolution via path templates
//! - [`dax`]: the workflow graph model and its XML serialization
//! - [`pipeline`]: the stage generators that populate the graph
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use daxgen::config::InputData;
//! use daxgen::dax::write_dax_file;
//! use daxgen::pipeline::{generate, Pipeline};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load the data tables describing one processing campaign
//!     let input = InputData::load(Path::new("inputData.yaml"))?;
//!
//!     // Build the full data release workflow
//!     let dax = generate(&input, Pipeline::Drp)?;
//!
//!     // Serialize it for the scheduler
//!     write_dax_file(&dax, Path::new("drp.dax"))?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dax;
pub mod error;
pub mod mapper;
pub mod pipeline;

// Re-export commonly used types
pub use config::{Data, InputData};
pub use dax::{Adag, FileNode, Job};
pub use error::GenError;
pub use mapper::{DataId, PathMapper};
pub use pipeline::{generate, Pipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "DaxGen";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "DaxGen");
    }

    #[test]
    fn test_module_exports_data() {
        let data = Data::new(903334, 16);
        assert_eq!(data.name(), "903334-16");
    }

    #[test]
    fn test_module_exports_adag() {
        let dax = Adag::new("test");
        assert_eq!(dax.job_count(), 0);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
