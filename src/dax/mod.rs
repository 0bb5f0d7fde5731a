//! Abstract Workflow Graph
//!
//! The in-memory DAX representation and its XML serialization:
//!
//! - [`model`]: file nodes, job nodes and the DAG that owns them
//! - [`writer`]: Pegasus DAX 3.4 output

pub mod model;
pub mod writer;

pub use model::{Adag, Arg, FileNode, Job, JobId, Link, Pfn};
pub use writer::{write_dax, write_dax_file};
