//! Shared Stage Context
//!
//! Every pipeline stage needs the same handful of repository fixture
//! files (`_mapper`, the registries, task config overrides) and the same
//! file bookkeeping: register a dataset's file node exactly once, with
//! physical replicas when the data pre-exists in a repository.

use std::path::Path;

use log::debug;

use crate::config::InputData;
use crate::dax::{Adag, FileNode};
use crate::error::GenError;
use crate::mapper::{DataId, PathMapper};

/// Where a dataset's physical replicas live, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Produced by a job of this workflow; no replicas.
    Generated,
    /// Pre-existing in the input data repository.
    InputRepo,
    /// Pre-existing in the calibration repository.
    CalibRepo,
}

/// Reference catalog fixture files.
#[derive(Debug, Clone)]
pub struct RefCatFiles {
    /// Catalog config, `ref_cats/<name>/config.py`.
    pub config: String,
    /// Master schema, `ref_cats/<name>/master_schema.fits`.
    pub schema: String,
}

/// Per-run generation context: the input tables, the location mapper and
/// the fixture files shared by every stage.
pub struct StageContext<'a> {
    pub input: &'a InputData,
    pub mapper: PathMapper,

    /// Logical output root, shorthand for `input.repos.output`.
    pub out: String,

    /// The `_mapper` marker of the output repository.
    pub mapper_file: String,
    /// The exposure registry database.
    pub registry: String,
    /// The calibration registry database.
    pub calib_registry: String,
    /// Sky map construction config override, if configured.
    pub sky_map_config: Option<String>,
    /// Forced ccd photometry config override, if configured.
    pub forced_phot_config: Option<String>,
    /// Reference catalog fixtures, if a catalog is configured.
    pub ref_cat: Option<RefCatFiles>,
}

impl<'a> StageContext<'a> {
    /// Builds the context and registers the fixture files in the graph.
    pub fn register(dax: &mut Adag, input: &'a InputData) -> Result<Self, GenError> {
        let out = input.repos.output.clone();
        let mapper = PathMapper::new(&out);
        let input_root = input.repos.input.trim_end_matches('/').to_string();
        let calib_root = input.repos.calib_root();

        let mapper_file = fixture(
            dax,
            input,
            format!("{}/_mapper", out),
            format!("{}/_mapper", input_root),
        );
        let registry = fixture(
            dax,
            input,
            format!("{}/registry.sqlite3", out),
            format!("{}/registry.sqlite3", input_root),
        );
        let calib_registry = fixture(
            dax,
            input,
            format!("{}/calibRegistry.sqlite3", out),
            format!(
                "{}/calibRegistry.sqlite3",
                calib_root.trim_end_matches('/')
            ),
        );

        let sky_map_config = input
            .task_configs
            .sky_map
            .as_deref()
            .map(|path| config_fixture(dax, input, path));
        let forced_phot_config = input
            .task_configs
            .forced_phot_ccd
            .as_deref()
            .map(|path| config_fixture(dax, input, path));

        let ref_cat = match &input.ref_catalog {
            Some(refcat) => {
                let id = DataId::new().with("name", refcat.name.as_str());
                let config = ensure_with(
                    dax,
                    input,
                    &mapper,
                    "ref_cat_config",
                    &id,
                    Some(input_root.as_str()),
                )?;
                let schema_rel = format!("ref_cats/{}/master_schema.fits", refcat.name);
                let schema = fixture(
                    dax,
                    input,
                    format!("{}/{}", out, schema_rel),
                    format!("{}/{}", input_root, schema_rel),
                );
                Some(RefCatFiles { config, schema })
            }
            None => None,
        };

        Ok(Self {
            input,
            mapper,
            out,
            mapper_file,
            registry,
            calib_registry,
            sky_map_config,
            forced_phot_config,
            ref_cat,
        })
    }

    /// The logical name of a dataset instance, without registering it.
    pub fn lfn(&self, dataset: &str, id: &DataId) -> Result<String, GenError> {
        self.mapper.lfn(dataset, id)
    }

    /// Registers a dataset's file node if it is not registered yet and
    /// returns its logical name. For pre-existing data a physical
    /// replica per configured site is attached on first registration.
    pub fn data_file(
        &self,
        dax: &mut Adag,
        dataset: &str,
        id: &DataId,
        source: Source,
    ) -> Result<String, GenError> {
        let repo_root = match source {
            Source::Generated => None,
            Source::InputRepo => Some(self.input.repos.input.clone()),
            Source::CalibRepo => Some(self.input.repos.calib_root()),
        };
        ensure_with(dax, self.input, &self.mapper, dataset, id, repo_root.as_deref())
    }

    /// Registers a log file node and returns its logical name.
    pub fn log_file(&self, dax: &mut Adag, name: impl Into<String>) -> String {
        let lfn = name.into();
        dax.add_file(FileNode::new(&lfn));
        lfn
    }
}

/// Registers a fixture file (one logical name, one physical path) and
/// returns its logical name.
fn fixture(dax: &mut Adag, input: &InputData, lfn: String, pfn: String) -> String {
    if !dax.has_file(&lfn) {
        let mut file = FileNode::new(&lfn);
        for site in &input.sites {
            file.add_pfn(&pfn, site);
        }
        dax.add_file(file);
    }
    lfn
}

/// Registers a task config override under its bare file name.
fn config_fixture(dax: &mut Adag, input: &InputData, path: &str) -> String {
    let lfn = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string();
    fixture(dax, input, lfn, path.to_string())
}

fn ensure_with(
    dax: &mut Adag,
    input: &InputData,
    mapper: &PathMapper,
    dataset: &str,
    id: &DataId,
    repo_root: Option<&str>,
) -> Result<String, GenError> {
    let lfn = mapper.lfn(dataset, id)?;
    if dax.has_file(&lfn) {
        return Ok(lfn);
    }

    let mut file = FileNode::new(&lfn);
    if let Some(root) = repo_root {
        let pfn = mapper.pfn(dataset, id, root)?;
        for site in &input.sites {
            file.add_pfn(&pfn, site);
        }
        debug!("{} {}: {} -> {}", dataset, id, pfn, lfn);
    }
    dax.add_file(file);
    Ok(lfn)
}
