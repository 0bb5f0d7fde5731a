//! Input Data Tables
//!
//! Everything a generation run needs to know about the data to process,
//! parsed from a YAML file.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: CiHscDax
//! tract: 0
//! patches: ["8,7", "9,7", "8,6", "9,6"]
//! repos:
//!   input: /datasets/hsc/repo
//!   output: peg
//! filters:
//!   HSC-R:
//!     - {visit: 903334, ccd: 16}
//!     - {visit: 903334, ccd: 23}
//!   HSC-I:
//!     - {visit: 903986, ccd: 16}
//! sky_map:
//!   HSC-R:
//!     "8,7": [{visit: 903334, ccd: 23}]
//! ```
//!
//! The derived tables the pipelines need (exposures grouped by visit,
//! reference patches per ccd, the filter of a visit) are methods here.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GenError;
use crate::mapper::DataId;

/// One unit of raw data: a single ccd of a single visit.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Data {
    /// Exposure (visit) number.
    pub visit: u64,

    /// Camera ccd number.
    pub ccd: u32,
}

impl Data {
    pub fn new(visit: u64, ccd: u32) -> Self {
        Self { visit, ccd }
    }

    /// A short name for this data, used in log file names.
    pub fn name(&self) -> String {
        format!("{}-{}", self.visit, self.ccd)
    }

    /// The data id identifying this unit.
    pub fn data_id(&self) -> DataId {
        DataId::new().with("visit", self.visit).with("ccd", self.ccd)
    }

    /// A command-line selector, e.g. `--id visit=903334 ccd=16`.
    pub fn id_arg(&self, prefix: &str) -> String {
        format!("{} visit={} ccd={}", prefix, self.visit, self.ccd)
    }

    /// A command-line selector carrying a tract id.
    pub fn id_arg_in_tract(&self, prefix: &str, tract: i64) -> String {
        format!("{} tract={}", self.id_arg(prefix), tract)
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "visit={} ccd={}", self.visit, self.ccd)
    }
}

/// Dataset repository roots.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Repos {
    /// Root of the input data repository.
    pub input: String,

    /// Root of the calibration repository; defaults to `<input>/CALIB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calib: Option<String>,

    /// Logical output root prepended to every logical file name. A local
    /// directory of this name is never written; submitted runs dump
    /// output wherever the site catalog points.
    #[serde(default = "default_output_root")]
    pub output: String,
}

impl Repos {
    /// The calibration repository root.
    pub fn calib_root(&self) -> String {
        match &self.calib {
            Some(root) => root.clone(),
            None => format!("{}/CALIB", self.input.trim_end_matches('/')),
        }
    }
}

/// Paths of task configuration override files shipped with the workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TaskConfigs {
    /// Sky map construction config (`-C` of makeSkyMap).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sky_map: Option<String>,

    /// Forced ccd photometry config (`-C` of forcedPhotCcd).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_phot_ccd: Option<String>,
}

/// Reference catalog description: the catalog name plus the shard ids
/// each unit of data needs. Shard lookup is geometry the external stack
/// computes; here the results are supplied as tables.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RefCatalog {
    /// Catalog name, e.g. "ps1_pv3_3pi_20170110".
    pub name: String,

    /// Shard pixel ids per ccd, keyed by `Data::name()` ("visit-ccd").
    #[serde(default)]
    pub ccd_shards: BTreeMap<String, Vec<u64>>,

    /// Shard pixel ids per patch.
    #[serde(default)]
    pub patch_shards: BTreeMap<String, Vec<u64>>,
}

impl RefCatalog {
    /// Shards needed by a single ccd.
    pub fn shards_for_ccd(&self, data: &Data) -> &[u64] {
        self.ccd_shards
            .get(&data.name())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Shards needed by a patch.
    pub fn shards_for_patch(&self, patch: &str) -> &[u64] {
        self.patch_shards
            .get(patch)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// The full input data table driving one generation run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InputData {
    /// Workflow name recorded in the DAX document.
    #[serde(default = "default_workflow_name")]
    pub name: String,

    /// Sky tract all patches belong to.
    #[serde(default)]
    pub tract: i64,

    /// Patches to coadd; empty means "derive from the sky map".
    #[serde(deserialize_with = "single_or_vec", default)]
    pub patches: Vec<String>,

    /// Data to process, per filter.
    pub filters: BTreeMap<String, Vec<Data>>,

    /// Which exposures overlap which patch, per filter. Optional: when
    /// absent every exposure of a filter is assumed to cover every patch.
    #[serde(default)]
    pub sky_map: BTreeMap<String, BTreeMap<String, Vec<Data>>>,

    /// Filters whose instrument signature removal needs a fringe frame.
    #[serde(default = "default_fringe_filters")]
    pub fringe_filters: Vec<String>,

    /// Reference catalog, if astrometric/photometric calibration inputs
    /// should be staged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_catalog: Option<RefCatalog>,

    /// Repository roots.
    pub repos: Repos,

    /// Site labels attached to every physical file location.
    #[serde(default = "default_sites")]
    pub sites: Vec<String>,

    /// Task configuration override files.
    #[serde(default)]
    pub task_configs: TaskConfigs,
}

fn default_workflow_name() -> String {
    "dax".to_string()
}

fn default_output_root() -> String {
    "peg".to_string()
}

fn default_sites() -> Vec<String> {
    vec!["local".to_string()]
}

fn default_fringe_filters() -> Vec<String> {
    // The HSC filters with fringing structure.
    vec!["HSC-Y".to_string(), "NB0921".to_string()]
}

/// Deserializes either a single string or an array of strings.
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

impl InputData {
    /// Loads and validates an input data table from a YAML file.
    pub fn load(path: &Path) -> Result<Self, GenError> {
        info!("Loading input data from: {}", path.display());

        let content = fs::read_to_string(path).map_err(|e| {
            GenError::InvalidInput(format!(
                "failed to read input data file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let input: InputData = serde_yaml::from_str(&content)?;
        input.validate()?;

        info!(
            "Input data loaded: {} filters, {} ccds, {} patches",
            input.filters.len(),
            input.all_data().count(),
            input.patches().len()
        );
        Ok(input)
    }

    /// Validates table consistency.
    pub fn validate(&self) -> Result<(), GenError> {
        if self.filters.is_empty() {
            return Err(GenError::InvalidInput("no filters defined".to_string()));
        }

        for (filter, data) in &self.filters {
            if data.is_empty() {
                return Err(GenError::InvalidInput(format!(
                    "filter '{}' has no data",
                    filter
                )));
            }
            let mut seen = HashSet::new();
            for d in data {
                if !seen.insert(*d) {
                    return Err(GenError::InvalidInput(format!(
                        "filter '{}' lists {} twice",
                        filter, d
                    )));
                }
            }
        }

        for (filter, per_patch) in &self.sky_map {
            let known = match self.filters.get(filter) {
                Some(data) => data,
                None => {
                    return Err(GenError::InvalidInput(format!(
                        "sky map references unknown filter '{}'",
                        filter
                    )))
                }
            };
            for (patch, entries) in per_patch {
                for d in entries {
                    if !known.contains(d) {
                        return Err(GenError::InvalidInput(format!(
                            "sky map patch '{}' references {} not listed under filter '{}'",
                            patch, d, filter
                        )));
                    }
                }
            }
        }

        if self.sites.is_empty() {
            return Err(GenError::InvalidInput("no sites defined".to_string()));
        }

        Ok(())
    }

    /// All data to process, flattened across filters.
    pub fn all_data(&self) -> impl Iterator<Item = (&str, Data)> {
        self.filters
            .iter()
            .flat_map(|(filter, data)| data.iter().map(move |d| (filter.as_str(), *d)))
    }

    /// The filter names in deterministic order.
    pub fn filter_names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    /// The patches to coadd: the explicit list if given, otherwise every
    /// patch mentioned by the sky map.
    pub fn patches(&self) -> Vec<String> {
        if !self.patches.is_empty() {
            return self.patches.clone();
        }
        let derived: BTreeSet<String> = self
            .sky_map
            .values()
            .flat_map(|per_patch| per_patch.keys().cloned())
            .collect();
        derived.into_iter().collect()
    }

    /// The exposures of a filter overlapping a patch. Falls back to all
    /// of the filter's data when no sky map was supplied.
    pub fn sky_data(&self, filter: &str, patch: &str) -> Vec<Data> {
        if let Some(per_patch) = self.sky_map.get(filter) {
            return per_patch.get(patch).cloned().unwrap_or_default();
        }
        self.filters.get(filter).cloned().unwrap_or_default()
    }

    /// The exposures of a filter overlapping a patch, grouped by visit.
    pub fn sky_exposures(&self, filter: &str, patch: &str) -> BTreeMap<u64, Vec<Data>> {
        let mut exposures: BTreeMap<u64, Vec<Data>> = BTreeMap::new();
        for data in self.sky_data(filter, patch) {
            exposures.entry(data.visit).or_default().push(data);
        }
        exposures
    }

    /// The patches whose coadds a given ccd contributes to (the patches
    /// a forced ccd photometry job needs references for).
    pub fn references(&self, data: &Data) -> Vec<String> {
        if self.sky_map.is_empty() {
            return self.patches();
        }
        let mut patches = BTreeSet::new();
        for per_patch in self.sky_map.values() {
            for (patch, entries) in per_patch {
                if entries.contains(data) {
                    patches.insert(patch.clone());
                }
            }
        }
        patches.into_iter().collect()
    }

    /// The filter a visit was taken with.
    pub fn filter_of(&self, visit: u64) -> Option<&str> {
        self.filters
            .iter()
            .find(|(_, data)| data.iter().any(|d| d.visit == visit))
            .map(|(filter, _)| filter.as_str())
    }

    /// True if the filter needs a fringe frame during ISR.
    pub fn is_fringe_filter(&self, filter: &str) -> bool {
        self.fringe_filters.iter().any(|f| f == filter)
    }

    /// The patch-level data id `{tract, patch}`.
    pub fn patch_id(&self, patch: &str) -> DataId {
        DataId::new().with("tract", self.tract).with("patch", patch)
    }

    /// Removes blacklisted ccds from the tables. Returns how many
    /// entries were dropped.
    pub fn apply_blacklist(&mut self, blacklist: &[Data]) -> usize {
        if blacklist.is_empty() {
            return 0;
        }
        let banned: HashSet<Data> = blacklist.iter().copied().collect();
        let mut removed = 0;

        for data in self.filters.values_mut() {
            let before = data.len();
            data.retain(|d| !banned.contains(d));
            removed += before - data.len();
        }
        self.filters.retain(|_, data| !data.is_empty());

        for per_patch in self.sky_map.values_mut() {
            for data in per_patch.values_mut() {
                data.retain(|d| !banned.contains(d));
            }
            per_patch.retain(|_, data| !data.is_empty());
        }
        self.sky_map.retain(|_, per_patch| !per_patch.is_empty());

        debug!("Blacklist removed {} entries", removed);
        removed
    }

    /// Replaces the sky map, e.g. with one read from a registry database.
    pub fn set_sky_map(&mut self, sky_map: BTreeMap<String, BTreeMap<String, Vec<Data>>>) {
        self.sky_map = sky_map;
    }
}
