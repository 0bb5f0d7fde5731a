//! Dataset-Location Mapper
//!
//! Resolves a (dataset type, data id) pair to a repository-relative path,
//! the way a camera mapper locates files in a data repository. The mapping
//! is a static table of path templates covering every dataset the
//! supported pipelines read or write.
//!
//! Two names are derived from the resolved path:
//! - the logical file name (LFN): the workflow-level output root joined
//!   with the relative path
//! - a physical file name (PFN): a real repository root joined with the
//!   relative path, one per configured site

pub mod template;

use std::collections::HashMap;

use once_cell::sync::Lazy;

pub use template::{DataId, IdValue, PathTemplate};

use crate::error::GenError;

/// Built-in dataset path templates, patterned on the HSC repository
/// layout. Calibration paths are relative to the calibration repository,
/// everything else to the data repository root.
const DATASET_TABLE: &[(&str, &str)] = &[
    // Single-frame inputs
    ("raw", "raw/HSC-{visit:07d}-{ccd:03d}.fits"),
    ("bias", "BIAS/BIAS-{ccd:03d}.fits"),
    ("dark", "DARK/DARK-{ccd:03d}.fits"),
    ("flat", "FLAT/FLAT-{filter}-{ccd:03d}.fits"),
    ("fringe", "FRINGE/FRINGE-{filter}-{ccd:03d}.fits"),
    ("bfKernel", "BFDATA/brighter_fatter_kernel.pkl"),
    // Single-frame outputs
    ("calexp", "corr/CORR-{visit:07d}-{ccd:03d}.fits"),
    ("src", "output/SRC-{visit:07d}-{ccd:03d}.fits"),
    ("srcMatch", "output/SRCMATCH-{visit:07d}-{ccd:03d}.fits"),
    ("icSrc_schema", "schema/icSrc.fits"),
    ("src_schema", "schema/src.fits"),
    // Sky map and warps
    ("deepCoadd_skyMap", "deepCoadd/skyMap.pickle"),
    (
        "deepCoadd_tempExp",
        "deepCoadd/{filter}/{tract}/{patch}/warp-{filter}-{tract}-{patch}-{visit}.fits",
    ),
    // Coadds and coadd detections
    ("deepCoadd", "deepCoadd/{filter}/{tract}/{patch}.fits"),
    (
        "deepCoadd_calexp",
        "deepCoadd-results/{filter}/{tract}/{patch}/calexp-{filter}-{tract}-{patch}.fits",
    ),
    (
        "deepCoadd_calexp_background",
        "deepCoadd-results/{filter}/{tract}/{patch}/bkgd-{filter}-{tract}-{patch}.fits",
    ),
    (
        "deepCoadd_det",
        "deepCoadd-results/{filter}/{tract}/{patch}/det-{filter}-{tract}-{patch}.fits",
    ),
    ("deepCoadd_det_schema", "schema/deepCoadd_det.fits"),
    // Merged detections and measurements
    (
        "deepCoadd_mergeDet",
        "deepCoadd-results/merged/{tract}/{patch}/mergeDet-{tract}-{patch}.fits",
    ),
    ("deepCoadd_mergeDet_schema", "schema/deepCoadd_mergeDet.fits"),
    ("deepCoadd_peak_schema", "schema/deepCoadd_peak.fits"),
    (
        "deepCoadd_meas",
        "deepCoadd-results/{filter}/{tract}/{patch}/meas-{filter}-{tract}-{patch}.fits",
    ),
    (
        "deepCoadd_measMatch",
        "deepCoadd-results/{filter}/{tract}/{patch}/measMatch-{filter}-{tract}-{patch}.fits",
    ),
    ("deepCoadd_meas_schema", "schema/deepCoadd_meas.fits"),
    (
        "deepCoadd_ref",
        "deepCoadd-results/merged/{tract}/{patch}/ref-{tract}-{patch}.fits",
    ),
    ("deepCoadd_ref_schema", "schema/deepCoadd_ref.fits"),
    // Forced photometry
    (
        "deepCoadd_forced_src",
        "deepCoadd-results/{filter}/{tract}/{patch}/forced_src-{filter}-{tract}-{patch}.fits",
    ),
    (
        "deepCoadd_forced_src_schema",
        "schema/deepCoadd_forced_src.fits",
    ),
    (
        "forced_src",
        "forced/tract{tract}/FORCEDSRC-{visit:07d}-{ccd:03d}.fits",
    ),
    ("forced_src_schema", "schema/forced_src.fits"),
    // Reference catalog shards
    ("ref_cat", "ref_cats/{name}/{pixel_id}.fits"),
    ("ref_cat_config", "ref_cats/{name}/config.py"),
];

static DATASET_TEMPLATES: Lazy<HashMap<&'static str, PathTemplate>> = Lazy::new(|| {
    DATASET_TABLE
        .iter()
        .map(|(dataset, raw)| {
            let template = PathTemplate::parse(raw).expect("built-in template is well-formed");
            (*dataset, template)
        })
        .collect()
});

/// Resolves dataset types and ids to logical and physical file names.
#[derive(Debug, Clone)]
pub struct PathMapper {
    output_root: String,
}

impl PathMapper {
    /// Creates a mapper whose logical names live under `output_root`.
    pub fn new(output_root: impl Into<String>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// The logical output root this mapper prepends to every LFN.
    pub fn output_root(&self) -> &str {
        &self.output_root
    }

    /// Resolves the repository-relative path of a dataset instance.
    pub fn butler_path(&self, dataset: &str, id: &DataId) -> Result<String, GenError> {
        let template = DATASET_TEMPLATES
            .get(dataset)
            .ok_or_else(|| GenError::UnknownDatasetType(dataset.to_string()))?;
        template.render(dataset, id)
    }

    /// Resolves the logical file name of a dataset instance.
    pub fn lfn(&self, dataset: &str, id: &DataId) -> Result<String, GenError> {
        Ok(join(&self.output_root, &self.butler_path(dataset, id)?))
    }

    /// Resolves the physical file name of a dataset instance inside a
    /// concrete repository.
    pub fn pfn(&self, dataset: &str, id: &DataId, repo_root: &str) -> Result<String, GenError> {
        Ok(join(repo_root, &self.butler_path(dataset, id)?))
    }

    /// True if `dataset` is a known dataset type.
    pub fn knows(&self, dataset: &str) -> bool {
        DATASET_TEMPLATES.contains_key(dataset)
    }
}

/// Joins a root and a relative path with exactly one separator.
fn join(root: &str, rel: &str) -> String {
    if root.is_empty() {
        return rel.to_string();
    }
    format!("{}/{}", root.trim_end_matches('/'), rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lfn_calexp() {
        let mapper = PathMapper::new("peg");
        let id = DataId::new().with("visit", 903334u64).with("ccd", 16u32);
        assert_eq!(
            mapper.lfn("calexp", &id).unwrap(),
            "peg/corr/CORR-0903334-016.fits"
        );
    }

    #[test]
    fn test_pfn_uses_repo_root() {
        let mapper = PathMapper::new("peg");
        let id = DataId::new().with("ccd", 16u32);
        assert_eq!(
            mapper.pfn("bias", &id, "/datasets/hsc/repo/CALIB").unwrap(),
            "/datasets/hsc/repo/CALIB/BIAS/BIAS-016.fits"
        );
    }

    #[test]
    fn test_trailing_slash_in_root() {
        let mapper = PathMapper::new("peg");
        let id = DataId::new().with("ccd", 4u32);
        assert_eq!(
            mapper.pfn("dark", &id, "/repo/").unwrap(),
            "/repo/DARK/DARK-004.fits"
        );
    }

    #[test]
    fn test_unknown_dataset() {
        let mapper = PathMapper::new("peg");
        let err = mapper.lfn("calexp2", &DataId::new()).unwrap_err();
        assert!(matches!(err, GenError::UnknownDatasetType(_)));
    }

    #[test]
    fn test_repo_level_dataset_needs_no_id() {
        let mapper = PathMapper::new("peg");
        assert_eq!(
            mapper.lfn("deepCoadd_skyMap", &DataId::new()).unwrap(),
            "peg/deepCoadd/skyMap.pickle"
        );
    }

    #[test]
    fn test_missing_coordinate_is_reported() {
        let mapper = PathMapper::new("peg");
        let id = DataId::new().with("visit", 903334u64);
        let err = mapper.lfn("calexp", &id).unwrap_err();
        match err {
            GenError::MissingIdKey { dataset, key } => {
                assert_eq!(dataset, "calexp");
                assert_eq!(key, "ccd");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_ref_cat_shard_path() {
        let mapper = PathMapper::new("peg");
        let id = DataId::new()
            .with("name", "ps1_pv3_3pi_20170110")
            .with("pixel_id", 189584u64);
        assert_eq!(
            mapper.lfn("ref_cat", &id).unwrap(),
            "peg/ref_cats/ps1_pv3_3pi_20170110/189584.fits"
        );
    }

    #[test]
    fn test_every_builtin_template_parses() {
        let mapper = PathMapper::new("peg");
        for (dataset, _) in DATASET_TABLE {
            assert!(mapper.knows(dataset));
        }
        assert!(!mapper.knows("no_such_dataset"));
    }
}
