//! Pipeline Generators
//!
//! Turns an input data table into a complete workflow graph. Three
//! pipeline selections exist, matching how processing campaigns are run:
//!
//! - [`Pipeline::Sfm`]: single-frame processing (processCcd fan-out plus
//!   makeSkyMap), starting from raw exposures
//! - [`Pipeline::Coadd`]: warping, coaddition and coadd detection,
//!   starting from calibrated exposures staged out of the input
//!   repository
//! - [`Pipeline::Drp`]: the full data release chain (single-frame,
//!   coaddition and multiband stages)

pub mod coadd;
pub mod context;
pub mod multiband;
pub mod prerun;
pub mod sfm;

use std::fmt;
use std::str::FromStr;

use log::info;

use crate::config::InputData;
use crate::dax::Adag;
use crate::error::GenError;

pub use context::{Source, StageContext};

/// Which part of the processing chain to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// Single-frame measurement: processCcd and makeSkyMap.
    Sfm,
    /// Coaddition over pre-existing calibrated exposures.
    Coadd,
    /// The full data release production chain.
    Drp,
}

impl FromStr for Pipeline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sfm" => Ok(Self::Sfm),
            "coadd" => Ok(Self::Coadd),
            "drp" => Ok(Self::Drp),
            other => Err(format!(
                "unknown pipeline '{}' (expected sfm, coadd or drp)",
                other
            )),
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sfm => write!(f, "sfm"),
            Self::Coadd => write!(f, "coadd"),
            Self::Drp => write!(f, "drp"),
        }
    }
}

/// Generates the workflow graph for a pipeline selection.
///
/// Registers the repository fixtures, fans the selected stages out over
/// the input data, derives dependency edges from file usage and
/// validates the result.
pub fn generate(input: &InputData, pipeline: Pipeline) -> Result<Adag, GenError> {
    info!("Generating {} workflow '{}'", pipeline, input.name);

    let mut dax = Adag::new(&input.name);
    let ctx = StageContext::register(&mut dax, input)?;

    match pipeline {
        Pipeline::Sfm => {
            prerun::process_ccd(&mut dax, &ctx)?;
            sfm::add_process_ccd(&mut dax, &ctx)?;
            sfm::add_make_sky_map(&mut dax, &ctx)?;
        }
        Pipeline::Coadd => {
            prerun::detect_coadd_sources(&mut dax, &ctx)?;
            coadd::add_coadd(&mut dax, &ctx)?;
        }
        Pipeline::Drp => {
            prerun::all(&mut dax, &ctx)?;
            sfm::add_process_ccd(&mut dax, &ctx)?;
            sfm::add_make_sky_map(&mut dax, &ctx)?;
            coadd::add_coadd(&mut dax, &ctx)?;
            multiband::add_multiband(&mut dax, &ctx)?;
        }
    }

    dax.infer_file_dependencies()?;
    dax.validate()?;

    info!(
        "Generated {} jobs, {} files, {} dependency edges",
        dax.job_count(),
        dax.file_count(),
        dax.edges().count()
    );
    Ok(dax)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> InputData {
        serde_yaml::from_str(
            r#"
name: CiHscDax
tract: 0
patches: ["8,6"]
repos:
  input: /repo
filters:
  HSC-R:
    - {visit: 903334, ccd: 16}
    - {visit: 903336, ccd: 17}
sky_map:
  HSC-R:
    "8,6": [{visit: 903334, ccd: 16}, {visit: 903336, ccd: 17}]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_pipeline_from_str() {
        assert_eq!("sfm".parse::<Pipeline>().unwrap(), Pipeline::Sfm);
        assert_eq!("COADD".parse::<Pipeline>().unwrap(), Pipeline::Coadd);
        assert_eq!("drp".parse::<Pipeline>().unwrap(), Pipeline::Drp);
        assert!("unknown".parse::<Pipeline>().is_err());
    }

    #[test]
    fn test_generate_sfm() {
        let dax = generate(&sample_input(), Pipeline::Sfm).unwrap();
        assert_eq!(dax.name(), "CiHscDax");
        // Schema pre-run + two ccds + makeSkyMap.
        assert_eq!(dax.job_count(), 4);
        assert!(dax.has_file("peg/deepCoadd/skyMap.pickle"));
    }

    #[test]
    fn test_generate_coadd_standalone() {
        let dax = generate(&sample_input(), Pipeline::Coadd).unwrap();
        // Calexps and the sky map come from the repository.
        let sky_map = dax.file("peg/deepCoadd/skyMap.pickle").unwrap();
        assert!(!sky_map.pfns.is_empty());
        let calexp = dax.file("peg/corr/CORR-0903334-016.fits").unwrap();
        assert!(!calexp.pfns.is_empty());
    }

    #[test]
    fn test_generate_drp() {
        let dax = generate(&sample_input(), Pipeline::Drp).unwrap();
        // Inside the full chain the sky map is produced, not staged.
        let sky_map = dax.file("peg/deepCoadd/skyMap.pickle").unwrap();
        assert!(sky_map.pfns.is_empty());

        // All stage names are present.
        for name in [
            "processCcd",
            "makeSkyMap",
            "makeCoaddTempExp",
            "assembleCoadd",
            "detectCoaddSources",
            "mergeCoaddDetections",
            "measureCoaddSources",
            "mergeCoaddMeasurements",
            "forcedPhotCoadd",
            "forcedPhotCcd",
        ] {
            assert!(
                dax.jobs().iter().any(|j| j.name == name),
                "missing stage {}",
                name
            );
        }

        // Edges were inferred and the graph is acyclic.
        assert!(dax.edges().count() > dax.job_count());
        dax.validate().unwrap();
    }

    #[test]
    fn test_generate_from_sample_config() {
        let path =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/ciHsc.yaml");
        let input = InputData::load(&path).unwrap();
        let dax = generate(&input, Pipeline::Drp).unwrap();

        // Sixteen ccds plus the schema pre-run.
        let count = |name: &str| dax.jobs().iter().filter(|j| j.name == name).count();
        assert_eq!(count("processCcd"), 17);
        assert_eq!(count("forcedPhotCcd"), 17);
        assert_eq!(count("makeSkyMap"), 1);
        // Two filters across four patches, all populated.
        assert_eq!(count("assembleCoadd"), 8);
        assert_eq!(count("mergeCoaddDetections"), 5);
    }

    #[test]
    fn test_drp_file_nodes_unique() {
        let dax = generate(&sample_input(), Pipeline::Drp).unwrap();
        let mut seen = std::collections::HashSet::new();
        for file in dax.files() {
            assert!(seen.insert(file.lfn.clone()), "duplicate {}", file.lfn);
        }
    }
}
