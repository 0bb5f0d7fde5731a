//! Single-Frame Processing Stages
//!
//! One processCcd job per ccd of every visit, plus the single makeSkyMap
//! job the coaddition stages build on.

use log::debug;

use crate::dax::{Adag, Job};
use crate::error::GenError;
use crate::mapper::DataId;

use super::context::{Source, StageContext};

/// Adds one processCcd job per ccd.
///
/// Each job reads the raw exposure and its calibration frames (bias,
/// dark, flat, brighter-fatter kernel, and a fringe frame for fringe
/// filters) and writes the calibrated exposure and its source catalogs.
/// Calibration frames are shared across jobs and registered once.
pub fn add_process_ccd(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    for (filter, data) in ctx.input.all_data() {
        debug!("processCcd dataId: {}", data.data_id());

        let mut job = Job::new("processCcd")
            .arg(&ctx.out)
            .arg("--calib")
            .arg(&ctx.out)
            .arg("--output")
            .arg(&ctx.out)
            .arg("--doraise")
            .arg(data.id_arg("--id"))
            .input(&ctx.registry)
            .input(&ctx.calib_registry)
            .input(&ctx.mapper_file);

        for schema in ["icSrc_schema", "src_schema"] {
            job = job.input(ctx.lfn(schema, &DataId::new())?);
        }

        let id = data.data_id();
        let raw = ctx.data_file(dax, "raw", &id, Source::InputRepo)?;
        job = job.input(raw);

        // The flat and fringe frames are per filter; the registry would
        // resolve this during a real run.
        let calib_id = id.clone().with("filter", filter);
        for calib in ["bias", "dark", "flat", "bfKernel"] {
            let lfn = ctx.data_file(dax, calib, &calib_id, Source::CalibRepo)?;
            job = job.input(lfn);
        }
        if ctx.input.is_fringe_filter(filter) {
            let lfn = ctx.data_file(dax, "fringe", &calib_id, Source::CalibRepo)?;
            job = job.input(lfn);
        }

        if let (Some(ref_cat), Some(refcat)) = (&ctx.ref_cat, &ctx.input.ref_catalog) {
            job = job.input(&ref_cat.config).input(&ref_cat.schema);
            for &shard in refcat.shards_for_ccd(&data) {
                let shard_id = DataId::new()
                    .with("name", refcat.name.as_str())
                    .with("pixel_id", shard);
                let lfn = ctx.data_file(dax, "ref_cat", &shard_id, Source::InputRepo)?;
                job = job.input(lfn);
            }
        }

        for output in ["calexp", "src", "srcMatch"] {
            let lfn = ctx.data_file(dax, output, &id, Source::Generated)?;
            job = job.output(lfn);
        }

        let log = ctx.log_file(dax, format!("logProcessCcd.{}", data.name()));
        job = job.stderr(log);

        dax.add_job(job);
    }
    Ok(())
}

/// Adds the makeSkyMap job and returns the sky map's logical name.
pub fn add_make_sky_map(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<String, GenError> {
    let mut job = Job::new("makeSkyMap")
        .arg(&ctx.out)
        .arg("--output")
        .arg(&ctx.out)
        .input(&ctx.mapper_file)
        .input(&ctx.registry);
    if let Some(config) = &ctx.sky_map_config {
        job = job.arg("-C").file_arg(config).input(config);
    }
    job = job.arg("--doraise");

    let sky_map = ctx.data_file(dax, "deepCoadd_skyMap", &DataId::new(), Source::Generated)?;
    job = job.output(&sky_map);

    let log = ctx.log_file(dax, "logMakeSkyMap");
    job = job.stderr(log);

    dax.add_job(job);
    Ok(sky_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputData;
    use crate::pipeline::prerun;

    fn sample_input() -> InputData {
        serde_yaml::from_str(
            r#"
repos:
  input: /repo
filters:
  HSC-R:
    - {visit: 903334, ccd: 16}
    - {visit: 903336, ccd: 16}
  HSC-Y:
    - {visit: 904030, ccd: 50}
task_configs:
  sky_map: /work/skymapConfig.py
ref_catalog:
  name: ps1_pv3_3pi_20170110
  ccd_shards:
    "903334-16": [189584, 189648]
    "903336-16": [189584]
"#,
        )
        .unwrap()
    }

    fn build() -> Adag {
        let input = sample_input();
        let mut dax = Adag::new("test");
        let ctx = StageContext::register(&mut dax, &input).unwrap();
        prerun::process_ccd(&mut dax, &ctx).unwrap();
        add_process_ccd(&mut dax, &ctx).unwrap();
        add_make_sky_map(&mut dax, &ctx).unwrap();
        dax
    }

    #[test]
    fn test_one_job_per_ccd() {
        let dax = build();
        let process_ccd = dax
            .jobs()
            .iter()
            .filter(|j| j.name == "processCcd")
            .count();
        // Three ccds plus the schema pre-run.
        assert_eq!(process_ccd, 4);
        assert_eq!(
            dax.jobs().iter().filter(|j| j.name == "makeSkyMap").count(),
            1
        );
    }

    #[test]
    fn test_calibrations_shared() {
        let dax = build();
        // Visits 903334 and 903336 use the same ccd in the same filter,
        // so they share every calibration frame.
        assert!(dax.has_file("peg/BIAS/BIAS-016.fits"));
        let bias_nodes = dax
            .files()
            .iter()
            .filter(|f| f.lfn.contains("BIAS-016"))
            .count();
        assert_eq!(bias_nodes, 1);
    }

    #[test]
    fn test_fringe_only_for_fringe_filters() {
        let dax = build();
        assert!(dax.has_file("peg/FRINGE/FRINGE-HSC-Y-050.fits"));
        assert!(!dax.has_file("peg/FRINGE/FRINGE-HSC-R-016.fits"));
    }

    #[test]
    fn test_ref_cat_shards_deduplicated() {
        let dax = build();
        // Shard 189584 is needed by both visits but registered once.
        let shard_nodes = dax
            .files()
            .iter()
            .filter(|f| f.lfn.ends_with("189584.fits"))
            .count();
        assert_eq!(shard_nodes, 1);
    }

    #[test]
    fn test_graph_is_consistent() {
        let mut dax = build();
        dax.infer_file_dependencies().unwrap();
        dax.validate().unwrap();

        // The schema pre-run precedes every real processCcd job.
        assert!(dax.edges().count() > 0);
    }

    #[test]
    fn test_process_ccd_outputs() {
        let dax = build();
        let job = dax
            .jobs()
            .iter()
            .find(|j| {
                j.name == "processCcd"
                    && j.args()
                        .iter()
                        .any(|a| matches!(a, crate::dax::Arg::Plain(s) if s.contains("visit=903334")))
            })
            .unwrap();

        let outputs: Vec<_> = job.outputs().collect();
        assert!(outputs.iter().any(|o| o.contains("CORR-0903334-016")));
        assert!(outputs.iter().any(|o| o.contains("SRC-0903334-016")));
        assert!(outputs.iter().any(|o| o.contains("SRCMATCH-0903334-016")));
        assert!(outputs.iter().any(|o| o.starts_with("logProcessCcd")));
    }

    #[test]
    fn test_make_sky_map_config_reference() {
        let dax = build();
        let job = dax
            .jobs()
            .iter()
            .find(|j| j.name == "makeSkyMap")
            .unwrap();
        assert!(job
            .args()
            .iter()
            .any(|a| matches!(a, crate::dax::Arg::FileRef(f) if f == "skymapConfig.py")));
        assert!(job.inputs().any(|lfn| lfn == "skymapConfig.py"));
        assert_eq!(job.stderr_file(), Some("logMakeSkyMap"));
    }
}
