//! Schema Pre-Runs
//!
//! Several pipeline tasks write their catalog schemas as soon as they
//! start, before looking at any data. Running each such task once with
//! no data id produces the `*_schema` datasets every real instance of
//! the task (and several downstream tasks) reads. Tasks that do not
//! generate schemas are skipped.

use crate::dax::{Adag, Job};
use crate::error::GenError;
use crate::mapper::DataId;

use super::context::{Source, StageContext};

/// A data-less task invocation: `<out> --output <out> --doraise`.
fn schema_job(ctx: &StageContext<'_>, name: &str) -> Job {
    Job::new(name)
        .arg(&ctx.out)
        .arg("--output")
        .arg(&ctx.out)
        .arg("--doraise")
        .input(&ctx.mapper_file)
}

/// Attaches the listed schema datasets as outputs.
fn with_schema_outputs(
    dax: &mut Adag,
    ctx: &StageContext<'_>,
    mut job: Job,
    schemas: &[&str],
) -> Result<Job, GenError> {
    for schema in schemas {
        let lfn = ctx.data_file(dax, schema, &DataId::new(), Source::Generated)?;
        job = job.output(lfn);
    }
    Ok(job)
}

/// Pre-run of processCcd, producing the single-frame catalog schemas.
pub fn process_ccd(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    let mut job = schema_job(ctx, "processCcd");
    if let Some(ref_cat) = &ctx.ref_cat {
        job = job.input(&ref_cat.config);
    }
    let job = with_schema_outputs(dax, ctx, job, &["icSrc_schema", "src_schema"])?;
    dax.add_job(job);
    Ok(())
}

/// Pre-run of detectCoaddSources, producing the detection schema.
pub fn detect_coadd_sources(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    let job = schema_job(ctx, "detectCoaddSources");
    let job = with_schema_outputs(dax, ctx, job, &["deepCoadd_det_schema"])?;
    dax.add_job(job);
    Ok(())
}

/// Pre-run of mergeCoaddDetections.
pub fn merge_coadd_detections(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    let det_schema = ctx.lfn("deepCoadd_det_schema", &DataId::new())?;
    let job = schema_job(ctx, "mergeCoaddDetections").input(det_schema);
    let job = with_schema_outputs(
        dax,
        ctx,
        job,
        &["deepCoadd_mergeDet_schema", "deepCoadd_peak_schema"],
    )?;
    dax.add_job(job);
    Ok(())
}

/// Pre-run of measureCoaddSources.
pub fn measure_coadd_sources(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    let mut job = schema_job(ctx, "measureCoaddSources");
    for schema in ["deepCoadd_mergeDet_schema", "deepCoadd_peak_schema", "src_schema"] {
        job = job.input(ctx.lfn(schema, &DataId::new())?);
    }
    let job = with_schema_outputs(dax, ctx, job, &["deepCoadd_meas_schema"])?;
    dax.add_job(job);
    Ok(())
}

/// Pre-run of mergeCoaddMeasurements.
pub fn merge_coadd_measurements(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    let meas_schema = ctx.lfn("deepCoadd_meas_schema", &DataId::new())?;
    let job = schema_job(ctx, "mergeCoaddMeasurements").input(meas_schema);
    let job = with_schema_outputs(dax, ctx, job, &["deepCoadd_ref_schema"])?;
    dax.add_job(job);
    Ok(())
}

/// Pre-run of forcedPhotCoadd.
pub fn forced_phot_coadd(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    let ref_schema = ctx.lfn("deepCoadd_ref_schema", &DataId::new())?;
    let job = schema_job(ctx, "forcedPhotCoadd").input(ref_schema);
    let job = with_schema_outputs(dax, ctx, job, &["deepCoadd_forced_src_schema"])?;
    dax.add_job(job);
    Ok(())
}

/// Pre-run of forcedPhotCcd.
pub fn forced_phot_ccd(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    let ref_schema = ctx.lfn("deepCoadd_ref_schema", &DataId::new())?;
    let mut job = schema_job(ctx, "forcedPhotCcd").input(ref_schema);
    if let Some(config) = &ctx.forced_phot_config {
        job = job.arg("-C").file_arg(config).input(config);
    }
    let job = with_schema_outputs(dax, ctx, job, &["forced_src_schema"])?;
    dax.add_job(job);
    Ok(())
}

/// Adds every schema pre-run needed by the full pipeline.
pub fn all(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    process_ccd(dax, ctx)?;
    detect_coadd_sources(dax, ctx)?;
    merge_coadd_detections(dax, ctx)?;
    measure_coadd_sources(dax, ctx)?;
    merge_coadd_measurements(dax, ctx)?;
    forced_phot_coadd(dax, ctx)?;
    forced_phot_ccd(dax, ctx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputData;

    fn sample_input() -> InputData {
        serde_yaml::from_str(
            r#"
repos:
  input: /repo
filters:
  HSC-R: [{visit: 903334, ccd: 16}]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_all_preruns() {
        let input = sample_input();
        let mut dax = Adag::new("test");
        let ctx = StageContext::register(&mut dax, &input).unwrap();

        all(&mut dax, &ctx).unwrap();

        assert_eq!(dax.job_count(), 7);
        assert!(dax.has_file("peg/schema/src.fits"));
        assert!(dax.has_file("peg/schema/deepCoadd_ref.fits"));

        // Schema chain: each pre-run consumes the previous one's output.
        dax.infer_file_dependencies().unwrap();
        assert!(dax.validate().is_ok());
        assert!(dax.edges().count() >= 5);
    }

    #[test]
    fn test_prerun_schemas_are_unique() {
        let input = sample_input();
        let mut dax = Adag::new("test");
        let ctx = StageContext::register(&mut dax, &input).unwrap();

        all(&mut dax, &ctx).unwrap();
        let count = dax.file_count();
        // Running again would duplicate producers, but file nodes stay unique.
        process_ccd(&mut dax, &ctx).unwrap();
        assert_eq!(dax.file_count(), count);
    }
}
