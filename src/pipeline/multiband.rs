//! Multiband Stages
//!
//! The per-patch half of the pipeline: detections of every filter are
//! merged, measured per filter against the merged set, merged again into
//! a reference catalog, and finally photometered in forced mode both on
//! the coadds and back on the single-frame exposures.

use log::debug;

use crate::dax::{Adag, Job};
use crate::error::GenError;
use crate::mapper::DataId;

use super::context::{Source, StageContext};

/// The filters contributing data to a patch.
fn filters_for_patch(ctx: &StageContext<'_>, patch: &str) -> Vec<String> {
    ctx.input
        .filter_names()
        .filter(|filter| !ctx.input.sky_data(filter, patch).is_empty())
        .map(String::from)
        .collect()
}

/// Adds every multiband job: the merge/measure/merge chain and forced
/// photometry on coadds and ccds.
pub fn add_multiband(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    let sky_map = ctx.data_file(dax, "deepCoadd_skyMap", &DataId::new(), Source::InputRepo)?;

    for patch in ctx.input.patches() {
        let filters = filters_for_patch(ctx, &patch);
        if filters.is_empty() {
            debug!("No exposures overlap patch {}; skipping", patch);
            continue;
        }
        let patch_id = ctx.input.patch_id(&patch);
        let filter_list = filters.join("^");

        // Pipeline: mergeCoaddDetections per patch
        let mut job = Job::new("mergeCoaddDetections")
            .arg(&ctx.out)
            .arg("--output")
            .arg(&ctx.out)
            .arg("--doraise")
            .arg(patch_id.ident("--id"))
            .arg(format!("filter={}", filter_list))
            .input(&ctx.mapper_file)
            .input(&sky_map)
            .input(ctx.lfn("deepCoadd_det_schema", &DataId::new())?);

        for filter in &filters {
            let coadd_id = patch_id.clone().with("filter", filter.as_str());
            job = job.input(ctx.lfn("deepCoadd_det", &coadd_id)?);
        }
        for schema in ["deepCoadd_mergeDet_schema", "deepCoadd_peak_schema"] {
            job = job.input(ctx.lfn(schema, &DataId::new())?);
        }

        let merge_det = ctx.data_file(dax, "deepCoadd_mergeDet", &patch_id, Source::Generated)?;
        job = job.output(merge_det);
        let log = ctx.log_file(
            dax,
            format!("logMergeCoaddDetections.{}-{}", ctx.input.tract, patch),
        );
        job = job.stderr(log);
        dax.add_job(job);

        // Pipeline: measureCoaddSources per filter
        for filter in &filters {
            let coadd_id = patch_id.clone().with("filter", filter.as_str());

            let mut job = Job::new("measureCoaddSources")
                .arg(&ctx.out)
                .arg("--output")
                .arg(&ctx.out)
                .arg("--doraise")
                .arg(coadd_id.ident("--id"))
                .input(&ctx.mapper_file)
                .input(&ctx.registry)
                .input(&sky_map)
                .input(ctx.lfn("deepCoadd_mergeDet", &patch_id)?)
                .input(ctx.lfn("deepCoadd_mergeDet_schema", &DataId::new())?)
                .input(ctx.lfn("deepCoadd_peak_schema", &DataId::new())?)
                .input(ctx.lfn("deepCoadd_meas_schema", &DataId::new())?)
                .input(ctx.lfn("deepCoadd_calexp", &coadd_id)?);

            // Visit flags are propagated from the single-frame catalogs.
            for data in ctx.input.sky_data(filter, &patch) {
                job = job.input(ctx.lfn("src", &data.data_id())?);
            }

            // Reference matching loads the shards covering the patch.
            if let (Some(ref_cat), Some(refcat)) = (&ctx.ref_cat, &ctx.input.ref_catalog) {
                job = job.input(&ref_cat.config).input(&ref_cat.schema);
                for &shard in refcat.shards_for_patch(&patch) {
                    let shard_id = DataId::new()
                        .with("name", refcat.name.as_str())
                        .with("pixel_id", shard);
                    let lfn = ctx.data_file(dax, "ref_cat", &shard_id, Source::InputRepo)?;
                    job = job.input(lfn);
                }
            }

            for output in ["deepCoadd_meas", "deepCoadd_measMatch"] {
                let lfn = ctx.data_file(dax, output, &coadd_id, Source::Generated)?;
                job = job.output(lfn);
            }
            let log = ctx.log_file(
                dax,
                format!(
                    "logMeasureCoaddSources.{}-{}-{}",
                    ctx.input.tract, patch, filter
                ),
            );
            job = job.stderr(log);
            dax.add_job(job);
        }

        // Pipeline: mergeCoaddMeasurements per patch
        let mut job = Job::new("mergeCoaddMeasurements")
            .arg(&ctx.out)
            .arg("--output")
            .arg(&ctx.out)
            .arg("--doraise")
            .arg(patch_id.ident("--id"))
            .arg(format!("filter={}", filter_list))
            .input(&ctx.mapper_file)
            .input(ctx.lfn("deepCoadd_meas_schema", &DataId::new())?);

        for filter in &filters {
            let coadd_id = patch_id.clone().with("filter", filter.as_str());
            job = job.input(ctx.lfn("deepCoadd_meas", &coadd_id)?);
        }

        let reference = ctx.data_file(dax, "deepCoadd_ref", &patch_id, Source::Generated)?;
        job = job.output(reference);
        let log = ctx.log_file(
            dax,
            format!("logMergeCoaddMeasurements.{}-{}", ctx.input.tract, patch),
        );
        job = job.stderr(log);
        dax.add_job(job);

        // Pipeline: forcedPhotCoadd per filter
        for filter in &filters {
            let coadd_id = patch_id.clone().with("filter", filter.as_str());

            let mut job = Job::new("forcedPhotCoadd")
                .arg(&ctx.out)
                .arg("--output")
                .arg(&ctx.out)
                .arg("--doraise")
                .arg(coadd_id.ident("--id"))
                .input(&ctx.mapper_file)
                .input(&sky_map)
                .input(ctx.lfn("deepCoadd_ref_schema", &DataId::new())?)
                .input(ctx.lfn("deepCoadd_ref", &patch_id)?)
                .input(ctx.lfn("deepCoadd_calexp", &coadd_id)?)
                .input(ctx.lfn("deepCoadd_meas", &coadd_id)?)
                .input(ctx.lfn("deepCoadd_forced_src_schema", &DataId::new())?);

            let forced = ctx.data_file(dax, "deepCoadd_forced_src", &coadd_id, Source::Generated)?;
            job = job.output(forced);
            let log = ctx.log_file(
                dax,
                format!(
                    "logForcedPhotCoadd.{}-{}-{}",
                    ctx.input.tract, patch, filter
                ),
            );
            job = job.stderr(log);
            dax.add_job(job);
        }
    }

    // Pipeline: forcedPhotCcd per ccd
    for (_, data) in ctx.input.all_data() {
        let references = ctx.input.references(&data);
        debug!(
            "forcedPhotCcd {} with reference patches {:?}",
            data.id_arg_in_tract("--id", ctx.input.tract),
            references
        );

        let mut job = Job::new("forcedPhotCcd")
            .arg(&ctx.out)
            .arg("--output")
            .arg(&ctx.out)
            .arg("--doraise")
            .input(&ctx.mapper_file)
            .input(&ctx.registry)
            .input(&sky_map)
            .input(ctx.lfn("calexp", &data.data_id())?)
            .input(ctx.lfn("deepCoadd_ref_schema", &DataId::new())?)
            .input(ctx.lfn("forced_src_schema", &DataId::new())?);

        for patch in &references {
            let patch_id = ctx.input.patch_id(patch);
            job = job.input(ctx.lfn("deepCoadd_ref", &patch_id)?);
        }

        if let Some(config) = &ctx.forced_phot_config {
            job = job.arg("-C").file_arg(config).input(config);
        }
        job = job.arg(data.id_arg_in_tract("--id", ctx.input.tract));

        let forced_id = data.data_id().with("tract", ctx.input.tract);
        let forced = ctx.data_file(dax, "forced_src", &forced_id, Source::Generated)?;
        job = job.output(forced);

        let log = ctx.log_file(dax, format!("logForcedPhotCcd.{}", data.name()));
        job = job.stderr(log);
        dax.add_job(job);
    }

    Ok(())
}
