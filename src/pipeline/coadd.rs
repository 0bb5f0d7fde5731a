//! Coaddition Stages
//!
//! For every filter and every patch the filter's exposures overlap:
//! one makeCoaddTempExp (warp) job per contributing visit, one
//! assembleCoadd job combining the warps, and one detectCoaddSources job
//! over the assembled coadd.
//!
//! The calibrated exposures and the sky map are registered on demand:
//! inside the full pipeline they already exist as outputs of the
//! single-frame stages, while a standalone coadd run stages them from
//! the input repository.

use log::debug;

use crate::dax::{Adag, Job};
use crate::error::GenError;
use crate::mapper::DataId;

use super::context::{Source, StageContext};

/// Adds warp, assemble and detection jobs for every filter/patch
/// combination that has contributing exposures.
pub fn add_coadd(dax: &mut Adag, ctx: &StageContext<'_>) -> Result<(), GenError> {
    let sky_map = ctx.data_file(dax, "deepCoadd_skyMap", &DataId::new(), Source::InputRepo)?;
    let filters: Vec<String> = ctx.input.filter_names().map(String::from).collect();

    for filter in &filters {
        for patch in ctx.input.patches() {
            let sky_data = ctx.input.sky_data(filter, &patch);
            if sky_data.is_empty() {
                debug!("No {} exposures overlap patch {}; skipping", filter, patch);
                continue;
            }

            let ident = format!(
                "--id tract={} patch={} filter={}",
                ctx.input.tract, patch, filter
            );
            let patch_id = ctx.input.patch_id(&patch);
            let coadd_id = patch_id.clone().with("filter", filter.as_str());

            // Pipeline: makeCoaddTempExp per visit
            let mut warps = Vec::new();
            for (visit, data) in ctx.input.sky_exposures(filter, &patch) {
                let mut job = Job::new("makeCoaddTempExp")
                    .input(&ctx.mapper_file)
                    .input(&ctx.registry)
                    .input(&sky_map);

                for d in &data {
                    let calexp =
                        ctx.data_file(dax, "calexp", &d.data_id(), Source::InputRepo)?;
                    job = job.input(calexp);
                }

                let select_ids: Vec<String> =
                    data.iter().map(|d| d.id_arg("--selectId")).collect();
                job = job
                    .arg(&ctx.out)
                    .arg("--output")
                    .arg(&ctx.out)
                    .arg("--doraise")
                    .arg(&ident)
                    .arg("-c doApplyUberCal=False")
                    .arg(select_ids.join(" "));

                let warp_id = coadd_id.clone().with("visit", visit);
                let warp = ctx.data_file(dax, "deepCoadd_tempExp", &warp_id, Source::Generated)?;
                job = job.output(&warp);
                warps.push(warp);

                let log = ctx.log_file(
                    dax,
                    format!(
                        "logMakeCoaddTempExp.{}-{}-{}-{}",
                        ctx.input.tract, patch, filter, visit
                    ),
                );
                job = job.stderr(log);

                dax.add_job(job);
            }

            // Pipeline: assembleCoadd per patch
            let mut job = Job::new("assembleCoadd")
                .input(&ctx.mapper_file)
                .input(&ctx.registry)
                .input(&sky_map);

            let select_ids: Vec<String> =
                sky_data.iter().map(|d| d.id_arg("--selectId")).collect();
            job = job
                .arg(&ctx.out)
                .arg("--output")
                .arg(&ctx.out)
                .arg(&ident)
                .arg("--doraise")
                .arg(select_ids.join(" "));

            // The exposure metadata feeds coadd input selection.
            for d in &sky_data {
                let calexp = ctx.data_file(dax, "calexp", &d.data_id(), Source::InputRepo)?;
                job = job.input(calexp);
            }
            for warp in &warps {
                job = job.input(warp);
            }

            let coadd = ctx.data_file(dax, "deepCoadd", &coadd_id, Source::Generated)?;
            job = job.output(&coadd);

            let log = ctx.log_file(
                dax,
                format!("logAssembleCoadd.{}-{}-{}", ctx.input.tract, patch, filter),
            );
            job = job.stderr(log);
            dax.add_job(job);

            // Pipeline: detectCoaddSources per coadd
            let det_schema = ctx.lfn("deepCoadd_det_schema", &DataId::new())?;
            let mut job = Job::new("detectCoaddSources")
                .arg(&ctx.out)
                .arg("--output")
                .arg(&ctx.out)
                .arg(&ident)
                .arg("--doraise")
                .input(&ctx.mapper_file)
                .input(&coadd)
                .input(det_schema);

            for output in [
                "deepCoadd_calexp",
                "deepCoadd_calexp_background",
                "deepCoadd_det",
            ] {
                let lfn = ctx.data_file(dax, output, &coadd_id, Source::Generated)?;
                job = job.output(lfn);
            }

            let log = ctx.log_file(
                dax,
                format!(
                    "logDetectCoaddSources.{}-{}-{}",
                    ctx.input.tract, patch, filter
                ),
            );
            job = job.stderr(log);
            dax.add_job(job);
        }
    }
    Ok(())
}
