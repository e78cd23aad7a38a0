// 🚦 Pipeline Orchestration
//
// raw extracts → PRE/POST conditioning → integrated → with severity → windowed
//
// Each stage reads existing artifacts and writes a new one under its own
// path. Stage reports go to a `ReportSink`; `run` also collects them into
// the run manifest.

use crate::collision_view::CollisionView;
use crate::columns::CRASH_DATE;
use crate::config::PipelineConfig;
use crate::diagnostics::{ReportSink, StageReport};
use crate::error::Result;
use crate::integrate::{ConditionedSources, DatasetIntegrator};
use crate::manifest::RunManifest;
use crate::severity::SeverityDeriver;
use crate::sources::{get_conditioner, SourceKind};
use crate::storage::{copy_snapshot, read_table, read_table_counted, write_table, TableFormat};
use crate::table::Table;
use crate::window::{TemporalWindowFilter, WindowBounds};
use std::path::Path;
use std::thread;

// ============================================================================
// CONDITIONING
// ============================================================================

/// A source that has been read and conditioned in memory but not yet written
pub struct ConditionedSource {
    pub kind: SourceKind,
    pub table: Table,
    pub report: StageReport,
}

/// Read and condition one extract without touching the artifact tree.
/// Mandatory-column checks happen here, so a fatal schema error leaves
/// nothing behind.
pub fn prepare_source(config: &PipelineConfig, kind: SourceKind) -> Result<ConditionedSource> {
    let input = config.input_path(kind);
    let conditioner = get_conditioner(kind);
    tracing::info!(source = %kind, input = %input.display(), version = conditioner.version(), "conditioning");

    let (raw, lossy_cells) = read_table_counted(&input)?;
    let rows_in = raw.len() as u64;
    let (table, mut report) = conditioner.condition(raw)?;
    report.anomaly("invalid_utf8", None, lossy_cells, rows_in);

    Ok(ConditionedSource { kind, table, report })
}

/// Snapshot the raw extract (PRE) and write the POST artifact
pub fn commit_source(config: &PipelineConfig, source: &ConditionedSource) -> Result<u64> {
    let kind = source.kind;
    copy_snapshot(&config.input_path(kind), &config.pre_conditioning_path(kind))?;
    let written = write_table(&config.post_conditioning_path(kind), &source.table)?;
    tracing::info!(source = %kind, rows = written, "POST conditioning written");
    Ok(written)
}

/// Condition one source and write its PRE/POST artifacts
pub fn condition_source(config: &PipelineConfig, kind: SourceKind) -> Result<StageReport> {
    let source = prepare_source(config, kind)?;
    commit_source(config, &source)?;
    Ok(source.report)
}

fn join_all<T>(handles: Vec<thread::ScopedJoinHandle<'_, Result<T>>>) -> Vec<Result<T>> {
    handles
        .into_iter()
        .map(|h| match h.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        })
        .collect()
}

/// Condition all four sources on scoped threads. Nothing is written until
/// every source has passed conditioning; a fatal error in any one of them
/// leaves the conditioning directory untouched.
pub fn condition_all(config: &PipelineConfig, sink: &mut dyn ReportSink) -> Result<Vec<StageReport>> {
    let prepared: Vec<Result<ConditionedSource>> = thread::scope(|scope| {
        let handles = SourceKind::ALL
            .iter()
            .map(|&kind| scope.spawn(move || prepare_source(config, kind)))
            .collect();
        join_all(handles)
    });
    let prepared = prepared.into_iter().collect::<Result<Vec<_>>>()?;

    let committed: Vec<Result<u64>> = thread::scope(|scope| {
        let handles = prepared
            .iter()
            .map(|source| scope.spawn(move || commit_source(config, source)))
            .collect();
        join_all(handles)
    });
    for result in committed {
        result?;
    }

    let mut reports = Vec::with_capacity(prepared.len());
    for source in prepared {
        sink.record(&source.report);
        reports.push(source.report);
    }
    Ok(reports)
}

// ============================================================================
// DOWNSTREAM STAGES
// ============================================================================

/// Join the POST conditioning artifacts into the integrated table (+ CSV mirror)
pub fn integrate(config: &PipelineConfig, sink: &mut dyn ReportSink) -> Result<StageReport> {
    let sources = ConditionedSources {
        crash: read_table(&config.post_conditioning_path(SourceKind::Crash))?,
        person: read_table(&config.post_conditioning_path(SourceKind::Person))?,
        vehicle: read_table(&config.post_conditioning_path(SourceKind::Vehicle))?,
        weather: read_table(&config.post_conditioning_path(SourceKind::Weather))?,
    };

    let (integrated, report) = DatasetIntegrator::new().integrate(sources)?;
    write_table(&config.integrated_path(), &integrated)?;
    if config.format != TableFormat::Csv {
        write_table(&config.integrated_csv_path(), &integrated)?;
    }

    sink.record(&report);
    Ok(report)
}

pub fn derive_severity(config: &PipelineConfig, sink: &mut dyn ReportSink) -> Result<StageReport> {
    let integrated = read_table(&config.integrated_path())?;
    let (annotated, report) = SeverityDeriver::new().derive(integrated)?;
    write_table(&config.severity_path(), &annotated)?;

    sink.record(&report);
    Ok(report)
}

/// Window the severity-annotated table into `collisions_last<N>yrs`
pub fn window(config: &PipelineConfig, sink: &mut dyn ReportSink) -> Result<(WindowBounds, StageReport)> {
    let filter = TemporalWindowFilter::new(config.window.date_column.clone(), config.window.years)?;
    let (bounds, report) = filter.apply(&config.severity_path(), &config.window_path())?;

    sink.record(&report);
    Ok((bounds, report))
}

/// One row per collision from `input` (default: the severity-annotated table)
pub fn collisions(
    config: &PipelineConfig,
    input: Option<&Path>,
    output: &Path,
    sink: &mut dyn ReportSink,
) -> Result<StageReport> {
    let default_input = config.severity_path();
    let table = read_table(input.unwrap_or(default_input.as_path()))?;
    let (view, report) = CollisionView::new(CRASH_DATE).build(&table)?;
    write_table(output, &view)?;

    sink.record(&report);
    Ok(report)
}

// ============================================================================
// FULL RUN
// ============================================================================

/// Every stage in order, then the manifest. The first fatal error stops the
/// run; artifacts of later stages are not written.
pub fn run(config: &PipelineConfig, sink: &mut dyn ReportSink) -> Result<RunManifest> {
    let mut manifest = RunManifest::start(config);
    tracing::info!(run_id = %manifest.run_id, base = %config.base_path.display(), "pipeline run started");

    let mut reports = condition_all(config, sink)?;
    for kind in SourceKind::ALL {
        manifest.record_artifact(&format!("{kind}_pre"), &config.pre_conditioning_path(kind))?;
        manifest.record_artifact(&format!("{kind}_post"), &config.post_conditioning_path(kind))?;
    }

    reports.push(integrate(config, sink)?);
    manifest.record_artifact("integrated", &config.integrated_path())?;
    if config.format != TableFormat::Csv {
        manifest.record_artifact("integrated_csv", &config.integrated_csv_path())?;
    }

    reports.push(derive_severity(config, sink)?);
    manifest.record_artifact("with_severity", &config.severity_path())?;

    let (bounds, window_report) = window(config, sink)?;
    reports.push(window_report);
    manifest.record_artifact("windowed", &config.window_path())?;
    manifest.window = Some(bounds);

    manifest.reports = reports;
    manifest.finish();
    manifest.write(&config.manifest_path())?;
    tracing::info!(
        run_id = %manifest.run_id,
        manifest = %config.manifest_path().display(),
        "pipeline run complete"
    );

    Ok(manifest)
}
