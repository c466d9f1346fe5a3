use crate::distance::{shingle_fingerprint, ProviderError, TanimotoDistances};
use crate::diversity::{compute_pathway_diversity, min_max_scale, PathwayDiversity, PATHWAY_DIVERSITY_METRICS};
use crate::fad::{calculate_fad_measures, FadResult, SingletonPolicy, FAD_METRICS};
use crate::parse::{read_compound_table, ColumnSpec};
use crate::pathways::{
    aggregate_by_group, index_pathways, GroupPathwayStats, PathwayConflict, PathwayVocabulary,
};
use crate::progress::{
    create_spinner, display_status_box, log, set_stage, LogLevel, ProcessingStage, StatusBox,
};
use crate::rarefaction::{
    compile_rarefied_calculations, default_workers, rarefied_column, RarefactionConfig,
    RarefactionReport,
};
use crate::records::group_labels;

use clap::Parser;
use colored::*;
use csv::WriterBuilder;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bits used for hashed SMILES shingle fingerprints.
pub const SHINGLE_BITS: u32 = 2048;
/// Longest SMILES substring hashed into a shingle fingerprint.
pub const SHINGLE_LENGTH: usize = 4;

#[derive(Debug, Error)]
pub enum DiversityError {
    #[error("group '{group}' has {size} unique compound(s); pairwise measures need at least 2")]
    Underdetermined { group: String, size: usize },

    #[error("{} compound(s) have conflicting pathway assignments: {}", conflicts.len(), describe_conflicts(conflicts))]
    DataConsistency { conflicts: Vec<PathwayConflict> },

    #[error("target size {target} exceeds the {available} record(s) available for group '{group}'")]
    SamplingPrecondition {
        group: String,
        target: usize,
        available: usize,
    },

    #[error("iteration {iteration} for group '{group}' produced an undefined value for {metric}")]
    UndefinedIteration {
        group: String,
        iteration: usize,
        metric: String,
    },

    #[error("iteration {iteration} for group '{group}' failed: {source}")]
    IterationFailed {
        group: String,
        iteration: usize,
        source: Box<DiversityError>,
    },

    #[error("group '{0}' has no pathway-classified compounds")]
    NoIdentifiedCompounds(String),

    #[error("data unavailable for group '{group}': {source}")]
    DataUnavailable {
        group: String,
        source: ProviderError,
    },

    #[error("distance provider returned {found} distances for {n} compounds in group '{group}', expected {expected}")]
    CondensedLength {
        group: String,
        n: usize,
        expected: usize,
        found: usize,
    },

    #[error("unknown {family} metric '{metric}'")]
    UnknownMetric { metric: String, family: &'static str },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

fn describe_conflicts(conflicts: &[PathwayConflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("'{}' {:?}", c.compound_id, c.labels))
        .collect::<Vec<_>>()
        .join("; ")
}

// Define command-line arguments using clap
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Chemical diversity of phytochemical compound groups", long_about = None)]
pub struct Args {
    /// Compound table (CSV, optionally .gz compressed)
    #[arg(short, long = "input")]
    pub input: String,

    /// Directory the result tables are written to
    #[arg(short, long = "output_dir", default_value = "phytodiv_output")]
    pub output_dir: String,

    /// Column holding the group label (taxon, genus, ...)
    #[arg(long = "group_column", default_value = "Genus")]
    pub group_column: String,

    /// Column holding the structure key (canonical SMILES)
    #[arg(long = "structure_column", default_value = "Standard_SMILES")]
    pub structure_column: String,

    /// Column identifying compounds for pathway bookkeeping (defaults to the structure column)
    #[arg(long = "compound_id_column")]
    pub compound_id_column: Option<String>,

    /// Column holding delimited pathway labels
    #[arg(long = "pathway_column", default_value = "NPclassif_pathway_results")]
    pub pathway_column: String,

    /// Column holding precomputed fingerprint on-bits; hashed SMILES shingles are used otherwise
    #[arg(long = "fingerprint_column")]
    pub fingerprint_column: Option<String>,

    /// Fail on groups with fewer than two unique compounds instead of skipping them
    #[arg(long = "strict")]
    pub strict: bool,

    /// Add min-max scaled columns to the FAD and pathway diversity tables
    #[arg(long = "minmax")]
    pub minmax: bool,

    /// Rarefy every group to this many compounds
    #[arg(long = "rarefy")]
    pub rarefy: Option<usize>,

    /// Resampling iterations per group
    #[arg(long = "iterations", default_value = "1000")]
    pub iterations: usize,

    /// Worker threads for rarefaction
    #[arg(short, long = "threads", default_value_t = default_workers())]
    pub threads: usize,

    /// Base seed for resampling
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    pub fn column_spec(&self) -> ColumnSpec {
        ColumnSpec {
            group: self.group_column.clone(),
            structure: self.structure_column.clone(),
            compound_id: self.compound_id_column.clone(),
            pathways: self.pathway_column.clone(),
            fingerprint: self.fingerprint_column.clone(),
        }
    }

    pub fn singleton_policy(&self) -> SingletonPolicy {
        if self.strict {
            SingletonPolicy::Strict
        } else {
            SingletonPolicy::FilterAndWarn
        }
    }

    pub fn rarefaction_config(&self) -> Option<RarefactionConfig> {
        self.rarefy.map(|target| {
            let config = RarefactionConfig::new(target)
                .with_iterations(self.iterations)
                .with_workers(self.threads);
            match self.seed {
                Some(seed) => config.with_seed(seed),
                None => config,
            }
        })
    }
}

/// Files written by a run.
#[derive(Debug, Default)]
pub struct RunOutputs {
    pub fad: PathBuf,
    pub pathway_diversity: PathBuf,
    pub group_pathway_stats: PathBuf,
    pub rarefied: Vec<PathBuf>,
}

/// Reads the table named in `args`, computes every result table, and writes
/// them to the output directory.
pub fn run(args: &Args) -> Result<RunOutputs, DiversityError> {
    set_stage(ProcessingStage::Loading);
    println!("{}", "Starting chemical diversity analysis...".green());
    let table = read_compound_table(Path::new(&args.input), &args.column_spec())?;
    let records = table.records;
    let groups = group_labels(&records);
    log(LogLevel::Info, &format!(
        "Loaded {} compound records in {} groups from {}",
        records.len(), groups.len(), args.input
    ));

    let mut provider = TanimotoDistances::new();
    if args.fingerprint_column.is_some() {
        for (key, fingerprint) in table.fingerprints {
            provider.insert(&key, fingerprint);
        }
    } else {
        for key in records.iter().filter_map(|r| r.structure_key.as_deref()) {
            provider.insert(key, shingle_fingerprint(key, SHINGLE_LENGTH, SHINGLE_BITS));
        }
    }

    let output_dir = Path::new(&args.output_dir);
    fs::create_dir_all(output_dir)?;
    let vocabulary = PathwayVocabulary::np_classifier();

    set_stage(ProcessingStage::PairwiseDistances);
    let spinner = create_spinner("Computing pairwise distance measures");
    let fad_results = calculate_fad_measures(&records, &provider, args.singleton_policy());
    spinner.finish_and_clear();
    let fad_results = fad_results?;

    set_stage(ProcessingStage::PathwayIndexing);
    let spinner = create_spinner("Indexing pathways");
    let indexed = index_pathways(&records, &vocabulary);
    spinner.finish_and_clear();
    let group_stats = aggregate_by_group(&indexed?, &vocabulary, true);
    let diversity = compute_pathway_diversity(&group_stats);
    let without_pathways = groups.len() - group_stats.len();
    if without_pathways > 0 {
        log(LogLevel::Warning, &format!(
            "{} group(s) have no pathway-classified compounds and get no pathway diversity",
            without_pathways
        ));
    }

    set_stage(ProcessingStage::Writing);
    let mut outputs = RunOutputs {
        fad: output_dir.join("fad.csv"),
        pathway_diversity: output_dir.join("pathway_diversity.csv"),
        group_pathway_stats: output_dir.join("group_pathway_stats.csv"),
        rarefied: Vec::new(),
    };
    write_fad_results(&outputs.fad, &args.group_column, &fad_results, args.minmax)?;
    write_pathway_diversity(&outputs.pathway_diversity, &args.group_column, &diversity, args.minmax)?;
    write_group_pathway_stats(&outputs.group_pathway_stats, &args.group_column, &group_stats)?;

    let mut failures = 0usize;
    if let Some(config) = args.rarefaction_config() {
        let (fad_report, pathway_report) =
            compile_rarefied_calculations(&records, &provider, &vocabulary, &config)?;
        set_stage(ProcessingStage::Writing);
        for report in [&fad_report, &pathway_report] {
            let means = output_dir.join(format!("rarefied_{}_means.csv", report.family));
            let stds = output_dir.join(format!("rarefied_{}_stds.csv", report.family));
            write_rarefaction_table(&means, &args.group_column, report, RarefiedValue::Mean)?;
            write_rarefaction_table(&stds, &args.group_column, report, RarefiedValue::Std)?;
            outputs.rarefied.push(means);
            outputs.rarefied.push(stds);
        }
        let failures_path = output_dir.join("rarefaction_failures.csv");
        failures = write_rarefaction_failures(&failures_path, &args.group_column, &[&fad_report, &pathway_report])?;
        outputs.rarefied.push(failures_path);
    }

    display_status_box(StatusBox {
        title: "Diversity Summary".to_string(),
        stats: vec![
            ("Compound records".to_string(), records.len().to_string()),
            ("Groups".to_string(), groups.len().to_string()),
            ("Groups with FAD".to_string(), fad_results.len().to_string()),
            ("Groups with pathway diversity".to_string(), diversity.len().to_string()),
            ("Rarefaction failures".to_string(), failures.to_string()),
            ("Output directory".to_string(), args.output_dir.clone()),
        ],
    });
    println!("{}", "Analysis complete.".green());
    Ok(outputs)
}

fn create_csv_writer(output_file: &Path) -> Result<csv::Writer<BufWriter<File>>, DiversityError> {
    let file = File::create(output_file)?;
    let writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    Ok(writer)
}

fn format_value(value: f64) -> String {
    // No "-0.000000" in output tables.
    let value = if value == 0.0 { 0.0 } else { value };
    format!("{:.6}", value)
}

/// Appends `<metric>_minmax` columns, each scaled over the whole column.
fn scaled_columns(columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    columns.iter().map(|c| min_max_scale(c)).collect()
}

fn write_metric_table<W: Write>(
    writer: &mut csv::Writer<W>,
    group_column: &str,
    metric_names: &[&str],
    groups: &[&str],
    columns: &[Vec<f64>],
    extra: &[(String, Vec<String>)],
    minmax: bool,
) -> Result<(), DiversityError> {
    let scaled = if minmax { scaled_columns(columns) } else { Vec::new() };
    let mut header: Vec<String> = vec![group_column.to_string()];
    header.extend(metric_names.iter().map(|m| m.to_string()));
    header.extend(extra.iter().map(|(name, _)| name.clone()));
    if minmax {
        header.extend(metric_names.iter().map(|m| format!("{}_minmax", m)));
    }
    writer.write_record(&header)?;

    for (row, group) in groups.iter().enumerate() {
        let mut record: Vec<String> = vec![group.to_string()];
        record.extend(columns.iter().map(|c| format_value(c[row])));
        record.extend(extra.iter().map(|(_, values)| values[row].clone()));
        record.extend(scaled.iter().map(|c| format_value(c[row])));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one row per group: FAD, MFAD, APWD, group_size.
pub fn write_fad_results(
    path: &Path,
    group_column: &str,
    results: &[FadResult],
    minmax: bool,
) -> Result<(), DiversityError> {
    let mut writer = create_csv_writer(path)?;
    let groups: Vec<&str> = results.iter().map(|r| r.group.as_str()).collect();
    let columns: Vec<Vec<f64>> = FAD_METRICS
        .iter()
        .map(|m| results.iter().map(|r| r.metric(m).unwrap_or(f64::NAN)).collect())
        .collect();
    let sizes: (String, Vec<String>) = ("group_size".to_string(), results.iter().map(|r| r.n.to_string()).collect());
    write_metric_table(&mut writer, group_column, &FAD_METRICS, &groups, &columns, &[sizes], minmax)?;
    log(LogLevel::Info, &format!("FAD results for {} groups written to {}", results.len(), path.display()));
    Ok(())
}

/// Writes one row per group: H, Hbc, G, J.
pub fn write_pathway_diversity(
    path: &Path,
    group_column: &str,
    results: &[PathwayDiversity],
    minmax: bool,
) -> Result<(), DiversityError> {
    let mut writer = create_csv_writer(path)?;
    let groups: Vec<&str> = results.iter().map(|r| r.group.as_str()).collect();
    let columns: Vec<Vec<f64>> = PATHWAY_DIVERSITY_METRICS
        .iter()
        .map(|m| results.iter().map(|r| r.metric(m).unwrap_or(f64::NAN)).collect())
        .collect();
    write_metric_table(&mut writer, group_column, &PATHWAY_DIVERSITY_METRICS, &groups, &columns, &[], minmax)?;
    log(LogLevel::Info, &format!(
        "Pathway diversity for {} groups written to {}",
        results.len(), path.display()
    ));
    Ok(())
}

/// Writes the per-group pathway statistics the diversity indices are built from.
pub fn write_group_pathway_stats(
    path: &Path,
    group_column: &str,
    stats: &[GroupPathwayStats],
) -> Result<(), DiversityError> {
    let mut writer = create_csv_writer(path)?;
    let mut header = vec![group_column.to_string(), "identified_compounds_count".to_string()];
    if let Some(first) = stats.first() {
        for p in &first.pathways {
            header.push(format!("identified_{}_count", p.pathway));
            header.push(format!("mean_identified_as_{}", p.pathway));
            header.push(format!("expected_mean_identified_as_{}", p.pathway));
            header.push(format!("norm_mean_identified_as_{}", p.pathway));
        }
    }
    writer.write_record(&header)?;
    for group in stats {
        let mut record = vec![group.group.clone(), group.member_count.to_string()];
        for p in &group.pathways {
            record.push(p.flagged.to_string());
            record.push(format_value(p.mean));
            record.push(format_value(p.expected_mean));
            record.push(format_value(p.normalized_mean));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RarefiedValue {
    Mean,
    Std,
}

/// Writes `<metric>_Rare` columns holding either means or standard deviations.
pub fn write_rarefaction_table(
    path: &Path,
    group_column: &str,
    report: &RarefactionReport,
    value: RarefiedValue,
) -> Result<(), DiversityError> {
    let mut writer = create_csv_writer(path)?;
    let mut header = vec![group_column.to_string()];
    header.extend(report.metrics.iter().map(|m| rarefied_column(m)));
    writer.write_record(&header)?;
    for result in &report.results {
        let mut record = vec![result.group.clone()];
        for metric in &report.metrics {
            let v = match value {
                RarefiedValue::Mean => result.mean(metric),
                RarefiedValue::Std => result.std(metric),
            };
            record.push(format_value(v.unwrap_or(f64::NAN)));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one row per failed (group, metric family). Returns the row count.
pub fn write_rarefaction_failures(
    path: &Path,
    group_column: &str,
    reports: &[&RarefactionReport],
) -> Result<usize, DiversityError> {
    let mut writer = create_csv_writer(path)?;
    writer.write_record([group_column, "metrics", "error"])?;
    let mut rows = 0;
    for report in reports {
        for failure in &report.failures {
            writer.write_record([
                failure.group.as_str(),
                failure.family,
                failure.error.to_string().as_str(),
            ])?;
            rows += 1;
        }
    }
    writer.flush()?;
    Ok(rows)
}
