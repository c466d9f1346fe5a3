//! Bootstrap rarefaction of diversity metrics.
//!
//! Each group is resampled without replacement to a fixed size many times.
//! A [`DiversityMetric`] is evaluated on every subsample, and the mean and
//! sample standard deviation of each requested metric are reported. Groups
//! are independent, so each one is a single task on a bounded worker pool.
//! Inside a task the iterations run one after another.

use crate::distance::{CachedDistances, DistanceProvider};
use crate::diversity::{compute_group_diversity, PATHWAY_DIVERSITY_METRICS};
use crate::fad::{fad_for_unique, FAD_METRICS};
use crate::pathways::{
    aggregate_by_group, aggregate_by_group_quietly, index_pathways, PathwayVocabulary,
};
use crate::process::DiversityError;
use crate::progress::{create_group_progress, log, set_stage, LogLevel, ProcessingStage};
use crate::records::{
    dedup_by_structure, group_records, partition_by_structure, records_for_group, CompoundRecord,
};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Named metric values produced by one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub group: String,
    pub values: Vec<(&'static str, f64)>,
}

impl MetricRecord {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(metric, _)| *metric == name)
            .map(|&(_, value)| value)
    }
}

/// Evaluates a metric on subsamples of one group.
pub trait GroupEvaluator {
    fn evaluate(&self, group: &str, sample: &[&CompoundRecord]) -> Result<MetricRecord, DiversityError>;
}

/// A diversity metric that can be rarefied.
///
/// `prepare` sees the whole group once, before any resampling, and is where
/// anything expensive or external (distance lookups, consistency checks)
/// happens. The returned evaluator is then called once per iteration.
pub trait DiversityMetric: Sync {
    /// Label for logs and failure reports.
    fn family(&self) -> &'static str;

    fn metric_names(&self) -> &'static [&'static str];

    fn prepare<'m>(
        &'m self,
        group: &str,
        records: &[&CompoundRecord],
    ) -> Result<Box<dyn GroupEvaluator + 'm>, DiversityError>;
}

/// FAD / MFAD / APWD strategy.
pub struct FadMetric<'p> {
    provider: &'p dyn DistanceProvider,
}

impl<'p> FadMetric<'p> {
    pub fn new(provider: &'p dyn DistanceProvider) -> Self {
        FadMetric { provider }
    }
}

struct FadEvaluator {
    distances: CachedDistances,
}

impl GroupEvaluator for FadEvaluator {
    fn evaluate(&self, group: &str, sample: &[&CompoundRecord]) -> Result<MetricRecord, DiversityError> {
        let unique = partition_by_structure(sample).kept;
        let result = fad_for_unique(group, &unique, &self.distances)?;
        Ok(MetricRecord {
            group: result.group,
            values: vec![("FAD", result.fad), ("MFAD", result.mfad), ("APWD", result.apwd)],
        })
    }
}

impl<'p> DiversityMetric for FadMetric<'p> {
    fn family(&self) -> &'static str {
        "fad"
    }

    fn metric_names(&self) -> &'static [&'static str] {
        &FAD_METRICS
    }

    fn prepare<'m>(
        &'m self,
        group: &str,
        records: &[&CompoundRecord],
    ) -> Result<Box<dyn GroupEvaluator + 'm>, DiversityError> {
        // Removals are reported here once; iterations dedup quietly.
        let keys: Vec<&str> = dedup_by_structure(group, records)
            .into_iter()
            .filter_map(|r| r.structure_key.as_deref())
            .collect();
        let distances = CachedDistances::fetch(self.provider, &keys).map_err(|source| {
            DiversityError::DataUnavailable {
                group: group.to_string(),
                source,
            }
        })?;
        Ok(Box::new(FadEvaluator { distances }))
    }
}

/// H / Hbc / G / J strategy over the distinct pathway view.
pub struct PathwayDiversityMetric {
    vocabulary: PathwayVocabulary,
}

impl PathwayDiversityMetric {
    pub fn new(vocabulary: PathwayVocabulary) -> Self {
        PathwayDiversityMetric { vocabulary }
    }
}

struct PathwayEvaluator<'m> {
    vocabulary: &'m PathwayVocabulary,
}

impl<'m> GroupEvaluator for PathwayEvaluator<'m> {
    fn evaluate(&self, group: &str, sample: &[&CompoundRecord]) -> Result<MetricRecord, DiversityError> {
        let indexed = index_pathways(sample.iter().copied(), self.vocabulary)?;
        let stats = aggregate_by_group_quietly(&indexed, self.vocabulary, true);
        let group_stats = stats
            .iter()
            .find(|s| s.group == group)
            .ok_or_else(|| DiversityError::NoIdentifiedCompounds(group.to_string()))?;
        let diversity = compute_group_diversity(group_stats);
        Ok(MetricRecord {
            group: diversity.group,
            values: vec![
                ("H", diversity.h),
                ("Hbc", diversity.hbc),
                ("G", diversity.g),
                ("J", diversity.j),
            ],
        })
    }
}

impl DiversityMetric for PathwayDiversityMetric {
    fn family(&self) -> &'static str {
        "pathway"
    }

    fn metric_names(&self) -> &'static [&'static str] {
        &PATHWAY_DIVERSITY_METRICS
    }

    fn prepare<'m>(
        &'m self,
        _group: &str,
        records: &[&CompoundRecord],
    ) -> Result<Box<dyn GroupEvaluator + 'm>, DiversityError> {
        // Conflicts and duplicate compounds are reported once, on the whole
        // group, before resampling hides them.
        let indexed = index_pathways(records.iter().copied(), &self.vocabulary)?;
        aggregate_by_group(&indexed, &self.vocabulary, true);
        Ok(Box::new(PathwayEvaluator {
            vocabulary: &self.vocabulary,
        }))
    }
}

/// Mean and sample standard deviation of one metric over all iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct RarefiedMetric {
    pub metric: String,
    pub mean: f64,
    pub std: f64,
}

/// Rarefaction outcome for one group.
#[derive(Debug, Clone, PartialEq)]
pub struct RarefiedGroup {
    pub group: String,
    pub group_size: usize,
    pub target_size: usize,
    pub iterations: usize,
    pub metrics: Vec<RarefiedMetric>,
}

impl RarefiedGroup {
    pub fn mean(&self, metric: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.metric == metric).map(|m| m.mean)
    }

    pub fn std(&self, metric: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.metric == metric).map(|m| m.std)
    }
}

/// Output column for the rarefied version of a metric.
pub fn rarefied_column(metric: &str) -> String {
    format!("{}_Rare", metric)
}

/// Arithmetic mean and sample (n - 1) standard deviation.
/// The deviation is NaN for fewer than two values.
pub fn mean_and_sample_std(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, f64::NAN);
    }
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (mean, (ss / (n - 1) as f64).sqrt())
}

fn check_request(metric: &dyn DiversityMetric, metrics: &[&str], iterations: usize) -> Result<(), DiversityError> {
    if iterations == 0 {
        return Err(DiversityError::InvalidParameter(
            "rarefaction needs at least one iteration".to_string(),
        ));
    }
    for name in metrics {
        if !metric.metric_names().iter().any(|known| known == name) {
            return Err(DiversityError::UnknownMetric {
                metric: name.to_string(),
                family: metric.family(),
            });
        }
    }
    Ok(())
}

/// Rarefies one group given its records.
///
/// Every iteration draws `target_size` records uniformly without
/// replacement. A failed evaluation, or a NaN in any requested metric,
/// stops the group with an error naming the iteration.
pub fn rarefy_members<R: Rng + ?Sized>(
    group: &str,
    members: &[&CompoundRecord],
    target_size: usize,
    metrics: &[&str],
    metric: &dyn DiversityMetric,
    iterations: usize,
    rng: &mut R,
) -> Result<RarefiedGroup, DiversityError> {
    check_request(metric, metrics, iterations)?;
    if target_size > members.len() {
        return Err(DiversityError::SamplingPrecondition {
            group: group.to_string(),
            target: target_size,
            available: members.len(),
        });
    }

    let evaluator = metric.prepare(group, members)?;
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(iterations); metrics.len()];
    let mut sample: Vec<&CompoundRecord> = Vec::with_capacity(target_size);

    for iteration in 0..iterations {
        sample.clear();
        sample.extend(
            rand::seq::index::sample(&mut *rng, members.len(), target_size)
                .iter()
                .map(|i| members[i]),
        );
        let record = evaluator
            .evaluate(group, &sample)
            .map_err(|e| DiversityError::IterationFailed {
                group: group.to_string(),
                iteration,
                source: Box::new(e),
            })?;
        for (column, name) in columns.iter_mut().zip(metrics) {
            let value = record.get(name).unwrap_or(f64::NAN);
            if value.is_nan() {
                return Err(DiversityError::UndefinedIteration {
                    group: group.to_string(),
                    iteration,
                    metric: name.to_string(),
                });
            }
            column.push(value);
        }
    }

    let rarefied = metrics
        .iter()
        .zip(&columns)
        .map(|(name, values)| {
            let (mean, std) = mean_and_sample_std(values);
            RarefiedMetric {
                metric: name.to_string(),
                mean,
                std,
            }
        })
        .collect();

    Ok(RarefiedGroup {
        group: group.to_string(),
        group_size: members.len(),
        target_size,
        iterations,
        metrics: rarefied,
    })
}

/// Rarefies the records of `group` within a full table.
pub fn rarefy_group<R: Rng + ?Sized>(
    records: &[CompoundRecord],
    group: &str,
    target_size: usize,
    metrics: &[&str],
    metric: &dyn DiversityMetric,
    iterations: usize,
    rng: &mut R,
) -> Result<RarefiedGroup, DiversityError> {
    let members = records_for_group(records, group);
    rarefy_members(group, &members, target_size, metrics, metric, iterations, rng)
}

/// Parameters for a batch of rarefaction tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct RarefactionConfig {
    pub target_size: usize,
    pub iterations: usize,
    pub workers: usize,
    /// Base seed. Each group derives its own stream from this and its label.
    pub seed: Option<u64>,
}

impl RarefactionConfig {
    pub fn new(target_size: usize) -> Self {
        RarefactionConfig {
            target_size,
            iterations: 1000,
            workers: default_workers(),
            seed: None,
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// One less than the available parallelism, at least one.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Seed for a group's random stream, stable across runs and schedules.
pub fn group_seed(base: u64, group: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    base.hash(&mut hasher);
    group.hash(&mut hasher);
    hasher.finish()
}

/// A group whose rarefaction did not complete.
#[derive(Debug)]
pub struct GroupFailure {
    pub group: String,
    pub family: &'static str,
    pub error: DiversityError,
}

/// Results of one metric family across all groups, ordered by group label.
#[derive(Debug)]
pub struct RarefactionReport {
    pub family: &'static str,
    pub metrics: Vec<String>,
    pub results: Vec<RarefiedGroup>,
    pub failures: Vec<GroupFailure>,
}

impl RarefactionReport {
    pub fn group(&self, group: &str) -> Option<&RarefiedGroup> {
        self.results.iter().find(|r| r.group == group)
    }

    pub fn failure(&self, group: &str) -> Option<&GroupFailure> {
        self.failures.iter().find(|f| f.group == group)
    }
}

/// A metric family and the subset of its metrics to rarefy.
pub struct MetricRequest<'a> {
    pub metric: &'a dyn DiversityMetric,
    pub metrics: Vec<&'a str>,
}

impl<'a> MetricRequest<'a> {
    /// Requests every metric the family produces.
    pub fn all(metric: &'a dyn DiversityMetric) -> Self {
        MetricRequest {
            metric,
            metrics: metric.metric_names().to_vec(),
        }
    }
}

type GroupOutcome = (String, Vec<Result<RarefiedGroup, DiversityError>>);

/// Rarefies every group for every requested metric family.
///
/// One task per group runs on a pool of `config.workers` threads; within a
/// task the families run in request order on the group's own random stream.
/// A failing group is recorded in the report's `failures` and does not
/// affect other groups. Only invalid parameters fail the whole batch.
pub fn rarefy_groups_multi(
    records: &[CompoundRecord],
    requests: &[MetricRequest<'_>],
    config: &RarefactionConfig,
) -> Result<Vec<RarefactionReport>, DiversityError> {
    for request in requests {
        check_request(request.metric, &request.metrics, config.iterations)?;
    }
    set_stage(ProcessingStage::Rarefaction);

    let groups = group_records(records);
    let base_seed = config.seed.unwrap_or_else(rand::random);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()
        .map_err(|e| DiversityError::WorkerPool(e.to_string()))?;

    log(LogLevel::Info, &format!(
        "Rarefying {} group(s) to {} compounds, {} iterations, {} worker(s)",
        groups.len(), config.target_size, config.iterations, config.workers.max(1)
    ));

    let (sender, receiver) = crossbeam_channel::unbounded::<GroupOutcome>();
    let progress = create_group_progress(groups.len(), "rarefying");
    let mut outcomes: Vec<GroupOutcome> = Vec::with_capacity(groups.len());

    std::thread::scope(|threads| {
        let groups = &groups;
        threads.spawn(move || {
            pool.scope(|scope| {
                for (group, members) in groups {
                    let sender = sender.clone();
                    scope.spawn(move |_| {
                        let mut rng = StdRng::seed_from_u64(group_seed(base_seed, group));
                        let results: Vec<Result<RarefiedGroup, DiversityError>> = requests
                            .iter()
                            .map(|request| {
                                rarefy_members(
                                    group,
                                    members,
                                    config.target_size,
                                    &request.metrics,
                                    request.metric,
                                    config.iterations,
                                    &mut rng,
                                )
                            })
                            .collect();
                        // The receiver outlives every task.
                        let _ = sender.send((group.clone(), results));
                    });
                }
            });
        });

        for outcome in receiver.iter() {
            progress.inc(1);
            outcomes.push(outcome);
        }
    });
    progress.finish_with_message("rarefaction complete");
    assert_eq!(outcomes.len(), groups.len(), "every group reports exactly once");

    let mut reports: Vec<RarefactionReport> = requests
        .iter()
        .map(|request| RarefactionReport {
            family: request.metric.family(),
            metrics: request.metrics.iter().map(|m| m.to_string()).collect(),
            results: Vec::new(),
            failures: Vec::new(),
        })
        .collect();

    for (group, results) in outcomes {
        for (report, result) in reports.iter_mut().zip(results) {
            match result {
                Ok(rarefied) => report.results.push(rarefied),
                Err(error) => {
                    log(LogLevel::Warning, &format!(
                        "Rarefaction of {} metrics failed for group {}: {}",
                        report.family, group, error
                    ));
                    report.failures.push(GroupFailure {
                        group: group.clone(),
                        family: report.family,
                        error,
                    });
                }
            }
        }
    }
    for report in &mut reports {
        report.results.sort_by(|a, b| a.group.cmp(&b.group));
        report.failures.sort_by(|a, b| a.group.cmp(&b.group));
    }
    Ok(reports)
}

/// Rarefies every group for a single metric family.
pub fn rarefy_groups(
    records: &[CompoundRecord],
    metric: &dyn DiversityMetric,
    metrics: &[&str],
    config: &RarefactionConfig,
) -> Result<RarefactionReport, DiversityError> {
    let request = MetricRequest {
        metric,
        metrics: metrics.to_vec(),
    };
    let mut reports = rarefy_groups_multi(records, std::slice::from_ref(&request), config)?;
    reports
        .pop()
        .ok_or_else(|| DiversityError::InvalidParameter("no report produced".to_string()))
}

/// Rarefied FAD and pathway diversity for every group, both computed in
/// the same per-group task.
pub fn compile_rarefied_calculations(
    records: &[CompoundRecord],
    provider: &dyn DistanceProvider,
    vocabulary: &PathwayVocabulary,
    config: &RarefactionConfig,
) -> Result<(RarefactionReport, RarefactionReport), DiversityError> {
    let fad = FadMetric::new(provider);
    let pathway = PathwayDiversityMetric::new(vocabulary.clone());
    let requests = [MetricRequest::all(&fad), MetricRequest::all(&pathway)];
    let mut reports = rarefy_groups_multi(records, &requests, config)?.into_iter();
    match (reports.next(), reports.next()) {
        (Some(fad_report), Some(pathway_report)) => Ok((fad_report, pathway_report)),
        _ => Err(DiversityError::InvalidParameter(
            "expected FAD and pathway reports".to_string(),
        )),
    }
}
