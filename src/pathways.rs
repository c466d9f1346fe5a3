//! Pathway abundance indexing.
//!
//! Compounds carry a delimited string of biosynthetic pathway labels. This
//! module turns those into one binary flag per pathway of a
//! [`PathwayVocabulary`], checks that every compound is classified the same
//! way wherever it appears, and aggregates flags into per-group abundance
//! statistics with a shrinkage-smoothed mean.

use crate::process::DiversityError;
use crate::progress::{log, LogLevel};
use crate::records::CompoundRecord;
use std::collections::{BTreeMap, HashMap, HashSet};

/// The seven NPClassifier pathway categories.
pub const NP_CLASSIFIER_PATHWAYS: [&str; 7] = [
    "Terpenoids",
    "Fatty acids",
    "Polyketides",
    "Carbohydrates",
    "Amino acids and Peptides",
    "Shikimates and Phenylpropanoids",
    "Alkaloids",
];

/// Separator NPClassifier uses when a compound has several pathways.
pub const NP_CLASSIFIER_DELIMITER: char = ':';

/// Sample size at which a group's own mean gets half the weight.
pub const HALF_TRUST_SAMPLE_SIZE: f64 = 20.0;
/// Steepness of the transition between prior and group mean.
pub const SMOOTHING_STRENGTH: f64 = 10.0;

/// The set of pathway categories compounds are indexed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathwayVocabulary {
    names: Vec<String>,
    delimiter: char,
}

impl PathwayVocabulary {
    pub fn new<I, S>(names: I, delimiter: char) -> Result<Self, DiversityError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(DiversityError::InvalidParameter(
                "pathway vocabulary must name at least one pathway".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &names {
            if name.trim().is_empty() || name.contains(delimiter) {
                return Err(DiversityError::InvalidParameter(format!(
                    "invalid pathway name '{}'",
                    name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(DiversityError::InvalidParameter(format!(
                    "pathway '{}' listed twice",
                    name
                )));
            }
        }
        Ok(PathwayVocabulary { names, delimiter })
    }

    pub fn np_classifier() -> Self {
        PathwayVocabulary {
            names: NP_CLASSIFIER_PATHWAYS.iter().map(|s| s.to_string()).collect(),
            delimiter: NP_CLASSIFIER_DELIMITER,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// One flag per pathway, set when the pathway appears in `labels`.
    /// Labels outside the vocabulary are ignored.
    pub fn flags_for(&self, labels: Option<&str>) -> Vec<bool> {
        let present: HashSet<&str> = labels
            .map(|raw| {
                raw.split(self.delimiter)
                    .map(str::trim)
                    .filter(|label| !label.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        self.names
            .iter()
            .map(|name| present.contains(name.as_str()))
            .collect()
    }
}

impl Default for PathwayVocabulary {
    fn default() -> Self {
        Self::np_classifier()
    }
}

/// A compound identity that was given different pathway labels on different rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathwayConflict {
    pub compound_id: String,
    /// Distinct label strings seen for the compound, in table order.
    pub labels: Vec<String>,
}

/// A compound record with its binary pathway assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedCompound<'a> {
    pub record: &'a CompoundRecord,
    pub flags: Vec<bool>,
}

impl<'a> IndexedCompound<'a> {
    pub fn pathway_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }

    /// Has at least one pathway from the vocabulary.
    pub fn is_identified(&self) -> bool {
        self.flags.iter().any(|&f| f)
    }
}

/// Assigns binary pathway flags to every record.
///
/// The same compound identity must receive the same flags on every row it
/// appears in; otherwise the classification upstream is ambiguous and a
/// [`DiversityError::DataConsistency`] error lists every conflicting
/// compound with its label strings.
pub fn index_pathways<'a, I>(records: I, vocabulary: &PathwayVocabulary) -> Result<Vec<IndexedCompound<'a>>, DiversityError>
where
    I: IntoIterator<Item = &'a CompoundRecord>,
{
    let mut first_seen: HashMap<&'a str, (Vec<bool>, &'a str)> = HashMap::new();
    let mut conflicts: BTreeMap<&'a str, Vec<String>> = BTreeMap::new();
    let mut indexed = Vec::new();

    for record in records {
        let labels = record.pathway_labels.as_deref();
        let flags = vocabulary.flags_for(labels);
        if let Some(id) = record.identity() {
            match first_seen.get(id) {
                None => {
                    first_seen.insert(id, (flags.clone(), labels.unwrap_or("")));
                }
                Some((known, known_labels)) if *known != flags => {
                    let seen = conflicts
                        .entry(id)
                        .or_insert_with(|| vec![known_labels.to_string()]);
                    let label = labels.unwrap_or("").to_string();
                    if !seen.contains(&label) {
                        seen.push(label);
                    }
                }
                Some(_) => {}
            }
        }
        indexed.push(IndexedCompound { record, flags });
    }

    if !conflicts.is_empty() {
        log(LogLevel::Error, &format!(
            "{} compound(s) have conflicting pathway assignments",
            conflicts.len()
        ));
        return Err(DiversityError::DataConsistency {
            conflicts: conflicts
                .into_iter()
                .map(|(compound_id, labels)| PathwayConflict {
                    compound_id: compound_id.to_string(),
                    labels,
                })
                .collect(),
        });
    }
    Ok(indexed)
}

/// Abundance of one pathway within one group.
#[derive(Debug, Clone, PartialEq)]
pub struct PathwayStats {
    pub pathway: String,
    /// Rows of the group flagged for this pathway.
    pub flagged: usize,
    /// `flagged / member_count`.
    pub mean: f64,
    /// Population mean of the pathway flag over all groups. Only rows that
    /// reach the group means count: classified compounds, one per identity
    /// and group, expanded to one row per pathway when aggregating over the
    /// distinct view.
    pub expected_mean: f64,
    /// `mean` shrunk towards `expected_mean` for small groups.
    pub normalized_mean: f64,
}

/// Per-group pathway statistics, one entry per vocabulary pathway in order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPathwayStats {
    pub group: String,
    pub member_count: usize,
    pub pathways: Vec<PathwayStats>,
}

impl GroupPathwayStats {
    /// Number of pathways with at least one flagged row.
    pub fn richness(&self) -> usize {
        self.pathways.iter().filter(|p| p.flagged > 0).count()
    }

    /// Number of pathways flagged exactly once.
    pub fn singletons(&self) -> usize {
        self.pathways.iter().filter(|p| p.flagged == 1).count()
    }
}

/// Logistic blending weight for a group of `n` rows.
pub fn shrinkage_weight(n: usize) -> f64 {
    1.0 / (1.0 + ((HALF_TRUST_SAMPLE_SIZE - n as f64) / SMOOTHING_STRENGTH).exp())
}

/// Blends a group mean with the population mean according to group size.
pub fn shrink_mean(group_mean: f64, population_mean: f64, n: usize) -> f64 {
    let weight = shrinkage_weight(n);
    weight * group_mean + (1.0 - weight) * population_mean
}

/// A row of the pathway view: group, compound identity, and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct PathwayRow<'a> {
    pub group: &'a str,
    pub identity: Option<&'a str>,
    pub flags: Vec<bool>,
}

/// Expands each compound with k > 1 pathways into k rows with one flag each.
///
/// The result is a multiset for counting only; the same identity appears
/// several times.
pub fn distinct_pathway_view<'a>(indexed: &[IndexedCompound<'a>]) -> Vec<PathwayRow<'a>> {
    let mut rows = Vec::with_capacity(indexed.len());
    for compound in indexed {
        for (i, _) in compound.flags.iter().enumerate().filter(|(_, f)| **f) {
            let mut flags = vec![false; compound.flags.len()];
            flags[i] = true;
            rows.push(PathwayRow {
                group: compound.record.group.as_str(),
                identity: compound.record.identity(),
                flags,
            });
        }
    }
    rows
}

/// Aggregates indexed compounds into per-group pathway statistics.
///
/// Unclassified compounds are left out, and a compound listed twice in the
/// same group is counted once, with a warning per affected group. With
/// `distinct`, multi-pathway compounds are expanded first (see
/// [`distinct_pathway_view`]). Groups come out in order of first appearance.
pub fn aggregate_by_group(
    indexed: &[IndexedCompound<'_>],
    vocabulary: &PathwayVocabulary,
    distinct: bool,
) -> Vec<GroupPathwayStats> {
    aggregate(indexed, vocabulary, distinct, LogLevel::Warning)
}

/// [`aggregate_by_group`] with duplicate removals logged at debug level,
/// for repeated aggregation over subsamples of an already reported group.
pub fn aggregate_by_group_quietly(
    indexed: &[IndexedCompound<'_>],
    vocabulary: &PathwayVocabulary,
    distinct: bool,
) -> Vec<GroupPathwayStats> {
    aggregate(indexed, vocabulary, distinct, LogLevel::Debug)
}

fn aggregate(
    indexed: &[IndexedCompound<'_>],
    vocabulary: &PathwayVocabulary,
    distinct: bool,
    duplicate_level: LogLevel,
) -> Vec<GroupPathwayStats> {
    let mut seen = HashSet::new();
    let mut duplicates: BTreeMap<&str, usize> = BTreeMap::new();
    let mut unclassified = 0usize;
    let mut identified: Vec<IndexedCompound<'_>> = Vec::with_capacity(indexed.len());
    for compound in indexed {
        if !compound.is_identified() {
            unclassified += 1;
            continue;
        }
        let group = compound.record.group.as_str();
        if let Some(id) = compound.record.identity() {
            if !seen.insert((group, id)) {
                *duplicates.entry(group).or_insert(0) += 1;
                continue;
            }
        }
        identified.push(compound.clone());
    }
    if unclassified > 0 {
        log(LogLevel::Debug, &format!(
            "{} compound(s) without a pathway classification left out of pathway statistics",
            unclassified
        ));
    }
    for (group, count) in &duplicates {
        log(duplicate_level, &format!(
            "Group {}: dropped {} duplicate compound record(s) before pathway aggregation",
            group, count
        ));
    }

    let rows: Vec<PathwayRow<'_>> = if distinct {
        distinct_pathway_view(&identified)
    } else {
        identified
            .iter()
            .map(|c| PathwayRow {
                group: c.record.group.as_str(),
                identity: c.record.identity(),
                flags: c.flags.clone(),
            })
            .collect()
    };
    if rows.is_empty() {
        return Vec::new();
    }

    let n_pathways = vocabulary.len();
    let population_means: Vec<f64> = (0..n_pathways)
        .map(|p| rows.iter().filter(|r| r.flags[p]).count() as f64 / rows.len() as f64)
        .collect();

    let mut order: Vec<&str> = Vec::new();
    let mut tallies: HashMap<&str, (usize, Vec<usize>)> = HashMap::new();
    for row in &rows {
        let tally = tallies.entry(row.group).or_insert_with(|| {
            order.push(row.group);
            (0, vec![0; n_pathways])
        });
        tally.0 += 1;
        for (count, &flag) in tally.1.iter_mut().zip(&row.flags) {
            if flag {
                *count += 1;
            }
        }
    }

    let stats: Vec<GroupPathwayStats> = order
        .iter()
        .map(|group| {
            let (member_count, flagged) = &tallies[group];
            let pathways = vocabulary
                .names()
                .iter()
                .zip(flagged)
                .zip(&population_means)
                .map(|((name, &flagged), &expected_mean)| {
                    let mean = flagged as f64 / *member_count as f64;
                    PathwayStats {
                        pathway: name.clone(),
                        flagged,
                        mean,
                        expected_mean,
                        normalized_mean: shrink_mean(mean, expected_mean, *member_count),
                    }
                })
                .collect();
            GroupPathwayStats {
                group: group.to_string(),
                member_count: *member_count,
                pathways,
            }
        })
        .collect();

    let distinct_groups: HashSet<&str> = rows.iter().map(|r| r.group).collect();
    assert_eq!(stats.len(), distinct_groups.len(), "one statistics row per group");
    stats
}

/// Indexes and aggregates in one step.
pub fn group_pathway_stats<'a, I>(
    records: I,
    vocabulary: &PathwayVocabulary,
    distinct: bool,
) -> Result<Vec<GroupPathwayStats>, DiversityError>
where
    I: IntoIterator<Item = &'a CompoundRecord>,
{
    let indexed = index_pathways(records, vocabulary)?;
    Ok(aggregate_by_group(&indexed, vocabulary, distinct))
}
