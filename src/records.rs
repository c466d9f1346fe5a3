use crate::progress::{log, LogLevel};
use std::collections::{HashMap, HashSet};

/// One row of a compound-group table.
///
/// `structure_key` is a canonical SMILES (or any key the distance provider
/// understands). `compound_id` is the identity used for pathway bookkeeping
/// and falls back to the structure key when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundRecord {
    pub structure_key: Option<String>,
    pub group: String,
    pub compound_id: Option<String>,
    pub pathway_labels: Option<String>,
}

impl CompoundRecord {
    pub fn new(structure_key: &str, group: &str) -> Self {
        CompoundRecord {
            structure_key: Some(structure_key.to_string()),
            group: group.to_string(),
            compound_id: None,
            pathway_labels: None,
        }
    }

    pub fn with_compound_id(mut self, compound_id: &str) -> Self {
        self.compound_id = Some(compound_id.to_string());
        self
    }

    pub fn with_pathways(mut self, labels: &str) -> Self {
        self.pathway_labels = Some(labels.to_string());
        self
    }

    /// Identity used for pathway indexing.
    pub fn identity(&self) -> Option<&str> {
        self.compound_id
            .as_deref()
            .or(self.structure_key.as_deref())
    }
}

/// Distinct group labels in order of first appearance.
pub fn group_labels(records: &[CompoundRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.group.as_str()))
        .map(|r| r.group.clone())
        .collect()
}

/// Splits a table into per-group slices, groups ordered by first appearance.
pub fn group_records(records: &[CompoundRecord]) -> Vec<(String, Vec<&CompoundRecord>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&CompoundRecord>)> = Vec::new();
    for record in records {
        let slot = *index.entry(record.group.as_str()).or_insert_with(|| {
            groups.push((record.group.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(record);
    }
    groups
}

/// Records of a single group, in table order.
pub fn records_for_group<'a>(records: &'a [CompoundRecord], group: &str) -> Vec<&'a CompoundRecord> {
    records.iter().filter(|r| r.group == group).collect()
}

/// Records left after collapsing shared structure keys, with what was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureDedup<'a> {
    pub kept: Vec<&'a CompoundRecord>,
    pub duplicates: usize,
    pub missing: usize,
}

/// Collapses records sharing a structure key without logging anything.
///
/// The first occurrence of each key is kept. Records without a structure key
/// cannot be placed in distance space and are dropped.
pub fn partition_by_structure<'a>(records: &[&'a CompoundRecord]) -> StructureDedup<'a> {
    let mut seen = HashSet::new();
    let mut dedup = StructureDedup {
        kept: Vec::with_capacity(records.len()),
        duplicates: 0,
        missing: 0,
    };
    for &record in records {
        match record.structure_key.as_deref() {
            None => dedup.missing += 1,
            Some(key) if seen.insert(key) => dedup.kept.push(record),
            Some(_) => dedup.duplicates += 1,
        }
    }
    dedup
}

/// [`partition_by_structure`], reporting removals as warnings.
pub fn dedup_by_structure<'a>(group: &str, records: &[&'a CompoundRecord]) -> Vec<&'a CompoundRecord> {
    let dedup = partition_by_structure(records);
    if dedup.duplicates > 0 {
        log(LogLevel::Warning, &format!(
            "Group {}: dropped {} duplicate structure record(s), keeping first occurrences",
            group, dedup.duplicates
        ));
    }
    if dedup.missing > 0 {
        log(LogLevel::Warning, &format!(
            "Group {}: dropped {} record(s) without a structure key",
            group, dedup.missing
        ));
    }
    dedup.kept
}
