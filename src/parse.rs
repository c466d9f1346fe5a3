use crate::distance::{parse_fingerprint_bits, Fingerprint};
use crate::process::DiversityError;
use crate::progress::{log, LogLevel};
use crate::records::CompoundRecord;

use flate2::read::MultiGzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Column names of a compound table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub group: String,
    pub structure: String,
    /// Falls back to the structure column when unset.
    pub compound_id: Option<String>,
    pub pathways: String,
    pub fingerprint: Option<String>,
}

impl Default for ColumnSpec {
    fn default() -> Self {
        ColumnSpec {
            group: "Genus".to_string(),
            structure: "Standard_SMILES".to_string(),
            compound_id: None,
            pathways: "NPclassif_pathway_results".to_string(),
            fingerprint: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct CompoundTable {
    pub records: Vec<CompoundRecord>,
    /// Fingerprints by structure key, first row wins.
    pub fingerprints: HashMap<String, Fingerprint>,
}

pub fn open_table_reader(path: &Path) -> Result<Box<dyn Read + Send>, DiversityError> {
    let file = File::open(path)?;
    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn read_compound_table(path: &Path, columns: &ColumnSpec) -> Result<CompoundTable, DiversityError> {
    let reader = open_table_reader(path)?;
    parse_compound_table(reader, columns)
}

fn cell(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
        .map(String::from)
}

/// Parses a CSV compound table.
///
/// The group and structure columns are required. A missing pathway column
/// leaves every compound unclassified. Rows without a group label are
/// skipped.
pub fn parse_compound_table<R: Read>(reader: R, columns: &ColumnSpec) -> Result<CompoundTable, DiversityError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let group_idx = position(columns.group.as_str())
        .ok_or_else(|| DiversityError::Parse(format!("group column '{}' not found", columns.group)))?;
    let structure_idx = position(columns.structure.as_str()).ok_or_else(|| {
        DiversityError::Parse(format!("structure column '{}' not found", columns.structure))
    })?;
    let compound_idx = match &columns.compound_id {
        Some(name) => Some(position(name.as_str()).ok_or_else(|| {
            DiversityError::Parse(format!("compound id column '{}' not found", name))
        })?),
        None => None,
    };
    let fingerprint_idx = match &columns.fingerprint {
        Some(name) => Some(position(name.as_str()).ok_or_else(|| {
            DiversityError::Parse(format!("fingerprint column '{}' not found", name))
        })?),
        None => None,
    };
    let pathway_idx = position(columns.pathways.as_str());
    if pathway_idx.is_none() {
        log(LogLevel::Warning, &format!(
            "Pathway column '{}' not found; all compounds are treated as unclassified",
            columns.pathways
        ));
    }

    let mut table = CompoundTable::default();
    let mut skipped = 0usize;
    for (line, row) in csv_reader.records().enumerate() {
        let row = row?;
        let group = match cell(row.get(group_idx)) {
            Some(group) => group,
            None => {
                skipped += 1;
                continue;
            }
        };
        let structure_key = cell(row.get(structure_idx));
        if let (Some(idx), Some(key)) = (fingerprint_idx, structure_key.as_ref()) {
            if let Some(raw) = cell(row.get(idx)) {
                let bits = parse_fingerprint_bits(&raw)
                    .map_err(|e| DiversityError::Parse(format!("row {}: {}", line + 2, e)))?;
                table.fingerprints.entry(key.clone()).or_insert(bits);
            }
        }
        table.records.push(CompoundRecord {
            structure_key,
            group,
            compound_id: compound_idx.and_then(|idx| cell(row.get(idx))),
            pathway_labels: pathway_idx.and_then(|idx| cell(row.get(idx))),
        });
    }
    if skipped > 0 {
        log(LogLevel::Warning, &format!("Skipped {} row(s) without a group label", skipped));
    }
    Ok(table)
}
