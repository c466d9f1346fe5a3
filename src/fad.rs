use crate::distance::{condensed_len, DistanceProvider};
use crate::process::DiversityError;
use crate::progress::{log, LogLevel};
use crate::records::{dedup_by_structure, group_records, CompoundRecord};

/// What to do with groups that have fewer than two unique structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SingletonPolicy {
    /// Fail the whole call with [`DiversityError::Underdetermined`].
    #[default]
    Strict,
    /// Leave the group out of the result set and log a warning.
    FilterAndWarn,
}

/// Functional attribute diversity of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct FadResult {
    pub group: String,
    /// Sum of distances over all ordered pairs.
    pub fad: f64,
    /// FAD per compound.
    pub mfad: f64,
    /// FAD per ordered pair.
    pub apwd: f64,
    /// Deduplicated group size.
    pub n: usize,
}

impl FadResult {
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "FAD" => Some(self.fad),
            "MFAD" => Some(self.mfad),
            "APWD" => Some(self.apwd),
            "N" => Some(self.n as f64),
            _ => None,
        }
    }
}

pub const FAD_METRICS: [&str; 3] = ["FAD", "MFAD", "APWD"];

/// FAD, MFAD and APWD from a condensed distance vector over `n` compounds.
///
/// The condensed vector holds each unordered pair once, so FAD doubles its
/// sum to count both halves of the symmetric matrix.
pub fn fad_from_condensed(group: &str, distances: &[f64], n: usize) -> Result<FadResult, DiversityError> {
    if n < 2 {
        return Err(DiversityError::Underdetermined {
            group: group.to_string(),
            size: n,
        });
    }
    if distances.len() != condensed_len(n) {
        return Err(DiversityError::CondensedLength {
            group: group.to_string(),
            n,
            expected: condensed_len(n),
            found: distances.len(),
        });
    }
    let ordered_pairs = n * n - n;
    assert_eq!(ordered_pairs, 2 * distances.len(), "ordered pair count mismatch");

    let fad = 2.0 * distances.iter().sum::<f64>();
    Ok(FadResult {
        group: group.to_string(),
        fad,
        mfad: fad / n as f64,
        apwd: fad / ordered_pairs as f64,
        n,
    })
}

/// FAD measures for the records of a single group.
///
/// Duplicate structures are collapsed first, with a warning; fewer than two
/// survivors is an [`DiversityError::Underdetermined`] error.
pub fn compute_fad(
    group: &str,
    records: &[&CompoundRecord],
    provider: &dyn DistanceProvider,
) -> Result<FadResult, DiversityError> {
    let unique = dedup_by_structure(group, records);
    fad_for_unique(group, &unique, provider)
}

/// FAD measures for records already reduced to distinct structure keys.
pub fn fad_for_unique(
    group: &str,
    unique: &[&CompoundRecord],
    provider: &dyn DistanceProvider,
) -> Result<FadResult, DiversityError> {
    if unique.len() < 2 {
        return Err(DiversityError::Underdetermined {
            group: group.to_string(),
            size: unique.len(),
        });
    }
    let keys: Vec<&str> = unique
        .iter()
        .filter_map(|r| r.structure_key.as_deref())
        .collect();
    let distances = provider
        .condensed(&keys)
        .map_err(|source| DiversityError::DataUnavailable {
            group: group.to_string(),
            source,
        })?;
    fad_from_condensed(group, &distances, keys.len())
}

/// FAD measures for every group in a table, groups in order of first appearance.
pub fn calculate_fad_measures(
    records: &[CompoundRecord],
    provider: &dyn DistanceProvider,
    policy: SingletonPolicy,
) -> Result<Vec<FadResult>, DiversityError> {
    let mut results = Vec::new();
    for (group, members) in group_records(records) {
        match compute_fad(&group, &members, provider) {
            Ok(result) => {
                log(LogLevel::Debug, &format!(
                    "Group {}: N={} FAD={:.6} APWD={:.6}",
                    group, result.n, result.fad, result.apwd
                ));
                results.push(result);
            }
            Err(DiversityError::Underdetermined { group, size })
                if policy == SingletonPolicy::FilterAndWarn =>
            {
                log(LogLevel::Warning, &format!(
                    "Group {} has {} unique compound(s); pairwise measures are undefined, excluding it",
                    group, size
                ));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(results)
}
