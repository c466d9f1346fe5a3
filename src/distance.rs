//! Pairwise molecular distances.
//!
//! The metric code never fingerprints molecules itself. It asks a
//! [`DistanceProvider`] for the condensed distance vector of a group and works
//! from that. Two offline providers are included: Tanimoto distance over
//! fingerprint bit sets, and an explicit table of pair distances.

use itertools::Itertools;
use ndarray::Array2;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Failures at the collaborator boundary. These mean the data needed for a
/// distance is unavailable, not that a metric is undefined.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("no fingerprint available for structure '{0}'")]
    MissingStructure(String),
    #[error("no distance available for pair ('{0}', '{1}')")]
    MissingPair(String, String),
    #[error("distance provider unavailable: {0}")]
    Unavailable(String),
}

/// Source of pairwise distances between structures.
///
/// Implementations must be deterministic, symmetric, non-negative, and return
/// 0 for identical structures. The result is condensed: row-major over pairs
/// `(i, j)` with `i < j`, so it has `n * (n - 1) / 2` entries.
pub trait DistanceProvider: Sync {
    fn condensed(&self, keys: &[&str]) -> Result<Vec<f64>, ProviderError>;
}

/// Number of entries in the condensed vector for `n` items.
pub fn condensed_len(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Position of pair `(i, j)`, `i < j`, in a condensed vector over `n` items.
pub fn condensed_index(n: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < n);
    n * i - i * (i + 1) / 2 + (j - i - 1)
}

/// Expands a condensed vector into the full symmetric matrix.
pub fn square_form(condensed: &[f64], n: usize) -> Array2<f64> {
    let mut matrix = Array2::<f64>::zeros((n, n));
    for (i, j) in (0..n).tuple_combinations() {
        let d = condensed[condensed_index(n, i, j)];
        matrix[[i, j]] = d;
        matrix[[j, i]] = d;
    }
    matrix
}

/// A fingerprint as the set of its on-bits.
pub type Fingerprint = BTreeSet<u32>;

/// Parses on-bit indices separated by whitespace, commas or semicolons.
pub fn parse_fingerprint_bits(raw: &str) -> Result<Fingerprint, String> {
    raw.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<u32>()
                .map_err(|_| format!("invalid fingerprint bit '{}'", token))
        })
        .collect()
}

/// Hashed character-shingle fingerprint of a SMILES string.
///
/// Used when no precomputed fingerprint is supplied. Every substring of
/// length 1 to `max_len` is hashed into `n_bits` buckets.
pub fn shingle_fingerprint(smiles: &str, max_len: usize, n_bits: u32) -> Fingerprint {
    let chars: Vec<char> = smiles.chars().collect();
    let mut bits = Fingerprint::new();
    for len in 1..=max_len.max(1) {
        for window in chars.windows(len) {
            let mut hasher = DefaultHasher::new();
            window.hash(&mut hasher);
            bits.insert((hasher.finish() % n_bits as u64) as u32);
        }
    }
    bits
}

/// Tanimoto (Jaccard) distance between two bit sets. Two empty sets are identical.
pub fn tanimoto_distance(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    1.0 - shared as f64 / union as f64
}

/// Tanimoto distances over a structure-key → fingerprint lookup.
#[derive(Debug, Default, Clone)]
pub struct TanimotoDistances {
    fingerprints: HashMap<String, Fingerprint>,
}

impl TanimotoDistances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, structure_key: &str, fingerprint: Fingerprint) {
        self.fingerprints.insert(structure_key.to_string(), fingerprint);
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    fn lookup(&self, key: &str) -> Result<&Fingerprint, ProviderError> {
        self.fingerprints
            .get(key)
            .ok_or_else(|| ProviderError::MissingStructure(key.to_string()))
    }
}

impl DistanceProvider for TanimotoDistances {
    fn condensed(&self, keys: &[&str]) -> Result<Vec<f64>, ProviderError> {
        let prints = keys
            .iter()
            .map(|key| self.lookup(key))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prints
            .iter()
            .tuple_combinations()
            .map(|(a, b)| tanimoto_distance(a, b))
            .collect())
    }
}

/// Explicit symmetric table of pair distances.
#[derive(Debug, Default, Clone)]
pub struct PairwiseDistanceTable {
    pairs: HashMap<(String, String), f64>,
}

impl PairwiseDistanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn pair_key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    pub fn insert(&mut self, a: &str, b: &str, distance: f64) {
        self.pairs.insert(Self::pair_key(a, b), distance);
    }

    pub fn with_pair(mut self, a: &str, b: &str, distance: f64) -> Self {
        self.insert(a, b, distance);
        self
    }

    pub fn distance(&self, a: &str, b: &str) -> Result<f64, ProviderError> {
        if a == b {
            return Ok(0.0);
        }
        self.pairs
            .get(&Self::pair_key(a, b))
            .copied()
            .ok_or_else(|| ProviderError::MissingPair(a.to_string(), b.to_string()))
    }
}

impl DistanceProvider for PairwiseDistanceTable {
    fn condensed(&self, keys: &[&str]) -> Result<Vec<f64>, ProviderError> {
        keys.iter()
            .tuple_combinations()
            .map(|(a, b)| self.distance(a, b))
            .collect()
    }
}

/// Distances for one group, fetched from a provider once and then served
/// from memory. Rarefaction resamples through this so the provider is
/// consulted once per group rather than once per iteration.
#[derive(Debug, Clone)]
pub struct CachedDistances {
    index: HashMap<String, usize>,
    matrix: Array2<f64>,
}

impl CachedDistances {
    pub fn fetch(provider: &dyn DistanceProvider, keys: &[&str]) -> Result<Self, ProviderError> {
        let unique: Vec<&str> = keys.iter().copied().unique().collect();
        let condensed = provider.condensed(&unique)?;
        if condensed.len() != condensed_len(unique.len()) {
            return Err(ProviderError::Unavailable(format!(
                "expected {} distances for {} structures, got {}",
                condensed_len(unique.len()),
                unique.len(),
                condensed.len()
            )));
        }
        let index = unique
            .iter()
            .enumerate()
            .map(|(i, key)| (key.to_string(), i))
            .collect();
        Ok(CachedDistances {
            index,
            matrix: square_form(&condensed, unique.len()),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl DistanceProvider for CachedDistances {
    fn condensed(&self, keys: &[&str]) -> Result<Vec<f64>, ProviderError> {
        let positions = keys
            .iter()
            .map(|key| {
                self.index
                    .get(*key)
                    .copied()
                    .ok_or_else(|| ProviderError::MissingStructure(key.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(positions
            .iter()
            .tuple_combinations()
            .map(|(&i, &j)| self.matrix[[i, j]])
            .collect())
    }
}
