//! Shannon, bias-corrected Shannon, Gini-Simpson and Pielou indices over
//! per-group pathway abundances.

use crate::pathways::{group_pathway_stats, GroupPathwayStats, PathwayVocabulary};
use crate::process::DiversityError;
use crate::records::CompoundRecord;

pub const PATHWAY_DIVERSITY_METRICS: [&str; 4] = ["H", "Hbc", "G", "J"];

/// Pathway-based diversity of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct PathwayDiversity {
    pub group: String,
    /// Shannon index.
    pub h: f64,
    /// Chao-Shen bias-corrected Shannon index.
    pub hbc: f64,
    /// Gini-Simpson index.
    pub g: f64,
    /// Pielou evenness. NaN when only one pathway is present.
    pub j: f64,
    pub richness: usize,
    pub sample_coverage: f64,
}

impl PathwayDiversity {
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "H" => Some(self.h),
            "Hbc" => Some(self.hbc),
            "G" => Some(self.g),
            "J" => Some(self.j),
            _ => None,
        }
    }
}

/// `p * ln(p)` with the `0 * ln(0) = 0` convention.
fn plogp(p: f64) -> f64 {
    if p > 0.0 {
        p * p.ln()
    } else {
        0.0
    }
}

/// H = -Σ p ln p.
pub fn shannon(means: &[f64]) -> f64 {
    -means.iter().map(|&p| plogp(p)).sum::<f64>()
}

/// Good-Turing sample coverage, `1 - singletons / total`.
pub fn sample_coverage(singletons: usize, total: usize) -> f64 {
    1.0 - singletons as f64 / total as f64
}

/// Chao-Shen estimator: coverage-adjusted proportions weighted by the
/// inverse probability of being observed in a sample of `total`.
/// Terms that come out non-finite contribute nothing.
pub fn chao_shen(means: &[f64], coverage: f64, total: usize) -> f64 {
    let sum: f64 = means
        .iter()
        .map(|&p| {
            let c = p * coverage;
            let term = c * c.ln() / (1.0 - (1.0 - c).powf(total as f64));
            if term.is_finite() {
                term
            } else {
                0.0
            }
        })
        .sum();
    -sum
}

/// G = 1 - Σ p².
pub fn gini_simpson(means: &[f64]) -> f64 {
    1.0 - means.iter().map(|p| p * p).sum::<f64>()
}

/// J = H / ln(richness). Undefined (NaN) for a richness of one.
pub fn pielou(h: f64, richness: usize) -> f64 {
    h / (richness as f64).ln()
}

pub fn compute_group_diversity(stats: &GroupPathwayStats) -> PathwayDiversity {
    let means: Vec<f64> = stats.pathways.iter().map(|p| p.mean).collect();
    let richness = stats.richness();
    let coverage = sample_coverage(stats.singletons(), stats.member_count);
    let h = shannon(&means);
    PathwayDiversity {
        group: stats.group.clone(),
        h,
        hbc: chao_shen(&means, coverage, stats.member_count),
        g: gini_simpson(&means),
        j: pielou(h, richness),
        richness,
        sample_coverage: coverage,
    }
}

/// Diversity indices for every group, in input order.
pub fn compute_pathway_diversity(stats: &[GroupPathwayStats]) -> Vec<PathwayDiversity> {
    stats.iter().map(compute_group_diversity).collect()
}

/// Index, aggregate over the distinct pathway view, then compute indices.
pub fn pathway_diversity_from_records<'a, I>(
    records: I,
    vocabulary: &PathwayVocabulary,
) -> Result<Vec<PathwayDiversity>, DiversityError>
where
    I: IntoIterator<Item = &'a CompoundRecord>,
{
    let stats = group_pathway_stats(records, vocabulary, true)?;
    Ok(compute_pathway_diversity(&stats))
}

/// Rescales values onto [0, 1] by the observed minimum and maximum.
///
/// NaN entries are ignored when fitting and stay NaN. A constant column
/// maps to 0.
pub fn min_max_scale(values: &[f64]) -> Vec<f64> {
    let finite = values.iter().copied().filter(|v| !v.is_nan());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let range = if max > min { max - min } else { 1.0 };
    values
        .iter()
        .map(|&v| if v.is_nan() { v } else { (v - min) / range })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shannon_ignores_empty_categories() {
        let h = shannon(&[0.5, 0.5, 0.0, 0.0]);
        assert!((h - 2f64.ln()).abs() < 1e-12);
        assert_eq!(shannon(&[1.0, 0.0]), 0.0);
    }

    #[test]
    fn gini_simpson_uniform() {
        assert!((gini_simpson(&[0.25; 4]) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn pielou_is_nan_for_single_pathway() {
        assert!(pielou(0.0, 1).is_nan());
        assert!((pielou(2f64.ln(), 2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn chao_shen_drops_non_finite_terms() {
        // Zero proportions and zero coverage both give 0/0 terms.
        assert_eq!(chao_shen(&[0.0, 0.0], 1.0, 4), 0.0);
        assert_eq!(chao_shen(&[0.5, 0.5], 0.0, 2), 0.0);
        let expected = -2.0 * (0.5 * 0.5f64.ln() / (1.0 - 0.5f64.powi(4)));
        assert!((chao_shen(&[0.5, 0.5], 1.0, 4) - expected).abs() < 1e-12);
    }

    #[test]
    fn min_max_scale_handles_nan_and_constants() {
        let scaled = min_max_scale(&[2.0, f64::NAN, 4.0, 3.0]);
        assert_eq!(scaled[0], 0.0);
        assert!(scaled[1].is_nan());
        assert_eq!(scaled[2], 1.0);
        assert!((scaled[3] - 0.5).abs() < 1e-12);

        assert_eq!(min_max_scale(&[7.0, 7.0]), vec![0.0, 0.0]);
        assert!(min_max_scale(&[]).is_empty());
    }
}
