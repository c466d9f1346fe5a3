#[cfg(feature = "python")]
use pyo3::prelude::*;

// Module declarations
pub mod distance;
pub mod diversity;
pub mod fad;
pub mod parse;
pub mod pathways;
pub mod process;
pub mod progress;
pub mod rarefaction;
pub mod records;

pub use distance::{
    CachedDistances, DistanceProvider, PairwiseDistanceTable, ProviderError, TanimotoDistances,
};
pub use diversity::{compute_pathway_diversity, pathway_diversity_from_records, PathwayDiversity};
pub use fad::{calculate_fad_measures, fad_from_condensed, FadResult, SingletonPolicy};
pub use pathways::{group_pathway_stats, index_pathways, GroupPathwayStats, PathwayVocabulary};
pub use process::DiversityError;
pub use rarefaction::{
    compile_rarefied_calculations, rarefy_groups, DiversityMetric, FadMetric,
    PathwayDiversityMetric, RarefactionConfig, RarefactionReport,
};
pub use records::CompoundRecord;


#[cfg(feature = "python")]
fn to_py_err(err: DiversityError) -> PyErr {
    pyo3::exceptions::PyValueError::new_err(err.to_string())
}

/// PyO3 wrapper for fad_from_condensed
///
/// Takes a condensed distance vector (row-major upper triangle, as returned
/// by scipy's `pdist`) for `n` unique compounds.
///
/// # Returns
/// * `(FAD, MFAD, APWD)`
#[cfg(feature = "python")]
#[pyfunction]
#[pyo3(name = "fad_from_distances")]
fn fad_from_distances_py(distances: Vec<f64>, n: usize) -> PyResult<(f64, f64, f64)> {
    let result = fad_from_condensed("<input>", &distances, n).map_err(to_py_err)?;
    Ok((result.fad, result.mfad, result.apwd))
}

/// PyO3 wrapper for pathway_diversity_from_records
///
/// The three lists are parallel, one entry per compound row. Pathway labels
/// use the NPClassifier vocabulary and may be `None` for unclassified rows.
///
/// # Returns
/// * One `(group, H, Hbc, G, J)` tuple per group with classified compounds
#[cfg(feature = "python")]
#[pyfunction]
#[pyo3(name = "pathway_diversity")]
fn pathway_diversity_py(
    groups: Vec<String>,
    compound_ids: Vec<String>,
    pathway_labels: Vec<Option<String>>,
) -> PyResult<Vec<(String, f64, f64, f64, f64)>> {
    if groups.len() != compound_ids.len() || groups.len() != pathway_labels.len() {
        return Err(pyo3::exceptions::PyValueError::new_err(
            "groups, compound_ids and pathway_labels must have the same length",
        ));
    }
    let records: Vec<CompoundRecord> = groups
        .into_iter()
        .zip(compound_ids)
        .zip(pathway_labels)
        .map(|((group, compound_id), labels)| CompoundRecord {
            structure_key: Some(compound_id.clone()),
            group,
            compound_id: Some(compound_id),
            pathway_labels: labels,
        })
        .collect();
    let diversity = pathway_diversity_from_records(&records, &PathwayVocabulary::np_classifier())
        .map_err(to_py_err)?;
    Ok(diversity
        .into_iter()
        .map(|d| (d.group, d.h, d.hbc, d.g, d.j))
        .collect())
}

/// PyO3 module definition
#[cfg(feature = "python")]
#[pymodule]
fn phytodiv(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(fad_from_distances_py, m)?)?;
    m.add_function(wrap_pyfunction!(pathway_diversity_py, m)?)?;
    Ok(())
}
