#[cfg(test)]
mod rarefaction_tests {
    use crate::distance::*;
    use crate::pathways::PathwayVocabulary;
    use crate::process::DiversityError;
    use crate::rarefaction::*;
    use crate::records::CompoundRecord;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Once;

    fn pair_table() -> PairwiseDistanceTable {
        PairwiseDistanceTable::new()
            .with_pair("C(C)O", "CO", 0.5)
            .with_pair("C(C)O", "C(C)N", 0.6)
            .with_pair("CO", "C(C)N", 0.8)
            .with_pair("C(C)O", "CCC", 0.3)
            .with_pair("CO", "CCC", 0.9)
            .with_pair("C(C)N", "CCC", 0.4)
    }

    fn records() -> Vec<CompoundRecord> {
        vec![
            CompoundRecord::new("C(C)O", "A").with_pathways("Terpenoids"),
            CompoundRecord::new("CO", "A").with_pathways("Alkaloids"),
            CompoundRecord::new("C(C)N", "A").with_pathways("Terpenoids:Alkaloids"),
            CompoundRecord::new("CCC", "A").with_pathways("Polyketides"),
            CompoundRecord::new("CO", "B").with_pathways("Alkaloids"),
            CompoundRecord::new("C(C)N", "B").with_pathways("Terpenoids:Alkaloids"),
            CompoundRecord::new("C", "C").with_pathways("Polyketides"),
        ]
    }

    /// Counts provider calls.
    struct CountingProvider {
        inner: PairwiseDistanceTable,
        calls: AtomicUsize,
    }

    impl DistanceProvider for CountingProvider {
        fn condensed(&self, keys: &[&str]) -> Result<Vec<f64>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.condensed(keys)
        }
    }

    /// Reports how many distinct records each subsample holds.
    struct DistinctRecords;

    struct DistinctEvaluator;

    impl GroupEvaluator for DistinctEvaluator {
        fn evaluate(&self, group: &str, sample: &[&CompoundRecord]) -> Result<MetricRecord, DiversityError> {
            let distinct: HashSet<*const CompoundRecord> =
                sample.iter().map(|r| *r as *const CompoundRecord).collect();
            Ok(MetricRecord {
                group: group.to_string(),
                values: vec![("distinct", distinct.len() as f64)],
            })
        }
    }

    impl DiversityMetric for DistinctRecords {
        fn family(&self) -> &'static str {
            "distinct"
        }

        fn metric_names(&self) -> &'static [&'static str] {
            &["distinct"]
        }

        fn prepare<'m>(
            &'m self,
            _group: &str,
            _records: &[&CompoundRecord],
        ) -> Result<Box<dyn GroupEvaluator + 'm>, DiversityError> {
            Ok(Box::new(DistinctEvaluator))
        }
    }

    /// Collects warning messages from every thread.
    struct WarningLog {
        messages: Mutex<Vec<String>>,
    }

    impl ::log::Log for WarningLog {
        fn enabled(&self, metadata: &::log::Metadata) -> bool {
            metadata.level() <= ::log::Level::Warn
        }

        fn log(&self, record: &::log::Record) {
            if self.enabled(record.metadata()) {
                self.messages.lock().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static WARNINGS: Lazy<WarningLog> = Lazy::new(|| WarningLog {
        messages: Mutex::new(Vec::new()),
    });
    static INSTALL_LOGGER: Once = Once::new();

    /// Warnings mentioning `needle`. Tests share the logger, so each one
    /// filters on a group label nobody else uses.
    fn warnings_containing(needle: &str) -> Vec<String> {
        WARNINGS
            .messages
            .lock()
            .iter()
            .filter(|m| m.contains(needle))
            .cloned()
            .collect()
    }

    fn install_warning_log() {
        INSTALL_LOGGER.call_once(|| {
            if ::log::set_logger(&*WARNINGS).is_ok() {
                ::log::set_max_level(::log::LevelFilter::Warn);
            }
        });
    }

    fn config(target_size: usize, iterations: usize) -> RarefactionConfig {
        RarefactionConfig::new(target_size)
            .with_iterations(iterations)
            .with_workers(2)
            .with_seed(42)
    }

    #[test]
    fn test_samples_are_drawn_without_replacement() {
        let records = records();
        let report = rarefy_groups(&records, &DistinctRecords, &["distinct"], &config(3, 50)).unwrap();
        let a = report.group("A").unwrap();
        assert_eq!(a.mean("distinct"), Some(3.0));
        assert_eq!(a.std("distinct"), Some(0.0));
        assert_eq!(a.group_size, 4);
        assert_eq!(a.target_size, 3);
    }

    #[test]
    fn test_full_size_rarefaction_matches_direct_fad() {
        let table = pair_table();
        let records = records();
        let metric = FadMetric::new(&table);
        let report = rarefy_groups(&records, &metric, &["FAD", "MFAD", "APWD"], &config(2, 10)).unwrap();

        let b = report.group("B").unwrap();
        assert!((b.mean("FAD").unwrap() - 1.6).abs() < 1e-12);
        assert!((b.mean("MFAD").unwrap() - 0.8).abs() < 1e-12);
        assert!((b.mean("APWD").unwrap() - 0.8).abs() < 1e-12);
        assert!(b.std("FAD").unwrap().abs() < 1e-12);
        assert_eq!(b.iterations, 10);
    }

    #[test]
    fn test_failures_are_isolated_per_group() {
        let table = pair_table();
        let records = records();
        let metric = FadMetric::new(&table);
        let report = rarefy_groups(&records, &metric, &["FAD"], &config(3, 5)).unwrap();

        assert_eq!(report.results.len(), 1);
        assert!(report.group("A").is_some());
        assert_eq!(report.failures.len(), 2);
        match &report.failure("B").unwrap().error {
            DiversityError::SamplingPrecondition { group, target, available } => {
                assert_eq!(group, "B");
                assert_eq!(*target, 3);
                assert_eq!(*available, 2);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(report.failure("C").is_some());
        assert_eq!(report.failure("C").unwrap().family, "fad");
    }

    #[test]
    fn test_failed_iteration_is_reported() {
        let table = pair_table();
        let records = records();
        let metric = FadMetric::new(&table);
        let report = rarefy_groups(&records, &metric, &["FAD"], &config(1, 5)).unwrap();
        assert!(report.results.is_empty());
        match &report.failure("A").unwrap().error {
            DiversityError::IterationFailed { iteration, source, .. } => {
                assert_eq!(*iteration, 0);
                assert!(matches!(**source, DiversityError::Underdetermined { size: 1, .. }));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_nan_metric_is_undefined_iteration() {
        let records = vec![
            CompoundRecord::new("a", "G").with_pathways("Alkaloids"),
            CompoundRecord::new("b", "G").with_pathways("Alkaloids"),
        ];
        let metric = PathwayDiversityMetric::new(PathwayVocabulary::np_classifier());
        let report = rarefy_groups(&records, &metric, &["H", "J"], &config(2, 3)).unwrap();
        assert!(matches!(
            report.failure("G").unwrap().error,
            DiversityError::UndefinedIteration { iteration: 0, ref metric, .. } if metric == "J"
        ));

        let report = rarefy_groups(&records, &metric, &["H", "G"], &config(2, 3)).unwrap();
        assert_eq!(report.group("G").unwrap().mean("H"), Some(0.0));
    }

    #[test]
    fn test_single_group_with_own_rng() {
        let table = pair_table();
        let records = records();
        let metric = FadMetric::new(&table);
        let mut first_rng = StdRng::seed_from_u64(3);
        let mut second_rng = StdRng::seed_from_u64(3);
        let first = rarefy_group(&records, "A", 3, &["MFAD"], &metric, 1, &mut first_rng).unwrap();
        let second = rarefy_group(&records, "A", 3, &["MFAD"], &metric, 1, &mut second_rng).unwrap();
        assert_eq!(first.mean("MFAD"), second.mean("MFAD"));
        assert!(first.std("MFAD").unwrap().is_nan());
        assert_eq!(first.mean("FAD"), None);
    }

    #[test]
    fn test_unclassified_subsample_fails() {
        let records = vec![
            CompoundRecord::new("a", "G").with_pathways("Alkaloids"),
            CompoundRecord::new("b", "G"),
            CompoundRecord::new("c", "G"),
        ];
        let metric = PathwayDiversityMetric::new(PathwayVocabulary::np_classifier());
        let mut rng = StdRng::seed_from_u64(7);
        let members: Vec<&CompoundRecord> = records.iter().collect();
        // Some of the 200 draws pick both unclassified records.
        let err = rarefy_members("G", &members, 2, &["H"], &metric, 200, &mut rng).unwrap_err();
        match err {
            DiversityError::IterationFailed { source, .. } => {
                assert!(matches!(*source, DiversityError::NoIdentifiedCompounds(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_duplicates_are_reported_once_per_group() {
        install_warning_log();
        let table = PairwiseDistanceTable::new()
            .with_pair("a", "b", 0.2)
            .with_pair("a", "c", 0.4)
            .with_pair("b", "c", 0.6);
        let records = vec![
            CompoundRecord::new("a", "Duplicated").with_pathways("Terpenoids"),
            CompoundRecord::new("a", "Duplicated").with_pathways("Terpenoids"),
            CompoundRecord::new("b", "Duplicated").with_pathways("Alkaloids"),
            CompoundRecord::new("c", "Duplicated").with_pathways("Polyketides"),
        ];
        let (fad, pathway) = compile_rarefied_calculations(
            &records,
            &table,
            &PathwayVocabulary::np_classifier(),
            &config(4, 200),
        )
        .unwrap();

        let group = fad.group("Duplicated").unwrap();
        assert!((group.mean("FAD").unwrap() - 2.4).abs() < 1e-12);
        assert!(pathway.group("Duplicated").is_some());

        let warnings = warnings_containing("Group Duplicated:");
        let structure = warnings.iter().filter(|m| m.contains("duplicate structure")).count();
        let compound = warnings.iter().filter(|m| m.contains("duplicate compound")).count();
        assert_eq!(structure, 1, "{:?}", warnings);
        assert_eq!(compound, 1, "{:?}", warnings);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let table = pair_table();
        let records = records();
        let metric = FadMetric::new(&table);
        let first = rarefy_groups(&records, &metric, &["FAD", "APWD"], &config(3, 25)).unwrap();
        let second = rarefy_groups(
            &records,
            &metric,
            &["FAD", "APWD"],
            &config(3, 25).with_workers(1),
        )
        .unwrap();
        assert_eq!(first.results, second.results);

        let a = first.group("A").unwrap();
        assert!(a.std("FAD").unwrap() > 0.0);
    }

    #[test]
    fn test_provider_is_queried_once_per_group() {
        let provider = CountingProvider {
            inner: pair_table(),
            calls: AtomicUsize::new(0),
        };
        let records = records();
        let metric = FadMetric::new(&provider);
        let report = rarefy_groups(&records, &metric, &["FAD"], &config(2, 20)).unwrap();
        assert_eq!(report.results.len(), 2);
        // C fails its sampling precondition before any lookup.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_compile_rarefied_calculations() {
        let table = pair_table();
        let records = records();
        let (fad, pathway) = compile_rarefied_calculations(
            &records,
            &table,
            &PathwayVocabulary::np_classifier(),
            &config(2, 10),
        )
        .unwrap();
        assert_eq!(fad.family, "fad");
        assert_eq!(fad.metrics, vec!["FAD", "MFAD", "APWD"]);
        assert_eq!(pathway.family, "pathway");
        assert_eq!(pathway.metrics, vec!["H", "Hbc", "G", "J"]);
        let groups: Vec<&str> = fad.results.iter().map(|r| r.group.as_str()).collect();
        assert_eq!(groups, vec!["A", "B"]);
        assert!(pathway.group("B").is_some());
        assert!(fad.failure("C").is_some());
    }

    #[test]
    fn test_invalid_requests() {
        let table = pair_table();
        let records = records();
        let metric = FadMetric::new(&table);
        assert!(matches!(
            rarefy_groups(&records, &metric, &["H"], &config(2, 10)),
            Err(DiversityError::UnknownMetric { family: "fad", .. })
        ));
        assert!(matches!(
            rarefy_groups(&records, &metric, &["FAD"], &config(2, 0)),
            Err(DiversityError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_mean_and_sample_std() {
        let (mean, std) = mean_and_sample_std(&[1.0, 2.0, 3.0, 4.0]);
        assert!((mean - 2.5).abs() < 1e-12);
        assert!((std - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
        let (mean, std) = mean_and_sample_std(&[3.0]);
        assert_eq!(mean, 3.0);
        assert!(std.is_nan());
        assert_eq!(rarefied_column("FAD"), "FAD_Rare");
    }

    #[test]
    fn test_group_seeds_differ_by_label() {
        assert_eq!(group_seed(1, "A"), group_seed(1, "A"));
        assert_ne!(group_seed(1, "A"), group_seed(1, "B"));
        assert!(default_workers() >= 1);
    }
}
