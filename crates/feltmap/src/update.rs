//! Incremental update runs.
//!
//! An update lists quakes from a [`QuakeSource`], skips the ones already in
//! storage, fetches felt reports for the rest and stores each quake with its
//! sensitivity records.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::assess;
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::source::QuakeSource;
use crate::storage::Storage;

/// Counters describing one update run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    /// Quakes listed by the source.
    pub quakes_seen: usize,
    /// Quakes not stored before this run.
    pub new_quakes: usize,
    /// New quakes recorded without any felt reports.
    pub quakes_without_reports: usize,
    /// New quakes whose reports could not be fetched; retried next run.
    pub failed_quakes: usize,
    /// Felt report points fetched across all new quakes.
    pub reports_fetched: usize,
    /// Sensitivity records written.
    pub records_stored: usize,
    /// Reports dropped as too far from their epicentre.
    pub rejected_reports: usize,
}

impl UpdateSummary {
    /// Whether this run found nothing new.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_quakes == 0
    }

    /// Quakes actually recorded during this run.
    #[must_use]
    pub fn quakes_recorded(&self) -> usize {
        self.new_quakes - self.failed_quakes
    }
}

/// Runs an update against a source and a store.
#[derive(Debug)]
pub struct Updater<'a, S: QuakeSource> {
    source: &'a S,
    storage: &'a Storage,
    analysis: &'a AnalysisConfig,
    min_mmi: i32,
}

impl<'a, S: QuakeSource> Updater<'a, S> {
    /// Create an updater fetching quakes at or above `min_mmi`.
    #[must_use]
    pub fn new(
        source: &'a S,
        storage: &'a Storage,
        analysis: &'a AnalysisConfig,
        min_mmi: i32,
    ) -> Self {
        Self {
            source,
            storage,
            analysis,
            min_mmi,
        }
    }

    /// Fetch, assess and store every quake not seen before.
    ///
    /// A failure fetching one quake's reports is logged and counted, and
    /// that quake stays unrecorded so a later run picks it up again.
    ///
    /// # Errors
    ///
    /// Returns an error if the quake list cannot be fetched or storage
    /// fails.
    pub async fn run(&self) -> Result<UpdateSummary> {
        let quakes = self.source.quakes(self.min_mmi).await?;
        let known = self.storage.known_quake_ids()?;

        let mut summary = UpdateSummary {
            quakes_seen: quakes.len(),
            ..UpdateSummary::default()
        };

        let fresh: Vec<_> = quakes
            .into_iter()
            .filter(|q| !known.contains(&q.public_id))
            .collect();
        summary.new_quakes = fresh.len();

        if fresh.is_empty() {
            info!("No new quakes from {}", self.source.name());
        } else {
            info!(
                "{} new quake(s) from {}, fetching felt reports",
                fresh.len(),
                self.source.name()
            );
        }

        for quake in &fresh {
            let reports = match self.source.felt_reports(&quake.public_id).await {
                Ok(reports) => reports,
                Err(e) => {
                    warn!("Could not fetch felt reports for {}: {}", quake.public_id, e);
                    summary.failed_quakes += 1;
                    continue;
                }
            };

            if reports.is_empty() {
                summary.quakes_without_reports += 1;
            }
            summary.reports_fetched += reports.len();

            let assessment = assess(quake, &reports, self.analysis);
            summary.rejected_reports += assessment.rejected;

            if let Some(stored) =
                self.storage
                    .record_quake(quake, reports.len(), &assessment.records)?
            {
                summary.records_stored += stored;
            }
        }

        self.storage.set_last_update(Utc::now())?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::error::Error;
    use crate::geo::Coordinates;
    use crate::logging::init_test_logging;
    use crate::report::{FeltReport, Quake};

    /// In-process source with canned answers.
    #[derive(Debug, Default)]
    struct FakeSource {
        quakes: Vec<Quake>,
        reports: HashMap<String, Vec<FeltReport>>,
        failing: Vec<String>,
    }

    impl FakeSource {
        fn with_quake(mut self, id: &str, lon: f64, lat: f64, reports: Vec<FeltReport>) -> Self {
            self.quakes
                .push(Quake::new(id, Coordinates::new(lon, lat).unwrap()));
            self.reports.insert(id.to_string(), reports);
            self
        }

        fn failing_on(mut self, id: &str) -> Self {
            self.failing.push(id.to_string());
            self
        }
    }

    #[async_trait]
    impl QuakeSource for FakeSource {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn quakes(&self, _min_mmi: i32) -> Result<Vec<Quake>> {
            Ok(self.quakes.clone())
        }

        async fn felt_reports(&self, public_id: &str) -> Result<Vec<FeltReport>> {
            if self.failing.iter().any(|id| id == public_id) {
                return Err(Error::ApiStatus {
                    url: format!("fake://{public_id}"),
                    status: 503,
                });
            }
            Ok(self.reports.get(public_id).cloned().unwrap_or_default())
        }
    }

    fn report(lon: f64, lat: f64, mmi: f64) -> FeltReport {
        FeltReport::new(Coordinates::new(lon, lat).unwrap(), mmi)
    }

    fn two_quakes() -> FakeSource {
        FakeSource::default()
            .with_quake(
                "2016p858000",
                173.0,
                -42.7,
                vec![
                    report(172.6, -43.5, 6.0),
                    report(174.8, -41.3, 5.0),
                    // Latitude sign flipped, over 9000 km away
                    report(174.8, 41.3, 5.0),
                ],
            )
            .with_quake("2021p405872", 176.2, -38.1, vec![])
    }

    #[tokio::test]
    async fn test_first_run_records_everything() {
        init_test_logging();
        let storage = Storage::open_in_memory().unwrap();
        let source = two_quakes();
        let analysis = AnalysisConfig::default();

        let summary = Updater::new(&source, &storage, &analysis, 5)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.quakes_seen, 2);
        assert_eq!(summary.new_quakes, 2);
        assert_eq!(summary.quakes_without_reports, 1);
        assert_eq!(summary.failed_quakes, 0);
        assert_eq!(summary.reports_fetched, 3);
        assert_eq!(summary.rejected_reports, 1);
        assert_eq!(summary.records_stored, 2);
        assert_eq!(summary.quakes_recorded(), 2);

        assert_eq!(storage.count_quakes().unwrap(), 2);
        assert_eq!(storage.count_records().unwrap(), 2);
        assert!(storage.last_update().unwrap().is_some());

        for record in storage.records().unwrap() {
            assert_eq!(record.public_id.as_deref(), Some("2016p858000"));
            assert!(record.distance_km > 0.0);
            assert!((record.sensitivity - record.mmi * record.distance_km).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_second_run_finds_nothing_new() {
        let storage = Storage::open_in_memory().unwrap();
        let source = two_quakes();
        let analysis = AnalysisConfig::default();
        let updater = Updater::new(&source, &storage, &analysis, 5);

        updater.run().await.unwrap();
        let summary = updater.run().await.unwrap();

        assert!(summary.is_empty());
        assert_eq!(summary.quakes_seen, 2);
        assert_eq!(summary.records_stored, 0);
        assert_eq!(storage.count_records().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_new_quake_is_picked_up_later() {
        let storage = Storage::open_in_memory().unwrap();
        let analysis = AnalysisConfig::default();

        let first = two_quakes();
        Updater::new(&first, &storage, &analysis, 5)
            .run()
            .await
            .unwrap();

        let second = two_quakes().with_quake(
            "2022p138188",
            175.0,
            -40.0,
            vec![report(175.5, -40.5, 4.0)],
        );
        let summary = Updater::new(&second, &storage, &analysis, 5)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.new_quakes, 1);
        assert_eq!(summary.records_stored, 1);
        assert_eq!(storage.count_quakes().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_quake_is_retried() {
        let storage = Storage::open_in_memory().unwrap();
        let analysis = AnalysisConfig::default();

        let flaky = two_quakes().failing_on("2016p858000");
        let summary = Updater::new(&flaky, &storage, &analysis, 5)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.failed_quakes, 1);
        assert_eq!(summary.quakes_recorded(), 1);
        assert!(!storage.known_quake_ids().unwrap().contains("2016p858000"));

        let healthy = two_quakes();
        let summary = Updater::new(&healthy, &storage, &analysis, 5)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.new_quakes, 1);
        assert_eq!(summary.records_stored, 2);
        assert!(storage.known_quake_ids().unwrap().contains("2016p858000"));
    }

    #[tokio::test]
    async fn test_imported_quake_list_is_not_fetched_again() {
        let storage = Storage::open_in_memory().unwrap();
        let analysis = AnalysisConfig::default();

        let quake_list = "\
,properties.publicID,geometry.coordinates
0,2016p858000,\"[173.0, -42.7]\"
";
        let sensitivity = "\
,properties.mmi,geometry.coordinates,distance,sensitivity
0,5,\"[174.78, -41.29]\",212.5,1062.5
";
        let quakes = crate::export::read_quakes(quake_list.as_bytes()).unwrap();
        storage.mark_processed(&quakes).unwrap();
        let records = crate::export::read_sensitivity(sensitivity.as_bytes()).unwrap();
        storage.insert_records(&records).unwrap();

        let source = FakeSource::default().with_quake(
            "2016p858000",
            173.0,
            -42.7,
            vec![report(174.78, -41.29, 5.0)],
        );
        let summary = Updater::new(&source, &storage, &analysis, 5)
            .run()
            .await
            .unwrap();

        assert!(summary.is_empty());
        assert_eq!(summary.reports_fetched, 0);
        assert_eq!(storage.count_records().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_quake_list_failure_is_an_error() {
        struct DownSource;

        #[async_trait]
        impl QuakeSource for DownSource {
            fn name(&self) -> &'static str {
                "down"
            }

            async fn quakes(&self, _min_mmi: i32) -> Result<Vec<Quake>> {
                Err(Error::ApiStatus {
                    url: "fake://quake".to_string(),
                    status: 500,
                })
            }

            async fn felt_reports(&self, _public_id: &str) -> Result<Vec<FeltReport>> {
                Ok(Vec::new())
            }
        }

        let storage = Storage::open_in_memory().unwrap();
        let analysis = AnalysisConfig::default();
        let result = Updater::new(&DownSource, &storage, &analysis, 5).run().await;

        assert!(result.is_err());
        assert!(storage.last_update().unwrap().is_none());
    }
}
