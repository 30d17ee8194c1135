use crate::config::MaturityConfig;
use crate::core::align::{GridAligner, SourceStack};
use crate::core::catalog::{CatalogIssue, StratumCatalog, StratumDefinition};
use crate::core::classify::{ClassifierInputs, EmptyReason, StratumClassifier, StratumOutcome};
use crate::core::mosaic::{MosaicCombiner, MosaicStats};
use crate::io::{AlignedMetrics, MetricProvider, RasterSink, RegionSource, StratumProvider, StratumTable};
use crate::types::{GridSpec, MaturityResult, OutputRaster};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Stratum that produced no composite layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyStratum {
    pub index: usize,
    pub row_id: u64,
    pub reason: EmptyReason,
}

/// Cells contributed by one stratum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumCoverage {
    pub index: usize,
    pub row_id: u64,
    pub cells: usize,
}

/// Per-run report handed to the sink alongside the output raster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Strata resolved by the catalog
    pub strata_enumerated: usize,
    /// Strata that ran through the classifier, empty ones included
    pub strata_processed: usize,
    pub strata_contributing: usize,
    /// Strata skipped because cancellation was requested first
    pub strata_cancelled: usize,
    pub catalog_issues: Vec<CatalogIssue>,
    pub empty_strata: Vec<EmptyStratum>,
    pub coverage: Vec<StratumCoverage>,
    pub mosaic: MosaicStats,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunDiagnostics {
    pub fn strata_empty(&self) -> usize {
        self.empty_strata.len()
    }

    pub fn tie_break_cells(&self) -> usize {
        self.mosaic.tie_break_cells
    }

    pub fn to_json(&self) -> MaturityResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Output raster and diagnostics of one run
#[derive(Debug, Clone)]
pub struct MaturityRun {
    pub output: OutputRaster,
    pub diagnostics: RunDiagnostics,
}

/// Align, enumerate, classify per stratum, then reduce into one raster
pub struct MaturityPipeline {
    config: MaturityConfig,
    classifier: StratumClassifier,
}

impl MaturityPipeline {
    pub fn new(config: MaturityConfig) -> MaturityResult<Self> {
        let classifier = StratumClassifier::from_config(&config)?;
        Ok(Self { config, classifier })
    }

    pub fn config(&self) -> &MaturityConfig {
        &self.config
    }

    pub fn classifier(&self) -> &StratumClassifier {
        &self.classifier
    }

    /// Align raw layers onto the reference grid
    pub fn align(&self, reference: GridSpec, stack: &SourceStack<'_>) -> MaturityResult<AlignedMetrics> {
        GridAligner::new(reference, self.config.alignment.clone())?.align_stack(stack)
    }

    /// Catalog over a lookup table, restricted to the configured row window
    pub fn catalog<R: RegionSource>(&self, table: StratumTable, regions: R) -> StratumCatalog<R> {
        StratumCatalog::new(table, regions).with_window(self.config.row_window)
    }

    pub fn run<M, S>(&self, metrics: &M, strata: &S) -> MaturityResult<MaturityRun>
    where
        M: MetricProvider + ?Sized,
        S: StratumProvider + ?Sized,
    {
        self.run_with_cancel(metrics, strata, &AtomicBool::new(false))
    }

    /// Run and hand the result to a sink
    pub fn run_into<M, S, K>(&self, metrics: &M, strata: &S, sink: &mut K) -> MaturityResult<RunDiagnostics>
    where
        M: MetricProvider + ?Sized,
        S: StratumProvider + ?Sized,
        K: RasterSink + ?Sized,
    {
        let run = self.run(metrics, strata)?;
        sink.write(&run.output, &run.diagnostics)?;
        Ok(run.diagnostics)
    }

    /// Run, skipping strata not yet started once `cancel` is set.
    ///
    /// Layers of strata that finished still reach the mosaic.
    pub fn run_with_cancel<M, S>(&self, metrics: &M, strata: &S, cancel: &AtomicBool) -> MaturityResult<MaturityRun>
    where
        M: MetricProvider + ?Sized,
        S: StratumProvider + ?Sized,
    {
        self.run_with_progress(metrics, strata, cancel, &|_: &StratumDefinition, _: &StratumOutcome| {})
    }

    /// Cancellable run that reports each classified stratum to `progress`.
    ///
    /// `progress` is called from worker threads when the run is parallel.
    pub fn run_with_progress<M, S, P>(
        &self,
        metrics: &M,
        strata: &S,
        cancel: &AtomicBool,
        progress: &P,
    ) -> MaturityResult<MaturityRun>
    where
        M: MetricProvider + ?Sized,
        S: StratumProvider + ?Sized,
        P: Fn(&StratumDefinition, &StratumOutcome) + Sync,
    {
        let started_at = Utc::now();

        // Misaligned or missing layers invalidate every stratum
        let inputs = self.classifier.check_inputs(metrics)?;
        let listing = strata.strata()?;

        log::info!(
            "🌲 Classifying {} strata on {}x{} grid ({} catalog rows skipped)",
            listing.strata.len(),
            inputs.grid.rows,
            inputs.grid.cols,
            listing.issues.len()
        );

        let outcomes = if self.config.parallel {
            self.classify_parallel(&listing.strata, &inputs, cancel, progress)
        } else {
            self.classify_sequential(&listing.strata, &inputs, cancel, progress)
        };

        let combiner = MosaicCombiner::new(
            inputs.grid.clone(),
            self.config.output_nodata,
            self.config.score_range(),
        );
        let mut acc = combiner.accumulator();
        let mut diagnostics = RunDiagnostics {
            strata_enumerated: listing.strata.len(),
            catalog_issues: listing.issues,
            started_at: Some(started_at),
            ..RunDiagnostics::default()
        };

        for (stratum, outcome) in listing.strata.iter().zip(outcomes) {
            match outcome {
                None => diagnostics.strata_cancelled += 1,
                Some(StratumOutcome::Empty(reason)) => {
                    log::warn!("Stratum {} contributes nothing: {}", stratum.label(), reason);
                    diagnostics.strata_processed += 1;
                    diagnostics.empty_strata.push(EmptyStratum {
                        index: stratum.index,
                        row_id: stratum.row_id,
                        reason,
                    });
                }
                Some(StratumOutcome::Composite(layer)) => {
                    diagnostics.strata_processed += 1;
                    if acc.add(&layer)? {
                        diagnostics.strata_contributing += 1;
                        diagnostics.coverage.push(StratumCoverage {
                            index: stratum.index,
                            row_id: stratum.row_id,
                            cells: layer.valid_cells(),
                        });
                    }
                }
            }
        }

        if diagnostics.strata_cancelled > 0 {
            log::warn!(
                "Cancelled before {} of {} strata were classified",
                diagnostics.strata_cancelled,
                diagnostics.strata_enumerated
            );
        }

        let mosaic = combiner.finish(acc);
        diagnostics.mosaic = mosaic.stats;
        diagnostics.finished_at = Some(Utc::now());

        log::info!(
            "✅ Maturity run complete: {} processed, {} empty, {} contributing, {} tie-break cells",
            diagnostics.strata_processed,
            diagnostics.strata_empty(),
            diagnostics.strata_contributing,
            diagnostics.tie_break_cells()
        );

        Ok(MaturityRun {
            output: mosaic.raster,
            diagnostics,
        })
    }

    fn classify_one<P>(
        &self,
        stratum: &StratumDefinition,
        inputs: &ClassifierInputs<'_>,
        cancel: &AtomicBool,
        progress: &P,
    ) -> Option<StratumOutcome>
    where
        P: Fn(&StratumDefinition, &StratumOutcome) + Sync,
    {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        let outcome = self.classifier.classify_checked(stratum, inputs);
        progress(stratum, &outcome);
        Some(outcome)
    }

    fn classify_sequential<P>(
        &self,
        strata: &[StratumDefinition],
        inputs: &ClassifierInputs<'_>,
        cancel: &AtomicBool,
        progress: &P,
    ) -> Vec<Option<StratumOutcome>>
    where
        P: Fn(&StratumDefinition, &StratumOutcome) + Sync,
    {
        strata
            .iter()
            .map(|stratum| self.classify_one(stratum, inputs, cancel, progress))
            .collect()
    }

    /// Strata are independent; rayon keeps results in enumeration order
    #[cfg(feature = "parallel")]
    fn classify_parallel<P>(
        &self,
        strata: &[StratumDefinition],
        inputs: &ClassifierInputs<'_>,
        cancel: &AtomicBool,
        progress: &P,
    ) -> Vec<Option<StratumOutcome>>
    where
        P: Fn(&StratumDefinition, &StratumOutcome) + Sync,
    {
        use rayon::prelude::*;

        log::debug!("Dispatching strata on {} threads", rayon::current_num_threads());
        strata
            .par_iter()
            .map(|stratum| self.classify_one(stratum, inputs, cancel, progress))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn classify_parallel<P>(
        &self,
        strata: &[StratumDefinition],
        inputs: &ClassifierInputs<'_>,
        cancel: &AtomicBool,
        progress: &P,
    ) -> Vec<Option<StratumOutcome>>
    where
        P: Fn(&StratumDefinition, &StratumOutcome) + Sync,
    {
        self.classify_sequential(strata, inputs, cancel, progress)
    }
}
