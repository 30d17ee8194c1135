use geo::{polygon, Polygon};
use maturity::core::align::SourceStack;
use maturity::io::{AlignedMetrics, MemorySink, RegionLayer, StratumTable};
use maturity::types::{CoordinateSystem, GeoTransform, GridSpec, Metric, Raster};
use maturity::{MaturityConfig, MaturityPipeline};
use ndarray::{array, Array2};

const FOREST_A: i32 = 1;
const FOREST_B: i32 = 2;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn reference_grid() -> GridSpec {
    GridSpec::new(
        GeoTransform::north_up(0.0, 2.0, 1.0),
        CoordinateSystem::Projected { epsg: 5070 },
        2,
        6,
    )
}

fn rect(x0: f64, x1: f64) -> Polygon<f64> {
    polygon![(x: x0, y: 0.0), (x: x1, y: 0.0), (x: x1, y: 2.0), (x: x0, y: 2.0)]
}

fn regions() -> RegionLayer {
    RegionLayer::new()
        .with_region("West Half", rect(0.0, 3.0))
        .with_region("East Half", rect(3.0, 6.0))
}

fn table() -> StratumTable {
    StratumTable::from_json_str(
        r#"[
            { "ogc_fid": 2, "ecoregion_": "East Half", "dn": 2 },
            { "ogc_fid": 1, "ecoregion_": "West Half", "dn": 1 }
        ]"#,
    )
    .expect("valid table")
}

/// Left half is class A at a single value; right half is class B with a spread
/// of values. The last cell carries no forest type group at all.
fn forest_type() -> Array2<i32> {
    array![
        [FOREST_A, FOREST_A, FOREST_A, FOREST_B, FOREST_B, FOREST_B],
        [FOREST_A, FOREST_A, FOREST_A, FOREST_B, FOREST_B, 0],
    ]
}

fn metric_values() -> Array2<f32> {
    array![
        [50.0, 50.0, 50.0, 1.0, 10.0, 20.0],
        [50.0, 50.0, 50.0, 30.0, 40.0, 99.0],
    ]
}

fn aligned_inputs() -> AlignedMetrics {
    let grid = reference_grid();
    let mut metrics = AlignedMetrics::new(grid.clone())
        .with_forest_type(Raster::with_nodata(grid.clone(), forest_type(), 0).expect("forest type"));
    for metric in Metric::ALL {
        metrics.insert_metric(
            metric,
            Raster::from_data(grid.clone(), metric_values()).expect("metric"),
        );
    }
    metrics
}

fn expected() -> Array2<u8> {
    array![[12, 12, 12, 3, 6, 9], [12, 12, 12, 12, 12, 0]]
}

#[test]
fn test_two_strata_end_to_end() {
    init_logging();

    let pipeline = MaturityPipeline::new(MaturityConfig::default()).expect("valid config");
    let catalog = pipeline.catalog(table(), regions());
    let mut sink = MemorySink::new();

    let diagnostics = pipeline
        .run_into(&aligned_inputs(), &catalog, &mut sink)
        .expect("run succeeds");

    let output = sink.output.expect("sink received output");
    println!("Output:\n{:?}", output.data);
    assert_eq!(output.data, expected());
    assert_eq!(output.nodata, 0);
    assert_eq!(output.score_range(), (3, 12));

    assert_eq!(diagnostics.strata_enumerated, 2);
    assert_eq!(diagnostics.strata_contributing, 2);
    assert_eq!(diagnostics.mosaic.covered_cells, 11);
    assert_eq!(diagnostics.mosaic.conflict_cells, 0);
    assert!(diagnostics.catalog_issues.is_empty());
    assert!(diagnostics.started_at <= diagnostics.finished_at);
    assert_eq!(sink.diagnostics, Some(diagnostics));
}

#[test]
fn test_every_covered_cell_is_in_score_range() {
    init_logging();

    let pipeline = MaturityPipeline::new(MaturityConfig::default()).expect("valid config");
    let run = pipeline
        .run(&aligned_inputs(), &pipeline.catalog(table(), regions()))
        .expect("run succeeds");

    for &value in run.output.data.iter() {
        assert!(value == 0 || (3..=12).contains(&value), "unexpected score {}", value);
    }
}

#[test]
fn test_finer_sources_are_aggregated_before_classification() {
    init_logging();

    // Each reference cell covers a 2x2 block of source pixels
    let source_grid = GridSpec::new(
        GeoTransform::north_up(0.0, 2.0, 0.5),
        CoordinateSystem::Projected { epsg: 5070 },
        4,
        12,
    );
    let upsample = |coarse: &Array2<f32>| Array2::from_shape_fn((4, 12), |(r, c)| coarse[[r / 2, c / 2]]);
    let classes = forest_type();
    let fine_classes = Array2::from_shape_fn((4, 12), |(r, c)| classes[[r / 2, c / 2]]);

    let fine_metric = Raster::from_data(source_grid.clone(), upsample(&metric_values())).expect("metric");
    let fine_forest = Raster::with_nodata(source_grid, fine_classes, 0).expect("forest type");

    let pipeline = MaturityPipeline::new(MaturityConfig::default()).expect("valid config");
    let stack = SourceStack {
        metrics: Metric::ALL.iter().map(|&m| (m, &fine_metric)).collect(),
        forest_type: &fine_forest,
    };
    let aligned = pipeline.align(reference_grid(), &stack).expect("alignment");

    let run = pipeline
        .run(&aligned, &pipeline.catalog(table(), regions()))
        .expect("run succeeds");
    assert_eq!(run.output.data, expected());
}

#[test]
fn test_missing_metric_layer_is_fatal() {
    init_logging();

    let grid = reference_grid();
    let partial = AlignedMetrics::new(grid.clone())
        .with_forest_type(Raster::from_data(grid.clone(), forest_type()).expect("forest type"))
        .with_metric(Metric::Cover, Raster::from_data(grid, metric_values()).expect("metric"));

    let pipeline = MaturityPipeline::new(MaturityConfig::default()).expect("valid config");
    let result = pipeline.run(&partial, &pipeline.catalog(table(), regions()));
    assert!(matches!(result, Err(maturity::MaturityError::MissingLayer(_))));
}
