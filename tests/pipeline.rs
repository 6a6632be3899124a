use cgraph_core::pipeline::{
    self, check_translation, filter_graph, quality_at_least, translate, BernoulliDropout, DropoutController,
    FixedDropout, PipelineError, TrainConfig,
};
use cgraph_core::symbolic::{Forest, OpTag};
use cgraph_core::{CompiledModel, PipelineConfig};
use ndarray::{array, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Three roots and a depth-3 feature built from two unselected intermediates.
fn forest() -> Forest {
    let mut f = Forest::new();
    let x = f.add_root("x", 1.0, 1.0).unwrap();
    let y = f.add_root("y", 2.0, 0.5).unwrap();
    let z = f.add_root("z", 1.0, 1.0).unwrap();
    let sq = f.add_node("x^2", OpTag::Square, &[x]).unwrap();
    let rec = f.add_node("1/y", OpTag::Reciprocal, &[y]).unwrap();
    let ratio = f.add_node("x^2:1/y", OpTag::Divide, &[sq, rec]).unwrap();
    let sqrt = f.add_node("sqrt(z)", OpTag::Sqrt, &[z]).unwrap();
    let diff = f.add_node("x-z", OpTag::Subtract, &[x, z]).unwrap();
    let lg = f.add_node("log(y)", OpTag::Log, &[y]).unwrap();
    f.set_scores(sq, 0.3, 0.2).unwrap();
    f.set_scores(rec, 0.4, -0.1).unwrap();
    f.set_scores(ratio, 0.998, 0.7).unwrap();
    f.set_scores(sqrt, 0.5, 0.4).unwrap();
    f.set_scores(diff, 0.991, -0.3).unwrap();
    f.set_scores(lg, 0.2, 0.1).unwrap();
    f
}

fn inputs() -> (Array2<f64>, Array1<f64>) {
    let x = array![
        [0.5, 1.0, 2.0],
        [1.0, 2.0, 1.0],
        [1.5, 0.5, 3.0],
        [2.0, 1.5, 0.5],
        [-1.0, 3.0, 1.5],
        [0.2, 2.5, 2.5],
    ];
    let y = x.rows().into_iter().map(|r| r[0] * r[0] * r[1] - 0.5 * (r[0] - r[2])).collect();
    (x, y)
}

#[test]
fn test_translate_validate_filter_train_predict() {
    init_logger();
    let f = forest();
    let (x, y) = inputs();

    let (mut graph, mapping) = translate(&f).unwrap();
    assert_eq!(mapping.len(), f.len());

    let report = check_translation(&f, &mut graph, &mapping, x.view()).unwrap();
    assert_eq!(report.checked(), f.len());
    assert!(report.max_discrepancy() <= 1e-5);

    let mut model = filter_graph(&f, graph, mapping, quality_at_least(0.99)).unwrap();
    let selected: Vec<&str> = model.selection().iter().map(|s| s.expr.as_str()).collect();
    assert_eq!(selected, vec!["x^2:1/y", "x-z"]);

    let g = model.graph();
    for expr in ["x", "y", "z", "x^2", "1/y", "x^2:1/y", "x-z"] {
        assert!(g.is_active(model.mapping().get(expr).unwrap()), "{} should be active", expr);
    }
    for expr in ["sqrt(z)", "log(y)"] {
        assert!(!g.is_active(model.mapping().get(expr).unwrap()), "{} should be bypassed", expr);
    }

    let rec = model.mapping().get("1/y").unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let config = TrainConfig { rate: 0.001, n_steps_batch: 50, n_batches: 3, resample: true, ..Default::default() };
    let trained = pipeline::optimize(&mut model, x.view(), y.view(), &config, None, &mut rng).unwrap();
    assert_eq!(trained.batches.len(), 3);
    assert_eq!(model.graph().params(rec).unwrap(), &[-1.0]);

    let yp = pipeline::predict(&mut model, None, x.view(), 1, &mut rng).unwrap();
    assert_eq!(yp.len(), x.nrows());
    assert!(yp.iter().all(|v| v.is_finite()));
}

#[test]
fn test_compile_with_config_and_dropout_ensemble() {
    init_logger();
    let f = forest();
    let (x, y) = inputs();
    let config = PipelineConfig::from_json_str(r#"{"quality_threshold": 0.995, "seed": 17}"#).unwrap();

    let mut model = CompiledModel::compile(&f, x.view(), &config).unwrap();
    assert_eq!(model.selection().len(), 1);
    assert_eq!(model.stats().n_selected, 1);

    let mut rng = config.rng();
    let mut dropout = BernoulliDropout::uniform(model.selection(), 0.8);
    pipeline::optimize(
        &mut model,
        x.view(),
        y.view(),
        &config.train,
        Some(&mut dropout as &mut dyn DropoutController),
        &mut rng,
    )
    .unwrap();

    let feature = model.selection().nodes()[0];
    let mut fixed = FixedDropout::new(vec![]);
    let a = pipeline::predict(&mut model, Some(&mut fixed), x.view(), 1, &mut rng).unwrap();
    let b = pipeline::predict(&mut model, Some(&mut fixed), x.view(), 4, &mut rng).unwrap();
    for (u, v) in a.iter().zip(&b) {
        assert!((u - v).abs() <= 1e-12 * u.abs().max(1.0));
    }

    // Dropping the only feature leaves the bias alone.
    let mut all = FixedDropout::new(vec![feature]);
    let bias = *model.graph().params(model.output()).unwrap().last().unwrap();
    let c = pipeline::predict(&mut model, Some(&mut all), x.view(), 3, &mut rng).unwrap();
    assert!(c.iter().all(|v| (v - bias).abs() < 1e-12));
}

#[test]
fn test_seeded_training_is_reproducible() {
    let f = forest();
    let (x, y) = inputs();
    let config = PipelineConfig { seed: Some(3), ..Default::default() };
    let train = TrainConfig { n_steps_batch: 10, n_batches: 4, resample: true, ..Default::default() };

    let run = || {
        let mut model = CompiledModel::compile(&f, x.view(), &config).unwrap();
        let mut rng = config.rng();
        pipeline::optimize(&mut model, x.view(), y.view(), &train, None, &mut rng).unwrap();
        model.graph().params(model.output()).unwrap().to_vec()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_forest_from_file_and_structural_errors() {
    let json = r#"[
        {"expr": "a", "op": "I", "is_root": true, "prefactor": 0.5, "unit_prefactor": 4.0},
        {"expr": "exp(a)", "op": "e", "parents": ["a"], "q": 0.999, "cov": 0.9}
    ]"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let f = Forest::from_path(file.path()).unwrap();
    let x = array![[0.0], [1.0], [2.0]];
    let model = CompiledModel::compile(&f, x.view(), &PipelineConfig::default()).unwrap();
    let root = model.mapping().get("a").unwrap();
    assert_eq!(model.graph().params(root).unwrap(), &[2.0, 0.0]);

    let none = filter_graph(&f, translate(&f).unwrap().0, translate(&f).unwrap().1, |_: &_| false).unwrap_err();
    assert_eq!(none, PipelineError::EmptySelection { candidates: 2 });

    let bad = r#"[{"expr": "a", "op": "?", "is_root": true}]"#;
    assert!(matches!(Forest::from_json(bad).unwrap_err(), cgraph_core::symbolic::ForestError::UnknownOperator(_)));
}

#[test]
fn test_saved_graph_reloads_with_trained_parameters() {
    let f = forest();
    let (x, y) = inputs();
    let mut model = CompiledModel::compile(&f, x.view(), &PipelineConfig::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    pipeline::optimize(&mut model, x.view(), y.view(), &TrainConfig::default(), None, &mut rng).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    model.graph().save(&path).unwrap();

    let mut restored = cgraph_core::PrimitiveGraph::load(&path).unwrap();
    restored.evaluate(x.view()).unwrap();
    let mut original = model.graph().clone();
    original.evaluate(x.view()).unwrap();
    assert_eq!(restored.vals(model.output()), original.vals(model.output()));
}
