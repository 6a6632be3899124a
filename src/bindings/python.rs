use crate::analysis::topology;
use crate::config::PipelineConfig;
use crate::display::trace;
use crate::pipeline::{self, BernoulliDropout, CompiledModel, DropoutController, PipelineError};
use crate::symbolic::{Forest, ForestIndex, OpTag};
use ndarray::{Array1, Array2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use rand::rngs::StdRng;

fn to_py_err(e: PipelineError) -> PyErr {
    match e {
        PipelineError::TranslationMismatch { .. } | PipelineError::Engine(_) => PyRuntimeError::new_err(e.to_string()),
        _ => PyValueError::new_err(e.to_string()),
    }
}

fn to_matrix(rows: Vec<Vec<f64>>) -> PyResult<Array2<f64>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, |r| r.len());
    if rows.iter().any(|r| r.len() != n_cols) {
        return Err(PyValueError::new_err("Feature matrix rows must have equal length"));
    }
    Array2::from_shape_vec((n_rows, n_cols), rows.into_iter().flatten().collect())
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

#[pyclass(name = "_Forest")]
#[derive(Debug, Clone, Default)]
pub struct PyForest {
    inner: Forest,
}

#[pymethods]
impl PyForest {
    #[new]
    pub fn new() -> Self { Self::default() }

    #[staticmethod]
    pub fn from_json(json: &str) -> PyResult<Self> {
        Forest::from_json(json)
            .map(|inner| Self { inner })
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    pub fn add_root(&mut self, expr: String, prefactor: f64, unit_prefactor: f64) -> PyResult<usize> {
        self.inner
            .add_root(expr, prefactor, unit_prefactor)
            .map(|i| i.index())
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    pub fn add_node(&mut self, expr: String, op_tag: &str, parents: Vec<usize>) -> PyResult<usize> {
        let op: OpTag = op_tag.parse().map_err(|e: crate::symbolic::ForestError| PyValueError::new_err(e.to_string()))?;
        let p: Vec<ForestIndex> = parents.into_iter().map(ForestIndex::new).collect();
        self.inner
            .add_node(expr, op, &p)
            .map(|i| i.index())
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    pub fn set_scores(&mut self, idx: usize, q: f64, cov: f64) -> PyResult<()> {
        self.inner
            .set_scores(ForestIndex::new(idx), q, cov)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    pub fn node_count(&self) -> usize { self.inner.len() }
}

#[pyclass(name = "_CompiledModel")]
#[derive(Debug, Clone)]
pub struct PyCompiledModel {
    inner: CompiledModel,
    config: PipelineConfig,
    rng: StdRng,
}

#[pymethods]
impl PyCompiledModel {
    /// Translates, validates and filters a forest. `config_json` overrides the defaults.
    #[staticmethod]
    #[pyo3(signature = (forest, x, config_json=None))]
    pub fn compile(forest: &PyForest, x: Vec<Vec<f64>>, config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(json) => PipelineConfig::from_json_str(json).map_err(to_py_err)?,
            None => PipelineConfig::default(),
        };
        let x = to_matrix(x)?;
        let inner = CompiledModel::compile(&forest.inner, x.view(), &config).map_err(to_py_err)?;
        let rng = config.rng();
        Ok(Self { inner, config, rng })
    }

    /// Trains with the configured schedule; returns the final loss of every batch.
    #[pyo3(signature = (x, y, keep_probability=None))]
    pub fn optimize(&mut self, x: Vec<Vec<f64>>, y: Vec<f64>, keep_probability: Option<f64>) -> PyResult<Vec<f64>> {
        let x = to_matrix(x)?;
        let y = Array1::from(y);
        let mut dropout = keep_probability.map(|p| BernoulliDropout::uniform(self.inner.selection(), p));
        let report = pipeline::optimize(
            &mut self.inner,
            x.view(),
            y.view(),
            &self.config.train,
            dropout.as_mut().map(|d| d as &mut dyn DropoutController),
            &mut self.rng,
        )
        .map_err(to_py_err)?;
        Ok(report.batches.iter().map(|b| b.final_loss).collect())
    }

    #[pyo3(signature = (x, n_estimators=None, keep_probability=None))]
    pub fn predict(&mut self, x: Vec<Vec<f64>>, n_estimators: Option<usize>, keep_probability: Option<f64>) -> PyResult<Vec<f64>> {
        let x = to_matrix(x)?;
        let n = n_estimators.unwrap_or(self.config.n_estimators);
        let mut dropout = keep_probability.map(|p| BernoulliDropout::uniform(self.inner.selection(), p));
        pipeline::predict(
            &mut self.inner,
            dropout.as_mut().map(|d| d as &mut dyn DropoutController),
            x.view(),
            n,
            &mut self.rng,
        )
        .map(|yp| yp.to_vec())
        .map_err(to_py_err)
    }

    pub fn selected(&self) -> Vec<String> {
        self.inner.selection().iter().map(|f| f.expr.clone()).collect()
    }

    pub fn trace_node(&self, expr: &str) -> PyResult<String> {
        let id = self
            .inner
            .mapping()
            .get(expr)
            .ok_or_else(|| PyValueError::new_err(format!("Unknown node '{}'", expr)))?;
        Ok(trace::format_trace(self.inner.graph(), id))
    }

    pub fn topological_order(&self) -> PyResult<Vec<usize>> {
        topology::sort(self.inner.graph().registry())
            .map(|v| v.into_iter().map(|id| id.index()).collect())
            .map_err(PyValueError::new_err)
    }

    pub fn save(&self, path: &str) -> PyResult<()> {
        self.inner.graph().save(path).map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    pub fn node_count(&self) -> usize { self.inner.graph().node_count() }
}
