use std::collections::BTreeMap;

use ani_core::BatchLoader;
use log::{debug, info};
use ndarray::Array1;
use tch::{Device, Kind};

use crate::container::{output, Container, Outputs};
use crate::{Error, Result};

/// Streaming metric over model outputs and reference targets.
pub trait Metric {
    fn name(&self) -> &str;

    fn reset(&mut self);

    fn update(&mut self, outputs: &Outputs, targets: &Array1<f64>) -> Result<()>;

    fn compute(&self) -> Result<f64>;
}

/// Root-mean-square error of output `key` against the target energies.
pub struct EnergyRmse {
    name: String,
    key: String,
    sum_squares: f64,
    count: usize,
}

impl EnergyRmse {
    pub fn new(key: impl Into<String>) -> Self {
        Self { name: "RMSE".to_string(), key: key.into(), sum_squares: 0.0, count: 0 }
    }
}

impl Metric for EnergyRmse {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) {
        self.sum_squares = 0.0;
        self.count = 0;
    }

    fn update(&mut self, outputs: &Outputs, targets: &Array1<f64>) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let predicted = output(outputs, &self.key)?
            .to_device(Device::Cpu)
            .to_kind(Kind::Double)
            .flatten(0, -1);
        let predicted = Vec::<f64>::try_from(predicted)?;
        if predicted.len() != targets.len() {
            return Err(Error::Shape(format!(
                "{} predictions for {} targets",
                predicted.len(),
                targets.len()
            )));
        }
        self.sum_squares += predicted
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| (p - t) * (p - t))
            .sum::<f64>();
        self.count += targets.len();
        Ok(())
    }

    fn compute(&self) -> Result<f64> {
        if self.count == 0 {
            return Err(Error::EmptyMetric(self.name.clone()));
        }
        Ok((self.sum_squares / self.count as f64).sqrt())
    }
}

/// Where an evaluation run stands once it returns.
#[derive(Debug, Default, Clone)]
pub struct EngineState {
    pub iteration: usize,
    pub conformations: usize,
    pub metrics: BTreeMap<String, f64>,
}

/// Single pass over a loader without gradients, feeding every metric.
pub struct Evaluator<'m> {
    model: &'m mut Container,
    metrics: Vec<Box<dyn Metric>>,
}

impl<'m> Evaluator<'m> {
    pub fn new(model: &'m mut Container, metrics: Vec<Box<dyn Metric>>) -> Self {
        Self { model, metrics }
    }

    pub fn run(&mut self, loader: &BatchLoader<'_>) -> Result<EngineState> {
        let mut state = EngineState::default();
        for metric in &mut self.metrics {
            metric.reset();
        }

        for batch in loader.iter() {
            let batch = batch?;
            let targets = batch.targets();
            state.iteration += 1;
            state.conformations += targets.len();

            let outputs = tch::no_grad(|| self.model.forward(batch.chunks))?;
            for metric in &mut self.metrics {
                metric.update(&outputs, &targets)?;
            }
            debug!("Batch {}/{}: {} conformations", state.iteration, loader.len(), targets.len());
        }

        for metric in &self.metrics {
            state.metrics.insert(metric.name().to_string(), metric.compute()?);
        }
        info!(
            "Evaluated {} conformations in {} batches",
            state.conformations, state.iteration
        );
        Ok(state)
    }
}
