//! Built-in simulation modules
//!
//! Signal generators for demos and tests: a sine wave and a monotonic
//! counter. Both emit a small fixed-shape subtree each cycle, which makes
//! them convenient fixtures for exercising the full producer-to-node-space
//! pipeline without any external data source.

use crate::error::{BridgeError, Result};
use crate::module::contract::{DataModule, ModuleFactory, ModuleSpec};
use crate::module::registry::DEFAULT_MODULE_INTERVAL;
use crate::snapshot::{Quality, SnapshotTree};
use chrono::Utc;
use std::time::Duration;

fn interval_from(spec: &ModuleSpec) -> Duration {
    spec.interval_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_MODULE_INTERVAL)
}

fn space_from(spec: &ModuleSpec) -> Result<String> {
    spec.space_name
        .clone()
        .ok_or_else(|| BridgeError::Config("module manifest is missing a space name".to_string()))
}

/// Sine wave generator
pub struct SineModule {
    space_name: String,
    interval: Duration,
    amplitude: f64,
    period: Duration,
    cycles: u64,
}

impl SineModule {
    /// Create a generator with a 10 s period and unit amplitude
    pub fn new(space_name: impl Into<String>) -> Self {
        Self {
            space_name: space_name.into(),
            interval: DEFAULT_MODULE_INTERVAL,
            amplitude: 1.0,
            period: Duration::from_secs(10),
            cycles: 0,
        }
    }

    /// Override the cycle interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Override the wave amplitude
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Override the wave period
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

impl DataModule for SineModule {
    fn space_name(&self) -> &str {
        &self.space_name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn produce(&mut self) -> Result<SnapshotTree> {
        let elapsed = self.interval.as_secs_f64() * self.cycles as f64;
        let phase = elapsed / self.period.as_secs_f64();
        let value = self.amplitude * (phase * std::f64::consts::TAU).sin();
        self.cycles += 1;

        let now = Utc::now();
        let mut tree = SnapshotTree::new();
        let signal = tree.add_folder(None, "signal")?;
        tree.add_variable(Some(signal), "sine", format!("{value}"), now, Quality::Good)?;
        tree.add_variable(
            Some(signal),
            "amplitude",
            format!("{}", self.amplitude),
            now,
            Quality::Good,
        )?;
        tree.add_variable(None, "cycles", format!("{}", self.cycles), now, Quality::Good)?;
        Ok(tree)
    }
}

/// Builds [`SineModule`]s from `amplitude` and `period_ms` parameters
pub struct SineFactory;

impl ModuleFactory for SineFactory {
    fn name(&self) -> &str {
        "sine"
    }

    fn create(&self, spec: &ModuleSpec) -> Result<Box<dyn DataModule>> {
        let mut module = SineModule::new(space_from(spec)?).with_interval(interval_from(spec));
        if let Some(amplitude) = spec.param_f64("amplitude") {
            module = module.with_amplitude(amplitude);
        }
        if let Some(period_ms) = spec.param_f64("period_ms") {
            module = module.with_period(Duration::from_millis(period_ms as u64));
        }
        Ok(Box::new(module))
    }
}

/// Monotonic counter
pub struct CounterModule {
    space_name: String,
    interval: Duration,
    count: u64,
}

impl CounterModule {
    /// Create a counter starting at zero
    pub fn new(space_name: impl Into<String>) -> Self {
        Self {
            space_name: space_name.into(),
            interval: DEFAULT_MODULE_INTERVAL,
            count: 0,
        }
    }

    /// Override the cycle interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl DataModule for CounterModule {
    fn space_name(&self) -> &str {
        &self.space_name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn produce(&mut self) -> Result<SnapshotTree> {
        self.count += 1;
        let mut tree = SnapshotTree::new();
        tree.add_variable(None, "count", format!("{}", self.count), Utc::now(), Quality::Good)?;
        Ok(tree)
    }
}

/// Builds [`CounterModule`]s
pub struct CounterFactory;

impl ModuleFactory for CounterFactory {
    fn name(&self) -> &str {
        "counter"
    }

    fn create(&self, spec: &ModuleSpec) -> Result<Box<dyn DataModule>> {
        Ok(Box::new(
            CounterModule::new(space_from(spec)?).with_interval(interval_from(spec)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_emits_expected_shape() {
        let mut module = SineModule::new("gen").with_amplitude(2.0);
        let tree = module.produce().unwrap();
        let paths: Vec<&str> = tree.breadth_first().map(|(_, n)| n.path()).collect();
        assert_eq!(paths, vec!["signal", "cycles", "signal/sine", "signal/amplitude"]);
    }

    #[test]
    fn test_sine_starts_at_zero() {
        let mut module = SineModule::new("gen");
        let tree = module.produce().unwrap();
        let sine = tree
            .breadth_first()
            .find(|(_, n)| n.path() == "signal/sine")
            .unwrap()
            .1;
        let value: f64 = sine.value.as_deref().unwrap().parse().unwrap();
        assert!(value.abs() < 1e-9);
    }

    #[test]
    fn test_counter_is_monotonic() {
        let mut module = CounterModule::new("tick");
        let first = module.produce().unwrap();
        let second = module.produce().unwrap();
        let read = |tree: &SnapshotTree| -> u64 {
            tree.node(0).value.as_deref().unwrap().parse().unwrap()
        };
        assert_eq!(read(&first), 1);
        assert_eq!(read(&second), 2);
    }

    #[test]
    fn test_factory_requires_space_name() {
        let spec: ModuleSpec = toml::from_str("factory = \"counter\"").unwrap();
        assert!(CounterFactory.create(&spec).is_err());
    }
}
