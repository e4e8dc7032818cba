//! Named time-series plots with late-name arrival handling (spec §4.5).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct PlotSample {
    pub time: i64,
    pub value: f64,
}

/// A named plot series, sorted by time, with running extrema (spec §3 row
/// `PlotData`).
#[derive(Debug, Clone)]
pub struct Plot {
    pub name: Box<str>,
    pub samples: Vec<PlotSample>,
    pub min: f64,
    pub max: f64,
}

impl Plot {
    fn new(name: Box<str>) -> Self {
        Self { name, samples: Vec::new(), min: f64::INFINITY, max: f64::NEG_INFINITY }
    }

    fn push(&mut self, time: i64, value: f64) {
        let pos = self.samples.partition_point(|s| s.time <= time);
        self.samples.insert(pos, PlotSample { time, value });
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Holds all plots plus samples parked for a `name_ptr` that hasn't
/// resolved yet (spec §4.5: "if the plot name is not yet known the sample
/// is parked in a per-name pending queue").
#[derive(Debug, Default)]
pub struct PlotSet {
    by_ptr: HashMap<u64, usize>,
    plots: Vec<Plot>,
    pending: HashMap<u64, Vec<PlotSample>>,
}

impl PlotSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `PlotData(name_ptr, time, value)`: insert directly if the name has
    /// already resolved, otherwise park the sample.
    pub fn push_sample(&mut self, name_ptr: u64, time: i64, value: f64) {
        if let Some(&idx) = self.by_ptr.get(&name_ptr) {
            self.plots[idx].push(time, value);
        } else {
            self.pending.entry(name_ptr).or_default().push(PlotSample { time, value });
        }
    }

    /// The name string for `name_ptr` has arrived: create the plot and
    /// flush any parked samples in time order.
    pub fn resolve_name(&mut self, name_ptr: u64, name: Box<str>) {
        if self.by_ptr.contains_key(&name_ptr) {
            return;
        }
        let idx = self.plots.len();
        self.plots.push(Plot::new(name));
        self.by_ptr.insert(name_ptr, idx);

        if let Some(mut parked) = self.pending.remove(&name_ptr) {
            parked.sort_by_key(|s| s.time);
            for sample in parked {
                self.plots[idx].push(sample.time, sample.value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Plot> {
        self.plots.iter().find(|p| &*p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plot> {
        self.plots.iter()
    }
}
