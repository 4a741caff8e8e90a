use std::collections::VecDeque;

use crate::types::{Extremum, ExtremumKind, EXTREMA_HISTORY};

/// Resultado de procesar una muestra: como mucho uno de los dos está presente
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Detection {
    pub peak: Option<Extremum>,
    pub valley: Option<Extremum>,
}

impl Detection {
    pub fn is_peak(&self) -> bool {
        self.peak.is_some()
    }

    pub fn is_valley(&self) -> bool {
        self.valley.is_some()
    }
}

/// Detector de picos y valles con histéresis. Alterna estrictamente entre
/// buscar un máximo y buscar un mínimo.
pub struct PeakDetector {
    delta: f64,
    looking_for_max: bool,
    running_min: f64,
    running_min_time: f64,
    running_max: f64,
    running_max_time: f64,
    peaks: VecDeque<Extremum>,
    valleys: VecDeque<Extremum>,
}

impl PeakDetector {
    pub fn new(delta: f64) -> Self {
        Self {
            delta,
            looking_for_max: true,
            running_min: f64::INFINITY,
            running_min_time: 0.0,
            running_max: f64::NEG_INFINITY,
            running_max_time: 0.0,
            peaks: VecDeque::with_capacity(EXTREMA_HISTORY),
            valleys: VecDeque::with_capacity(EXTREMA_HISTORY),
        }
    }

    pub fn detect(&mut self, timestamp: f64, value: f64) -> Detection {
        let mut detection = Detection::default();
        let half_delta = self.delta * 0.5;

        if self.looking_for_max {
            if value > self.running_max {
                self.running_max = value;
                self.running_max_time = timestamp;
            } else if (self.running_max - value) > self.delta
                || (value < self.running_max && (self.running_max - value) > half_delta)
            {
                let peak = Extremum {
                    timestamp: self.running_max_time,
                    value: self.running_max,
                    kind: ExtremumKind::Peak,
                };
                push_bounded(&mut self.peaks, peak);
                detection.peak = Some(peak);

                self.running_min = value;
                self.running_min_time = timestamp;
                self.looking_for_max = false;
            }
        } else if value < self.running_min {
            self.running_min = value;
            self.running_min_time = timestamp;
        } else if (value - self.running_min) > self.delta
            || (value > self.running_min && (value - self.running_min) > half_delta)
        {
            let valley = Extremum {
                timestamp: self.running_min_time,
                value: self.running_min,
                kind: ExtremumKind::Valley,
            };
            push_bounded(&mut self.valleys, valley);
            detection.valley = Some(valley);

            self.running_max = value;
            self.running_max_time = timestamp;
            self.looking_for_max = true;
        }

        detection
    }

    pub fn looking_for_max(&self) -> bool {
        self.looking_for_max
    }

    /// Últimos picos (máximo 100, el más antiguo primero)
    pub fn recent_peaks(&self) -> &VecDeque<Extremum> {
        &self.peaks
    }

    pub fn recent_valleys(&self) -> &VecDeque<Extremum> {
        &self.valleys
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.delta);
    }
}

fn push_bounded(history: &mut VecDeque<Extremum>, extremum: Extremum) {
    history.push_back(extremum);
    if history.len() > EXTREMA_HISTORY {
        history.pop_front();
    }
}
