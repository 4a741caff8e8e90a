use std::collections::VecDeque;

use log::{debug, info};

use crate::types::{CandidatePeak, SelectedPeak};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectorParams {
    /// Valor mínimo de un pico para entrar como candidato
    pub candidate_threshold: f64,
    /// Semiancho (s) de la ventana simétrica de supresión
    pub peak_window: f64,
    /// Valor por encima del cual la selección es además "pico fuerte"
    pub strong_peak_threshold: f64,
    /// Máximo de picos seleccionados retenidos
    pub selected_history: usize,
}

impl Default for SelectorParams {
    fn default() -> Self {
        Self {
            candidate_threshold: 0.3,
            peak_window: 1.0,
            strong_peak_threshold: 10.0,
            selected_history: 1000,
        }
    }
}

/// Veredicto sobre un candidato cuya ventana ya se cerró
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Selection {
    pub peak: SelectedPeak,
    pub strong: bool,
}

/// Supresión de no-máximos en ventana simétrica [t - W, t + W].
///
/// Los candidatos esperan en una cola hasta que pasa `t + W`; una pila
/// monótona (decreciente en valor, creciente en tiempo) responde si algún
/// candidato vecino es mayor. Un candidato sólo sale de la pila cuando queda
/// a la izquierda de la ventana del que se está resolviendo, así que un
/// vecino mayor ya resuelto (seleccionado o no) sigue suprimiendo.
pub struct PeakSelector {
    params: SelectorParams,
    candidates: VecDeque<CandidatePeak>,
    stack: VecDeque<CandidatePeak>,
    last_selected_time: f64,
    selected: VecDeque<SelectedPeak>,
}

impl PeakSelector {
    pub fn new(params: SelectorParams) -> Self {
        Self {
            params,
            candidates: VecDeque::new(),
            stack: VecDeque::new(),
            last_selected_time: f64::NEG_INFINITY,
            selected: VecDeque::new(),
        }
    }

    /// Registra un pico detectado. Devuelve `false` si no supera el umbral
    /// de candidato.
    pub fn push_candidate(&mut self, timestamp: f64, value: f64) -> bool {
        if value <= self.params.candidate_threshold {
            return false;
        }

        let candidate = CandidatePeak { timestamp, value };
        self.candidates.push_back(candidate);

        while let Some(back) = self.stack.back() {
            if back.value <= value {
                self.stack.pop_back();
            } else {
                break;
            }
        }
        self.stack.push_back(candidate);
        true
    }

    /// Resuelve, en orden, los candidatos cuya ventana terminó antes de
    /// `current_time`.
    pub fn check(&mut self, current_time: f64) -> Vec<Selection> {
        let window = self.params.peak_window;
        let mut out = Vec::new();
        let mut i = 0;

        while i < self.candidates.len() {
            let candidate = self.candidates[i];
            if current_time < candidate.timestamp + window {
                i += 1;
                continue;
            }

            // Fuera de la ventana por la izquierda
            while let Some(front) = self.stack.front() {
                if front.timestamp < candidate.timestamp - window {
                    self.stack.pop_front();
                } else {
                    break;
                }
            }

            let is_max = !self.stack.iter().any(|entry| {
                (entry.timestamp - candidate.timestamp).abs() <= window
                    && entry.value > candidate.value
            });

            if is_max && candidate.timestamp - self.last_selected_time >= window {
                self.last_selected_time = candidate.timestamp;
                let peak = SelectedPeak::from(candidate);
                self.push_selected(peak);

                let strong = candidate.value > self.params.strong_peak_threshold;
                if strong {
                    info!("💥 Pico fuerte {:.3} en t={:.3}s", peak.value, peak.timestamp);
                } else {
                    info!("✅ Pico seleccionado {:.3} en t={:.3}s", peak.value, peak.timestamp);
                }
                out.push(Selection { peak, strong });
            } else {
                debug!(
                    "Candidato descartado {:.3} en t={:.3}s (max={}, separación={:.3}s)",
                    candidate.value,
                    candidate.timestamp,
                    is_max,
                    candidate.timestamp - self.last_selected_time
                );
            }

            // Los ya resueltos siguen en la pila hasta salir de la ventana
            self.candidates.remove(i);
        }

        out
    }

    /// Fin de sesión: ninguna muestra futura puede superar a los pendientes
    pub fn flush(&mut self) -> Vec<Selection> {
        self.check(f64::INFINITY)
    }

    fn push_selected(&mut self, peak: SelectedPeak) {
        self.selected.push_back(peak);
        while self.selected.len() > self.params.selected_history {
            self.selected.pop_front();
        }
    }

    pub fn selected_peaks(&self) -> &VecDeque<SelectedPeak> {
        &self.selected
    }

    pub fn drain_selected(&mut self) -> Vec<SelectedPeak> {
        self.selected.drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.candidates.len()
    }

    pub fn set_window(&mut self, peak_window: f64) {
        self.params.peak_window = peak_window;
    }

    pub fn params(&self) -> &SelectorParams {
        &self.params
    }

    pub fn reset(&mut self) {
        self.candidates.clear();
        self.stack.clear();
        self.selected.clear();
        self.last_selected_time = f64::NEG_INFINITY;
    }
}

impl Default for PeakSelector {
    fn default() -> Self {
        Self::new(SelectorParams::default())
    }
}
