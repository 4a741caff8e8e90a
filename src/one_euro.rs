use std::f64::consts::PI;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OneEuroParams {
    pub min_cutoff: f64,
    pub beta: f64,
    pub d_cutoff: f64,
}

impl Default for OneEuroParams {
    fn default() -> Self {
        Self {
            min_cutoff: 10.0,
            beta: 0.001,
            d_cutoff: 1.0,
        }
    }
}

/// Filtro one-euro sobre un escalar: pasa-bajos cuyo corte sube con la
/// velocidad de cambio de la señal.
#[derive(Clone, Debug)]
pub struct OneEuroFilter {
    params: OneEuroParams,
    prev_value: Option<f64>,
    prev_derivative: f64,
}

impl OneEuroFilter {
    pub fn new(params: OneEuroParams) -> Self {
        Self {
            params,
            prev_value: None,
            prev_derivative: 0.0,
        }
    }

    /// Filtra `value` tomado `dt` segundos después del anterior.
    /// La primera llamada devuelve la entrada tal cual.
    pub fn apply(&mut self, value: f64, dt: f64) -> f64 {
        let prev = match self.prev_value {
            Some(prev) => prev,
            None => {
                self.prev_value = Some(value);
                return value;
            }
        };

        let derivative = (value - prev) / dt;
        let derivative_smoothed = self.prev_derivative
            + alpha(self.params.d_cutoff, dt) * (derivative - self.prev_derivative);
        let cutoff = self.params.min_cutoff + self.params.beta * derivative_smoothed.abs();
        let filtered = prev + alpha(cutoff, dt) * (value - prev);

        self.prev_value = Some(filtered);
        self.prev_derivative = derivative_smoothed;
        filtered
    }

    /// Último valor filtrado (None antes de la primera muestra)
    pub fn value(&self) -> Option<f64> {
        self.prev_value
    }

    pub fn reset(&mut self) {
        self.prev_value = None;
        self.prev_derivative = 0.0;
    }
}

impl Default for OneEuroFilter {
    fn default() -> Self {
        Self::new(OneEuroParams::default())
    }
}

fn alpha(cutoff: f64, dt: f64) -> f64 {
    let tau = 1.0 / (2.0 * PI * cutoff);
    1.0 / (1.0 + tau / dt)
}
