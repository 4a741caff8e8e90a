use log::warn;
use thiserror::Error;

use crate::types::Vec3;

#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    #[error("Coeficientes vacíos")]
    EmptyCoefficients,

    #[error("a[0] no puede ser cero")]
    ZeroLeadingDenominator,

    #[error("Valor no finito en {0}")]
    NonFinite(&'static str),
}

/// Filtro IIR en forma directa con coeficientes fijos (b, a)
#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthFilter {
    b: Vec<f64>,
    a: Vec<f64>,
}

impl ButterworthFilter {
    pub fn new(b: Vec<f64>, a: Vec<f64>) -> Result<Self, FilterError> {
        if b.is_empty() || a.is_empty() {
            return Err(FilterError::EmptyCoefficients);
        }
        if b.iter().chain(a.iter()).any(|c| !c.is_finite()) {
            return Err(FilterError::NonFinite("coeficientes"));
        }
        if a[0] == 0.0 {
            return Err(FilterError::ZeroLeadingDenominator);
        }
        Ok(Self { b, a })
    }

    /// Pasa-banda de orden 4, fs = 100 Hz, 0.1-40 Hz (ruta de clasificación)
    pub fn standard() -> Self {
        Self {
            b: vec![0.63602426, 0.0, -1.27204851, 0.0, 0.63602426],
            a: vec![1.0, -0.84856511, -0.87090805, 0.31034215, 0.40923166],
        }
    }

    /// Banda baja del colector
    pub fn low_band() -> Self {
        Self {
            b: vec![0.04366836, 0.0, -0.08733672, 0.0, 0.04366836],
            a: vec![1.0, -3.31469991, 4.1362177, -2.32424114, 0.50276922],
        }
    }

    /// Banda media del colector
    pub fn mid_band() -> Self {
        Self {
            b: vec![0.27472685, 0.0, -0.5494537, 0.0, 0.27472685],
            a: vec![1.0, -0.87902961, 0.29755739, -0.17748527, 0.17253125],
        }
    }

    /// Pasa-altos de orden 2 del colector
    pub fn high_band() -> Self {
        Self {
            b: vec![0.17508764, -0.35017529, 0.17508764],
            a: vec![1.0, 0.51930341, 0.21965398],
        }
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    /// Longitud de relleno de `filtfilt`: 3 * (max(len b, len a) - 1)
    pub fn pad_len(&self) -> usize {
        3 * (self.b.len().max(self.a.len()) - 1)
    }

    /// Filtrado causal con estado inicial nulo:
    /// y[i] = (sum b[j]·x[i-j] - sum_{j>=1} a[j]·y[i-j]) / a[0]
    pub fn filter(&self, x: &[f64]) -> Result<Vec<f64>, FilterError> {
        let y = self.lfilter(x);
        if y.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::NonFinite("salida"));
        }
        Ok(y)
    }

    fn lfilter(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; x.len()];
        for i in 0..x.len() {
            let mut acc = 0.0;
            for (j, &bj) in self.b.iter().enumerate() {
                if j > i {
                    break;
                }
                acc += bj * x[i - j];
            }
            for (j, &aj) in self.a.iter().enumerate().skip(1) {
                if j > i {
                    break;
                }
                acc -= aj * y[i - j];
            }
            y[i] = acc / self.a[0];
        }
        y
    }

    /// Filtrado de fase cero: relleno por reflexión impar en ambos extremos,
    /// filtrado hacia delante, inversión, filtrado otra vez, inversión y recorte.
    /// Si la señal no supera el relleno, éste se reduce a `len - 1`.
    pub fn filtfilt(&self, x: &[f64]) -> Result<Vec<f64>, FilterError> {
        let n = x.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let pad = if n > self.pad_len() {
            self.pad_len()
        } else {
            n - 1
        };

        let first = x[0];
        let last = x[n - 1];
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
        extended.extend_from_slice(x);
        extended.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));

        let mut y = self.lfilter(&extended);
        y.reverse();
        let mut y = self.lfilter(&y);
        y.reverse();

        let out: Vec<f64> = y[pad..pad + n].to_vec();
        if out.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::NonFinite("salida"));
        }
        Ok(out)
    }

    /// Filtra cada eje por separado. Un eje que falla se sustituye por los
    /// valores crudos.
    pub fn filter_channels(&self, data: &[Vec3]) -> Vec<Vec3> {
        let mut out = data.to_vec();
        for axis in 0..3 {
            let channel: Vec<f64> = data.iter().map(|v| v[axis]).collect();
            match self.filter(&channel) {
                Ok(filtered) => {
                    for (row, value) in out.iter_mut().zip(filtered) {
                        row[axis] = value;
                    }
                }
                Err(e) => {
                    warn!("⚠️  Eje {} sin filtrar ({}), se usan datos crudos", axis, e);
                }
            }
        }
        out
    }
}

impl Default for ButterworthFilter {
    fn default() -> Self {
        Self::standard()
    }
}

/// Elimina la tendencia lineal por mínimos cuadrados
pub fn detrend(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return vec![0.0; n];
    }

    let nf = n as f64;
    let mean_t = (nf - 1.0) / 2.0;
    let mean_x = x.iter().sum::<f64>() / nf;

    let mut num = 0.0;
    let mut den = 0.0;
    for (t, &v) in x.iter().enumerate() {
        let dt = t as f64 - mean_t;
        num += dt * (v - mean_x);
        den += dt * dt;
    }
    let slope = num / den;
    let intercept = mean_x - slope * mean_t;

    x.iter()
        .enumerate()
        .map(|(t, &v)| v - (intercept + slope * t as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rustfft::{num_complex::Complex, FftPlanner};
    use std::f64::consts::PI;

    fn sine(freq: f64, len: usize, phase: f64) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / 100.0 + phase).sin())
            .collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    fn argmax(x: &[f64]) -> usize {
        let mut best = 0;
        for (i, &v) in x.iter().enumerate() {
            if v > x[best] {
                best = i;
            }
        }
        best
    }

    #[test]
    fn rejects_bad_coefficients() {
        assert_eq!(
            ButterworthFilter::new(vec![], vec![1.0]),
            Err(FilterError::EmptyCoefficients)
        );
        assert_eq!(
            ButterworthFilter::new(vec![1.0], vec![0.0, 1.0]),
            Err(FilterError::ZeroLeadingDenominator)
        );
        assert!(matches!(
            ButterworthFilter::new(vec![f64::NAN], vec![1.0]),
            Err(FilterError::NonFinite(_))
        ));
        assert!(ButterworthFilter::new(vec![1.0], vec![2.0]).is_ok());
    }

    #[test]
    fn passband_tone_preserved_in_window() {
        let filter = ButterworthFilter::standard();
        let x = sine(20.0, 60, 0.3);
        let y = filter.filter(&x).unwrap();
        let ratio = rms(&y[30..]) / rms(&x[30..]);
        assert!(ratio >= 0.9, "ratio = {}", ratio);
    }

    #[test]
    fn stopband_tone_attenuated_in_window() {
        let filter = ButterworthFilter::standard();
        let x = sine(48.0, 60, 0.3);
        let y = filter.filter(&x).unwrap();
        let ratio = rms(&y[30..]) / rms(&x[30..]);
        assert!(ratio <= 0.1, "ratio = {}", ratio);
    }

    #[test]
    fn spectral_gain_matches_band() {
        // 20 Hz y 48 Hz caen en bins exactos (N = 1000, fs = 100 Hz)
        let gains = tone_gains(&ButterworthFilter::standard(), &[20.0, 48.0]);
        assert!(gains[0] >= 0.9, "gain_20 = {}", gains[0]);
        assert!(gains[1] <= 0.1, "gain_48 = {}", gains[1]);
    }

    /// Ganancia en régimen estacionario para tonos en bins exactos (N = 1000)
    fn tone_gains(filter: &ButterworthFilter, freqs: &[f64]) -> Vec<f64> {
        let mut x = vec![0.0; 1500];
        for &f in freqs {
            for (acc, v) in x.iter_mut().zip(sine(f, 1500, 0.0)) {
                *acc += v;
            }
        }
        let y = filter.filter(&x).unwrap();

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(1000);
        let spectrum = |signal: &[f64]| {
            let mut buf: Vec<Complex<f64>> =
                signal.iter().map(|&v| Complex::new(v, 0.0)).collect();
            fft.process(&mut buf);
            buf
        };
        let sx = spectrum(&x[500..]);
        let sy = spectrum(&y[500..]);
        freqs
            .iter()
            .map(|f| {
                let bin = (f * 10.0).round() as usize;
                sy[bin].norm() / sx[bin].norm()
            })
            .collect()
    }

    #[test]
    fn mid_band_passes_middle_frequencies() {
        let gains = tone_gains(&ButterworthFilter::mid_band(), &[2.0, 20.0, 45.0]);
        assert!(gains[0] <= 0.1, "gain_2 = {}", gains[0]);
        assert!(gains[1] >= 0.9, "gain_20 = {}", gains[1]);
        assert!(gains[2] <= 0.1, "gain_45 = {}", gains[2]);
    }

    #[test]
    fn high_band_removes_slow_motion() {
        let filter = ButterworthFilter::high_band();
        let gains = tone_gains(&filter, &[5.0, 45.0]);
        assert!(gains[0] <= 0.05, "gain_5 = {}", gains[0]);
        assert!(gains[1] >= 0.9, "gain_45 = {}", gains[1]);

        // Sin componente continua
        let y = filter.filter(&[9.81; 300]).unwrap();
        assert_abs_diff_eq!(y[299], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn filtfilt_has_no_lag() {
        let filter = ButterworthFilter::low_band();
        let x: Vec<f64> = (0..200)
            .map(|i| {
                let d = i as f64 - 100.0;
                (-(d * d) / 18.0).exp()
            })
            .collect();

        let forward = filter.filter(&x).unwrap();
        let zero_phase = filter.filtfilt(&x).unwrap();

        assert!(argmax(&forward) > 101);
        assert!((argmax(&zero_phase) as i64 - 100).abs() < 1);
        assert_eq!(zero_phase.len(), x.len());
    }

    #[test]
    fn filtfilt_short_signal_shrinks_padding() {
        let filter = ButterworthFilter::standard();
        let y = filter.filtfilt(&[1.0, 2.0, 3.0, 2.0, 1.0]).unwrap();
        assert_eq!(y.len(), 5);
        assert!(filter.filtfilt(&[]).unwrap().is_empty());
        assert_eq!(filter.filtfilt(&[4.0]).unwrap().len(), 1);
    }

    #[test]
    fn non_finite_axis_falls_back_to_raw() {
        let filter = ButterworthFilter::standard();
        let mut data: Vec<Vec3> = (0..60).map(|i| [i as f64, 1.0, 2.0]).collect();
        data[10][1] = f64::NAN;

        let out = filter.filter_channels(&data);
        // Eje y: sustituido por los crudos (incluido el NaN)
        assert!(out[10][1].is_nan());
        assert_eq!(out[20][1], 1.0);
        // Ejes x y z filtrados
        assert_ne!(out[20][0], data[20][0]);
        assert!(out.iter().all(|row| row[2].is_finite()));
    }

    #[test]
    fn detrend_removes_linear_trend() {
        let x: Vec<f64> = (0..50).map(|t| 2.0 + 0.5 * t as f64).collect();
        for v in detrend(&x) {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-9);
        }

        let y: Vec<f64> = sine(5.0, 100, 0.0)
            .iter()
            .enumerate()
            .map(|(t, s)| s + 0.1 * t as f64 - 3.0)
            .collect();
        let d = detrend(&y);
        let mean = d.iter().sum::<f64>() / d.len() as f64;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
        assert!(d.iter().all(|v| v.abs() < 1.5));
    }
}
