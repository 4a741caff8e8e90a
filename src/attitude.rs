use vqf_rs::{Params, VQF};

use crate::types::{Vec3, SAMPLE_TIME};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn normalized(self) -> Self {
        let norm = self.norm().max(1e-12);

        let mut q = Self {
            w: self.w / norm,
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
        };

        // Representación canónica (w >= 0): q y -q son la misma rotación
        if q.w < 0.0 {
            q.w = -q.w;
            q.x = -q.x;
            q.y = -q.y;
            q.z = -q.z;
        }

        q
    }

    pub fn conjugate(self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    pub fn mul(self, rhs: Self) -> Self {
        Self {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    /// Rota `v` del marco del sensor al de referencia: q · v · q*
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Quaternion::new(0.0, v[0], v[1], v[2]);
        let r = self.mul(p).mul(self.conjugate());
        [r.x, r.y, r.z]
    }

    /// (w, x, y, z)
    pub fn to_array(self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<vqf_rs::Quaternion> for Quaternion {
    fn from(q: vqf_rs::Quaternion) -> Self {
        Quaternion::new(q.0, q.1, q.2, q.3).normalized()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttitudeParams {
    /// Constante de tiempo (s) del pasa-bajos del acelerómetro
    pub tau_acc: f64,
    /// Constante de tiempo (s) de los filtros de detección de reposo
    pub rest_filter_tau: f64,
    /// Umbral de desviación del giroscopio en reposo (°/s)
    pub rest_th_gyr: f64,
    /// Umbral de desviación del acelerómetro en reposo (m/s²)
    pub rest_th_acc: f64,
    /// Tiempo mínimo (s) quieto para declarar reposo
    pub rest_min_t: f64,
    /// Incertidumbre (°/s) de la medida de bias en reposo
    pub bias_sigma_rest: f64,
    /// Límite del bias estimado (°/s)
    pub bias_clip: f64,
}

impl Default for AttitudeParams {
    fn default() -> Self {
        Self {
            tau_acc: 3.0,
            rest_filter_tau: 0.5,
            rest_th_gyr: 2.0,
            rest_th_acc: 0.5,
            rest_min_t: 1.5,
            bias_sigma_rest: 0.03,
            bias_clip: 2.0,
        }
    }
}

impl AttitudeParams {
    fn to_vqf(self) -> Params {
        Params {
            tau_acc: self.tau_acc,
            rest_bias_est_enabled: true,
            // Sin magnetómetro
            mag_dist_rejection_enabled: false,
            rest_filter_tau: self.rest_filter_tau,
            rest_th_gyr: self.rest_th_gyr,
            rest_th_acc: self.rest_th_acc,
            rest_min_t: self.rest_min_t,
            bias_sigma_rest: self.bias_sigma_rest,
            bias_clip: self.bias_clip,
            ..Params::default()
        }
    }
}

/// Estimador de orientación 6D (giroscopio + acelerómetro) sobre VQF básico:
/// integración del giroscopio, corrección de inclinación con la gravedad
/// filtrada en un marco casi inercial y bias del giroscopio en reposo.
pub struct AttitudeEstimator {
    vqf: VQF,
}

impl AttitudeEstimator {
    pub fn new(params: AttitudeParams, sample_time: f64) -> Self {
        // VQF::new no admite periodos negativos
        let sample_time = if sample_time > 0.0 { sample_time } else { SAMPLE_TIME };
        Self {
            vqf: VQF::new(sample_time, Some(sample_time), None, Some(params.to_vqf())),
        }
    }

    /// Actualiza la orientación con una muestra. VQF trabaja con el periodo
    /// fijo de `new`; el `dt` real no se usa (el jitter se asume despreciable).
    pub fn update(&mut self, _dt: f64, gyro: Vec3, acc: Vec3) {
        self.vqf.update(gyro, acc, None);
    }

    /// Orientación actual (w, x, y, z), siempre normalizada
    pub fn current_quaternion(&self) -> Quaternion {
        self.vqf.quat_6d().into()
    }

    /// Bias del giroscopio (rad/s)
    pub fn bias_estimate(&self) -> Vec3 {
        self.vqf.bias_estimate().0
    }

    pub fn rest_detected(&self) -> bool {
        self.vqf.rest_detected()
    }

    pub fn reset(&mut self) {
        self.vqf.reset_state();
    }
}

impl Default for AttitudeEstimator {
    fn default() -> Self {
        Self::new(AttitudeParams::default(), SAMPLE_TIME)
    }
}
