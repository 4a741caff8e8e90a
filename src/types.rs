/// Lectura de 3 ejes (x, y, z)
pub type Vec3 = [f64; 3];

/// Una muestra IMU a tasa fija: acelerómetro en m/s² (incluye gravedad)
/// y giroscopio en rad/s, con timestamp en segundos.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub timestamp: f64,
    pub acc: Vec3,
    pub gyro: Vec3,
}

impl Sample {
    pub fn new(timestamp: f64, acc: Vec3, gyro: Vec3) -> Self {
        Self {
            timestamp,
            acc,
            gyro,
        }
    }

    /// Norma euclídea de la aceleración
    pub fn acc_norm(&self) -> f64 {
        norm(&self.acc)
    }

    /// `false` si algún canal es NaN o infinito
    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite()
            && self.acc.iter().all(|v| v.is_finite())
            && self.gyro.iter().all(|v| v.is_finite())
    }

    /// Timestamp en nanosegundos (clave de los CSV del colector)
    pub fn timestamp_ns(&self) -> u64 {
        seconds_to_ns(self.timestamp)
    }
}

pub fn norm(v: &Vec3) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn seconds_to_ns(seconds: f64) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * 1_000_000_000.0).round() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumKind {
    Peak,
    Valley,
}

/// Extremo local confirmado por el detector con histéresis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    pub timestamp: f64,
    pub value: f64,
    pub kind: ExtremumKind,
}

/// Pico que superó el umbral de candidato y espera a que cierre su ventana
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePeak {
    pub timestamp: f64,
    pub value: f64,
}

/// Pico confirmado como máximo de su ventana simétrica
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedPeak {
    pub timestamp: f64,
    pub value: f64,
}

impl From<CandidatePeak> for SelectedPeak {
    fn from(c: CandidatePeak) -> Self {
        Self {
            timestamp: c.timestamp,
            value: c.value,
        }
    }
}

/// Constantes del sistema
pub const SAMPLE_TIME: f64 = 0.01; // s (100 Hz)
pub const SAMPLING_RATE: f64 = 100.0; // Hz
pub const EARTH_GRAVITY: f64 = 9.81; // m/s²
pub const HALF_WINDOW: usize = 30;
pub const WINDOW_SIZE: usize = 2 * HALF_WINDOW; // 60
pub const NUM_CHANNELS: usize = 6; // acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z
pub const TENSOR_LEN: usize = NUM_CHANNELS * WINDOW_SIZE; // 360
pub const IMU_BUFFER_CAPACITY: usize = 100;
pub const EXTREMA_HISTORY: usize = 100;

/// Etiquetas del modelo, en el orden de salida del clasificador
pub const GESTURE_LABELS: [&str; 9] = [
    "单击", "双击", "握拳", "左滑", "右滑", "鼓掌", "抖腕", "拍打", "日常",
];
