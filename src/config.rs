use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::imu_buffer::ImuBuffer;
use crate::one_euro::OneEuroParams;
use crate::peak_selector::SelectorParams;
use crate::types::IMU_BUFFER_CAPACITY;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No se pudo leer la configuración {path:?}: {error}")]
    FileRead {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("TOML inválido: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON inválido: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Formato de configuración no soportado: {path:?}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Configuración inválida: {0}")]
    Invalid(String),
}

/// Configuración completa del pipeline. Inmutable durante la sesión salvo
/// `DetectionSettings`, que se aplica entre muestras.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    pub detection: DetectionConfig,
    pub classifier: ClassifierConfig,
    pub save: SaveConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_cutoff: f64,
    pub beta: f64,
    pub d_cutoff: f64,
    pub sample_time: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_cutoff: 10.0,
            beta: 0.001,
            d_cutoff: 1.0,
            sample_time: 0.01,
        }
    }
}

/// Señal que alimenta al detector de picos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSignal {
    /// Norma de la aceleración filtrada
    #[default]
    Norm,
    /// |norma - norma anterior| filtrada (colector del reloj)
    NormDelta,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub delta: f64,
    pub candidate_threshold: f64,
    pub peak_window: f64,
    /// Valor mínimo de un pico seleccionado para clasificarlo y contarlo
    pub peak_threshold: f64,
    pub strong_peak_threshold: f64,
    pub selected_history: usize,
    pub signal: DetectionSignal,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            delta: 0.3,
            candidate_threshold: 0.3,
            peak_window: 1.0,
            peak_threshold: 0.3,
            strong_peak_threshold: 10.0,
            selected_history: 1000,
            signal: DetectionSignal::Norm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub apply_softmax: bool,
    pub buffer_capacity: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            labels_path: None,
            apply_softmax: true,
            buffer_capacity: IMU_BUFFER_CAPACITY,
        }
    }
}

/// Qué salidas de diagnóstico se persisten. Los algoritmos no las leen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub peaks: bool,
    pub valleys: bool,
    pub selected_peaks: bool,
    pub quaternions: bool,
    pub gesture_data: bool,
    pub result_file: bool,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            peaks: false,
            valleys: false,
            selected_peaks: false,
            quaternions: false,
            gesture_data: false,
            result_file: true,
        }
    }
}

/// Ajustes que el usuario puede cambiar en caliente
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSettings {
    pub peak_threshold: f64,
    pub peak_window: f64,
}

impl DetectionSettings {
    /// Mismas reglas que `PipelineConfig::validate` para estos dos campos
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.peak_window.is_finite() && self.peak_window > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "detection.peak_window debe ser positivo (valor: {})",
                self.peak_window
            )));
        }
        if !self.peak_threshold.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "detection.peak_threshold debe ser finito (valor: {})",
                self.peak_threshold
            )));
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Carga TOML (`.toml`) o JSON (`.json`) según la extensión y valida
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|error| ConfigError::FileRead {
            path: path.to_path_buf(),
            error,
        })?;

        let config: PipelineConfig = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&contents)?,
            Some("json") => serde_json::from_str(&contents)?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("filter.sample_time", self.filter.sample_time),
            ("filter.min_cutoff", self.filter.min_cutoff),
            ("filter.d_cutoff", self.filter.d_cutoff),
            ("detection.peak_window", self.detection.peak_window),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} debe ser positivo (valor: {})",
                    name, value
                )));
            }
        }

        let non_negative = [
            ("filter.beta", self.filter.beta),
            ("detection.delta", self.detection.delta),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} no puede ser negativo (valor: {})",
                    name, value
                )));
            }
        }

        if self.detection.selected_history == 0 {
            return Err(ConfigError::Invalid(
                "detection.selected_history debe ser mayor que 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn one_euro_params(&self) -> OneEuroParams {
        OneEuroParams {
            min_cutoff: self.filter.min_cutoff,
            beta: self.filter.beta,
            d_cutoff: self.filter.d_cutoff,
        }
    }

    pub fn selector_params(&self) -> SelectorParams {
        SelectorParams {
            candidate_threshold: self.detection.candidate_threshold,
            peak_window: self.detection.peak_window,
            strong_peak_threshold: self.detection.strong_peak_threshold,
            selected_history: self.detection.selected_history,
        }
    }

    /// Capacidad real del buffer IMU para el `peak_window` configurado
    pub fn effective_buffer_capacity(&self) -> usize {
        ImuBuffer::required_capacity(
            self.classifier.buffer_capacity,
            self.detection.peak_window,
            self.filter.sample_time,
        )
    }

    pub fn detection_settings(&self) -> DetectionSettings {
        DetectionSettings {
            peak_threshold: self.detection.peak_threshold,
            peak_window: self.detection.peak_window,
        }
    }
}
