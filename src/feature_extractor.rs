use crate::bandpass::ButterworthFilter;
use crate::gesture_classifier::ClassifierError;
use crate::types::{Sample, Vec3, EARTH_GRAVITY, TENSOR_LEN, WINDOW_SIZE};

/// Entrada del modelo más la ventana filtrada (para el volcado de diagnóstico)
#[derive(Debug, Clone)]
pub struct GestureFeatures {
    /// [1, 6, 60] aplanado por canal: acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z
    pub tensor: [f32; TENSOR_LEN],
    /// Aceleración filtrada en g, una fila por muestra
    pub filtered_acc: Vec<Vec3>,
}

pub struct FeatureExtractor {
    filter: ButterworthFilter,
}

impl FeatureExtractor {
    pub fn new(filter: ButterworthFilter) -> Self {
        Self { filter }
    }

    /// Construye el tensor de 360 valores a partir de una ventana de 60 muestras.
    /// La aceleración pasa por el pasa-banda y se convierte a g; el giroscopio
    /// entra crudo.
    pub fn extract(&self, window: &[Sample]) -> Result<GestureFeatures, ClassifierError> {
        if window.len() != WINDOW_SIZE {
            return Err(ClassifierError::InvalidFeatureSize {
                expected: WINDOW_SIZE,
                actual: window.len(),
            });
        }

        let acc: Vec<Vec3> = window.iter().map(|s| s.acc).collect();
        let filtered_acc: Vec<Vec3> = self
            .filter
            .filter_channels(&acc)
            .into_iter()
            .map(|row| row.map(|v| v / EARTH_GRAVITY))
            .collect();

        let mut tensor = [0.0f32; TENSOR_LEN];
        for axis in 0..3 {
            let acc_base = axis * WINDOW_SIZE;
            let gyro_base = (axis + 3) * WINDOW_SIZE;
            for (t, sample) in window.iter().enumerate() {
                tensor[acc_base + t] = filtered_acc[t][axis] as f32;
                tensor[gyro_base + t] = sample.gyro[axis] as f32;
            }
        }

        // Un NaN/Inf en la ventana no debe llegar al modelo
        if let Some(index) = tensor.iter().position(|v| !v.is_finite()) {
            return Err(ClassifierError::NonFiniteTensor { index });
        }

        Ok(GestureFeatures {
            tensor,
            filtered_acc,
        })
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(ButterworthFilter::standard())
    }
}
