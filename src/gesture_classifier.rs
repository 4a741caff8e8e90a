use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::config::ClassifierConfig;
use crate::feature_extractor::FeatureExtractor;
use crate::imu_buffer::{ImuBuffer, WindowError};
use crate::types::{Sample, Vec3, GESTURE_LABELS, HALF_WINDOW, TENSOR_LEN};

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    OnnxError(#[from] ort::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid feature size: expected {expected}, got {actual}")]
    InvalidFeatureSize { expected: usize, actual: usize },

    #[error("Non-finite value in tensor at index {index}")]
    NonFiniteTensor { index: usize },

    #[error("No output tensor found")]
    NoOutputTensor,

    #[error("Missing ONNX {kind}")]
    MissingIo { kind: &'static str },

    #[error("Classifier support not compiled in (feature `{0}`)")]
    Unsupported(&'static str),
}

/// Modelo preentrenado opaco: tensor [1, 6, 60] → distribución sobre las clases
pub trait Classifier: Send {
    fn predict(&mut self, tensor: &[f32; TENSOR_LEN]) -> Result<Vec<f32>, ClassifierError>;
}

#[derive(Debug, Deserialize)]
struct ClassesJson {
    index_to_class: HashMap<String, String>,
}

/// Lee `{"index_to_class": {"0": "单击", ...}}` y devuelve las etiquetas por índice
pub fn load_classes(path: impl AsRef<Path>) -> Result<Vec<String>, ClassifierError> {
    let content = fs::read_to_string(path)?;
    let data: ClassesJson = serde_json::from_str(&content)?;

    let mut pairs: Vec<(usize, String)> = data
        .index_to_class
        .into_iter()
        .filter_map(|(k, v)| k.parse::<usize>().ok().map(|idx| (idx, v)))
        .collect();

    pairs.sort_by_key(|(idx, _)| *idx);
    Ok(pairs.into_iter().map(|(_, name)| name).collect())
}

pub fn default_labels() -> Vec<String> {
    GESTURE_LABELS.iter().map(|s| s.to_string()).collect()
}

fn labels_or_default(labels: Vec<String>) -> Vec<String> {
    if labels.is_empty() {
        default_labels()
    } else {
        labels
    }
}

/// Softmax numéricamente estable
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Índice y valor del máximo; en caso de empate gana el primero
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in scores.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

/// Construye el clasificador configurado. `Ok(None)` si no hay modelo.
pub fn load_classifier(
    config: &ClassifierConfig,
) -> Result<Option<Box<dyn Classifier>>, ClassifierError> {
    let Some(model_path) = config.model_path.as_ref() else {
        return Ok(None);
    };

    #[cfg(feature = "onnx")]
    {
        let classifier = OnnxClassifier::new(&model_path.to_string_lossy(), config.apply_softmax)?;
        Ok(Some(Box::new(classifier)))
    }

    #[cfg(not(feature = "onnx"))]
    {
        warn!(
            "Modelo {:?} configurado pero el binario no incluye la feature `onnx`",
            model_path
        );
        Err(ClassifierError::Unsupported("onnx"))
    }
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::{softmax, Classifier, ClassifierError};
    use crate::types::{NUM_CHANNELS, TENSOR_LEN, WINDOW_SIZE};
    use log::info;
    use ort::session::Session;
    use ort::tensor::TensorElementType;
    use ort::value::ValueType;

    pub struct OnnxClassifier {
        session: Session,
        input_name: String,
        prob_output_name: String,
        apply_softmax: bool,
    }

    impl OnnxClassifier {
        pub fn new(model_path: &str, apply_softmax: bool) -> Result<Self, ClassifierError> {
            let session = Session::builder()?.commit_from_file(model_path)?;

            let input_name = session
                .inputs
                .first()
                .map(|input| input.name.clone())
                .ok_or(ClassifierError::MissingIo { kind: "input" })?;

            let prob_output_name = session
                .outputs
                .iter()
                .find(|output| {
                    matches!(
                        output.output_type,
                        ValueType::Tensor {
                            ty: TensorElementType::Float32,
                            ..
                        }
                    )
                })
                .or_else(|| session.outputs.first())
                .map(|output| output.name.clone())
                .ok_or(ClassifierError::MissingIo { kind: "output" })?;

            info!("[ONNX] Modelo cargado: {}", model_path);
            info!("[ONNX] Input: {} / Output: {}", input_name, prob_output_name);

            Ok(Self {
                session,
                input_name,
                prob_output_name,
                apply_softmax,
            })
        }
    }

    impl Classifier for OnnxClassifier {
        fn predict(&mut self, tensor: &[f32; TENSOR_LEN]) -> Result<Vec<f32>, ClassifierError> {
            // [1, 6, 60], canal por canal
            let shape = vec![1_usize, NUM_CHANNELS, WINDOW_SIZE];
            let input_value = ort::value::Value::from_array((shape, tensor.to_vec()))?;

            let outputs = self.session.run(ort::inputs![
                self.input_name.as_str() => &input_value,
            ])?;

            let (shape, data) =
                outputs[self.prob_output_name.as_str()].try_extract_tensor::<f32>()?;
            let num_classes = if shape.len() >= 2 {
                shape[1] as usize
            } else {
                shape.first().copied().unwrap_or(0) as usize
            };
            if num_classes == 0 || data.len() < num_classes {
                return Err(ClassifierError::NoOutputTensor);
            }

            let scores = &data[..num_classes];
            if self.apply_softmax {
                Ok(softmax(scores))
            } else {
                Ok(scores.to_vec())
            }
        }
    }
}

/// Gesto reconocido en un pico seleccionado
#[derive(Debug, Clone, PartialEq)]
pub struct GestureResult {
    /// Número de gesto en la sesión, el mismo que el del volcado
    pub index: usize,
    pub label: String,
    pub confidence: f64,
    pub peak_timestamp: f64,
    pub peak_value: f64,
}

/// Ventana cruda + filtrada con la predicción, numerada por sesión
#[derive(Debug, Clone, PartialEq)]
pub struct GestureWindowDump {
    pub index: usize,
    pub raw: Vec<Sample>,
    pub filtered_acc: Vec<Vec3>,
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    InsufficientContext { before: usize, after: usize },
    PeakNotBuffered,
    InvalidTensor(String),
    PredictionFailed(String),
    EmptyOutput,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Recognized(GestureResult),
    Skipped(SkipReason),
    /// Sin modelo cargado: sólo detección
    Unavailable,
}

impl Classification {
    pub fn result(&self) -> Option<&GestureResult> {
        match self {
            Classification::Recognized(result) => Some(result),
            _ => None,
        }
    }
}

/// Ventana centrada en cada pico seleccionado → clasificador
pub struct GestureGate {
    buffer: ImuBuffer,
    classifier: Option<Box<dyn Classifier>>,
    extractor: FeatureExtractor,
    labels: Vec<String>,
    gesture_count: usize,
    last_dump: Option<GestureWindowDump>,
    warned_unavailable: bool,
}

impl GestureGate {
    pub fn new(
        buffer_capacity: usize,
        classifier: Option<Box<dyn Classifier>>,
        labels: Vec<String>,
    ) -> Self {
        Self {
            buffer: ImuBuffer::new(buffer_capacity),
            classifier,
            extractor: FeatureExtractor::default(),
            labels: labels_or_default(labels),
            gesture_count: 0,
            last_dump: None,
            warned_unavailable: false,
        }
    }

    pub fn on_sample(&mut self, sample: Sample) {
        self.buffer.push(sample);
    }

    pub fn on_selected_peak(&mut self, peak_timestamp: f64, peak_value: f64) -> Classification {
        let Some(classifier) = self.classifier.as_mut() else {
            if !self.warned_unavailable {
                warn!("⚠️  Clasificador no disponible: sólo detección de picos");
                self.warned_unavailable = true;
            }
            return Classification::Unavailable;
        };

        let window = match self.buffer.centered_window(peak_timestamp, HALF_WINDOW) {
            Ok(window) => window,
            Err(WindowError::InsufficientContext { before, after }) => {
                debug!(
                    "Pico en t={:.3}s sin contexto suficiente ({} antes, {} después)",
                    peak_timestamp, before, after
                );
                return Classification::Skipped(SkipReason::InsufficientContext { before, after });
            }
            Err(WindowError::PeakNotBuffered) => {
                debug!("Pico en t={:.3}s fuera del buffer", peak_timestamp);
                return Classification::Skipped(SkipReason::PeakNotBuffered);
            }
        };

        let features = match self.extractor.extract(&window) {
            Ok(features) => features,
            Err(e) => {
                warn!("Tensor inválido: {}", e);
                return Classification::Skipped(SkipReason::InvalidTensor(e.to_string()));
            }
        };

        let scores = match classifier.predict(&features.tensor) {
            Ok(scores) => scores,
            Err(e) => {
                warn!("❌ Error clasificando: {}", e);
                return Classification::Skipped(SkipReason::PredictionFailed(e.to_string()));
            }
        };

        let Some((idx, score)) = argmax(&scores) else {
            return Classification::Skipped(SkipReason::EmptyOutput);
        };

        let label = self
            .labels
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", idx));
        let confidence = score as f64;

        self.gesture_count += 1;
        info!(
            "🎯 Gesto #{} {} ({:.1}%) en t={:.3}s",
            self.gesture_count,
            label,
            confidence * 100.0,
            peak_timestamp
        );

        self.last_dump = Some(GestureWindowDump {
            index: self.gesture_count,
            raw: window,
            filtered_acc: features.filtered_acc,
            label: label.clone(),
            confidence,
        });

        Classification::Recognized(GestureResult {
            index: self.gesture_count,
            label,
            confidence,
            peak_timestamp,
            peak_value,
        })
    }

    /// Volcado de la última ventana clasificada (se consume)
    pub fn take_last_dump(&mut self) -> Option<GestureWindowDump> {
        self.last_dump.take()
    }

    pub fn is_available(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn gesture_count(&self) -> usize {
        self.gesture_count
    }

    pub fn reset_count(&mut self) {
        self.gesture_count = 0;
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn set_labels(&mut self, labels: Vec<String>) {
        self.labels = labels_or_default(labels);
    }

    pub fn buffer(&self) -> &ImuBuffer {
        &self.buffer
    }

    pub fn set_buffer_capacity(&mut self, capacity: usize) {
        self.buffer.set_capacity(capacity);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_dump = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WINDOW_SIZE;

    struct FixedScores(Vec<f32>);

    impl Classifier for FixedScores {
        fn predict(&mut self, _tensor: &[f32; TENSOR_LEN]) -> Result<Vec<f32>, ClassifierError> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl Classifier for Failing {
        fn predict(&mut self, _tensor: &[f32; TENSOR_LEN]) -> Result<Vec<f32>, ClassifierError> {
            Err(ClassifierError::NoOutputTensor)
        }
    }

    fn filled_gate(classifier: Option<Box<dyn Classifier>>, samples: usize) -> GestureGate {
        let mut gate = GestureGate::new(100, classifier, Vec::new());
        for i in 0..samples {
            gate.on_sample(Sample::new(i as f64 * 0.01, [0.0, 0.0, 9.81], [0.0; 3]));
        }
        gate
    }

    #[test]
    fn argmax_first_max_wins() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), Some((1, 0.4)));
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[f32::NAN, 0.2]), Some((1, 0.2)));
    }

    #[test]
    fn softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn recognizes_with_exact_context() {
        let mut scores = vec![0.0; 9];
        scores[0] = 0.99;
        let mut gate = filled_gate(Some(Box::new(FixedScores(scores))), WINDOW_SIZE);

        let result = gate.on_selected_peak(0.30, 5.0);
        let gesture = result.result().unwrap();
        assert_eq!(gesture.label, "单击");
        assert!((gesture.confidence - 0.99).abs() < 1e-6);
        assert_eq!(gesture.peak_value, 5.0);

        let dump = gate.take_last_dump().unwrap();
        assert_eq!(dump.index, 1);
        assert_eq!(dump.raw.len(), WINDOW_SIZE);
        assert_eq!(dump.filtered_acc.len(), WINDOW_SIZE);
        assert!(gate.take_last_dump().is_none());
    }

    #[test]
    fn skips_without_context() {
        let mut gate = filled_gate(Some(Box::new(FixedScores(vec![1.0]))), WINDOW_SIZE);
        assert_eq!(
            gate.on_selected_peak(0.29, 5.0),
            Classification::Skipped(SkipReason::InsufficientContext {
                before: 29,
                after: 31
            })
        );
        assert_eq!(gate.gesture_count(), 0);
    }

    #[test]
    fn unavailable_without_model() {
        let mut gate = filled_gate(None, WINDOW_SIZE);
        assert_eq!(gate.on_selected_peak(0.30, 5.0), Classification::Unavailable);
        assert_eq!(gate.on_selected_peak(0.30, 5.0), Classification::Unavailable);
        assert!(!gate.is_available());
    }

    #[test]
    fn prediction_errors_are_skips() {
        let mut gate = filled_gate(Some(Box::new(Failing)), WINDOW_SIZE);
        assert!(matches!(
            gate.on_selected_peak(0.30, 5.0),
            Classification::Skipped(SkipReason::PredictionFailed(_))
        ));

        let mut empty = filled_gate(Some(Box::new(FixedScores(Vec::new()))), WINDOW_SIZE);
        assert_eq!(
            empty.on_selected_peak(0.30, 5.0),
            Classification::Skipped(SkipReason::EmptyOutput)
        );
    }

    #[test]
    fn unknown_index_gets_generic_label() {
        let mut scores = vec![0.0; 12];
        scores[11] = 0.8;
        let mut gate = filled_gate(Some(Box::new(FixedScores(scores))), WINDOW_SIZE);
        let result = gate.on_selected_peak(0.30, 1.0);
        assert_eq!(result.result().unwrap().label, "class_11");
    }

    #[test]
    fn no_model_path_means_detection_only() {
        let config = ClassifierConfig::default();
        assert!(load_classifier(&config).unwrap().is_none());
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn model_without_onnx_support_is_reported() {
        let config = ClassifierConfig {
            model_path: Some("gesture_model.onnx".into()),
            ..ClassifierConfig::default()
        };
        assert!(matches!(
            load_classifier(&config),
            Err(ClassifierError::Unsupported("onnx"))
        ));
    }

    #[test]
    fn loads_classes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.json");
        fs::write(
            &path,
            r#"{"index_to_class": {"1": "双击", "0": "单击", "2": "握拳"}}"#,
        )
        .unwrap();
        let labels = load_classes(&path).unwrap();
        assert_eq!(labels, vec!["单击", "双击", "握拳"]);
    }
}
