use log::{debug, info, warn};

use crate::attitude::{AttitudeEstimator, AttitudeParams, Quaternion};
use crate::config::{ConfigError, DetectionSettings, DetectionSignal, PipelineConfig};
use crate::events::PipelineEvent;
use crate::gesture_classifier::{Classification, Classifier, GestureGate};
use crate::one_euro::OneEuroFilter;
use crate::peak_detector::PeakDetector;
use crate::peak_selector::{PeakSelector, Selection};
use crate::types::{Extremum, Sample, SelectedPeak, EARTH_GRAVITY};

/// Cada cuántas muestras se emite la orientación (si `save.quaternions`)
pub const ORIENTATION_EVERY: u64 = 100;

/// Pipeline síncrono por muestra:
/// norma → one-euro → picos/valles → selección → clasificación,
/// con el estimador de orientación en paralelo sobre la misma muestra.
pub struct SignalPipeline {
    config: PipelineConfig,
    filter: OneEuroFilter,
    detector: PeakDetector,
    selector: PeakSelector,
    attitude: AttitudeEstimator,
    gate: GestureGate,
    start_time: Option<f64>,
    last_norm: f64,
    selected_peak_count: usize,
    samples_seen: u64,
    orientation_every: u64,
    warned_non_finite: bool,
}

impl SignalPipeline {
    pub fn new(config: PipelineConfig, classifier: Option<Box<dyn Classifier>>) -> Self {
        let sample_time = config.filter.sample_time;
        Self {
            filter: OneEuroFilter::new(config.one_euro_params()),
            detector: PeakDetector::new(config.detection.delta),
            selector: PeakSelector::new(config.selector_params()),
            attitude: AttitudeEstimator::new(AttitudeParams::default(), sample_time),
            gate: GestureGate::new(config.effective_buffer_capacity(), classifier, Vec::new()),
            start_time: None,
            last_norm: EARTH_GRAVITY,
            selected_peak_count: 0,
            samples_seen: 0,
            orientation_every: ORIENTATION_EVERY,
            warned_non_finite: false,
            config,
        }
    }

    /// Sustituye las etiquetas del modelo (orden de salida del clasificador)
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.gate.set_labels(labels);
        self
    }

    pub fn set_orientation_every(&mut self, every: u64) {
        self.orientation_every = every.max(1);
    }

    /// Procesa una muestra completa antes de aceptar la siguiente
    pub fn process_sample(&mut self, sample: &Sample) -> Vec<PipelineEvent> {
        let mut events = Vec::new();

        if self.start_time.is_none() && sample.timestamp.is_finite() {
            self.start_time = Some(sample.timestamp);
            info!("Inicio de sesión en t={:.3}s", sample.timestamp);
        }

        // El buffer avanza siempre, incluso con muestras inválidas
        self.gate.on_sample(*sample);
        self.samples_seen += 1;

        if !sample.is_finite() {
            if !self.warned_non_finite {
                warn!(
                    "⚠️  Muestra no finita en t={}: se omite del filtro, detector y orientación",
                    sample.timestamp
                );
                self.warned_non_finite = true;
            }
            if sample.timestamp.is_finite() {
                self.resolve_candidates(sample.timestamp, &mut events);
            }
            return events;
        }

        let dt = self.config.filter.sample_time;
        self.attitude.update(dt, sample.gyro, sample.acc);
        if self.config.save.quaternions && self.samples_seen % self.orientation_every == 0 {
            events.push(PipelineEvent::Orientation {
                timestamp: sample.timestamp,
                quaternion: self.attitude.current_quaternion(),
            });
        }

        let norm = sample.acc_norm();
        let signal = match self.config.detection.signal {
            DetectionSignal::Norm => norm,
            DetectionSignal::NormDelta => (norm - self.last_norm).abs(),
        };
        self.last_norm = norm;

        let filtered = self.filter.apply(signal, dt);
        let detection = self.detector.detect(sample.timestamp, filtered);

        if let Some(peak) = detection.peak {
            self.on_peak(peak, &mut events);
        }

        self.resolve_candidates(sample.timestamp, &mut events);

        if let Some(valley) = detection.valley {
            debug!("Valle {:.3} en t={:.3}s", valley.value, valley.timestamp);
            events.push(PipelineEvent::Valley(valley));
        }

        events
    }

    fn on_peak(&mut self, peak: Extremum, events: &mut Vec<PipelineEvent>) {
        debug!("Pico {:.3} en t={:.3}s", peak.value, peak.timestamp);
        events.push(PipelineEvent::Peak(peak));
        self.selector.push_candidate(peak.timestamp, peak.value);
    }

    fn resolve_candidates(&mut self, current_time: f64, events: &mut Vec<PipelineEvent>) {
        for selection in self.selector.check(current_time) {
            self.on_selection(selection, events);
        }
    }

    fn on_selection(&mut self, selection: Selection, events: &mut Vec<PipelineEvent>) {
        let peak = selection.peak;
        events.push(PipelineEvent::PeakSelected(peak));
        if selection.strong {
            events.push(PipelineEvent::StrongPeak(peak));
        }

        if peak.value <= self.config.detection.peak_threshold {
            return;
        }
        self.selected_peak_count += 1;
        self.classify(peak, events);
    }

    fn classify(&mut self, peak: SelectedPeak, events: &mut Vec<PipelineEvent>) {
        match self.gate.on_selected_peak(peak.timestamp, peak.value) {
            Classification::Recognized(result) => {
                let relative_time = peak.timestamp - self.start_time.unwrap_or(peak.timestamp);
                let dump = self.gate.take_last_dump();
                let window = if self.config.save.gesture_data {
                    dump.map(Box::new)
                } else {
                    None
                };
                events.push(PipelineEvent::GestureRecognized {
                    result,
                    relative_time,
                    window,
                });
            }
            Classification::Skipped(reason) => {
                events.push(PipelineEvent::ClassificationSkipped { peak, reason });
            }
            Classification::Unavailable => {}
        }
    }

    /// Fin de sesión: resuelve los candidatos pendientes
    pub fn finish(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        for selection in self.selector.flush() {
            self.on_selection(selection, &mut events);
        }
        info!(
            "Sesión terminada: {} muestras, {} picos seleccionados",
            self.samples_seen, self.selected_peak_count
        );
        events
    }

    /// Aplica umbral y ventana nuevos; llamar sólo entre muestras.
    /// Ajustes inválidos se rechazan y la configuración anterior sigue vigente.
    pub fn update_settings(&mut self, settings: DetectionSettings) -> Result<(), ConfigError> {
        if let Err(e) = settings.validate() {
            warn!("Ajustes ignorados: {}", e);
            return Err(e);
        }
        self.config.detection.peak_threshold = settings.peak_threshold;
        self.config.detection.peak_window = settings.peak_window;
        self.selector.set_window(settings.peak_window);
        self.gate
            .set_buffer_capacity(self.config.effective_buffer_capacity());
        info!(
            "Ajustes actualizados: umbral={:.2}, ventana={:.2}s",
            settings.peak_threshold, settings.peak_window
        );
        Ok(())
    }

    pub fn current_quaternion(&self) -> Quaternion {
        self.attitude.current_quaternion()
    }

    /// Picos seleccionados por encima de `peak_threshold` desde el último reset
    pub fn selected_peak_count(&self) -> usize {
        self.selected_peak_count
    }

    pub fn reset_count(&mut self) {
        self.selected_peak_count = 0;
    }

    /// Nueva carpeta de sesión: reinicia el tiempo relativo y los contadores
    pub fn reset_session(&mut self) {
        self.start_time = None;
        self.selected_peak_count = 0;
        self.gate.reset_count();
    }

    pub fn selected_peaks(&self) -> impl Iterator<Item = &SelectedPeak> {
        self.selector.selected_peaks().iter()
    }

    pub fn drain_selected(&mut self) -> Vec<SelectedPeak> {
        self.selector.drain_selected()
    }

    pub fn recent_peaks(&self) -> impl Iterator<Item = &Extremum> {
        self.detector.recent_peaks().iter()
    }

    pub fn recent_valleys(&self) -> impl Iterator<Item = &Extremum> {
        self.detector.recent_valleys().iter()
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn classifier_available(&self) -> bool {
        self.gate.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture_classifier::{ClassifierError, SkipReason};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use crate::types::{SAMPLE_TIME, TENSOR_LEN};

    /// Siempre ("单击", 0.99)
    struct AlwaysTap;

    impl Classifier for AlwaysTap {
        fn predict(&mut self, _tensor: &[f32; TENSOR_LEN]) -> Result<Vec<f32>, ClassifierError> {
            let mut scores = vec![0.00125; 9];
            scores[0] = 0.99;
            Ok(scores)
        }
    }

    /// Norma 1.0 con pulsos gaussianos (centro, amplitud), sigma 30 ms
    fn pulses(len: usize, pulses: &[(f64, f64)]) -> Vec<Sample> {
        (0..len)
            .map(|i| {
                let t = i as f64 * SAMPLE_TIME;
                let norm = 1.0
                    + pulses
                        .iter()
                        .map(|(c, a)| a * (-(t - c).powi(2) / (2.0 * 0.03 * 0.03)).exp())
                        .sum::<f64>();
                Sample::new(t, [0.0, 0.0, norm], [0.0; 3])
            })
            .collect()
    }

    fn run(pipeline: &mut SignalPipeline, samples: &[Sample]) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        for sample in samples {
            events.extend(pipeline.process_sample(sample));
        }
        events.extend(pipeline.finish());
        events
    }

    fn selected(events: &[PipelineEvent]) -> Vec<SelectedPeak> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::PeakSelected(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn three_isolated_pulses() {
        let mut pipeline =
            SignalPipeline::new(PipelineConfig::default(), Some(Box::new(AlwaysTap)));
        let samples = pulses(500, &[(1.0, 2.0), (2.5, 15.0), (4.0, 3.0)]);
        let events = run(&mut pipeline, &samples);

        let peaks = selected(&events);
        assert_eq!(peaks.len(), 3);
        for (peak, expected) in peaks.iter().zip([1.0, 2.5, 4.0]) {
            assert!(
                (peak.timestamp - expected).abs() <= SAMPLE_TIME * 1.5,
                "pico en {} (esperado {})",
                peak.timestamp,
                expected
            );
        }

        let strong: Vec<&PipelineEvent> = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::StrongPeak(_)))
            .collect();
        assert_eq!(strong.len(), 1);
        assert!((strong[0].timestamp() - 2.5).abs() <= SAMPLE_TIME * 1.5);
        if let PipelineEvent::StrongPeak(p) = strong[0] {
            assert!(p.value > 10.0);
        }

        let gestures: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::GestureRecognized {
                    result,
                    relative_time,
                    ..
                } => Some((result.clone(), *relative_time)),
                _ => None,
            })
            .collect();
        assert_eq!(gestures.len(), 3);
        for (result, relative_time) in &gestures {
            assert_eq!(result.label, "单击");
            assert!((result.confidence - 0.99).abs() < 1e-6);
            assert!((relative_time - result.peak_timestamp).abs() < 1e-9);
        }
        assert_eq!(pipeline.selected_peak_count(), 3);
    }

    #[test]
    fn close_pulses_keep_only_the_larger() {
        for pair in [[(1.0, 3.0), (1.5, 6.0)], [(1.0, 6.0), (1.5, 3.0)]] {
            let mut pipeline = SignalPipeline::new(PipelineConfig::default(), None);
            let events = run(&mut pipeline, &pulses(300, &pair));

            let peaks = selected(&events);
            assert_eq!(peaks.len(), 1);
            let larger = if pair[0].1 > pair[1].1 { pair[0].0 } else { pair[1].0 };
            assert!((peaks[0].timestamp - larger).abs() <= SAMPLE_TIME * 1.5);
            assert!(peaks[0].value > 5.0);
        }
    }

    #[test]
    fn extrema_alternate_end_to_end() {
        let mut pipeline = SignalPipeline::new(PipelineConfig::default(), None);
        let samples: Vec<Sample> = (0..2000)
            .map(|i| {
                let t = i as f64 * SAMPLE_TIME;
                let norm = 9.81 + 3.0 * (t * 7.0).sin() + 1.5 * (t * 23.0).cos();
                Sample::new(t, [0.0, 0.0, norm], [0.0; 3])
            })
            .collect();
        let events = run(&mut pipeline, &samples);

        let kinds: Vec<bool> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Peak(_) => Some(true),
                PipelineEvent::Valley(_) => Some(false),
                _ => None,
            })
            .collect();
        assert!(kinds.len() > 10);
        for pair in kinds.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn detection_only_without_classifier() {
        let mut pipeline = SignalPipeline::new(PipelineConfig::default(), None);
        let events = run(&mut pipeline, &pulses(500, &[(1.0, 2.0), (2.5, 15.0), (4.0, 3.0)]));

        assert_eq!(selected(&events).len(), 3);
        assert!(!events
            .iter()
            .any(|e| matches!(e, PipelineEvent::GestureRecognized { .. })));
        assert!(!pipeline.classifier_available());
    }

    #[test]
    fn early_peak_is_skipped_for_context() {
        // Pulso a 0.2 s: menos de 30 muestras antes del pico
        let mut pipeline =
            SignalPipeline::new(PipelineConfig::default(), Some(Box::new(AlwaysTap)));
        let events = run(&mut pipeline, &pulses(300, &[(0.2, 5.0)]));

        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::ClassificationSkipped {
                reason: SkipReason::InsufficientContext { .. },
                ..
            }
        )));
    }

    #[test]
    fn non_finite_samples_do_not_poison_state() {
        let mut pipeline =
            SignalPipeline::new(PipelineConfig::default(), Some(Box::new(AlwaysTap)));
        let mut samples = pulses(500, &[(1.0, 2.0), (2.5, 15.0), (4.0, 3.0)]);
        samples[150].acc[2] = f64::NAN;
        samples[320].gyro[0] = f64::INFINITY;

        let events = run(&mut pipeline, &samples);
        assert_eq!(selected(&events).len(), 3);
        let q = pipeline.current_quaternion();
        assert!(q.norm().is_finite());
    }

    /// Cuenta llamadas y tensores con valores no finitos
    struct CountingClassifier {
        calls: Arc<AtomicUsize>,
        non_finite: Arc<AtomicUsize>,
    }

    impl Classifier for CountingClassifier {
        fn predict(&mut self, tensor: &[f32; TENSOR_LEN]) -> Result<Vec<f32>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if tensor.iter().any(|v| !v.is_finite()) {
                self.non_finite.fetch_add(1, Ordering::SeqCst);
            }
            AlwaysTap.predict(tensor)
        }
    }

    #[test]
    fn nan_inside_window_is_not_classified() {
        let calls = Arc::new(AtomicUsize::new(0));
        let non_finite = Arc::new(AtomicUsize::new(0));
        let classifier = CountingClassifier {
            calls: Arc::clone(&calls),
            non_finite: Arc::clone(&non_finite),
        };
        let mut pipeline =
            SignalPipeline::new(PipelineConfig::default(), Some(Box::new(classifier)));

        let mut samples = pulses(300, &[(1.0, 4.0)]);
        samples[95].gyro[0] = f64::NAN;
        let events = run(&mut pipeline, &samples);

        assert_eq!(selected(&events).len(), 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, PipelineEvent::GestureRecognized { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::ClassificationSkipped {
                reason: SkipReason::InvalidTensor(_),
                ..
            }
        )));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(non_finite.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn gesture_window_attached_when_saving() {
        let mut config = PipelineConfig::default();
        config.save.gesture_data = true;
        let mut pipeline = SignalPipeline::new(config, Some(Box::new(AlwaysTap)));
        let events = run(&mut pipeline, &pulses(300, &[(1.0, 4.0)]));

        let (result, dump) = events
            .iter()
            .find_map(|e| match e {
                PipelineEvent::GestureRecognized { result, window, .. } => {
                    Some((result.clone(), window.clone()?))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(dump.index, 1);
        assert_eq!(result.index, dump.index);
        assert_eq!(dump.raw.len(), 60);
        assert_eq!(dump.label, "单击");
    }

    #[test]
    fn orientation_emitted_periodically() {
        let mut config = PipelineConfig::default();
        config.save.quaternions = true;
        let mut pipeline = SignalPipeline::new(config, None);
        let events = run(&mut pipeline, &pulses(350, &[]));

        let count = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Orientation { .. }))
            .count();
        assert_eq!(count, 3);
    }

    #[test]
    fn settings_update_between_samples() {
        let mut pipeline = SignalPipeline::new(PipelineConfig::default(), None);
        pipeline
            .update_settings(DetectionSettings {
                peak_threshold: 5.0,
                peak_window: 0.3,
            })
            .unwrap();
        let events = run(&mut pipeline, &pulses(300, &[(1.0, 3.0), (1.5, 6.0)]));

        // Con ventana de 0.3 s los dos pulsos se seleccionan
        assert_eq!(selected(&events).len(), 2);
        // Sólo el de valor > 5 cuenta
        assert_eq!(pipeline.selected_peak_count(), 1);

        pipeline.reset_count();
        assert_eq!(pipeline.selected_peak_count(), 0);
        pipeline.reset_session();
        assert_eq!(pipeline.start_time(), None);
    }

    #[test]
    fn invalid_settings_keep_previous_window() {
        let mut pipeline = SignalPipeline::new(PipelineConfig::default(), None);
        for peak_window in [f64::NAN, 0.0, -0.5] {
            let bad = DetectionSettings {
                peak_threshold: 0.3,
                peak_window,
            };
            assert!(matches!(
                pipeline.update_settings(bad),
                Err(ConfigError::Invalid(_))
            ));
        }
        assert_eq!(pipeline.config().detection.peak_window, 1.0);

        // La ventana de 1 s sigue activa: sólo el pulso mayor
        let events = run(&mut pipeline, &pulses(300, &[(1.0, 3.0), (1.5, 6.0)]));
        assert_eq!(selected(&events).len(), 1);
    }

    #[test]
    fn labels_can_be_replaced() {
        let labels: Vec<String> = ["tap", "b", "c", "d", "e", "f", "g", "h", "i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut pipeline =
            SignalPipeline::new(PipelineConfig::default(), Some(Box::new(AlwaysTap)))
                .with_labels(labels);
        assert!(pipeline.classifier_available());

        let events = run(&mut pipeline, &pulses(300, &[(1.0, 4.0)]));
        let label = events.iter().find_map(|e| match e {
            PipelineEvent::GestureRecognized { result, .. } => Some(result.label.clone()),
            _ => None,
        });
        assert_eq!(label.as_deref(), Some("tap"));
    }
}
