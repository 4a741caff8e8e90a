use crate::attitude::Quaternion;
use crate::gesture_classifier::{GestureResult, GestureWindowDump, SkipReason};
use crate::types::{Extremum, SelectedPeak};

/// Salidas del pipeline, en el orden en que se producen para cada muestra
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Peak(Extremum),
    Valley(Extremum),
    PeakSelected(SelectedPeak),
    /// Selección con valor por encima del umbral fuerte (feedback háptico)
    StrongPeak(SelectedPeak),
    GestureRecognized {
        result: GestureResult,
        /// Segundos desde la primera muestra de la sesión
        relative_time: f64,
        window: Option<Box<GestureWindowDump>>,
    },
    ClassificationSkipped {
        peak: SelectedPeak,
        reason: SkipReason,
    },
    Orientation {
        timestamp: f64,
        quaternion: Quaternion,
    },
}

impl PipelineEvent {
    pub fn timestamp(&self) -> f64 {
        match self {
            PipelineEvent::Peak(e) | PipelineEvent::Valley(e) => e.timestamp,
            PipelineEvent::PeakSelected(p) | PipelineEvent::StrongPeak(p) => p.timestamp,
            PipelineEvent::GestureRecognized { result, .. } => result.peak_timestamp,
            PipelineEvent::ClassificationSkipped { peak, .. } => peak.timestamp,
            PipelineEvent::Orientation { timestamp, .. } => *timestamp,
        }
    }
}

/// Consumidor de eventos (grabador, consola, tests)
pub trait EventSink {
    fn on_event(&mut self, event: &PipelineEvent);

    fn on_events(&mut self, events: &[PipelineEvent]) {
        for event in events {
            self.on_event(event);
        }
    }
}

impl EventSink for Vec<PipelineEvent> {
    fn on_event(&mut self, event: &PipelineEvent) {
        self.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExtremumKind;

    #[test]
    fn vec_sink_collects_in_order() {
        let peak = Extremum {
            timestamp: 1.0,
            value: 2.0,
            kind: ExtremumKind::Peak,
        };
        let selected = SelectedPeak {
            timestamp: 1.0,
            value: 2.0,
        };
        let mut sink: Vec<PipelineEvent> = Vec::new();
        sink.on_events(&[
            PipelineEvent::Peak(peak),
            PipelineEvent::PeakSelected(selected),
        ]);

        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0], PipelineEvent::Peak(peak));
        assert_eq!(sink[1].timestamp(), 1.0);
    }
}
