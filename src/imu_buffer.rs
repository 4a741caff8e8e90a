use std::collections::VecDeque;

use thiserror::Error;

use crate::types::{Sample, HALF_WINDOW, IMU_BUFFER_CAPACITY};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    #[error("El pico aún no está en el buffer")]
    PeakNotBuffered,

    #[error("Contexto insuficiente: {before} muestras antes y {after} desde el pico")]
    InsufficientContext { before: usize, after: usize },
}

/// Buffer circular de muestras crudas (acc + gyro) para extraer la ventana
/// centrada en cada pico seleccionado
pub struct ImuBuffer {
    buffer: VecDeque<Sample>,
    capacity: usize,
}

impl ImuBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Capacidad necesaria para que la ventana siga en el buffer cuando
    /// llega el veredicto del selector, `peak_window` segundos después del pico
    pub fn required_capacity(configured: usize, peak_window: f64, sample_time: f64) -> usize {
        let delay = if peak_window > 0.0 && sample_time > 0.0 {
            (peak_window / sample_time).ceil() as usize
        } else {
            0
        };
        configured.max(delay + 2 * HALF_WINDOW)
    }

    /// Añade una muestra, descartando la más antigua si se supera la capacidad
    pub fn push(&mut self, sample: Sample) {
        self.buffer.push_back(sample);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ajusta la capacidad (p. ej. tras cambiar `peak_window`)
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    /// Primer índice con `timestamp >= peak_timestamp`
    pub fn peak_index(&self, peak_timestamp: f64) -> Option<usize> {
        self.buffer
            .iter()
            .position(|s| s.timestamp >= peak_timestamp)
    }

    /// Extrae `2 * half` muestras: `half` antes del índice del pico y `half`
    /// desde el pico en adelante
    pub fn centered_window(
        &self,
        peak_timestamp: f64,
        half: usize,
    ) -> Result<Vec<Sample>, WindowError> {
        let idx = self
            .peak_index(peak_timestamp)
            .ok_or(WindowError::PeakNotBuffered)?;

        let before = idx;
        let after = self.buffer.len() - idx;
        if before < half || after < half {
            return Err(WindowError::InsufficientContext { before, after });
        }

        Ok(self
            .buffer
            .iter()
            .skip(idx - half)
            .take(2 * half)
            .copied()
            .collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.buffer.iter()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for ImuBuffer {
    fn default() -> Self {
        Self::new(IMU_BUFFER_CAPACITY)
    }
}
