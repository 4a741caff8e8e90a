use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use csv::Writer;
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::SaveConfig;
use crate::events::{EventSink, PipelineEvent};
use crate::gesture_classifier::{GestureResult, GestureWindowDump};
use crate::types::{seconds_to_ns, Extremum, SelectedPeak};

/// Capacidad de la cola entre el pipeline y el hilo de escritura
pub const RECORDER_QUEUE: usize = 1024;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("No se pudo crear {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error de escritura: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("El hilo de escritura terminó con pánico")]
    WorkerPanicked,
}

/// Filas escritas por archivo al cerrar la sesión
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub peaks: usize,
    pub valleys: usize,
    pub selected_peaks: usize,
    pub quaternions: usize,
    pub gestures: usize,
    pub windows: usize,
    pub write_errors: usize,
    /// Eventos descartados porque la cola estaba llena
    pub dropped: usize,
}

/// Persistencia asíncrona de una sesión. El pipeline sólo hace `try_send`;
/// el disco lo toca un hilo aparte.
pub struct SessionRecorder {
    dir: PathBuf,
    save: SaveConfig,
    tx: Option<Sender<PipelineEvent>>,
    handle: Option<JoinHandle<RecorderStats>>,
    dropped: usize,
}

impl SessionRecorder {
    /// Crea la carpeta de sesión, abre los archivos activos y arranca el hilo
    pub fn spawn(dir: impl AsRef<Path>, save: SaveConfig) -> Result<Self, RecorderError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| RecorderError::Create {
            path: dir.clone(),
            source,
        })?;

        let writer = SessionWriter::open(&dir, save)?;
        let (tx, rx) = bounded::<PipelineEvent>(RECORDER_QUEUE);

        let handle = thread::Builder::new()
            .name("session-recorder".to_string())
            .spawn(move || writer.run(rx))
            .map_err(|source| RecorderError::Create {
                path: dir.clone(),
                source,
            })?;

        info!("💾 Grabando sesión en {:?}", dir);
        Ok(Self {
            dir,
            save,
            tx: Some(tx),
            handle: Some(handle),
            dropped: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn wants(&self, event: &PipelineEvent) -> bool {
        match event {
            PipelineEvent::Peak(_) => self.save.peaks,
            PipelineEvent::Valley(_) => self.save.valleys,
            PipelineEvent::PeakSelected(_) => self.save.selected_peaks,
            PipelineEvent::Orientation { .. } => self.save.quaternions,
            PipelineEvent::GestureRecognized { .. } => {
                self.save.result_file || self.save.gesture_data
            }
            PipelineEvent::StrongPeak(_) | PipelineEvent::ClassificationSkipped { .. } => false,
        }
    }

    /// Cierra la cola, espera al hilo y devuelve lo escrito
    pub fn finish(mut self) -> Result<RecorderStats, RecorderError> {
        drop(self.tx.take());
        let handle = self.handle.take().ok_or(RecorderError::WorkerPanicked)?;
        let mut stats = handle.join().map_err(|_| RecorderError::WorkerPanicked)?;
        stats.dropped = self.dropped;
        if stats.dropped > 0 {
            warn!("⚠️  {} eventos descartados por cola llena", stats.dropped);
        }
        info!("💾 Sesión guardada en {:?}: {:?}", self.dir, stats);
        Ok(stats)
    }
}

impl EventSink for SessionRecorder {
    fn on_event(&mut self, event: &PipelineEvent) {
        if !self.wants(event) {
            return;
        }
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if self.dropped == 0 {
                    warn!("⚠️  Cola de grabación llena: se descartan eventos");
                }
                self.dropped += 1;
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("⚠️  Hilo de grabación detenido, no se guardarán más eventos");
                self.tx = None;
            }
        }
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Estado del hilo de escritura
struct SessionWriter {
    dir: PathBuf,
    save: SaveConfig,
    peaks: Option<Writer<File>>,
    valleys: Option<Writer<File>>,
    selected: Option<Writer<File>>,
    quaternions: Option<Writer<File>>,
    results: Option<Writer<File>>,
    stats: RecorderStats,
}

fn open_csv(dir: &Path, name: &str, header: &[&str]) -> Result<Writer<File>, RecorderError> {
    let path = dir.join(name);
    let file = File::create(&path).map_err(|source| RecorderError::Create { path, source })?;
    let mut writer = Writer::from_writer(file);
    writer.write_record(header)?;
    writer.flush()?;
    Ok(writer)
}

fn open_if(
    enabled: bool,
    dir: &Path,
    name: &str,
    header: &[&str],
) -> Result<Option<Writer<File>>, RecorderError> {
    if enabled {
        open_csv(dir, name, header).map(Some)
    } else {
        Ok(None)
    }
}

const VALUE_HEADER: [&str; 2] = ["timestamp_ns", "value"];

impl SessionWriter {
    fn open(dir: &Path, save: SaveConfig) -> Result<Self, RecorderError> {
        Ok(Self {
            dir: dir.to_path_buf(),
            save,
            peaks: open_if(save.peaks, dir, "peaks.csv", &VALUE_HEADER)?,
            valleys: open_if(save.valleys, dir, "valleys.csv", &VALUE_HEADER)?,
            selected: open_if(save.selected_peaks, dir, "selected_peaks.csv", &VALUE_HEADER)?,
            quaternions: open_if(
                save.quaternions,
                dir,
                "quaternions.csv",
                &["timestamp_ns", "w", "x", "y", "z"],
            )?,
            results: open_if(
                save.result_file,
                dir,
                "result.txt",
                &[
                    "timestamp_ns",
                    "relative_timestamp_s",
                    "gesture",
                    "confidence",
                    "peak_value",
                    "id",
                ],
            )?,
            stats: RecorderStats::default(),
        })
    }

    fn run(mut self, rx: Receiver<PipelineEvent>) -> RecorderStats {
        for event in rx {
            if let Err(e) = self.handle(event) {
                if self.stats.write_errors == 0 {
                    warn!("❌ Error guardando evento: {}", e);
                }
                self.stats.write_errors += 1;
            }
        }

        for writer in [
            &mut self.peaks,
            &mut self.valleys,
            &mut self.selected,
            &mut self.quaternions,
            &mut self.results,
        ]
        .into_iter()
        .flatten()
        {
            if let Err(e) = writer.flush() {
                warn!("❌ Error cerrando archivo: {}", e);
                self.stats.write_errors += 1;
            }
        }
        self.stats
    }

    fn handle(&mut self, event: PipelineEvent) -> Result<(), RecorderError> {
        match event {
            PipelineEvent::Peak(peak) => {
                if let Some(w) = self.peaks.as_mut() {
                    write_extremum(w, &peak)?;
                    self.stats.peaks += 1;
                }
            }
            PipelineEvent::Valley(valley) => {
                if let Some(w) = self.valleys.as_mut() {
                    write_extremum(w, &valley)?;
                    self.stats.valleys += 1;
                }
            }
            PipelineEvent::PeakSelected(peak) => {
                if let Some(w) = self.selected.as_mut() {
                    write_selected(w, &peak)?;
                    self.stats.selected_peaks += 1;
                }
            }
            PipelineEvent::Orientation {
                timestamp,
                quaternion,
            } => {
                if let Some(w) = self.quaternions.as_mut() {
                    let q = quaternion.to_array();
                    w.write_record(&[
                        seconds_to_ns(timestamp).to_string(),
                        format!("{:.6}", q[0]),
                        format!("{:.6}", q[1]),
                        format!("{:.6}", q[2]),
                        format!("{:.6}", q[3]),
                    ])?;
                    self.stats.quaternions += 1;
                }
            }
            PipelineEvent::GestureRecognized {
                result,
                relative_time,
                window,
            } => {
                self.stats.gestures += 1;
                if let Some(w) = self.results.as_mut() {
                    write_result(w, &result, relative_time)?;
                    w.flush()?;
                }
                if let (true, Some(dump)) = (self.save.gesture_data, window) {
                    let path = self.dir.join(format!("gesture_model_data_{}.txt", dump.index));
                    write_window_dump(&path, &dump)?;
                    self.stats.windows += 1;
                    debug!("Ventana #{} guardada en {:?}", dump.index, path);
                }
            }
            PipelineEvent::StrongPeak(_) | PipelineEvent::ClassificationSkipped { .. } => {}
        }
        Ok(())
    }
}

fn write_extremum(w: &mut Writer<File>, e: &Extremum) -> Result<(), csv::Error> {
    w.write_record(&[seconds_to_ns(e.timestamp).to_string(), format!("{:.6}", e.value)])
}

fn write_selected(w: &mut Writer<File>, p: &SelectedPeak) -> Result<(), csv::Error> {
    w.write_record(&[seconds_to_ns(p.timestamp).to_string(), format!("{:.6}", p.value)])
}

fn write_result(
    w: &mut Writer<File>,
    result: &GestureResult,
    relative_time: f64,
) -> Result<(), csv::Error> {
    w.write_record(&[
        seconds_to_ns(result.peak_timestamp).to_string(),
        format!("{:.3}", relative_time),
        result.label.clone(),
        format!("{:.3}", result.confidence),
        format!("{:.3}", result.peak_value),
        result.index.to_string(),
    ])
}

/// Volcado de la ventana del modelo: cabecera con la predicción, luego una
/// fila por muestra (cruda + aceleración filtrada)
fn write_window_dump(path: &Path, dump: &GestureWindowDump) -> Result<(), RecorderError> {
    let file = File::create(path).map_err(|source| RecorderError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = BufWriter::new(file);

    writeln!(
        out,
        "# 预测结果：手势类别 = {}, 置信度 = {:.3}",
        dump.label, dump.confidence
    )?;
    writeln!(
        out,
        "# 数据格式：frame_idx,raw_acc_x,raw_acc_y,raw_acc_z,raw_gyro_x,raw_gyro_y,raw_gyro_z,\
         filtered_acc_x,filtered_acc_y,filtered_acc_z,raw_gyro_x,raw_gyro_y,raw_gyro_z"
    )?;

    for (i, (raw, filtered)) in dump.raw.iter().zip(&dump.filtered_acc).enumerate() {
        if !filtered.iter().all(|v| v.is_finite()) {
            continue;
        }
        let a = raw.acc;
        let g = raw.gyro;
        writeln!(
            out,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            i, a[0], a[1], a[2], g[0], g[1], g[2], filtered[0], filtered[1], filtered[2], g[0],
            g[1], g[2]
        )?;
    }
    out.flush()?;
    Ok(())
}
