/*
Detección de gestos de muñeca en tiempo real

Lee muestras IMU por stdin, una por línea:
    timestamp_s,acc_x,acc_y,acc_z,gyro_x,gyro_y,gyro_z
(aceleración en m/s² con gravedad, giroscopio en rad/s) y emite picos
seleccionados, picos fuertes y gestos clasificados.

Para compilar con el clasificador ONNX:
    cargo build --release --features onnx
    set -x LD_LIBRARY_PATH (pwd)/onnxruntime-linux-x64-1.22.0/lib $LD_LIBRARY_PATH

Ejemplo:
    nc reloj.local 9000 | ./target/release/wristgesture --config pipeline.toml --out sesiones/hoy
*/

use std::env;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, select, tick};
use log::{info, warn};

use wristgesture::config::PipelineConfig;
use wristgesture::csv_loader::parse_sample_line;
use wristgesture::events::{EventSink, PipelineEvent};
use wristgesture::gesture_classifier::{load_classes, load_classifier, Classifier};
use wristgesture::pipeline::SignalPipeline;
use wristgesture::recorder::SessionRecorder;
use wristgesture::types::Sample;

const SAMPLE_QUEUE: usize = 256; // ~2.5 s a 100 Hz
const STATUS_EVERY: Duration = Duration::from_secs(10);

struct Args {
    config: Option<PathBuf>,
    out: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut config = None;
    let mut out = None;
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("--config necesita una ruta"))?,
                ))
            }
            "--out" => {
                out = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("--out necesita una carpeta"))?,
                ))
            }
            _ => bail!("Uso: wristgesture [--config pipeline.toml] [--out carpeta]"),
        }
    }
    Ok(Args { config, out })
}

/// Salida de consola: sólo lo que interesa al operador
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn on_event(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StrongPeak(peak) => {
                println!("💥 Pico fuerte {:.2} (t={:.3}s)", peak.value, peak.timestamp);
            }
            PipelineEvent::GestureRecognized {
                result,
                relative_time,
                ..
            } => {
                println!(
                    "🎯 [{:>8.3}s] {} ({:.1}%) pico={:.2}",
                    relative_time,
                    result.label,
                    result.confidence * 100.0,
                    result.peak_value
                );
            }
            _ => {}
        }
    }
}

fn build_classifier(config: &PipelineConfig) -> Option<Box<dyn Classifier>> {
    match load_classifier(&config.classifier) {
        Ok(Some(classifier)) => {
            println!("✅ Clasificador cargado");
            Some(classifier)
        }
        Ok(None) => {
            println!("ℹ️  Sin modelo configurado: sólo detección de picos");
            None
        }
        Err(e) => {
            eprintln!("❌ No se pudo cargar el clasificador: {}", e);
            println!("⚠️  Continuando sólo con detección de picos");
            None
        }
    }
}

fn build_pipeline(config: &PipelineConfig) -> SignalPipeline {
    let labels = match config.classifier.labels_path.as_ref() {
        Some(path) => load_classes(path).unwrap_or_else(|e| {
            warn!("No se pudieron leer las clases {:?}: {}", path, e);
            Vec::new()
        }),
        None => Vec::new(),
    };
    SignalPipeline::new(config.clone(), build_classifier(config)).with_labels(labels)
}

/// Hilo lector: stdin → muestras. Las líneas inválidas se descartan.
fn spawn_stdin_reader(tx: crossbeam_channel::Sender<Sample>) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut bad_lines = 0usize;
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        eprintln!("❌ Error leyendo stdin: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() || line.starts_with('#') {
                    continue;
                }
                match parse_sample_line(&line) {
                    Ok(sample) => {
                        if tx.send(sample).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if bad_lines == 0 {
                            warn!("Línea inválida descartada: {:#}", e);
                        }
                        bad_lines += 1;
                    }
                }
            }
            if bad_lines > 0 {
                warn!("{} líneas inválidas descartadas", bad_lines);
            }
            info!("Fin de la entrada");
        })
        .context("No se pudo lanzar el hilo lector")?;
    Ok(handle)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("🎯 Wrist Gesture - detección en tiempo real\n");

    let args = parse_args()?;
    let config = match args.config.as_ref() {
        Some(path) => {
            PipelineConfig::load(path).with_context(|| format!("Configuración {:?}", path))?
        }
        None => PipelineConfig::default(),
    };
    println!(
        "🔧 Umbral={:.2}  ventana={:.2}s  delta={:.2}",
        config.detection.peak_threshold, config.detection.peak_window, config.detection.delta
    );

    let mut pipeline = build_pipeline(&config);
    let mut recorder = match args.out.as_ref() {
        Some(dir) => Some(SessionRecorder::spawn(dir, config.save)?),
        None => None,
    };
    let mut console = ConsoleSink;

    // Un productor (stdin), un consumidor (pipeline)
    let (tx, rx) = bounded::<Sample>(SAMPLE_QUEUE);
    let reader = spawn_stdin_reader(tx)?;
    let ticker = tick(STATUS_EVERY);

    println!("🎬 Esperando muestras por stdin...\n");

    let mut samples = 0u64;
    loop {
        select! {
            recv(rx) -> msg => {
                match msg {
                    Ok(sample) => {
                        samples += 1;
                        let events = pipeline.process_sample(&sample);
                        console.on_events(&events);
                        if let Some(recorder) = recorder.as_mut() {
                            recorder.on_events(&events);
                        }
                    }
                    Err(_) => break,
                }
            }
            recv(ticker) -> _ => {
                let q = pipeline.current_quaternion();
                info!(
                    "📊 {} muestras, {} picos seleccionados, q=({:.3}, {:.3}, {:.3}, {:.3})",
                    samples,
                    pipeline.selected_peak_count(),
                    q.w, q.x, q.y, q.z
                );
            }
        }
    }

    let events = pipeline.finish();
    console.on_events(&events);
    if let Some(recorder) = recorder.as_mut() {
        recorder.on_events(&events);
    }

    if reader.join().is_err() {
        eprintln!("❌ El hilo lector terminó con pánico");
    }

    if let Some(recorder) = recorder {
        let stats = recorder.finish()?;
        println!(
            "💾 Guardado: {} gestos, {} picos seleccionados, {} ventanas",
            stats.gestures, stats.selected_peaks, stats.windows
        );
    }

    println!(
        "\n👋 {} muestras procesadas, {} picos seleccionados",
        samples,
        pipeline.selected_peak_count()
    );
    Ok(())
}
