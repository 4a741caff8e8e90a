use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use wristgesture::config::PipelineConfig;
use wristgesture::csv_loader::load_session;
use wristgesture::events::{EventSink, PipelineEvent};
use wristgesture::feature_extractor::FeatureExtractor;
use wristgesture::gesture_classifier::{load_classes, load_classifier};
use wristgesture::pipeline::SignalPipeline;
use wristgesture::recorder::SessionRecorder;
use wristgesture::types::{Sample, HALF_WINDOW, NUM_CHANNELS, WINDOW_SIZE};

const USAGE: &str =
    "Uso: replay_csv [--config pipeline.toml] [--out carpeta] [--dump-tensor] <carpeta_sesion>";

struct ReplayOptions {
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    dump_tensor: bool,
}

fn parse_args() -> Result<(PathBuf, ReplayOptions)> {
    let mut opts = ReplayOptions {
        config: None,
        out: None,
        dump_tensor: false,
    };
    let mut session: Option<PathBuf> = None;
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dump-tensor" => opts.dump_tensor = true,
            "--config" => opts.config = Some(args.next().ok_or_else(|| anyhow!(USAGE))?.into()),
            "--out" => opts.out = Some(args.next().ok_or_else(|| anyhow!(USAGE))?.into()),
            _ => {
                if session.is_some() {
                    bail!(USAGE);
                }
                session = Some(PathBuf::from(arg));
            }
        }
    }

    let session = session.ok_or_else(|| anyhow!("Debes especificar una carpeta de sesión"))?;
    Ok((session, opts))
}

/// Ventana de 60 muestras centrada en el pico, como la arma el buffer IMU
fn window_at(samples: &[Sample], peak_timestamp: f64) -> Option<&[Sample]> {
    let idx = samples.iter().position(|s| s.timestamp >= peak_timestamp)?;
    if idx < HALF_WINDOW || samples.len() - idx < HALF_WINDOW {
        return None;
    }
    Some(&samples[idx - HALF_WINDOW..idx + HALF_WINDOW])
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let (session, opts) = parse_args()?;
    println!("🎞️  Reproduciendo sesión desde {:?}", session);

    let config = match opts.config.as_ref() {
        Some(path) => {
            PipelineConfig::load(path).with_context(|| format!("Configuración {:?}", path))?
        }
        None => PipelineConfig::default(),
    };

    let samples = load_session(&session)?;
    let classifier = match load_classifier(&config.classifier) {
        Ok(classifier) => classifier,
        Err(e) => {
            eprintln!("❌ Clasificador no disponible: {}", e);
            None
        }
    };
    let labels = match config.classifier.labels_path.as_ref() {
        Some(path) => load_classes(path)?,
        None => Vec::new(),
    };

    let mut pipeline = SignalPipeline::new(config.clone(), classifier).with_labels(labels);
    let mut recorder = match opts.out.as_ref() {
        Some(dir) => Some(SessionRecorder::spawn(dir, config.save)?),
        None => None,
    };

    let mut events: Vec<PipelineEvent> = Vec::new();
    for sample in &samples {
        events.on_events(&pipeline.process_sample(sample));
    }
    events.on_events(&pipeline.finish());

    if let Some(mut recorder) = recorder.take() {
        recorder.on_events(&events);
        let stats = recorder.finish()?;
        println!("💾 Guardado en {:?}: {:?}", opts.out, stats);
    }

    println!(
        "\n📈 {} muestras ({:.1}s)",
        samples.len(),
        samples.len() as f64 * config.filter.sample_time
    );

    let extractor = FeatureExtractor::default();
    for event in &events {
        match event {
            PipelineEvent::PeakSelected(peak) => {
                println!("✅ Pico seleccionado {:>8.3} en t={:.3}s", peak.value, peak.timestamp);

                if opts.dump_tensor {
                    let Some(window) = window_at(&samples, peak.timestamp) else {
                        println!("   (sin contexto suficiente para la ventana)");
                        continue;
                    };
                    let features = extractor.extract(window)?;
                    println!("🧱 Tensor [1, {}, {}]:", NUM_CHANNELS, WINDOW_SIZE);
                    for (ch, row) in features.tensor.chunks(WINDOW_SIZE).enumerate() {
                        let values: Vec<String> = row.iter().map(|v| format!("{:.4}", v)).collect();
                        println!("  {}: {}", ch, values.join(" "));
                    }
                }
            }
            PipelineEvent::StrongPeak(peak) => {
                println!("💥 Pico fuerte {:.3}", peak.value);
            }
            PipelineEvent::GestureRecognized {
                result,
                relative_time,
                ..
            } => {
                println!(
                    "🎯 [{:>8.3}s] {} ({:.1}%)",
                    relative_time,
                    result.label,
                    result.confidence * 100.0
                );
            }
            PipelineEvent::ClassificationSkipped { peak, reason } => {
                println!("⚠️  t={:.3}s sin clasificar: {:?}", peak.timestamp, reason);
            }
            _ => {}
        }
    }

    println!(
        "\n🥇 {} picos por encima del umbral {:.2}",
        pipeline.selected_peak_count(),
        config.detection.peak_threshold
    );
    Ok(())
}
