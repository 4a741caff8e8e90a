use std::path::Path;

use anyhow::{anyhow, bail, ensure, Context, Result};
use csv::ReaderBuilder;
use log::{info, warn};

use crate::types::{Sample, Vec3};

/// Filas `timestamp_ns,x,y,z` de un archivo del colector
fn load_axis_file(path: &Path) -> Result<Vec<(u64, Vec3)>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;

    let mut rows = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("Fila {} inválida en {:?}", row_idx + 1, path))?;
        if record.len() < 4 {
            bail!(
                "La fila {} de {:?} no tiene 4 columnas",
                row_idx + 1,
                path
            );
        }

        let timestamp_ns: u64 = record[0]
            .parse()
            .with_context(|| format!("timestamp_ns inválido en fila {}", row_idx + 1))?;
        let mut axes = [0.0; 3];
        for (axis, value) in axes.iter_mut().enumerate() {
            *value = record[axis + 1].parse().with_context(|| {
                format!("Eje {} inválido en fila {} de {:?}", axis, row_idx + 1, path)
            })?;
        }
        rows.push((timestamp_ns, axes));
    }
    Ok(rows)
}

/// Carga una carpeta de sesión (`acc.txt` + `gyro.txt`) uniendo fila a fila.
/// Si un archivo tiene más filas, las sobrantes se descartan.
pub fn load_session(dir: impl AsRef<Path>) -> Result<Vec<Sample>> {
    let dir = dir.as_ref();
    let acc = load_axis_file(&dir.join("acc.txt"))?;
    let gyro = load_axis_file(&dir.join("gyro.txt"))?;

    if acc.is_empty() {
        return Err(anyhow!("La sesión {:?} no contiene datos", dir));
    }
    if acc.len() != gyro.len() {
        warn!(
            "acc.txt ({}) y gyro.txt ({}) con distinto número de filas, se recorta",
            acc.len(),
            gyro.len()
        );
    }

    let samples: Vec<Sample> = acc
        .iter()
        .zip(&gyro)
        .map(|((t_ns, a), (_, g))| Sample::new(*t_ns as f64 / 1e9, *a, *g))
        .collect();

    ensure!(
        samples.windows(2).all(|w| w[1].timestamp >= w[0].timestamp),
        "Timestamps no monótonos en {:?}",
        dir
    );

    info!("📂 {} muestras cargadas desde {:?}", samples.len(), dir);
    Ok(samples)
}

/// Línea del flujo en vivo: `timestamp_s,ax,ay,az,gx,gy,gz`
pub fn parse_sample_line(line: &str) -> Result<Sample> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    ensure!(
        fields.len() == 7,
        "Se esperaban 7 columnas, hay {}: {:?}",
        fields.len(),
        line
    );

    let mut values = [0.0f64; 7];
    for (value, field) in values.iter_mut().zip(&fields) {
        *value = field
            .parse()
            .with_context(|| format!("Valor inválido {:?} en {:?}", field, line))?;
    }

    Ok(Sample::new(
        values[0],
        [values[1], values[2], values[3]],
        [values[4], values[5], values[6]],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_session(dir: &Path, acc: &str, gyro: &str) {
        fs::write(dir.join("acc.txt"), acc).unwrap();
        fs::write(dir.join("gyro.txt"), gyro).unwrap();
    }

    #[test]
    fn joins_acc_and_gyro_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "timestamp_ns,acc_x,acc_y,acc_z\n\
             1000000000,0.100000,0.200000,9.810000\n\
             1010000000,0.000000,0.000000,9.800000\n",
            "timestamp_ns,gyro_x,gyro_y,gyro_z\n\
             1000000000,0.010000,0.020000,0.030000\n\
             1010000000,0.000000,0.000000,0.000000\n",
        );

        let samples = load_session(dir.path()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp, 1.0);
        assert_eq!(samples[0].acc, [0.1, 0.2, 9.81]);
        assert_eq!(samples[0].gyro, [0.01, 0.02, 0.03]);
        assert!((samples[1].timestamp - 1.01).abs() < 1e-12);
    }

    #[test]
    fn uneven_files_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "timestamp_ns,acc_x,acc_y,acc_z\n1,0,0,9.8\n2,0,0,9.8\n3,0,0,9.8\n",
            "timestamp_ns,gyro_x,gyro_y,gyro_z\n1,0,0,0\n2,0,0,0\n",
        );
        assert_eq!(load_session(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn malformed_rows_report_context() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "timestamp_ns,acc_x,acc_y,acc_z\n1,0,abc,9.8\n",
            "timestamp_ns,gyro_x,gyro_y,gyro_z\n1,0,0,0\n",
        );
        let err = load_session(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Eje 1"));

        let empty = tempfile::tempdir().unwrap();
        write_session(
            empty.path(),
            "timestamp_ns,acc_x,acc_y,acc_z\n",
            "timestamp_ns,gyro_x,gyro_y,gyro_z\n",
        );
        assert!(load_session(empty.path()).is_err());
        assert!(load_session(empty.path().join("missing")).is_err());
    }

    #[test]
    fn parses_live_lines() {
        let sample = parse_sample_line("12.5, 0.1,0.2,9.8, 0.01,0.02,0.03\n").unwrap();
        assert_eq!(sample.timestamp, 12.5);
        assert_eq!(sample.acc, [0.1, 0.2, 9.8]);
        assert_eq!(sample.gyro, [0.01, 0.02, 0.03]);

        assert!(parse_sample_line("1,2,3").is_err());
        assert!(parse_sample_line("1,2,3,4,5,6,x").is_err());
        assert!(parse_sample_line("nan,0,0,0,0,0,0").unwrap().timestamp.is_nan());
    }
}
