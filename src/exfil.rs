//! This module is responsible for getting session products onto disk
//!
//! Every file goes to a `.part` sibling first and is renamed into place once it's complete,
//! so an interrupted session never leaves a truncated file behind or clobbers the last good
//! one.

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder, Rgb, RgbImage};
use tracing::{debug, info};

use crate::{
    analysis::{Spectrogram, SpectrumTrace},
    codec::{self, OutputFormat},
    error::{CaptureError, Result},
    report::CaptureReport,
    Iq,
};

/// Most points we'll put in a spectrum CSV, longer traces are max-hold decimated
pub const SPECTRUM_POINTS: usize = 16384;

/// `iq_capture_<freq>MHz_<timestamp>.<ext>`, with the dot in the frequency swapped for an
/// underscore so it doesn't read as an extension
pub fn default_output_path(freq_mhz: f64, format: OutputFormat, now: &DateTime<Local>) -> PathBuf {
    let freq = freq_mhz.to_string().replace('.', "_");
    PathBuf::from(format!(
        "iq_capture_{}MHz_{}.{}",
        freq,
        now.format("%Y%m%d_%H%M%S"),
        format.extension()
    ))
}

/// Sibling of `output` named `<stem><suffix>`, e.g. `capture_report.txt` for `capture.wav`
pub fn sibling_path(output: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = output.file_stem().unwrap_or_default().to_owned();
    name.push(suffix);
    output.with_file_name(name)
}

pub fn report_path(output: &Path) -> PathBuf {
    sibling_path(output, "_report.txt")
}

pub fn spectrum_path(output: &Path) -> PathBuf {
    sibling_path(output, "_spectrum.csv")
}

pub fn waterfall_path(output: &Path) -> PathBuf {
    sibling_path(output, "_waterfall.png")
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Run `body` against a buffered temp file and move it over `path` only if it succeeds
pub fn write_atomic<F>(path: &Path, body: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let part = part_path(path);
    let result = File::create(&part)
        .map_err(CaptureError::from)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            body(&mut writer)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            Ok(())
        })
        .and_then(|_| fs::rename(&part, path).map_err(CaptureError::from));
    if result.is_err() {
        // Might not exist if create failed
        let _ = fs::remove_file(&part);
    }
    result
}

pub fn write_samples(
    path: &Path,
    samples: &[Iq],
    format: OutputFormat,
    sample_rate: u32,
) -> Result<()> {
    write_atomic(path, |w| codec::write_to(samples, format, sample_rate, w))?;
    info!("Saved {} samples to {}", samples.len(), path.display());
    Ok(())
}

pub fn write_report(path: &Path, report: &CaptureReport) -> Result<()> {
    write_atomic(path, |w| {
        w.write_all(report.render().as_bytes())?;
        Ok(())
    })?;
    info!("Analysis report saved: {}", path.display());
    Ok(())
}

/// Keep the loudest bin of every run of `factor` so narrow peaks survive decimation
fn max_hold(trace: &SpectrumTrace, max_points: usize) -> Vec<(f64, f64)> {
    let n = trace.power_db.len();
    let factor = if max_points == 0 { n.max(1) } else { (n + max_points - 1) / max_points }.max(1);
    trace
        .power_db
        .chunks(factor)
        .zip(trace.frequencies.chunks(factor))
        .filter_map(|(power, freq)| {
            power
                .iter()
                .zip(freq)
                .max_by(|a, b| a.0.total_cmp(b.0))
                .map(|(&p, &f)| (f, p))
        })
        .collect()
}

pub fn write_spectrum_csv(path: &Path, trace: &SpectrumTrace, max_points: usize) -> Result<()> {
    let points = max_hold(trace, max_points);
    write_atomic(path, |w| {
        writeln!(w, "frequency_hz,power_db")?;
        for (f, p) in &points {
            writeln!(w, "{f:.3},{p:.3}")?;
        }
        Ok(())
    })?;
    info!("Spectrum saved: {} ({} points)", path.display(), points.len());
    Ok(())
}

// Polynomial fit of matplotlib's viridis
fn viridis(t: f64) -> [u8; 3] {
    let r = (0.267 + t * (0.329 + t * (1.451 + t * (-1.808 + t * 0.758)))).clamp(0.0, 1.0);
    let g = (0.004 + t * (1.513 + t * (-0.838 + t * (0.731 - t * 0.466)))).clamp(0.0, 1.0);
    let b = (0.329 + t * (1.442 + t * (-2.642 + t * (1.963 - t * 0.440)))).clamp(0.0, 1.0);
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

/// Spectrogram as an image: one row per time segment (earliest at the top), frequency
/// increasing left to right with DC in the middle
pub fn render_waterfall(spectrogram: &Spectrogram) -> RgbImage {
    let width = spectrogram.num_bins();
    let height = spectrogram.num_segments();
    let (lo, hi) = spectrogram.power_range().unwrap_or((0.0, 1.0));
    let range = if hi > lo { hi - lo } else { 1.0 };
    let mut img = RgbImage::new(width as u32, height as u32);
    for (y, row) in spectrogram.power_db.iter().enumerate() {
        for (k, &p) in row.iter().enumerate() {
            // FFT order puts negative frequencies in the upper half
            let x = (k + width / 2) % width;
            let t = ((p - lo) / range).clamp(0.0, 1.0);
            img.put_pixel(x as u32, y as u32, Rgb(viridis(t)));
        }
    }
    img
}

pub fn write_waterfall_png(path: &Path, spectrogram: &Spectrogram) -> Result<()> {
    let img = render_waterfall(spectrogram);
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        debug!("Empty spectrogram, skipping {}", path.display());
        return Ok(());
    }
    write_atomic(path, |w| {
        PngEncoder::new(w)
            .write_image(img.as_raw(), width, height, ColorType::Rgb8)
            .map_err(|e| CaptureError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    })?;
    info!("Waterfall saved: {} ({}x{})", path.display(), width, height);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io;
    use tempfile::TempDir;

    #[test]
    fn test_default_output_path() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            default_output_path(146.52, OutputFormat::Wav, &now),
            PathBuf::from("iq_capture_146_52MHz_20240309_140507.wav")
        );
        assert_eq!(
            default_output_path(446.0, OutputFormat::Raw, &now),
            PathBuf::from("iq_capture_446MHz_20240309_140507.raw")
        );
    }

    #[test]
    fn test_sibling_paths() {
        let out = Path::new("caps/run1.wav");
        assert_eq!(report_path(out), PathBuf::from("caps/run1_report.txt"));
        assert_eq!(spectrum_path(out), PathBuf::from("caps/run1_spectrum.csv"));
        assert_eq!(waterfall_path(out), PathBuf::from("caps/run1_waterfall.png"));
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.raw");
        fs::write(&path, b"previous").unwrap();
        let res = write_atomic(&path, |w| {
            w.write_all(b"half")?;
            Err(CaptureError::Io(io::Error::new(io::ErrorKind::Other, "boom")))
        });
        assert!(res.is_err());
        assert_eq!(fs::read(&path).unwrap(), b"previous");
        assert!(!part_path(&path).exists());

        write_atomic(&path, |w| {
            w.write_all(b"fresh")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fresh");
    }

    #[test]
    fn test_samples_on_disk_match_codec() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cap.wav");
        let samples = vec![Iq::new(0.5, -0.5), Iq::new(1.0, -1.0), Iq::new(0.0, 0.25)];
        write_samples(&path, &samples, OutputFormat::Wav, 48_000).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes, codec::encode(&samples, OutputFormat::Wav, 48_000).unwrap());
    }

    #[test]
    fn test_max_hold_keeps_peaks() {
        let trace = SpectrumTrace {
            frequencies: (0..10).map(|k| k as f64).collect(),
            power_db: vec![0.0, 1.0, 9.0, 0.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0],
        };
        assert_eq!(max_hold(&trace, 3), vec![(2.0, 9.0), (7.0, 5.0), (9.0, 0.0)]);
        assert_eq!(max_hold(&trace, 100).len(), 10);
    }

    #[test]
    fn test_spectrum_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cap_spectrum.csv");
        let trace = SpectrumTrace {
            frequencies: vec![100e6, 100.001e6],
            power_db: vec![-3.5, 10.0],
        };
        write_spectrum_csv(&path, &trace, SPECTRUM_POINTS).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "frequency_hz,power_db\n100000000.000,-3.500\n100001000.000,10.000\n"
        );
    }

    #[test]
    fn test_waterfall_is_fftshifted() {
        let spectrogram = Spectrogram {
            times: vec![0.0, 1.0],
            frequencies: vec![0.0, 1.0, -2.0, -1.0],
            power_db: vec![vec![10.0, 0.0, 0.0, 0.0], vec![0.0, 0.0, 0.0, 0.0]],
        };
        let img = render_waterfall(&spectrogram);
        assert_eq!(img.dimensions(), (4, 2));
        // DC lands in column 2, after the two negative bins
        assert_eq!(img.get_pixel(2, 0).0, viridis(1.0));
        assert_eq!(img.get_pixel(0, 0).0, viridis(0.0));
        assert_eq!(img.get_pixel(2, 1).0, viridis(0.0));
    }

    #[test]
    fn test_waterfall_png_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cap_waterfall.png");
        let spectrogram = Spectrogram {
            times: vec![0.0],
            frequencies: vec![0.0, 1.0],
            power_db: vec![vec![-10.0, 0.0]],
        };
        write_waterfall_png(&path, &spectrogram).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
