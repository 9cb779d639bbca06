//! Sample codec: turns a captured buffer into bytes on disk and back.
//!
//! Two layouts are supported:
//! * `wav` - RIFF/WAVE, 2 channels of 16-bit PCM, I on the left channel and Q on the right.
//!   Samples are assumed normalized to [-1, 1] and scaled by 32767. Anything that would land
//!   outside the i16 range saturates to the nearest representable value instead of wrapping.
//! * `raw` - headerless little-endian f32 (re, im) pairs. Sample rate and center frequency are
//!   not embedded, they live in the capture report.

use std::{
    fmt,
    io::{self, Cursor, Read, Seek, Write},
    str::FromStr,
};

use byte_slice_cast::AsByteSlice;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::{
    error::{CaptureError, Result},
    Iq, PCM_FULL_SCALE,
};

// Samples per chunk when streaming raw output
const RAW_CHUNK: usize = 65536;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Wav,
    Raw,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Raw => "raw",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(OutputFormat::Wav),
            "raw" => Ok(OutputFormat::Raw),
            _ => Err(CaptureError::UnsupportedFormat(s.to_owned())),
        }
    }
}

/// Scale a normalized component to 16-bit PCM, saturating at the rails
pub fn to_pcm16(x: f32) -> i16 {
    // NaN maps to 0 through the cast
    (x * PCM_FULL_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn from_pcm16(x: i16) -> f32 {
    x as f32 / PCM_FULL_SCALE
}

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn wav_error(e: hound::Error) -> CaptureError {
    match e {
        hound::Error::IoError(e) => CaptureError::Io(e),
        other => CaptureError::Io(io::Error::new(io::ErrorKind::InvalidData, other)),
    }
}

/// Stream an encoded buffer into `writer`
pub fn write_to<W: Write + Seek>(
    samples: &[Iq],
    format: OutputFormat,
    sample_rate: u32,
    mut writer: W,
) -> Result<()> {
    match format {
        OutputFormat::Wav => {
            let mut wav = WavWriter::new(writer, wav_spec(sample_rate)).map_err(wav_error)?;
            for s in samples {
                wav.write_sample(to_pcm16(s.re)).map_err(wav_error)?;
                wav.write_sample(to_pcm16(s.im)).map_err(wav_error)?;
            }
            wav.finalize().map_err(wav_error)?;
        }
        OutputFormat::Raw => {
            let mut floats = Vec::with_capacity(2 * RAW_CHUNK.min(samples.len()));
            for chunk in samples.chunks(RAW_CHUNK) {
                floats.clear();
                // to_le is a no-op on little endian hosts and a byte swap elsewhere
                floats.extend(chunk.iter().flat_map(|s| {
                    [
                        f32::from_bits(s.re.to_bits().to_le()),
                        f32::from_bits(s.im.to_bits().to_le()),
                    ]
                }));
                writer.write_all(floats.as_byte_slice())?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}

/// Encode a buffer to its on-disk byte layout
pub fn encode(samples: &[Iq], format: OutputFormat, sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_to(samples, format, sample_rate, &mut cursor)?;
    Ok(cursor.into_inner())
}

/// Read an encoded buffer back out of `reader`
pub fn read_from<R: Read>(format: OutputFormat, mut reader: R) -> Result<Vec<Iq>> {
    match format {
        OutputFormat::Wav => {
            let mut wav = WavReader::new(reader).map_err(wav_error)?;
            let spec = wav.spec();
            if spec.channels != 2 || spec.bits_per_sample != 16 {
                return Err(CaptureError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected 2 channel 16-bit PCM, got {} channel {}-bit",
                        spec.channels, spec.bits_per_sample
                    ),
                )));
            }
            let pcm = wav
                .samples::<i16>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(wav_error)?;
            Ok(pcm
                .chunks_exact(2)
                .map(|iq| Iq::new(from_pcm16(iq[0]), from_pcm16(iq[1])))
                .collect())
        }
        OutputFormat::Raw => {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            if bytes.len() % 8 != 0 {
                return Err(CaptureError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "raw payload of {} bytes is not a whole number of samples",
                        bytes.len()
                    ),
                )));
            }
            Ok(bytes
                .chunks_exact(8)
                .map(|b| {
                    Iq::new(
                        f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                        f32::from_le_bytes([b[4], b[5], b[6], b[7]]),
                    )
                })
                .collect())
        }
    }
}

/// Decode bytes produced by [`encode`]
pub fn decode(bytes: &[u8], format: OutputFormat) -> Result<Vec<Iq>> {
    read_from(format, Cursor::new(bytes))
}
