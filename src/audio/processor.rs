use super::preprocess::SAMPLE_RATE;
use crate::error::{AppError, Result};
use rubato::{FftFixedInOut, Resampler};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

const TARGET_SAMPLE_RATE: u32 = SAMPLE_RATE as u32;

/// Resample mono audio to the 16kHz the pipeline expects.
///
/// The resampler's output delay is removed, so sample positions are kept,
/// and the result holds exactly `len * 16000 / source_rate` samples.
pub fn resample_to_16k(samples: &[f32], source_rate: u32) -> Result<Vec<f32>> {
    match source_rate {
        0 => return Err(AppError::Audio("Source sample rate is zero".to_string())),
        TARGET_SAMPLE_RATE => return Ok(samples.to_vec()),
        _ => {}
    }
    debug!("Resampling {} samples from {}Hz", samples.len(), source_rate);

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, TARGET_SAMPLE_RATE as usize, 1024, 1)
            .map_err(|e| AppError::Audio(format!("Failed to create resampler: {}", e)))?;

    let chunk = resampler.input_frames_next();
    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * TARGET_SAMPLE_RATE as u64 / source_rate as u64) as usize;
    let silence = vec![0.0f32; chunk];

    let mut resampled = Vec::with_capacity(delay + expected + resampler.output_frames_next());
    let mut blocks = samples.chunks(chunk);
    // Keep feeding zeros after the input until the delayed tail is flushed
    while resampled.len() < delay + expected {
        let block = match blocks.next() {
            Some(block) if block.len() == chunk => block.to_vec(),
            Some(block) => {
                let mut padded = block.to_vec();
                padded.resize(chunk, 0.0);
                padded
            }
            None => silence.clone(),
        };
        let frames = resampler
            .process(&[block], None)
            .map_err(|e| AppError::Audio(format!("Resampling failed: {}", e)))?;
        match frames.first() {
            Some(mono) if !mono.is_empty() => resampled.extend_from_slice(mono),
            _ => break,
        }
    }

    let start = delay.min(resampled.len());
    let mut aligned = resampled.split_off(start);
    aligned.truncate(expected);
    Ok(aligned)
}

/// Load a recording and convert it to 16kHz mono f32
pub fn load_recording(path: &Path) -> Result<Vec<f32>> {
    let (samples, sample_rate) = load_audio_file(path)?;
    resample_to_16k(&samples, sample_rate)
}

/// Load audio from file as mono f32 at its native rate
pub fn load_audio_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    if extension != "wav" {
        return Err(AppError::Audio(format!(
            "Unsupported recording format {:?} for {:?}; only WAV is read",
            extension, path
        )));
    }
    read_wav(hound::WavReader::open(path)?)
}

/// Decode an in-memory WAV file as mono f32 at its native rate
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    read_wav(hound::WavReader::new(Cursor::new(bytes))?)
}

fn read_wav<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<(Vec<f32>, u32)> {
    let spec = reader.spec();
    debug!(
        "Reading WAV: {}Hz, {} channels, {} bit {:?}",
        spec.sample_rate, spec.channels, spec.bits_per_sample, spec.sample_format
    );

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<std::result::Result<Vec<f32>, _>>()?,
        hound::SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<std::result::Result<Vec<f32>, _>>()?
        }
    };

    Ok((downmix(interleaved, spec.channels as usize), spec.sample_rate))
}

/// Average interleaved channels into one
fn downmix(interleaved: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved;
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Encode 16kHz mono samples as a 16-bit PCM WAV file
pub fn encode_wav(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Length of `samples` at `sample_rate`, in whole milliseconds
pub fn duration_ms(samples: &[f32], sample_rate: u32) -> i64 {
    ((samples.len() as f64 / sample_rate as f64) * 1000.0) as i64
}
