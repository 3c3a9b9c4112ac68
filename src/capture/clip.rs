//! Push-to-talk clip encoding.

use std::io::Cursor;

use base64::Engine;

use crate::error::DeviceError;

pub struct EncodedClip {
    pub wav_base64: String,
    pub duration_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

pub fn duration_ms(sample_count: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    sample_count as u64 * 1000 / sample_rate as u64
}

/// Encode mono f32 PCM as a 16-bit WAV. Only the most recent `max_ms` of
/// audio is kept.
pub fn encode_clip(
    samples: &[f32],
    sample_rate: u32,
    max_ms: u64,
) -> Result<EncodedClip, DeviceError> {
    let max_samples = (max_ms * sample_rate as u64 / 1000) as usize;
    let samples = if samples.len() > max_samples {
        &samples[samples.len() - max_samples..]
    } else {
        samples
    };

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
        for sample in samples {
            let converted = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(converted).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
    }

    Ok(EncodedClip {
        wav_base64: base64::engine::general_purpose::STANDARD.encode(cursor.into_inner()),
        duration_ms: duration_ms(samples.len(), sample_rate),
        sample_rate,
        channels: spec.channels,
    })
}

fn wav_error(err: hound::Error) -> DeviceError {
    DeviceError::Capture(format!("wav encoding failed: {err}"))
}
