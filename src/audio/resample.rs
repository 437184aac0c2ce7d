//! Sample-rate conversion and PCM16 chunk coding
//!
//! Capture runs at whatever rate the input device offers; the relay speaks
//! 24 kHz mono PCM16, base64-encoded, in both directions. Conversion is
//! plain linear interpolation, which is plenty for speech.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// Sample rate the relay expects for capture and playback audio
pub const TARGET_SAMPLE_RATE: u32 = 24_000;

/// Resample a mono buffer by linear interpolation
///
/// Equal rates return the input unchanged. Output length is
/// `round(len / (source/target))`; each output index samples the input at
/// its fractional position, with the upper neighbor clamped to the last
/// sample.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample_linear(input: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let output_len = (input.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let pos = i as f64 * ratio;
        let lower = (pos as usize).min(input.len() - 1);
        let upper = (lower + 1).min(input.len() - 1);
        let frac = (pos - pos.floor()) as f32;
        output.push(input[lower].mul_add(1.0 - frac, input[upper] * frac));
    }

    output
}

/// Convert f32 samples in [-1, 1] to PCM16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32768.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Convert PCM16 samples back to f32
#[must_use]
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Base64-encode PCM16 samples as little-endian bytes
#[must_use]
pub fn encode_chunk(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    BASE64.encode(bytes)
}

/// Decode a base64 PCM16 chunk into f32 samples
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the payload is not valid base64 or has an
/// odd byte length.
pub fn decode_chunk(audio: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(audio)
        .map_err(|e| Error::Protocol(format!("bad base64 audio: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Protocol(format!(
            "odd PCM16 payload length: {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halving_rate_halves_length() {
        let input = vec![0.0f32; 4096];
        let output = resample_linear(&input, 48_000, 24_000);
        assert_eq!(output.len(), 2048);
    }

    #[test]
    fn equal_rates_return_input_unchanged() {
        let input = vec![0.1f32, -0.2, 0.3];
        let output = resample_linear(&input, 24_000, 24_000);
        assert_eq!(output, input);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(resample_linear(&[], 48_000, 24_000).is_empty());
    }

    #[test]
    fn upsampling_interpolates_between_neighbors() {
        let input = vec![0.0f32, 1.0];
        let output = resample_linear(&input, 24_000, 48_000);

        assert_eq!(output.len(), 4);
        assert!((output[0] - 0.0).abs() < 1e-6);
        assert!((output[1] - 0.5).abs() < 1e-6);
        assert!((output[2] - 1.0).abs() < 1e-6);
        // Past the last sample the upper neighbor clamps
        assert!((output[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn pcm16_conversion_clamps() {
        let samples = vec![0.0f32, 1.0, -1.0, 2.0, -2.0];
        let pcm = f32_to_pcm16(&samples);
        assert_eq!(pcm, vec![0, 32767, -32768, 32767, -32768]);
    }

    #[test]
    fn pcm16_roundtrip_preserves_scale() {
        let pcm = vec![0i16, 16384, -16384, 32767, -32768];
        let floats = pcm16_to_f32(&pcm);
        assert!((floats[1] - 0.5).abs() < 1e-4);
        assert!((floats[2] + 0.5).abs() < 1e-4);
        assert!((floats[4] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn chunk_coding_roundtrip() {
        let pcm = vec![0i16, 1, -1, 12345, -12345];
        let encoded = encode_chunk(&pcm);
        let decoded = decode_chunk(&encoded).unwrap();

        assert_eq!(decoded.len(), pcm.len());
        for (d, p) in decoded.iter().zip(&pcm) {
            assert!((d - f32::from(*p) / 32768.0).abs() < 1e-6);
        }
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(matches!(
            decode_chunk("not base64!!!"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn decode_rejects_odd_payload() {
        let encoded = BASE64.encode([0u8, 1, 2]);
        assert!(matches!(decode_chunk(&encoded), Err(Error::Protocol(_))));
    }
}
