//! G.711 mu-law framing and sample conversion helpers.

use rubato::{FastFixedIn, PolynomialDegree};
use std::time::Duration;

/// Sample rate of the PCMU payloads exchanged with the remote model.
pub const PCMU_SAMPLE_RATE: f64 = 8000.0;
/// Packetization interval of outbound audio.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);
/// Samples (and bytes) in one PCMU frame.
pub const PCMU_FRAME_SAMPLES: usize = 160;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1, // mono
    )?;
    Ok(resampler)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Compresses one linear sample to G.711 mu-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) | mantissa) as u8
}

/// Expands one G.711 mu-law byte to a linear sample.
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte as i32;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encodes normalized f32 samples as a PCMU payload.
pub fn encode_pcmu(pcm32: &[f32]) -> Vec<u8> {
    convert_f32_to_i16(pcm32)
        .into_iter()
        .map(linear_to_mulaw)
        .collect()
}

/// Decodes a PCMU payload to normalized f32 samples.
pub fn decode_pcmu(payload: &[u8]) -> Vec<f32> {
    let pcm16: Vec<i16> = payload.iter().map(|&b| mulaw_to_linear(b)).collect();
    convert_i16_to_f32(&pcm16)
}

/// Playback duration of a PCMU payload (one byte per sample).
pub fn pcmu_duration(payload_len: usize) -> Duration {
    Duration::from_micros(payload_len as u64 * 1_000_000 / PCMU_SAMPLE_RATE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, PCMU_SAMPLE_RATE, 960).is_ok());
        assert!(create_resampler(PCMU_SAMPLE_RATE, 44100.0, PCMU_FRAME_SAMPLES).is_ok());
        assert!(create_resampler(8000.0, 8000.0, 160).is_ok());
    }

    #[test]
    fn test_mulaw_known_values() {
        // Silence is all ones on the wire.
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(mulaw_to_linear(0xFF), 0);
        assert_eq!(linear_to_mulaw(i16::MAX), 0x80);
        assert_eq!(mulaw_to_linear(0x80), 32124);
        assert_eq!(mulaw_to_linear(0x00), -32124);
        assert_eq!(linear_to_mulaw(1000), 0xCE);
        assert_eq!(mulaw_to_linear(0xCE), 988);
    }

    #[test]
    fn test_mulaw_preserves_sign_and_rough_magnitude() {
        for sample in [-30000i16, -1200, -40, 40, 1200, 30000] {
            let restored = mulaw_to_linear(linear_to_mulaw(sample));
            assert_eq!(restored.signum(), sample.signum(), "{sample}");
            let error = (restored as i32 - sample as i32).abs();
            assert!(error <= (sample as i32).abs() / 16 + 8, "{sample} -> {restored}");
        }
    }

    #[test]
    fn test_mulaw_clips_extremes() {
        assert_eq!(linear_to_mulaw(i16::MIN), linear_to_mulaw(-MULAW_CLIP as i16));
    }

    #[test]
    fn test_pcmu_frame_helpers() {
        let payload = encode_pcmu(&[0.0; PCMU_FRAME_SAMPLES]);
        assert_eq!(payload.len(), PCMU_FRAME_SAMPLES);
        assert!(payload.iter().all(|&b| b == 0xFF));
        assert_eq!(pcmu_duration(payload.len()), FRAME_DURATION);

        let decoded = decode_pcmu(&encode_pcmu(&[0.5, -0.25]));
        assert_abs_diff_eq!(decoded[0], 0.5, epsilon = 0.02);
        assert_abs_diff_eq!(decoded[1], -0.25, epsilon = 0.02);
    }

    #[test]
    fn test_convert_f32_to_i16_clamps() {
        let result = convert_f32_to_i16(&[1.0, -1.0, 0.0, 2.0, -2.0]);
        assert_eq!(result, vec![i16::MAX, -32767, 0, i16::MAX, i16::MIN]);
        assert!(convert_f32_to_i16(&[]).is_empty());
    }
}
