use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate the realtime API expects for PCM16 input and output.
pub const API_SAMPLE_RATE: u32 = 24_000;

/// Samples per microphone frame handed to the session engine.
pub const FRAME_SAMPLES: usize = 1024;

/// Encodes PCM16 samples as the base64 payload of `input_audio_buffer.append`.
pub fn encode_base64_i16(pcm: &[i16]) -> String {
    let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Decodes the base64 payload of `response.audio.delta` into raw PCM16 bytes.
/// Fails soft: malformed base64 yields an empty buffer rather than an error,
/// so one bad chunk cannot wedge the audio stream.
pub fn decode_base64_pcm(fragment: &str) -> Vec<u8> {
    match base64::engine::general_purpose::STANDARD.decode(fragment) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::error!("failed to decode base64 audio fragment");
            Vec::new()
        }
    }
}

/// Reinterprets little-endian PCM16 bytes as samples; a trailing odd byte is
/// dropped.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Converts normalized f32 samples to PCM16, clamping out-of-range values.
pub fn f32_to_i16(pcm: &[f32]) -> Vec<i16> {
    pcm.iter()
        .map(|&s| (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts PCM16 samples to normalized f32 in [-1.0, 1.0].
pub fn i16_to_f32(pcm: &[i16]) -> Vec<f32> {
    pcm.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Creates a mono resampler between a device rate and the API rate.
pub fn resampler(
    in_rate: f64,
    out_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_rate / in_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use base64::Engine;

    #[test]
    fn encode_decode_i16_round_trip() {
        let original = vec![256i16, -256, 0, i16::MAX, i16::MIN];
        let encoded = encode_base64_i16(&original);
        let decoded = bytes_to_i16(&decode_base64_pcm(&encoded));
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_tolerates_malformed_base64() {
        assert!(decode_base64_pcm("not base64!!").is_empty());
        assert!(decode_base64_pcm("").is_empty());
    }

    #[test]
    fn bytes_to_i16_drops_trailing_odd_byte() {
        let bytes = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40, 0x7f]);
        let samples = bytes_to_i16(&decode_base64_pcm(&bytes));
        assert_eq!(samples, vec![16384]);
    }

    #[test]
    fn f32_conversion_clamps_extremes() {
        let samples = f32_to_i16(&[2.0, -2.0, f32::INFINITY, f32::NEG_INFINITY]);
        assert_eq!(samples[0], i16::MAX);
        assert_eq!(samples[1], i16::MIN);
        assert_eq!(samples[2], i16::MAX);
        assert_eq!(samples[3], i16::MIN);
    }

    #[test]
    fn i16_to_f32_normalizes() {
        let samples = i16_to_f32(&[16384, i16::MIN, 0]);
        assert_abs_diff_eq!(samples[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(samples[1], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(samples[2], 0.0, epsilon = 0.0001);
    }

    #[test]
    fn resampler_accepts_common_rates() {
        assert!(resampler(48_000.0, API_SAMPLE_RATE as f64, 1024).is_ok());
        assert!(resampler(44_100.0, API_SAMPLE_RATE as f64, 1024).is_ok());
        assert!(resampler(24_000.0, 24_000.0, 1024).is_ok());
    }
}
