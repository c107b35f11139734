// PCM codec: float samples <-> 16-bit little-endian PCM <-> base64 text
//
// No resampling happens here. Every entry point takes the sample rate
// explicitly and a mismatch with the frame's MIME tag is reported, never
// coerced.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{LiveError, LiveResult};

/// Scale between float amplitude and 16-bit PCM
pub const PCM_SCALE: f32 = 32768.0;

const PCM_MIME_PREFIX: &str = "audio/pcm";

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
}

impl AudioFrame {
    /// Build a frame, rejecting sample counts that don't divide into channels
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> LiveResult<Self> {
        check_layout(samples.len(), channels)?;
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Convert float samples in [-1, 1] to fixed point by scaling and truncating
    pub fn from_f32(samples: &[f32], sample_rate: u32, channels: u16) -> LiveResult<Self> {
        let pcm = samples.iter().map(|&s| (s * PCM_SCALE) as i16).collect();
        Self::new(pcm, sample_rate, channels)
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Duration in seconds = samples / (sample_rate * channels)
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Little-endian byte representation
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> LiveResult<Self> {
        if bytes.len() % 2 != 0 {
            return Err(LiveError::MalformedAudio(format!(
                "odd PCM byte length {}",
                bytes.len()
            )));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();

        Self::new(samples, sample_rate, channels)
    }
}

/// One audio frame in transport-safe form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Base64-encoded PCM bytes
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl WireFrame {
    /// Declared sample rate, if the tag carries one
    pub fn declared_rate(&self) -> Option<u32> {
        parse_mime_rate(&self.mime_type)
    }
}

/// Decoded playback audio, split per channel
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    /// One vector of samples per channel
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Re-interleave channels for devices that take interleaved buffers
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frame_count();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for i in 0..frames {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }
}

/// MIME tag for raw PCM at the given rate
pub fn mime_type_for(sample_rate: u32) -> String {
    format!("{};rate={}", PCM_MIME_PREFIX, sample_rate)
}

/// Extract `rate=N` from a MIME tag such as `audio/pcm;rate=24000`
pub fn parse_mime_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Encode float samples (interleaved) into a tagged wire frame
pub fn encode(samples: &[f32], channels: u16, sample_rate: u32) -> LiveResult<WireFrame> {
    let frame = AudioFrame::from_f32(samples, sample_rate, channels)?;
    Ok(encode_frame(&frame))
}

/// Encode an already-quantized frame
pub fn encode_frame(frame: &AudioFrame) -> WireFrame {
    WireFrame {
        data: base64::engine::general_purpose::STANDARD.encode(frame.to_le_bytes()),
        mime_type: mime_type_for(frame.sample_rate),
    }
}

/// Decode a wire frame into per-channel float samples
pub fn decode(frame: &WireFrame, sample_rate: u32, channels: u16) -> LiveResult<DecodedAudio> {
    let pcm = decode_frame(frame, sample_rate, channels)?;
    let channel_count = channels as usize;
    let frames = pcm.frame_count();

    let mut split = vec![Vec::with_capacity(frames); channel_count];
    for (i, sample) in pcm.samples.iter().enumerate() {
        split[i % channel_count].push(*sample as f32 / PCM_SCALE);
    }

    Ok(DecodedAudio {
        sample_rate,
        channels: split,
    })
}

/// Decode a wire frame into fixed-point samples
pub fn decode_frame(frame: &WireFrame, sample_rate: u32, channels: u16) -> LiveResult<AudioFrame> {
    if let Some(declared) = frame.declared_rate() {
        if declared != sample_rate {
            return Err(LiveError::MalformedAudio(format!(
                "frame declares {}Hz but stream expects {}Hz",
                declared, sample_rate
            )));
        }
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&frame.data)
        .map_err(|e| LiveError::MalformedAudio(format!("invalid base64: {}", e)))?;

    AudioFrame::from_le_bytes(&bytes, sample_rate, channels)
}

fn check_layout(sample_count: usize, channels: u16) -> LiveResult<()> {
    if channels == 0 {
        return Err(LiveError::MalformedAudio("channel count is zero".to_string()));
    }
    if sample_count % channels as usize != 0 {
        return Err(LiveError::MalformedAudio(format!(
            "{} samples do not divide into {} channels",
            sample_count, channels
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_within_quantization() {
        let samples: Vec<f32> = (0..512).map(|i| ((i as f32) * 0.05).sin() * 0.9).collect();

        let wire = encode(&samples, 1, 16000).unwrap();
        let decoded = decode(&wire, 16000, 1).unwrap();

        assert_eq!(decoded.frame_count(), samples.len());
        for (orig, back) in samples.iter().zip(&decoded.channels[0]) {
            assert!((orig - back).abs() <= 1.0 / PCM_SCALE, "{} vs {}", orig, back);
        }
    }

    #[test]
    fn test_stereo_split_preserves_interleaving() {
        // [L, R, L, R]
        let samples = [0.5, -0.5, 0.25, -0.25];
        let wire = encode(&samples, 2, 24000).unwrap();
        let decoded = decode(&wire, 24000, 2).unwrap();

        assert_eq!(decoded.channels.len(), 2);
        assert_eq!(decoded.channels[0], vec![0.5, 0.25]);
        assert_eq!(decoded.channels[1], vec![-0.5, -0.25]);
        assert_eq!(decoded.interleaved(), samples.to_vec());
    }

    #[test]
    fn test_truncation_and_saturation() {
        let frame = AudioFrame::from_f32(&[1.0, -1.0, 0.00002, -0.00002], 16000, 1).unwrap();
        assert_eq!(frame.samples, vec![i16::MAX, i16::MIN, 0, 0]);
    }

    #[test]
    fn test_channel_mismatch_is_malformed() {
        let err = encode(&[0.1, 0.2, 0.3], 2, 16000).unwrap_err();
        assert!(matches!(err, LiveError::MalformedAudio(_)));
    }

    #[test]
    fn test_empty_input_is_valid() {
        let wire = encode(&[], 1, 16000).unwrap();
        assert!(wire.data.is_empty());
        assert_eq!(wire.mime_type, "audio/pcm;rate=16000");

        let decoded = decode(&wire, 16000, 1).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.duration_secs(), 0.0);
    }

    #[test]
    fn test_rate_mismatch_is_not_coerced() {
        let wire = encode(&[0.1; 16], 1, 16000).unwrap();
        let err = decode(&wire, 24000, 1).unwrap_err();
        assert!(matches!(err, LiveError::MalformedAudio(_)));
    }

    #[test]
    fn test_untagged_rate_is_accepted() {
        let mut wire = encode(&[0.1; 16], 1, 24000).unwrap();
        wire.mime_type = "audio/pcm".to_string();
        assert!(decode(&wire, 24000, 1).is_ok());
    }

    #[test]
    fn test_bad_payloads_are_malformed() {
        let not_base64 = WireFrame {
            data: "***".to_string(),
            mime_type: mime_type_for(24000),
        };
        assert!(matches!(
            decode(&not_base64, 24000, 1),
            Err(LiveError::MalformedAudio(_))
        ));

        let odd_bytes = WireFrame {
            data: base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]),
            mime_type: mime_type_for(24000),
        };
        assert!(matches!(
            decode(&odd_bytes, 24000, 1),
            Err(LiveError::MalformedAudio(_))
        ));
    }

    #[test]
    fn test_parse_mime_rate() {
        assert_eq!(parse_mime_rate("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(parse_mime_rate("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(parse_mime_rate("audio/pcm"), None);
        assert_eq!(parse_mime_rate("audio/pcm;rate=abc"), None);
    }

    #[test]
    fn test_frame_duration() {
        // 100ms at 16kHz mono
        let frame = AudioFrame::new(vec![0; 1600], 16000, 1).unwrap();
        assert!((frame.duration_secs() - 0.1).abs() < 1e-9);
    }
}
