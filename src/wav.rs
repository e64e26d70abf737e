//! PCM16 -> RIFF/WAVE container encoding for handing speech to a playback sink

use std::io::Cursor;

/// Size of the canonical RIFF/WAVE header written by [`encode`].
pub const HEADER_LEN: usize = 44;

/// Error type for container operations
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("PCM payload of {len} bytes is not a whole number of {channels}-channel frames")]
    MisalignedPayload { len: usize, channels: u16 },

    #[error("channel count must be at least 1")]
    NoChannels,

    #[error("payload too large for a WAV container: {0} bytes")]
    TooLarge(usize),

    #[error("unsupported container format: {0}")]
    Unsupported(String),

    #[error("WAV parse error: {0}")]
    Parse(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;

/// Wrap raw little-endian PCM16 bytes in a WAV container.
pub fn encode(pcm_data: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    if channels == 0 {
        return Err(ContainerError::NoChannels);
    }
    let frame_bytes = usize::from(channels) * 2;
    if pcm_data.len() % frame_bytes != 0 {
        return Err(ContainerError::MisalignedPayload {
            len: pcm_data.len(),
            channels,
        });
    }
    let data_size = u32::try_from(pcm_data.len())
        .ok()
        .filter(|size| *size <= u32::MAX - 36)
        .ok_or(ContainerError::TooLarge(pcm_data.len()))?;

    let bits_per_sample = 16u16;
    let byte_rate = sample_rate * u32::from(channels) * u32::from(bits_per_sample) / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_size;

    let mut wav = Vec::with_capacity(HEADER_LEN + pcm_data.len());

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // linear PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm_data);

    Ok(wav)
}

/// Raw PCM recovered from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPcm {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedPcm {
    /// Playback duration implied by the payload length.
    pub fn duration(&self) -> std::time::Duration {
        pcm16_duration(self.pcm.len(), self.sample_rate, self.channels)
    }
}

/// Parse a 16-bit integer WAV container back into raw little-endian PCM.
pub fn decode(container: &[u8]) -> Result<DecodedPcm> {
    let mut reader = hound::WavReader::new(Cursor::new(container))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(ContainerError::Unsupported(format!(
            "{:?} at {} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }

    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        pcm.extend_from_slice(&sample?.to_le_bytes());
    }

    Ok(DecodedPcm {
        pcm,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Playback duration of `len` bytes of PCM16 at the given rate and channel count.
pub fn pcm16_duration(len: usize, sample_rate: u32, channels: u16) -> std::time::Duration {
    if sample_rate == 0 || channels == 0 {
        return std::time::Duration::ZERO;
    }
    let frames = len as u64 / (u64::from(channels) * 2);
    std::time::Duration::from_micros(frames * 1_000_000 / u64::from(sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(samples: usize) -> Vec<u8> {
        (0..samples)
            .flat_map(|i| ((i as i16).wrapping_mul(97)).to_le_bytes())
            .collect()
    }

    #[test]
    fn test_header_fields() {
        let pcm = ramp(10);
        let wav = encode(&pcm, 24_000, 1).unwrap();

        assert_eq!(wav.len(), HEADER_LEN + pcm.len());
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 36 + 20);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 1);
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 24_000);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 48_000);
        assert_eq!(u16::from_le_bytes([wav[32], wav[33]]), 2);
        assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 20);
        assert_eq!(&wav[HEADER_LEN..], &pcm[..]);
    }

    #[test]
    fn test_round_trip_through_hound() {
        let pcm = ramp(4_801);
        let wav = encode(&pcm, 24_000, 1).unwrap();
        let decoded = decode(&wav).unwrap();

        assert_eq!(decoded.sample_rate, 24_000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.pcm.len(), pcm.len());
        assert_eq!(decoded.pcm, pcm);
    }

    #[test]
    fn test_stereo_block_align() {
        let pcm = ramp(8);
        let wav = encode(&pcm, 16_000, 2).unwrap();
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 64_000);
        assert_eq!(u16::from_le_bytes([wav[32], wav[33]]), 4);
    }

    #[test]
    fn test_misaligned_payload_rejected() {
        assert!(matches!(
            encode(&[1, 2, 3], 24_000, 1),
            Err(ContainerError::MisalignedPayload { len: 3, channels: 1 })
        ));
        assert!(matches!(
            encode(&[0; 6], 24_000, 2),
            Err(ContainerError::MisalignedPayload { .. })
        ));
        assert!(matches!(encode(&[], 24_000, 0), Err(ContainerError::NoChannels)));
    }

    #[test]
    fn test_empty_payload() {
        let wav = encode(&[], 24_000, 1).unwrap();
        assert_eq!(wav.len(), HEADER_LEN);
        let decoded = decode(&wav).unwrap();
        assert!(decoded.pcm.is_empty());
    }

    #[test]
    fn test_duration() {
        assert_eq!(
            pcm16_duration(48_000, 24_000, 1),
            std::time::Duration::from_secs(1)
        );
        let decoded = decode(&encode(&vec![0; 12_000], 24_000, 1).unwrap()).unwrap();
        assert_eq!(decoded.duration(), std::time::Duration::from_millis(250));
    }
}
