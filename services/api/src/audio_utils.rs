use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

/// Frames fed to the resampler per call.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

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
        1,
    )?;
    Ok(resampler)
}

/// Base64 of raw PCM16 bytes, as the voice API expects them.
pub fn encode_pcm(pcm16: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16)
}

/// Byte length of the PCM carried by a base64 string, without decoding it.
pub fn pcm_byte_len(base64_fragment: &str) -> usize {
    let trimmed = base64_fragment.trim_end();
    let padding = trimmed.bytes().rev().take_while(|&b| b == b'=').count();
    (trimmed.len() / 4 * 3).saturating_sub(padding)
}

/// Little-endian PCM16 bytes to samples. A trailing odd byte is ignored.
pub fn pcm_bytes_to_i16(pcm16: &[u8]) -> Vec<i16> {
    pcm16
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn i16_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
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

/// Converts mic PCM16 captured at the browser's rate to the voice API's rate.
///
/// Samples that do not fill a whole resampler chunk are held until the next
/// call.
pub struct MicResampler {
    resampler: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl MicResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> anyhow::Result<Self> {
        Ok(Self {
            resampler: create_resampler(
                input_rate as f64,
                output_rate as f64,
                RESAMPLER_CHUNK_SIZE,
            )?,
            pending: Vec::new(),
        })
    }

    pub fn process(&mut self, pcm16: &[u8]) -> Vec<u8> {
        self.pending
            .extend(convert_i16_to_f32(&pcm_bytes_to_i16(pcm16)));

        let mut out = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match self.resampler.process(&[chunk], None) {
                Ok(resampled) => {
                    out.extend(i16_to_pcm_bytes(&convert_f32_to_i16(&resampled[0])));
                }
                Err(e) => {
                    error!(error = %e, "Failed to resample mic audio");
                    break;
                }
            }
        }
        out
    }
}
