use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::SynthesisError;

/// Signed 16-bit interleaved PCM, the unit speech engines hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl PcmAudio {
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn read_wav(path: &Path) -> Result<Self, SynthesisError> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(SynthesisError::FormatMismatch(format!(
                "{} is not 16-bit integer PCM",
                path.display()
            )));
        }
        let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.channels as f64 / self.sample_rate as f64
    }
}

/// Narration on disk with its decoded duration.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub path: PathBuf,
    pub duration: f64,
}

/// Appends chunks back to back, sample for sample, so no silence is
/// introduced at splice points, and writes the result as a WAV file.
pub fn write_concatenated(parts: &[PcmAudio], path: &Path) -> Result<AudioTrack, SynthesisError> {
    let first = parts
        .first()
        .ok_or_else(|| SynthesisError::InvalidText("no audio to write".into()))?;
    for (i, part) in parts.iter().enumerate() {
        if part.sample_rate != first.sample_rate || part.channels != first.channels {
            return Err(SynthesisError::FormatMismatch(format!(
                "chunk {} is {} Hz/{} ch, expected {} Hz/{} ch",
                i, part.sample_rate, part.channels, first.sample_rate, first.channels
            )));
        }
    }
    let spec = WavSpec {
        channels: first.channels,
        sample_rate: first.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for part in parts {
        for sample in &part.samples {
            writer.write_sample(*sample)?;
        }
    }
    writer.finalize()?;
    Ok(AudioTrack {
        path: path.to_path_buf(),
        duration: wav_duration_seconds(path)?,
    })
}

pub fn wav_duration_seconds(path: &Path) -> Result<f64, SynthesisError> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    let duration = frames / spec.sample_rate as f64;
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, rate: u32) -> PcmAudio {
        PcmAudio {
            sample_rate: rate,
            channels: 1,
            samples: (0..len).map(|i| (i % 100) as i16).collect(),
        }
    }

    #[test]
    fn concatenation_adds_no_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narration.wav");
        let track = write_concatenated(&[tone(8000, 16000), tone(24000, 16000)], &path).unwrap();
        assert!((track.duration - 2.0).abs() < 1e-9);
        let decoded = PcmAudio::read_wav(&path).unwrap();
        assert_eq!(decoded.samples.len(), 32000);
        assert_eq!(decoded.samples[8000], 0);
        assert_eq!(decoded.samples[8001], 1);
    }

    #[test]
    fn mismatched_rates_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narration.wav");
        let result = write_concatenated(&[tone(10, 16000), tone(10, 22050)], &path);
        assert!(matches!(result, Err(SynthesisError::FormatMismatch(_))));
    }

    #[test]
    fn decodes_little_endian_pcm() {
        let audio = PcmAudio::from_le_bytes(&[0x01, 0x00, 0xff, 0xff, 0x7f], 44100, 1);
        assert_eq!(audio.samples, vec![1, -1]);
    }
}
