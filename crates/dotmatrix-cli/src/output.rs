//! Files written at the end of a run.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use dotmatrix_core::apu::DEFAULT_SAMPLE_RATE;
use dotmatrix_core::audio_queue::AudioConsumer;
use dotmatrix_core::ppu::{FRAME_BYTES, SCREEN_HEIGHT, SCREEN_WIDTH};

fn create_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path
        .parent()
        .and_then(|p| (!p.as_os_str().is_empty()).then_some(p))
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Encode one RGBA frame as an 8-bit PNG.
pub fn write_png(path: &Path, rgba: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    if rgba.len() != FRAME_BYTES {
        return Err(format!("no complete frame to save ({} bytes)", rgba.len()).into());
    }
    create_parent_dir(path)?;
    let w = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(w, SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(rgba)?;
    Ok(())
}

/// 16-bit stereo WAV at the core's default output rate, fed from the audio
/// queue.
pub struct WavRecorder {
    writer: hound::WavWriter<BufWriter<File>>,
    frames: u64,
}

impl WavRecorder {
    pub fn create(path: &Path) -> Result<Self, hound::Error> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        create_parent_dir(path)?;
        Ok(Self {
            writer: hound::WavWriter::create(path, spec)?,
            frames: 0,
        })
    }

    /// Write every frame currently queued.
    pub fn drain(&mut self, consumer: &AudioConsumer) -> Result<(), hound::Error> {
        while let Some((left, right)) = consumer.pop_stereo() {
            self.writer.write_sample(to_pcm16(left))?;
            self.writer.write_sample(to_pcm16(right))?;
            self.frames += 1;
        }
        Ok(())
    }

    /// Patch the header and return how many stereo frames were written.
    pub fn finalize(self) -> Result<u64, hound::Error> {
        self.writer.finalize()?;
        Ok(self.frames)
    }
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotmatrix_core::audio_queue::audio_queue;
    use dotmatrix_core::sink::AudioSink;
    use tempfile::tempdir;

    #[test]
    fn pcm_conversion_clamps() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), i16::MAX);
        assert_eq!(to_pcm16(4.0), i16::MAX);
        assert_eq!(to_pcm16(-1.0), -i16::MAX);
    }

    #[test]
    fn wav_holds_every_queued_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("audio.wav");
        let (mut tx, rx) = audio_queue(64);
        tx.push_samples(&[[0.5, -0.5]; 10]);

        let mut rec = WavRecorder::create(&path).unwrap();
        rec.drain(&rx).unwrap();
        assert_eq!(rec.finalize().unwrap(), 10);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(reader.len(), 20);
    }

    #[test]
    fn png_needs_a_full_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shot.png");
        assert!(write_png(&path, &[]).is_err());
        assert!(!path.exists());

        write_png(&path, &vec![0x80; FRAME_BYTES]).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
