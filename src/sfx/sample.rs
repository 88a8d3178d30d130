//! PCM clip decoding via Symphonia for the sample-effects bank

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Longest clip kept after decode, in seconds at 44.1 kHz
const MAX_CLIP_SECONDS: usize = 4;

/// A decoded PCM clip, split into per-side buffers.
///
/// Mono sources fill `left` only; the playback path reuses `left` for the
/// right side in that case.
#[derive(Debug)]
pub struct SfxClip {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub stereo: bool,
    pub sample_rate: u32,
}

impl SfxClip {
    /// Frames available for playback
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Decode a WAV or OGG file into a clip, truncated to the 4-second cap
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let src = File::open(path).map_err(|e| format!("Error reading file: {}: {}", path.display(), e))?;
        let mss = MediaSourceStream::new(Box::new(src), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| format!("Unsupported format: {}: {}", path.display(), e))?;

        let mut reader = probed.format;
        let (track_id, codec_params) = {
            let track = reader
                .tracks()
                .iter()
                .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
                .ok_or_else(|| format!("No audio track found: {}", path.display()))?;
            (track.id, track.codec_params.clone())
        };

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| format!("Unsupported codec: {}: {}", path.display(), e))?;

        let sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(1);
        if channels == 0 {
            return Err(format!("Invalid audio (0 channels): {}", path.display()));
        }

        let max_frames = MAX_CLIP_SECONDS * 44100;
        let mut left = Vec::new();
        let mut right = Vec::new();
        let stereo = channels >= 2;

        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(e) => return Err(format!("Decode error: {}: {}", path.display(), e)),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = decoder
                .decode(&packet)
                .map_err(|e| format!("Decode error: {}: {}", path.display(), e))?;
            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            buf.copy_interleaved_ref(decoded);

            for frame in buf.samples().chunks(channels) {
                left.push(frame[0]);
                if stereo && frame.len() > 1 {
                    right.push(frame[1]);
                }
                if left.len() >= max_frames {
                    break;
                }
            }
            if left.len() >= max_frames {
                log::warn!("SFX clip truncated to {}s: {}", MAX_CLIP_SECONDS, path.display());
                break;
            }
        }

        if left.is_empty() {
            return Err(format!("Empty audio data: {}", path.display()));
        }
        if sample_rate != 44100 {
            log::warn!(
                "SFX clip is {} Hz, played at engine rate: {}",
                sample_rate,
                path.display()
            );
        }

        log::info!(
            "SFX clip loaded: {} frames, {} Hz, {} ch, {}",
            left.len(),
            sample_rate,
            channels,
            path.display()
        );

        Ok(Self {
            left,
            right,
            stereo,
            sample_rate,
        })
    }
}
