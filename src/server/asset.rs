// ABOUTME: Audio asset reader built on symphonia
// ABOUTME: Yields the stream header and whole-frame PCM chunks of a stored song

use crate::protocol::frame::{Encoding, StreamHeader};
use std::io;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{self, CodecType, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Failures of a streaming worker
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// The asset file could not be opened
    #[error("Cannot open audio asset {}: {source}", path.display())]
    Open {
        /// Asset path
        path: PathBuf,
        /// Cause reported by the OS
        source: io::Error,
    },

    /// The container or codec could not be read
    #[error("Unreadable audio asset: {0}")]
    Format(#[from] SymphoniaError),

    /// The container holds no audio track
    #[error("No audio track found")]
    NoAudioTrack,

    /// The audio track lacks a parameter needed for the header
    #[error("Audio track has no {0}")]
    MissingParameter(&'static str),

    /// Writing to the stream connection failed
    #[error("Stream connection failed: {0}")]
    Transport(#[source] io::Error),
}

/// Sample layout of codecs sent without decoding
fn passthrough_layout(codec: CodecType) -> Option<(Encoding, u16, bool)> {
    let layout = match codec {
        codecs::CODEC_TYPE_PCM_S8 => (Encoding::PcmSigned, 8, false),
        codecs::CODEC_TYPE_PCM_U8 => (Encoding::PcmUnsigned, 8, false),
        codecs::CODEC_TYPE_PCM_S16LE => (Encoding::PcmSigned, 16, false),
        codecs::CODEC_TYPE_PCM_S16BE => (Encoding::PcmSigned, 16, true),
        codecs::CODEC_TYPE_PCM_U16LE => (Encoding::PcmUnsigned, 16, false),
        codecs::CODEC_TYPE_PCM_U16BE => (Encoding::PcmUnsigned, 16, true),
        codecs::CODEC_TYPE_PCM_S24LE => (Encoding::PcmSigned, 24, false),
        codecs::CODEC_TYPE_PCM_S24BE => (Encoding::PcmSigned, 24, true),
        codecs::CODEC_TYPE_PCM_U24LE => (Encoding::PcmUnsigned, 24, false),
        codecs::CODEC_TYPE_PCM_U24BE => (Encoding::PcmUnsigned, 24, true),
        codecs::CODEC_TYPE_PCM_S32LE => (Encoding::PcmSigned, 32, false),
        codecs::CODEC_TYPE_PCM_S32BE => (Encoding::PcmSigned, 32, true),
        codecs::CODEC_TYPE_PCM_U32LE => (Encoding::PcmUnsigned, 32, false),
        codecs::CODEC_TYPE_PCM_U32BE => (Encoding::PcmUnsigned, 32, true),
        codecs::CODEC_TYPE_PCM_F32LE => (Encoding::PcmFloat, 32, false),
        codecs::CODEC_TYPE_PCM_F32BE => (Encoding::PcmFloat, 32, true),
        codecs::CODEC_TYPE_PCM_F64LE => (Encoding::PcmFloat, 64, false),
        codecs::CODEC_TYPE_PCM_F64BE => (Encoding::PcmFloat, 64, true),
        _ => return None,
    };
    Some(layout)
}

/// A song opened for streaming.
///
/// Uncompressed PCM is forwarded byte for byte; anything else is decoded and
/// sent as 16-bit signed little-endian PCM.
pub struct AudioAsset {
    format: Box<dyn FormatReader>,
    /// `None` when packets are forwarded untouched
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
    header: StreamHeader,
    sample_buf: Option<SampleBuffer<i16>>,
    pending: Vec<u8>,
    exhausted: bool,
}

impl AudioAsset {
    /// Open and probe an audio file
    pub fn open(path: &Path) -> Result<Self, PlaybackError> {
        let file = std::fs::File::open(path).map_err(|source| PlaybackError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        // Skip album art and other tracks without a sample rate
        let track = format
            .tracks()
            .iter()
            .find(|t| {
                t.codec_params.codec != codecs::CODEC_TYPE_NULL
                    && t.codec_params.sample_rate.is_some()
            })
            .ok_or(PlaybackError::NoAudioTrack)?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let sample_rate = params
            .sample_rate
            .ok_or(PlaybackError::MissingParameter("sample rate"))?;
        let channels = params
            .channels
            .ok_or(PlaybackError::MissingParameter("channel layout"))?
            .count() as u16;

        let (header, decoder) = match passthrough_layout(params.codec) {
            Some((encoding, bits, big_endian)) => (
                StreamHeader::pcm(encoding, sample_rate, bits, channels, big_endian),
                None,
            ),
            None => {
                let decoder =
                    symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;
                (
                    StreamHeader::pcm(Encoding::PcmSigned, sample_rate, 16, channels, false),
                    Some(decoder),
                )
            }
        };

        log::debug!(
            "Opened {} ({}, {})",
            path.display(),
            header,
            if decoder.is_some() { "decoded" } else { "passthrough" }
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            header,
            sample_buf: None,
            pending: Vec::new(),
            exhausted: false,
        })
    }

    /// Format of the bytes returned by [`read_chunk`](Self::read_chunk)
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Read up to `max_bytes` of audio, rounded down to whole frames (at least
    /// one frame). Returns `None` once the asset is exhausted.
    pub fn read_chunk(&mut self, max_bytes: usize) -> Result<Option<Vec<u8>>, PlaybackError> {
        let frame = self.header.frame_size.max(1) as usize;
        let limit = self.header.whole_frames(max_bytes).max(frame);

        while self.pending.len() < limit && !self.exhausted {
            self.fill()?;
        }

        let take = self.header.whole_frames(self.pending.len().min(limit));
        if take == 0 {
            // A trailing partial frame cannot be played
            self.pending.clear();
            return Ok(None);
        }

        Ok(Some(self.pending.drain(..take).collect()))
    }

    /// Append the next packet of the audio track to `pending`
    fn fill(&mut self) -> Result<(), PlaybackError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    if let Some(decoder) = self.decoder.as_mut() {
                        decoder.reset();
                    }
                    continue;
                }
                Err(SymphoniaError::IoError(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.exhausted = true;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let Some(decoder) = self.decoder.as_mut() else {
                self.pending.extend_from_slice(packet.buf());
                return Ok(());
            };

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let capacity = decoded.capacity() as u64;
                    let spec = *decoded.spec();
                    if self
                        .sample_buf
                        .as_ref()
                        .is_some_and(|buf| (buf.capacity() as u64) < capacity)
                    {
                        self.sample_buf = None;
                    }
                    let buf = self
                        .sample_buf
                        .get_or_insert_with(|| SampleBuffer::new(capacity, spec));
                    buf.copy_interleaved_ref(decoded);
                    for sample in buf.samples() {
                        self.pending.extend_from_slice(&sample.to_le_bytes());
                    }
                    return Ok(());
                }
                Err(SymphoniaError::DecodeError(err)) => {
                    log::warn!("Decode error: {}", err);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
