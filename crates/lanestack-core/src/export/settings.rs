//! Export settings and the codec argument tables
//!
//! Codec arguments, sample-format tokens and output extensions are pure
//! functions of the settings. Bit depth only matters for the uncompressed
//! and lossless codecs; the lossy ones encode at a fixed bitrate.

/// Output file layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTopology {
    /// One file with N discrete channels, channel i = lane i
    Multichannel,
    /// One mono file per lane
    MonoFiles,
    /// One stereo file per lane pair; an odd last lane fills both sides
    StereoPairs,
}

/// Target codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportCodec {
    /// Uncompressed PCM in WAV
    PcmWav,
    Flac,
    Alac,
    Aac,
    Mp3,
}

/// Sample bit depth (uncompressed/lossless codecs only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Int16,
    Int24,
    Float32,
}

/// Immutable description of one export request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportSettings {
    pub topology: ExportTopology,
    pub codec: ExportCodec,
    pub bit_depth: BitDepth,
    /// Target sample rate in Hz; `None` keeps each source's rate
    pub sample_rate: Option<u32>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            topology: ExportTopology::Multichannel,
            codec: ExportCodec::PcmWav,
            bit_depth: BitDepth::Int24,
            sample_rate: None,
        }
    }
}

impl ExportSettings {
    /// Codec + bit-depth arguments for the transcode invocation
    ///
    /// FLAC and ALAC have no float sample format; a 32-bit float request
    /// maps to their 32-bit integer formats instead of failing.
    pub fn codec_args(&self) -> Vec<String> {
        let owned = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect();
        match self.codec {
            ExportCodec::PcmWav => {
                let fmt = match self.bit_depth {
                    BitDepth::Int16 => "pcm_s16le",
                    BitDepth::Int24 => "pcm_s24le",
                    BitDepth::Float32 => "pcm_f32le",
                };
                owned(&["-c:a", fmt])
            }
            ExportCodec::Flac => {
                let fmt = match self.bit_depth {
                    BitDepth::Int16 => "s16",
                    BitDepth::Int24 | BitDepth::Float32 => "s32",
                };
                owned(&["-c:a", "flac", "-sample_fmt", fmt])
            }
            ExportCodec::Alac => {
                let fmt = match self.bit_depth {
                    BitDepth::Int16 => "s16p",
                    BitDepth::Int24 | BitDepth::Float32 => "s32p",
                };
                owned(&["-c:a", "alac", "-sample_fmt", fmt])
            }
            ExportCodec::Aac => owned(&["-c:a", "aac", "-b:a", "320k"]),
            ExportCodec::Mp3 => owned(&["-c:a", "libmp3lame", "-b:a", "320k"]),
        }
    }

    /// Output extension; depends on codec only
    pub fn extension(&self) -> &'static str {
        match self.codec {
            ExportCodec::PcmWav => "wav",
            ExportCodec::Flac => "flac",
            ExportCodec::Alac | ExportCodec::Aac => "m4a",
            ExportCodec::Mp3 => "mp3",
        }
    }

    /// Resample arguments; empty when keeping the source rate
    pub fn rate_args(&self) -> Vec<String> {
        match self.sample_rate {
            Some(rate) => vec!["-ar".to_string(), rate.to_string()],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(codec: ExportCodec, depth: BitDepth) -> ExportSettings {
        ExportSettings {
            topology: ExportTopology::Multichannel,
            codec,
            bit_depth: depth,
            sample_rate: None,
        }
    }

    #[test]
    fn pcm_formats_follow_bit_depth() {
        assert_eq!(
            settings(ExportCodec::PcmWav, BitDepth::Int16).codec_args(),
            vec!["-c:a", "pcm_s16le"]
        );
        assert_eq!(
            settings(ExportCodec::PcmWav, BitDepth::Int24).codec_args(),
            vec!["-c:a", "pcm_s24le"]
        );
        assert_eq!(
            settings(ExportCodec::PcmWav, BitDepth::Float32).codec_args(),
            vec!["-c:a", "pcm_f32le"]
        );
    }

    #[test]
    fn lossless_float_falls_back_to_32bit_int() {
        assert_eq!(
            settings(ExportCodec::Flac, BitDepth::Float32).codec_args(),
            vec!["-c:a", "flac", "-sample_fmt", "s32"]
        );
        assert_eq!(
            settings(ExportCodec::Alac, BitDepth::Float32).codec_args(),
            vec!["-c:a", "alac", "-sample_fmt", "s32p"]
        );
    }

    #[test]
    fn lossy_codecs_ignore_bit_depth() {
        for depth in [BitDepth::Int16, BitDepth::Int24, BitDepth::Float32] {
            assert_eq!(
                settings(ExportCodec::Aac, depth).codec_args(),
                vec!["-c:a", "aac", "-b:a", "320k"]
            );
            assert_eq!(
                settings(ExportCodec::Mp3, depth).codec_args(),
                vec!["-c:a", "libmp3lame", "-b:a", "320k"]
            );
        }
    }

    #[test]
    fn extension_depends_on_codec_only() {
        for depth in [BitDepth::Int16, BitDepth::Float32] {
            assert_eq!(settings(ExportCodec::PcmWav, depth).extension(), "wav");
            assert_eq!(settings(ExportCodec::Flac, depth).extension(), "flac");
            assert_eq!(settings(ExportCodec::Alac, depth).extension(), "m4a");
            assert_eq!(settings(ExportCodec::Aac, depth).extension(), "m4a");
            assert_eq!(settings(ExportCodec::Mp3, depth).extension(), "mp3");
        }
    }

    #[test]
    fn keep_original_rate_emits_no_argument() {
        let mut s = settings(ExportCodec::PcmWav, BitDepth::Int24);
        assert!(s.rate_args().is_empty());
        s.sample_rate = Some(44100);
        assert_eq!(s.rate_args(), vec!["-ar", "44100"]);
    }
}
