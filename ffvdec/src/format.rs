//! Stream format and engine initialization parameters
//!
//! Maps a container-reported MIME type to the native codec name and
//! assembles the codec "extra data" blob the engine expects at init.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const MIME_H264: &str = "video/avc";
pub const MIME_H265: &str = "video/hevc";
pub const MIME_VP8: &str = "video/x-vnd.on2.vp8";
pub const MIME_VP9: &str = "video/x-vnd.on2.vp9";
pub const MIME_AV1: &str = "video/av01";
pub const MIME_MPEG2: &str = "video/mpeg2";
pub const MIME_MPEG4: &str = "video/mp4v-es";
pub const MIME_H263: &str = "video/3gpp";

/// Format of the encoded stream being decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_mime_type: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub rotation_degrees: u32,
    /// Codec initialization entries as reported by the container
    /// (e.g. SPS and PPS for H.264)
    #[serde(default)]
    pub initialization_data: Vec<Vec<u8>>,
}

impl StreamFormat {
    pub fn new(sample_mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            sample_mime_type: sample_mime_type.into(),
            width,
            height,
            rotation_degrees: 0,
            initialization_data: Vec::new(),
        }
    }

    pub fn with_initialization_data(mut self, data: Vec<Vec<u8>>) -> Self {
        self.initialization_data = data;
        self
    }

    /// Native codec name for this stream
    pub fn codec_name(&self) -> Result<&'static str> {
        codec_name_for_mime(&self.sample_mime_type).ok_or_else(|| {
            Error::Initialization(format!(
                "Unsupported sample MIME type: {}",
                self.sample_mime_type
            ))
        })
    }

    /// Codec-specific extra data, or `None` when the container supplied none
    ///
    /// H.264 needs SPS followed by PPS, H.265 carries everything in its first
    /// entry, other codecs get all entries concatenated.
    pub fn extra_data(&self) -> Option<Vec<u8>> {
        let entries = &self.initialization_data;
        if entries.is_empty() {
            return None;
        }

        match self.sample_mime_type.as_str() {
            MIME_H264 if entries.len() >= 2 => Some([&entries[0][..], &entries[1][..]].concat()),
            MIME_H265 => Some(entries[0].clone()),
            _ => Some(entries.concat()),
        }
    }
}

/// Parameters handed to `EngineFactory::init`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitParams {
    pub codec_name: &'static str,
    pub extra_data: Option<Vec<u8>>,
    pub threads: u32,
    pub rotation_degrees: u32,
}

impl InitParams {
    pub fn from_format(format: &StreamFormat, threads: u32) -> Result<Self> {
        Ok(Self {
            codec_name: format.codec_name()?,
            extra_data: format.extra_data(),
            threads,
            rotation_degrees: format.rotation_degrees,
        })
    }
}

/// Native codec name for a MIME type, `None` if the engine cannot decode it
pub fn codec_name_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        MIME_H264 => Some("h264"),
        MIME_H265 => Some("hevc"),
        MIME_VP8 => Some("vp8"),
        MIME_VP9 => Some("vp9"),
        MIME_AV1 => Some("av1"),
        MIME_MPEG2 => Some("mpeg2video"),
        MIME_MPEG4 => Some("mpeg4"),
        MIME_H263 => Some("h263"),
        _ => None,
    }
}
