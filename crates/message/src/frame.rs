use crate::Buf;

/// DataBody is an opaque byte payload.
#[derive(Debug, Default)]
pub struct DataBody {
    pub buf: Buf,
}

impl DataBody {
    pub(crate) fn deep_copy(&self) -> Self {
        Self {
            buf: self.buf.deep_copy(),
        }
    }
}

/// Sample layout of an audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFrameDataFmt {
    #[default]
    Interleave,
    NonInterleave,
}

/// AudioFrameBody is a run of PCM samples plus its format metadata.
#[derive(Debug, Default)]
pub struct AudioFrameBody {
    pub sample_rate: i32,
    pub bytes_per_sample: i32,
    pub samples_per_channel: i32,
    pub number_of_channels: i32,
    pub channel_layout: u64,
    pub data_fmt: AudioFrameDataFmt,
    pub line_size: i32,
    pub timestamp: i64,
    pub is_eof: bool,
    pub buf: Buf,
}

impl AudioFrameBody {
    pub(crate) fn deep_copy(&self) -> Self {
        Self {
            buf: self.buf.deep_copy(),
            ..*self
        }
    }
}

/// Pixel layout of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFmt {
    #[default]
    Rgb24,
    Rgba,
    Bgr24,
    Bgra,
    I420,
    I422,
    Nv12,
    Nv21,
}

/// VideoFrameBody is one picture plus its format metadata.
#[derive(Debug, Default)]
pub struct VideoFrameBody {
    pub pixel_fmt: PixelFmt,
    pub width: i32,
    pub height: i32,
    pub timestamp: i64,
    pub is_eof: bool,
    pub buf: Buf,
}

impl VideoFrameBody {
    pub(crate) fn deep_copy(&self) -> Self {
        Self {
            buf: self.buf.deep_copy(),
            ..*self
        }
    }
}
