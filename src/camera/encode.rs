use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::capture::Frame;
use crate::error::EncodeError;

pub const DEFAULT_QUALITY: u8 = 90;

/// フレームをJPEGに圧縮する（ワイヤペイロード）
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// 同期版。空フレームやサイズ不一致はペイロードを作らない
    pub fn encode_blocking(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.data.len() != expected {
            return Err(EncodeError::Dimensions {
                width: frame.width,
                height: frame.height,
                expected,
                actual: frame.data.len(),
            });
        }
        if !frame.has_content() {
            return Err(EncodeError::EmptyFrame);
        }

        let mut buf = Vec::with_capacity(expected / 8);
        JpegEncoder::new_with_quality(&mut buf, self.quality)
            .encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)
            .map_err(|e| EncodeError::Jpeg(e.to_string()))?;
        Ok(buf)
    }

    /// 圧縮はブロッキングプールで行い、イベントループを止めない
    pub async fn encode(&self, frame: Frame) -> Result<Vec<u8>, EncodeError> {
        let encoder = *self;
        tokio::task::spawn_blocking(move || encoder.encode_blocking(&frame))
            .await
            .map_err(|e| EncodeError::Jpeg(format!("encoder task failed: {e}")))?
    }
}
