use super::traits::{WireDecode, WireEncode};
use crate::error::CodecError;
use crate::model::Fix;

pub const FRAME_DELIMITER: u8 = b'\n';

impl WireEncode for Fix {
    fn encode_frame(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(FRAME_DELIMITER);
        Ok(buf)
    }
}

impl WireDecode for Fix {
    fn decode_frame(frame: &[u8]) -> Result<Self, CodecError> {
        let trimmed = frame.trim_ascii();
        if trimmed.is_empty() {
            return Err(CodecError::Empty);
        }
        Ok(serde_json::from_slice(trimmed)?)
    }
}

/// Encode a fix as the body of one offline-queue line, without the delimiter.
pub fn encode_line(fix: &Fix) -> Result<String, CodecError> {
    Ok(serde_json::to_string(fix)?)
}
