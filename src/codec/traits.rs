use crate::error::CodecError;

// Types that can be written as one newline-terminated frame
pub trait WireEncode {
    fn encode_frame(&self) -> Result<Vec<u8>, CodecError>;
}

// Types that can be read back from one frame (trailing newline optional)
pub trait WireDecode: Sized {
    fn decode_frame(frame: &[u8]) -> Result<Self, CodecError>;
}
