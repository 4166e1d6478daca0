//! Frame encoding for relay connections

mod codec;

pub use codec::FrameCodec;
