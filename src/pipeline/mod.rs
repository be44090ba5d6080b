pub mod exchange;
pub mod triple;

pub use exchange::{FrameExchange, MappedFrame, PixelHandle, StereoFrame};
pub use triple::{Role, TripleBuffer};
