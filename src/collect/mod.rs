/// Output read-back and content-type detection.
pub mod collector;
