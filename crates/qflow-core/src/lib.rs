pub mod codec;
pub mod error;
pub mod record;
pub mod segment;

pub use codec::{decode_frame, encode_frame, frame_bytes, Decoded};
pub use error::{Error, Result};
pub use record::{Fetch, Payload, TopicRecord};
pub use segment::Compression;
