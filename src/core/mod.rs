pub mod error;
pub mod timestamp;

pub use error::{EncoderError, EncoderResult};
pub use timestamp::utc_ns_now;
