pub mod buffer;
pub mod testlib;
pub mod utils;

pub use buffer::TruncateBuffer;
