pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Bucket, Init, Serve, Sweep, Usage, Version};
