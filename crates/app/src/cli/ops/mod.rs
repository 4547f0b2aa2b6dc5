pub mod bucket;
pub mod init;
pub mod serve;
pub mod sweep;
pub mod usage;
pub mod version;

pub use bucket::Bucket;
pub use init::Init;
pub use serve::Serve;
pub use sweep::Sweep;
pub use usage::Usage;
pub use version::Version;
