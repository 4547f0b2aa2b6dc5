pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sharedrop")]
#[command(about = "Password-protected file drop with expiring share links")]
pub struct Args {
    /// Path to the sharedrop config directory (defaults to ~/.sharedrop)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
