use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about = "Build and inspect chain-fs images")]
pub struct Cli {
    /// Image file on the host
    #[arg(long, short)]
    pub image: PathBuf,

    /// Directory that relative paths start from
    #[arg(long, default_value = "/")]
    pub cwd: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh, empty volume
    Format {
        /// Number of blocks in the volume
        #[arg(long, default_value_t = 16 * 2048)]
        blocks: u32,

        /// Bytes per block, a power of two no less than 512
        #[arg(long, default_value_t = 512)]
        block_size: usize,

        #[arg(long, default_value = "chain-fs")]
        name: String,
    },
    /// Show volume geometry and usage
    Info,
    /// List a directory
    Ls {
        #[arg(default_value = ".")]
        dir: String,
    },
    /// Create a directory
    Mkdir { dir: String },
    /// Copy a host file into the volume
    Put { host: PathBuf, path: String },
    /// Copy a file out of the volume
    Get { path: String, host: PathBuf },
    /// Print a file to stdout
    Cat { path: String },
    /// Create an empty file, or refresh the modify time of an existing one
    Touch { path: String },
    /// Copy a file inside the volume
    Cp { src: String, dst: String },
    /// Remove a file or an empty directory
    Rm { path: String },
    /// Rename or move an entry
    Mv { src: String, dst: String },
    /// Copy every regular file of a host directory into the current directory
    Pack { source: PathBuf },
}
