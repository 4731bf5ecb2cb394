//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "spooltag",
    about = "Read, write and inspect filament spool tags",
    version
)]
pub struct Cli {
    /// Path to the configuration file (defaults to ./spooltag.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the agent WebSocket URL from the config.
    #[arg(long, global = true)]
    pub agent_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode an offline tag dump and print the filament record as JSON.
    ///
    /// The dump format (raw binary, hex, base64, Proxmark3 text) is
    /// detected automatically.
    Decode {
        /// Path to the dump file.
        dump: PathBuf,
    },

    /// Derive the 16 sector keys for a tag uid.
    Keys {
        /// Tag uid as hex (usually 8 chars).
        uid: String,
    },

    /// Read the next tag touched to the agent's reader.
    Read {
        /// Also save the raw 1024-byte image to this file.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Write a dump back to the next tag touched.
    Write {
        /// Path to the dump file.
        dump: PathBuf,
    },

    /// Clone a dump onto another tag; block 0 and sector trailers from
    /// the source are never forwarded.
    Clone {
        /// Path to the source dump file.
        dump: PathBuf,

        /// Ask the agent to rewrite the target's uid to the source uid
        /// (requires identifier-rewriting hardware).
        #[arg(long)]
        rewrite_uid: bool,
    },
}
