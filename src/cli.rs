use std::path::PathBuf;
use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    #[command(subcommand)]
    pub(crate) command: ShedCommand,

    /// Use this lockfile instead of searching for `shed.lock`
    #[clap(long, global = true, env = "SHED_LOCKFILE")]
    pub(crate) lockfile: Option<PathBuf>,

    /// Directory tools are built and cached in
    #[clap(long, global = true, env = "SHED_CACHE_DIR")]
    pub(crate) cache_dir: Option<PathBuf>,

    /// Number of tools to build in parallel. Defaults to the number of CPUs
    #[clap(short, long, global = true, env = "SHED_JOBS")]
    pub(crate) jobs: Option<usize>,

    /// More output, repeat for debug logs
    #[clap(short, long, global = true, action = ArgAction::Count)]
    pub(crate) verbose: u8,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum ShedCommand {
    /// Creates an empty `shed.lock` in the current directory
    Init,
    /// Installs tools and pins them in `shed.lock`. Without arguments, installs
    /// every pinned tool that is missing from the cache
    Install {
        /// Tools as <import path or name>[@<version>]. Use <name>@none to remove a tool
        specs: Vec<String>,
    },
    /// Removes tools from `shed.lock`
    Uninstall {
        /// Import paths or short names of the tools
        #[clap(required = true)]
        names: Vec<String>,
        /// Also delete the tools from the cache
        #[clap(long)]
        evict: bool,
    },
    /// Lists all tools in `shed.lock`
    List {
        /// Show where each tool's executable is cached
        #[clap(short, long)]
        paths: bool,
    },
    /// Prints the path of a tool's executable
    Path {
        name: String,
    },
    /// Runs a pinned tool
    Run {
        name: String,
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Deletes the cache directory
    CleanCache,
}
