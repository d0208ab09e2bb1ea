use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(short, long, global = true, help = "Write debug logs to ~/.mirrorpilot/logs")]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "List the mirrors reported by the transfer tool", name = "remotes", display_order = 1)]
    Remotes {},

    #[clap(
        about = "Queue archives and download them one at a time",
        long_about = "Queue archives and download them one at a time.\n\n\
            While downloading, type on stdin: `skip`, `cancel`, `rm <name>`, `add <name>`, `ls`.",
        name = "fetch",
        display_order = 2
    )]
    Fetch {
        #[clap(num_args = 1.., required = true, help = "Archive folder names on the mirrors")]
        names: Vec<String>,
        #[clap(short = 'd', long = "dest", help = "Download directory (default from config)")]
        dest: Option<PathBuf>,
        #[clap(short = 'r', long = "source-root", help = "Folder on the mirrors holding the archives")]
        source_root: Option<String>,
        #[clap(long, help = "Print queue events as JSON lines instead of progress bars")]
        json: bool,
        #[clap(long = "no-input", help = "Do not read queue commands from stdin")]
        no_input: bool,
    },

    #[clap(about = "Run a single tool operation against the first mirror", name = "run", display_order = 3)]
    Run {
        #[clap(help = "Tool verb, e.g. size, lsd, copy")]
        operation: String,
        #[clap(help = "Path relative to the mirror root")]
        path: String,
        #[clap(help = "Local destination for copy-like verbs")]
        dest: Option<PathBuf>,
    },

    #[clap(about = "Configure mirrorpilot", name = "set", display_order = 4)]
    Set {
        #[clap(short = 't', long = "tool", help = "Path of the transfer tool binary")]
        tool_path: Option<PathBuf>,
        #[clap(short = 'd', long = "dest", help = "Default download directory")]
        download_dir: Option<PathBuf>,
        #[clap(short = 'r', long = "source-root", help = "Folder on the mirrors holding the archives")]
        source_root: Option<String>,
        #[clap(short = 'f', long = "filter", help = "Only use remotes whose name contains this")]
        remote_filter: Option<String>,
        #[clap(short = 'b', long = "bwlimit", help = "Bandwidth limit passed to the tool, e.g. 10M")]
        bandwidth_limit: Option<String>,
        #[clap(long = "retries", help = "Job retries after the first attempt")]
        max_job_retries: Option<u32>,
        #[clap(long = "backoff", help = "Base backoff in seconds (doubles per retry)")]
        backoff_base_secs: Option<u64>,
    },
}
