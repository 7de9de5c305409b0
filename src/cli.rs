use crate::csv_output::ProcessColumn;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "strace-graph")]
#[command(about = "Convert strace logs into CSV rows or a process graph", long_about = None)]
pub struct Cli {
    /// Log parser and graph decisions to stderr (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write one CSV row per reconstructed syscall
    Csv {
        /// Print to file instead of the standard output
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Whether rows start with a PROCESS column
        #[arg(long, value_enum, default_value_t = ProcessColumn::Auto)]
        process_column: ProcessColumn,

        /// Input trace (standard input when absent or "-")
        input: Option<PathBuf>,
    },

    /// Render the process graph as a vis.js page
    Graph {
        /// Print to file instead of the standard output
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip non process related syscalls
        #[arg(short, long)]
        compress: bool,

        /// Write the node and edge lists as JSON instead of HTML
        #[arg(long)]
        json: bool,

        /// Input trace (standard input when absent or "-")
        input: Option<PathBuf>,
    },

    /// Load trace files into a DuckDB database
    Load {
        /// Output database path
        #[arg(short, long)]
        output: PathBuf,

        /// Sequential mode (disable parallel processing)
        #[arg(short, long)]
        sequential: bool,

        /// Input trace files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_flags() {
        let cli = Cli::try_parse_from(["strace-graph", "graph", "-c", "-o", "out.html", "trace.txt"])
            .unwrap();
        match cli.command {
            Command::Graph {
                output,
                compress,
                json,
                input,
            } => {
                assert!(compress);
                assert!(!json);
                assert_eq!(output, Some(PathBuf::from("out.html")));
                assert_eq!(input, Some(PathBuf::from("trace.txt")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_csv_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["strace-graph", "csv"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Csv {
                output: None,
                process_column: ProcessColumn::Auto,
                input: None,
            }
        ));
    }

    #[test]
    fn test_rejects_extra_positional() {
        assert!(Cli::try_parse_from(["strace-graph", "csv", "a.txt", "b.txt"]).is_err());
        assert!(Cli::try_parse_from(["strace-graph", "load", "-o", "x.db"]).is_err());
    }
}
