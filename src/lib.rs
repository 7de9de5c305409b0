// Re-export modules for benchmarking and testing
pub mod cli;
pub mod csv_output;
pub mod database;
pub mod graph;
pub mod html_output;
pub mod parallel_processor;
pub mod parser;
pub mod processor;
pub mod stream;
pub mod types;
