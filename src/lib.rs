pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod probe;
pub mod process;
pub mod progress;
pub mod report;
pub mod sink;
pub mod translate;
pub mod util;
