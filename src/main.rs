use clap::Parser;
use pdf_translate::cli;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Args::parse();
    match cli::dispatch(args).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(1)
        }
    }
}
