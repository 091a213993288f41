use clap::Parser;
use registry_replicator::cli::{Args, Runner};
use registry_replicator::logging;
use std::process;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.verbose);

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runner.run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
