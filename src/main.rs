use clap::Parser;
use primer_finder::cli::Args;
use primer_finder::pipelines::run;

fn main() {
    let args = Args::parse();

    run::exec(&args).unwrap_or_else(|err| {
        eprintln!("Fatal Error: {} occurred during processing", err);
        std::process::exit(1);
    });
}
