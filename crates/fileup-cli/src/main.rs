use clap::Parser;
use fileup_cli::cli_args::Cli;
use fileup_cli::dispatch;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
