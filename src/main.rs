use clap::Parser;

fn main() {
    let cli = ngsi::cli::Cli::parse();
    if let Err(err) = ngsi::app::run(cli) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
