use clap::Parser;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = crosspostctl::Cli::parse();
    if let Err(err) = crosspostctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
