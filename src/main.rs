fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = novelfetch::cli::Args::parse();
    let verbosity = novelfetch::logging::Verbosity::from_flags(args.quiet, args.verbose);
    if let Err(e) = novelfetch::logging::init(verbosity) {
        eprintln!("warning: {:#}", e);
    }
    if let Err(e) = novelfetch::cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
