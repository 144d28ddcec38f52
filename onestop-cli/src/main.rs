//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    if let Err(err) = onestop_cli::run() {
        eprintln!("onestop: {err}");
        std::process::exit(1);
    }
}
