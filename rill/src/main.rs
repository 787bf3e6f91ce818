mod cli;

fn main() {
    match cli::run_cli() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            rill_tracing::println_red_err(&format!("{err:#}"));
            std::process::exit(1);
        }
    }
}
