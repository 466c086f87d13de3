use std::process::ExitCode;

fn main() -> ExitCode {
    gcbridge_cli::run_cli()
}
