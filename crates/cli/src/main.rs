use std::process::ExitCode;

fn main() -> ExitCode {
    feedloop_cli::run()
}
