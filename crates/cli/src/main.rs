use std::process::ExitCode;

fn main() -> ExitCode {
    flowchat_cli::run()
}
