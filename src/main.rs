use std::process::ExitCode;

fn main() -> ExitCode {
    fleet_console::run()
}
