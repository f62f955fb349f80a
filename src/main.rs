use std::process::ExitCode;

fn main() -> ExitCode {
    match ui_dataset::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
