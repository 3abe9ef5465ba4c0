use std::process::ExitCode;

fn main() -> ExitCode {
    match stagehandd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            stagehandd::report_launch_failure(&error);
            ExitCode::FAILURE
        }
    }
}
