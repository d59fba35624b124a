use capture_page::{run, Outcome};
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned());

    match run(args).await {
        Ok(Outcome::Captured(path)) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Ok(Outcome::Help) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[capture-page] {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
