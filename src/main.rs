use module_runner::cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    module_runner::init();

    // Diagnostics go to stderr so they never fight the progress renderer
    // for stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "module_runner=warn".into()),
        )
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    // Process the command; the aggregate exit code becomes ours.
    match cli::run().await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
