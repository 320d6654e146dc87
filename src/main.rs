use tracing_subscriber::{EnvFilter, fmt};

fn main() -> anyhow::Result<()> {
    init_tracing();
    estaleiro::pipeline::run()?;
    Ok(())
}

/// Logs go to stderr so stdout carries only summaries and JSON.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
