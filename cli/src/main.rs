use clap::{error::ErrorKind, Parser};
use mimalloc::MiMalloc;
use pagefs_cli::Args;
use tracing::error;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // Without a mountpoint and URL there's nothing to do, which isn't an error.
        Err(e) if e.kind() == ErrorKind::MissingRequiredArgument => {
            e.print()?;
            return Ok(());
        }
        Err(e) => e.exit(),
    };

    let mut tracing_builder = pagefs_tracing::TracingBuilder::default().level(args.log_level);
    if args.progress {
        tracing_builder = tracing_builder.enable_progressbar();
    }
    let tracing_handle = tracing_builder.build()?;

    if let Err(e) = pagefs_cli::run(args, tracing_handle).await {
        error!(err = %e, "fatal error");
        std::process::exit(1);
    }

    Ok(())
}
