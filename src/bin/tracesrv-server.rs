//! CLI entrypoint: connects out to an instrumented client's listen port,
//! runs ingestion on a dedicated OS thread, and exits cleanly on Ctrl-C
//! (spec §5 "two long-lived OS threads"; the ingestion thread here, the
//! tokio runtime driving signal handling standing in for the query
//! thread's UI event loop).

use std::net::TcpStream;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tracesrv::{Config, Controller};

#[derive(Parser, Debug)]
#[command(name = "tracesrv-server", about = "Ingestion server for a low-overhead tracing system")]
struct Args {
    /// Host the instrumented client is listening on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port the instrumented client is listening on (spec §6.1 default
    /// 8086).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a TOML config file; unset fields fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let port = args.port.unwrap_or(cfg.listen_port);

    let controller = Controller::new(&cfg);
    let ingest_controller = controller.clone();
    let ingest_cfg = cfg.clone();
    let addr = format!("{}:{}", args.host, port);

    let ingest_handle = std::thread::spawn(move || -> anyhow::Result<()> {
        tracing::info!(%addr, "connecting to instrumented client");
        let stream = TcpStream::connect(&addr)?;
        ingest_controller.run(stream, &ingest_cfg)?;
        Ok(())
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            controller.shutdown();
        }
    }

    match ingest_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "ingestion thread exited with error"),
        Err(_) => tracing::error!("ingestion thread panicked"),
    }

    Ok(())
}
