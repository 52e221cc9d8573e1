//! Background Removal API server binary

#[cfg(feature = "cli")]
use bg_remover_api::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("The server binary requires the cli feature. Rebuild with --features cli");
    std::process::exit(1);
}
