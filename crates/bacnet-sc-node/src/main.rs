use eyre::Result;

mod cli;
mod codec;
mod config;
mod node;
mod transport;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    cli::run().await
}
