#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = autograder_rust::run().await {
        eprintln!("autograder-rust fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
