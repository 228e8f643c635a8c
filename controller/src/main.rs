mod host;
mod publish;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
