#[tokio::main]
async fn main() -> Result<(), fitdash_lib::StartupError> {
  fitdash_lib::run().await
}
