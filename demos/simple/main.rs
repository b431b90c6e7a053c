use unlaunch::{ClientConfig, InMemoryStore, User};

#[tokio::main]
pub async fn main() -> unlaunch::Result<()> {
    env_logger::init();

    let environment = std::env::var("UNLAUNCH_ENVIRONMENT_KEY").unwrap_or_default();
    let client = ClientConfig::from_environment(environment)
        .local_storage(true)
        .storage(InMemoryStore::new())
        .to_client(
            ["new-checkout"],
            User::new("test-user").with_attribute("country", "US"),
        );

    // Until this call returns, the client serves the default value for all flags.
    client.wait_for_initialization().await?;

    let detail = client.variation_detail("new-checkout");
    println!("Variation: {} ({})", detail.value, detail.reason);

    // Flush remaining events before exiting.
    client.close().await;

    Ok(())
}
