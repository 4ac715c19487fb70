use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub fn build_http_client() -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("n8n-portrait-bot/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
