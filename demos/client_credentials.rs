//! Demonstrates a gateway call against a mock upstream: the first request fetches a token via
//! `client_credentials`, the second one reuses it from the cache.

// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use token_gateway::{
	config::ClientConfig, gateway::AuthenticatedRequestGateway, manager::TokenManager, url::Url,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"demo-access","token_type":"bearer","expires_in":900}"#);
		})
		.await;
	let api_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/claims").header("authorization", "Bearer demo-access");
			then.status(200).header("content-type", "application/json").body(r#"[{"id":1}]"#);
		})
		.await;
	let config = ClientConfig::builder(Url::parse(&server.url("/oauth/token"))?)
		.client_id("demo-client")
		.client_secret("super-secret")
		.build()?;
	let gateway = AuthenticatedRequestGateway::new(TokenManager::new(&config)?);
	let url = Url::parse(&server.url("/api/claims"))?;

	for _ in 0..2 {
		let response = gateway.get(url.clone()).await?;

		println!("{} {}", response.status(), response.text().await?);
	}

	println!("Token exchanges performed: {}.", gateway.manager().metrics().fetches());

	token_mock.assert_async().await;
	api_mock.assert_calls_async(2).await;

	Ok(())
}
