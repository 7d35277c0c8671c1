use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sesv2::Client as SesClient;
use lambda_http::{run, service_fn, tracing, Error, Request};
use rental_shared::assets::AssetBucket;
use rental_shared::config::Config;
use rental_shared::email::Mailer;
use rental_shared::store::DynamoStore;
use rental_shared::AppState;
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config = Config::from_env()?;

    // Initialize AWS clients once at startup
    let aws_config = aws_config::load_from_env().await;

    let store = DynamoStore::new(DynamoClient::new(&aws_config), config.table_name.clone());
    let mailer = config
        .mail_from
        .clone()
        .map(|from| Mailer::new(SesClient::new(&aws_config), from));
    let assets = config.assets_bucket.clone().map(|bucket| {
        AssetBucket::new(
            S3Client::new(&aws_config),
            bucket,
            config.assets_base_url.clone(),
        )
    });

    tracing::info!(
        "Starting API lambda for table {} (mail: {}, assets: {})",
        config.table_name,
        mailer.is_some(),
        assets.is_some()
    );

    let state = AppState::new(Box::new(store), mailer, assets, config);

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
