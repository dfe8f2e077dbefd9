use std::env;
use std::sync::Arc;

use checkout_service::gateway::stripe::StripeGateway;
use checkout_service::{build_server, create_pool, run_migrations, AppConfig};
use dotenvy::dotenv;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let stripe_secret = env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set");
    let webhook_secret =
        env::var("STRIPE_WEBHOOK_SECRET").expect("STRIPE_WEBHOOK_SECRET must be set");
    let currency = env::var("STORE_CURRENCY")
        .unwrap_or_else(|_| "aud".to_string())
        .to_lowercase();
    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("PORT must be a valid number");

    let pool = create_pool(&database_url);
    run_migrations(&pool);

    let gateway = StripeGateway::new(stripe_secret).expect("Failed to build Stripe client");

    log::info!("Starting server at http://{}:{}", host, port);

    build_server(
        pool,
        Arc::new(gateway),
        AppConfig {
            webhook_secret,
            currency,
        },
        &host,
        port,
    )?
    .await
}
