pub mod db;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod schema;
pub mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use db::{create_pool, DbPool};
use gateway::PaymentGateway;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Settings the handlers need beyond the database pool.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Shared secret used to verify webhook signatures.
    pub webhook_secret: String,
    /// ISO currency code all intents are created in, lowercase.
    pub currency: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::payments::create_intent,
        handlers::payments::update_shipping,
        handlers::payments::webhook,
        handlers::payments::create_order,
        handlers::orders::get_order,
    ),
    components(schemas(
        handlers::payments::CartLineRequest,
        handlers::payments::CreateIntentRequest,
        handlers::payments::IntentItemSummary,
        handlers::payments::CreateIntentResponse,
        handlers::payments::ShippingFields,
        handlers::payments::UpdateShippingRequest,
        handlers::payments::CreateOrderResponse,
        handlers::orders::OrderItemResponse,
        handlers::orders::OrderResponse,
        errors::StockShortfall,
    ))
)]
pub struct ApiDoc;

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool) {
    let mut conn = pool.get().expect("Failed to get DB connection for migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("Failed to run database migrations");
}

/// Build and return an actix-web `Server` bound to `host:port`.
///
/// The caller is responsible for `.await`-ing (or `tokio::spawn`-ing) the
/// returned server.
pub fn build_server(
    pool: DbPool,
    payment_gateway: Arc<dyn PaymentGateway>,
    config: AppConfig,
    host: &str,
    port: u16,
) -> std::io::Result<actix_web::dev::Server> {
    let gateway_data: web::Data<dyn PaymentGateway> = web::Data::from(payment_gateway);
    Ok(HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(gateway_data.clone())
            .app_data(web::Data::new(config.clone()))
            .wrap(Logger::default())
            .service(
                web::scope("/payments")
                    .route("/intent", web::post().to(handlers::payments::create_intent))
                    .route(
                        "/intent/{intent_id}/shipping",
                        web::put().to(handlers::payments::update_shipping),
                    )
                    .route(
                        "/intent/{intent_id}/create-order",
                        web::post().to(handlers::payments::create_order),
                    )
                    .route("/webhook", web::post().to(handlers::payments::webhook)),
            )
            .service(
                web::scope("/orders")
                    .route("/{id}", web::get().to(handlers::orders::get_order)),
            )
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind((host.to_string(), port))?
    .run())
}
