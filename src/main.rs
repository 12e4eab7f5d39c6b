use sqlx::sqlite::SqlitePoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mira::ai::client::{GatewayClient, GatewayConfig};
use mira::data::ChatRepository;
use mira::middleware::extract_user;
use mira::router::app_router;
use mira::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mira=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        dotenv::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:mira.db?mode=rwc".into());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        });
    sqlx::migrate!().run(&pool).await.unwrap_or_else(|e| {
        eprintln!("Failed to run migrations: {}", e);
        std::process::exit(1);
    });

    let gateway_config = GatewayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Missing gateway configuration: {}", e);
        std::process::exit(1);
    });

    let state = Arc::new(AppState {
        chat_repo: ChatRepository::new(pool),
        gateway: Arc::new(GatewayClient::new(gateway_config)),
    });

    let app = app_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            extract_user,
        ))
        .layer(CookieManagerLayer::new());

    let port: u16 = dotenv::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::debug!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
