mod config;
mod frame;
mod routes;
mod services;
mod state;
mod supabase;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env().expect("invalid configuration");
    let client = Arc::new(supabase::SupabaseClient::new(&config.supabase).expect("supabase client init failed"));
    let port = config.port;
    let realtime = config.supabase.realtime_enabled;
    let state = state::AppState::new(config, client.clone(), client);

    // Spawn background session sweeper.
    let _sweeper = services::session::spawn_sweeper(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, realtime, "smart-bookmarks listening");
    axum::serve(listener, app).await.expect("server failed");
}
