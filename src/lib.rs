pub mod auth;
pub mod audit;
pub mod config;
pub mod errors;
pub mod identity;
pub mod messaging;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod retention;
pub mod routes;
pub mod store;

use std::sync::Arc;

use rocket_cors::CorsOptions;

use audit::AuditLog;
use auth::AuthManager;
use config::Config;
use messaging::MessageEngine;
use rate_limit::RateLimiter;
use registry::AgentRegistry;
use store::Store;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = Config::from_env();
    rocket_with_config(config)
}

pub fn rocket_with_db(store_url: &str) -> rocket::Rocket<rocket::Build> {
    let mut config = Config::from_env();
    config.store_url = store_url.to_string();
    rocket_with_config(config)
}

pub fn rocket_with_config(config: Config) -> rocket::Rocket<rocket::Build> {
    build_rocket(config)
}

fn build_rocket(config: Config) -> rocket::Rocket<rocket::Build> {
    let config = Arc::new(config);

    let store = Arc::new(Store::new(&config.store_url));
    let audit = Arc::new(AuditLog::new(store.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(store.clone()));
    let auth_manager = Arc::new(AuthManager::new(store.clone(), audit.clone(), config.clone()));
    let registry = Arc::new(AgentRegistry::new(store.clone(), config.heartbeat_ttl));
    let messaging = Arc::new(MessageEngine::new(store.clone(), registry.clone()));

    if config.dev_mode {
        eprintln!("agent-coordinator: dev mode — SERVER_SECRET/ADMIN_KEY/PROXY_BEARER_TOKEN all unset, auth bypassed");
    }

    let cors = CorsOptions::default().to_cors().expect("failed to build CORS policy");

    let figment = rocket::Config::figment()
        .merge(("port", config.port))
        .merge(("address", config.bind_host.clone()));

    rocket::custom(figment)
        .manage(config.clone())
        .manage(store.clone())
        .manage(audit.clone())
        .manage(rate_limiter.clone())
        .manage(auth_manager)
        .manage(registry.clone())
        .manage(messaging)
        .attach(cors)
        .mount(
            "/",
            rocket::routes![
                routes::rpc::agent_mcp,
                routes::rpc::oauth_mcp,
                routes::rest::register,
                routes::rest::pending,
                routes::rest::wait,
                routes::rest::unregister,
                routes::admin::create_key,
                routes::admin::list_keys,
                routes::admin::revoke_key,
                routes::admin::get_audit,
                routes::system::health,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff("Scavenger Sweep", move |_rocket| {
            Box::pin(async move {
                retention::spawn_scavenger(store, registry);
                println!("coordinator: scavenger sweep started");
            })
        }))
}
