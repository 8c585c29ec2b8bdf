use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shopfront::api::getnet::{
    spawn_renewal, CredentialCache, FileCredentialStore, GetnetAuthenticator, GetnetClient,
};
use shopfront::config::Config;
use shopfront::db::{self, MySqlStore};
use shopfront::services::{OrderService, PaymentService, ProductService, PromotionService};

/// Everything the outer layer needs, wired against MySQL and the gateway
#[allow(dead_code)]
struct Services {
    products: ProductService,
    orders: OrderService,
    promotions: PromotionService,
    payments: PaymentService,
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["shopfront=debug", "sqlx=warn"] {
        match directive.parse() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("Ignoring log directive {}: {}", directive, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🛒 Starting shopfront v{}...", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    info!("Initializing database...");
    let pool = match db::init_db(&config.database_url).await {
        Ok(p) => {
            info!("Database initialized successfully");
            p
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    let store = Arc::new(MySqlStore::new(pool));

    let getnet = config.getnet;
    let authenticator = match GetnetAuthenticator::new(
        getnet.api_url.clone(),
        getnet.client_id,
        getnet.client_secret,
        getnet.timeout,
    ) {
        Ok(a) => a,
        Err(e) => {
            error!("Failed to create gateway authenticator: {}", e);
            return;
        }
    };
    let credential_store = FileCredentialStore::new(getnet.credential_file, getnet.credential_cipher);
    let credentials = Arc::new(CredentialCache::new(
        Arc::new(authenticator),
        Arc::new(credential_store),
        getnet.refresh_margin,
    ));
    let renewal = spawn_renewal(credentials.clone());

    let gateway = match GetnetClient::new(getnet.api_url, getnet.seller_id.clone(), credentials, getnet.timeout) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create gateway client: {}", e);
            return;
        }
    };

    let _services = Services {
        products: ProductService::new(store.clone(), store.clone(), store.clone()),
        orders: OrderService::new(store.clone(), store.clone()),
        promotions: PromotionService::new(store.clone()),
        payments: PaymentService::new(Arc::new(gateway), store, getnet.seller_id),
    };
    info!("Services ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    renewal.abort();
}
