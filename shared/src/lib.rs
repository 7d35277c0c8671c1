pub mod announcements;
pub mod assets;
pub mod auth;
pub mod config;
pub mod email;
pub mod errors;
pub mod lockout;
pub mod password;
pub mod reservations;
pub mod responses;
pub mod site_settings;
pub mod store;
pub mod token;
pub mod users;
pub mod vehicles;

use assets::AssetBucket;
use config::Config;
use email::Mailer;
use std::sync::Arc;
use store::Store;

/// Shared application state
pub struct AppState {
    pub store: Box<dyn Store>,
    pub mailer: Option<Mailer>,
    pub assets: Option<AssetBucket>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        store: Box<dyn Store>,
        mailer: Option<Mailer>,
        assets: Option<AssetBucket>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            mailer,
            assets,
            config,
        })
    }
}
