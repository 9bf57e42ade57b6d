pub mod api;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod models;
pub mod net;
pub mod sources;
pub mod terminal;
pub mod upstream;

use crate::config::Config;
use crate::upstream::Generator;

use std::sync::Arc;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub generator: Arc<dyn Generator>,
}

impl AppState {
    pub fn new(config: Config, generator: Arc<dyn Generator>) -> Self {
        Self {
            config: Arc::new(config),
            generator,
        }
    }
}
