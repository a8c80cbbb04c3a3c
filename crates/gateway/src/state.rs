//! Shared application state handed to every axum handler.

use std::sync::Arc;

use bg_domain::config::Config;
use bg_providers::ProviderRegistry;
use bg_registry::{JobRegistry, WsHub};
use bg_store::Db;

use crate::auth::LoginLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Db>,
    pub hub: Arc<WsHub>,
    pub providers: Arc<ProviderRegistry>,
    pub registry: Arc<JobRegistry>,
    pub login_limiter: Arc<LoginLimiter>,
}
