//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::alerting::SlackNotifier;
use crate::auth::{AuthState, JwtManager};
use crate::config::Config;
use crate::conversations::{ConversationMachine, ConversationStore};
use crate::notifications::{NotificationFanout, UserDirectory};
use crate::regions::{RegionDirectory, RegionTableError};
use crate::routing::{RoutingService, TicketBackend};
use crate::stream::{BroadcastHub, HubConfig};

/// Lifetime of locally minted session tokens; portal-issued ones carry their own
const SESSION_TOKEN_TTL: time::Duration = time::Duration::hours(24);

/// Storage and backend implementations chosen at startup
pub struct Backends {
    pub store: Arc<dyn ConversationStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub tickets: Arc<dyn TicketBackend>,
    /// Present when running against PostgreSQL
    pub pool: Option<PgPool>,
}

#[derive(Clone)]
pub struct AppState {
    pub jwt_manager: Arc<JwtManager>,
    pub hub: BroadcastHub,
    pub regions: Arc<RegionDirectory>,
    pub store: Arc<dyn ConversationStore>,
    pub conversations: ConversationMachine,
    pub routing: RoutingService,
    pub fanout: NotificationFanout,
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(config: &Config, backends: Backends) -> Result<Self, RegionTableError> {
        let regions = Arc::new(RegionDirectory::new(config.regions.iter().cloned())?);
        let hub = BroadcastHub::new(HubConfig {
            heartbeat_interval: config.heartbeat_interval,
            idle_timeout: config.idle_timeout,
            buffer: config.stream_buffer,
            dedup_window: config.dedup_window,
        });

        let fanout = NotificationFanout::new(backends.directory, Arc::clone(&backends.store), hub.clone());
        let routing = RoutingService::new(
            backends.tickets,
            fanout.clone(),
            SlackNotifier::new(config.alert_webhook_url.clone()),
            Arc::clone(&regions),
        );
        let conversations = ConversationMachine::new(Arc::clone(&backends.store), hub.clone(), Arc::clone(&regions));

        Ok(Self {
            jwt_manager: Arc::new(JwtManager::new(&config.jwt_secret, SESSION_TOKEN_TTL)),
            hub,
            regions,
            store: backends.store,
            conversations,
            routing,
            fanout,
            pool: backends.pool,
        })
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: Arc::clone(&self.jwt_manager),
        }
    }
}
