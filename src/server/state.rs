use std::sync::Arc;
use std::time::Duration;

use crate::auth::{JwtVerifier, TokenVerifier};
use crate::bus::MessageBus;
use crate::config::Settings;
use crate::groups::{CachedGroupDirectory, GroupDirectory, StaticGroupDirectory};
use crate::notification::{NotificationRouter, NotificationsTopic, RealtimePush, IN_APP, NOTIFICATIONS_TOPIC};
use crate::registry::ConnectionRegistry;
use crate::session::SessionManager;
use crate::store::{MemoryNotificationStore, NotificationStore};
use crate::topics::TopicRouter;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub topics: Arc<TopicRouter>,
    pub sessions: Arc<SessionManager>,
    pub router: Arc<NotificationRouter>,
    pub bus: Arc<MessageBus>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub store: Arc<dyn NotificationStore>,
}

impl AppState {
    /// Wire the default collaborators: in-memory store and the config-backed
    /// group directory. Used in development and tests.
    pub fn new(settings: Settings) -> Self {
        let store = Arc::new(MemoryNotificationStore::new());
        let directory = Arc::new(StaticGroupDirectory::new(settings.groups.memberships.clone()));
        Self::with_collaborators(settings, store, directory, None)
    }

    /// Composition root. All topic and bus handler registration happens here,
    /// before any of the routers are shared.
    pub fn with_collaborators(
        settings: Settings,
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn GroupDirectory>,
        verifier: Option<Arc<dyn TokenVerifier>>,
    ) -> Self {
        let verifier =
            verifier.unwrap_or_else(|| Arc::new(JwtVerifier::new(&settings.jwt)) as Arc<dyn TokenVerifier>);
        let directory: Arc<dyn GroupDirectory> = Arc::new(CachedGroupDirectory::new(
            directory,
            Duration::from_secs(settings.groups.cache_ttl_seconds),
        ));

        let registry = Arc::new(ConnectionRegistry::new());

        let notifications_topic = Arc::new(NotificationsTopic::new(store.clone(), directory.clone()));
        let mut topics = TopicRouter::new();
        topics.register_subscribe(NOTIFICATIONS_TOPIC, notifications_topic.clone());
        topics.register_receive(NOTIFICATIONS_TOPIC, notifications_topic);
        let topics = Arc::new(topics);

        let sessions = Arc::new(SessionManager::new(registry.clone(), topics.clone()));
        let router = Arc::new(NotificationRouter::new(
            registry.clone(),
            directory,
            sessions.clone(),
        ));

        let mut bus = MessageBus::new(store.clone());
        bus.register_handler(IN_APP, Arc::new(RealtimePush::new(router.clone())));
        let bus = Arc::new(bus);

        Self {
            settings: Arc::new(settings),
            registry,
            topics,
            sessions,
            router,
            bus,
            verifier,
            store,
        }
    }
}
