//! Process-wide service registry
//!
//! The host may reinitialize the code that embeds the bridge without
//! restarting the process. The running server is therefore anchored in a
//! registry keyed by type, reachable through [`ServiceRegistry::global`],
//! rather than in whatever module happened to create it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use hbridge_utils::Result;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::dispatch::MessageDispatcher;
use crate::server::{BridgeServer, StopStatus};

type Service = Arc<dyn Any + Send + Sync>;

/// Holds at most one shared instance per type
#[derive(Default)]
pub struct ServiceRegistry {
    services: Mutex<HashMap<TypeId, Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry living for the whole process
    pub fn global() -> &'static ServiceRegistry {
        static GLOBAL: OnceLock<ServiceRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ServiceRegistry::new)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let service = self.services.lock().get(&TypeId::of::<T>()).cloned()?;
        service.downcast::<T>().ok()
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.services.lock().contains_key(&TypeId::of::<T>())
    }

    /// Return the registered instance, creating it with `create` if there is
    /// none. The registry stays locked while `create` runs, so concurrent
    /// callers never build two instances.
    pub fn get_or_insert_with<T, F>(&self, create: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut services = self.services.lock();
        if let Some(existing) = services.get(&TypeId::of::<T>()).cloned() {
            if let Ok(existing) = existing.downcast::<T>() {
                return existing;
            }
        }

        let created = Arc::new(create());
        services.insert(TypeId::of::<T>(), created.clone() as Service);
        debug!(service = std::any::type_name::<T>(), "Registered service");
        created
    }

    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let service = self.services.lock().remove(&TypeId::of::<T>())?;
        service.downcast::<T>().ok()
    }
}

/// Return the registered bridge server, creating it on first use, and make
/// sure it is running.
///
/// `dispatcher` only runs when no server exists yet.
pub fn get_or_create_server<F>(
    registry: &ServiceRegistry,
    config: ServerConfig,
    dispatcher: F,
) -> Result<Arc<BridgeServer>>
where
    F: FnOnce() -> MessageDispatcher,
{
    let server = registry.get_or_insert_with(|| {
        info!("Creating bridge server");
        BridgeServer::new(config, Arc::new(dispatcher()))
    });
    server.start()?;
    Ok(server)
}

/// Stop the registered bridge server and forget it
pub fn stop_server(registry: &ServiceRegistry) -> StopStatus {
    match registry.remove::<BridgeServer>() {
        Some(server) => server.stop(),
        None => StopStatus::NotRunning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalManager, HeadlessPrompt};
    use crate::executor::CommandExecutor;
    use crate::host::InMemoryHost;
    use hbridge_protocol::ApprovalMode;

    fn dispatcher() -> MessageDispatcher {
        MessageDispatcher::new(
            CommandExecutor::new(Arc::new(InMemoryHost::new())),
            ApprovalManager::new(ApprovalMode::Auto, Arc::new(HeadlessPrompt::default())),
        )
    }

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            fallback_ports: vec![],
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_by_type() {
        let registry = ServiceRegistry::new();
        assert!(registry.get::<String>().is_none());

        let value = registry.get_or_insert_with(|| String::from("first"));
        let again = registry.get_or_insert_with(|| String::from("second"));
        assert!(Arc::ptr_eq(&value, &again));
        assert_eq!(*again, "first");

        registry.get_or_insert_with(|| 7u32);
        assert_eq!(*registry.get::<u32>().unwrap(), 7);

        assert!(registry.remove::<String>().is_some());
        assert!(!registry.contains::<String>());
        assert!(registry.contains::<u32>());
    }

    #[test]
    fn test_get_or_create_returns_existing_server() {
        let registry = ServiceRegistry::new();
        let first = get_or_create_server(&registry, config(), dispatcher).unwrap();
        let second = get_or_create_server(&registry, config(), || {
            panic!("dispatcher must not be rebuilt")
        })
        .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.local_addr(), second.local_addr());

        assert_eq!(stop_server(&registry), StopStatus::Stopped);
        assert_eq!(stop_server(&registry), StopStatus::NotRunning);
        assert!(!first.is_running());
    }
}
