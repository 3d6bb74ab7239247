/*!
 * Device state registry for AdapterFlow.
 *
 * This module tracks every device instance registered with the adapter: its
 * client object, whether it is reachable, and the promise cache that
 * memoizes its expensive operations.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info};

use adapterflow_core::config::{DeviceStateConfig, DEFAULT_CACHE_DURATION_MS};
use adapterflow_core::types::{DeviceId, Value};

use crate::cache::PromiseCache;
use crate::error::{DeviceError, Result};

/// Receives a notification every time a device is added to the registry
///
/// Any `Fn(DeviceId, &Arc<C>)` closure is an observer.
pub trait StateChangeObserver<C>: Send + Sync {
    /// Called synchronously from `add_device`, after the entry is stored
    fn on_device_added(&self, id: DeviceId, client_object: &Arc<C>);
}

impl<C, F> StateChangeObserver<C> for F
where
    F: Fn(DeviceId, &Arc<C>) + Send + Sync,
{
    fn on_device_added(&self, id: DeviceId, client_object: &Arc<C>) {
        self(id, client_object)
    }
}

struct DeviceEntry<C> {
    client_object: Arc<C>,
    reachable: bool,
    promise_cache: PromiseCache<Value>,
}

/// Point-in-time view of one registered device
#[derive(Debug)]
pub struct DeviceSnapshot<C> {
    /// The device id
    pub id: DeviceId,
    /// The client object supplied at registration
    pub client_object: Arc<C>,
    /// The device's promise cache
    pub promise_cache: PromiseCache<Value>,
    /// Whether the device was reachable when the snapshot was taken
    pub reachable: bool,
}

impl<C> Clone for DeviceSnapshot<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            client_object: Arc::clone(&self.client_object),
            promise_cache: self.promise_cache.clone(),
            reachable: self.reachable,
        }
    }
}

/// Registry of device instances known to the adapter
///
/// `add_device` is an upsert: registering an id again replaces its entry,
/// including a fresh promise cache.
pub struct DeviceStateRegistry<C> {
    cache_duration: Duration,
    devices: RwLock<HashMap<DeviceId, DeviceEntry<C>>>,
    state_observer: OnceLock<Box<dyn StateChangeObserver<C>>>,
}

impl<C> DeviceStateRegistry<C> {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<DeviceId, DeviceEntry<C>>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DeviceId, DeviceEntry<C>>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> fmt::Debug for DeviceStateRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceStateRegistry")
            .field("cache_duration", &self.cache_duration)
            .field("devices", &self.read().len())
            .field("has_state_observer", &self.state_observer.get().is_some())
            .finish()
    }
}

impl<C> DeviceStateRegistry<C>
where
    C: Send + Sync + 'static,
{
    /// Create a registry with the default cache duration
    pub fn new() -> Self {
        Self::with_cache_duration(Duration::from_millis(DEFAULT_CACHE_DURATION_MS))
    }

    /// Create a registry whose device caches use `cache_duration`
    pub fn with_cache_duration(cache_duration: Duration) -> Self {
        Self {
            cache_duration,
            devices: RwLock::new(HashMap::new()),
            state_observer: OnceLock::new(),
        }
    }

    /// Create a registry from the device state configuration
    pub fn from_config(config: &DeviceStateConfig) -> Self {
        Self::with_cache_duration(config.cache_duration())
    }

    /// Cache window applied to every device entry
    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    /// Register a reachable device, replacing any entry with the same id
    pub fn add_device(&self, id: DeviceId, client_object: impl Into<Arc<C>>) {
        self.add_device_with_reachability(id, client_object, true);
    }

    /// Register a device with an explicit reachability
    pub fn add_device_with_reachability(
        &self,
        id: DeviceId,
        client_object: impl Into<Arc<C>>,
        reachable: bool,
    ) {
        let client_object = client_object.into();
        let entry = DeviceEntry {
            client_object: Arc::clone(&client_object),
            reachable,
            promise_cache: PromiseCache::new(self.cache_duration, format!("device-{}", id)),
        };

        let replaced = self.write().insert(id, entry).is_some();
        if replaced {
            debug!(device_id = %id, "replaced existing device entry");
        } else {
            debug!(device_id = %id, reachable, "added device");
        }

        // The lock is released here so the observer may read the registry.
        if let Some(observer) = self.state_observer.get() {
            observer.on_device_added(id, &client_object);
        }
    }

    /// Register the single state change observer of this registry
    ///
    /// A registry accepts exactly one observer for its whole lifetime; a
    /// second call fails with [`DeviceError::AlreadyRegistered`].
    pub fn register_state_update<O>(&self, observer: O) -> Result<()>
    where
        O: StateChangeObserver<C> + 'static,
    {
        self.state_observer
            .set(Box::new(observer))
            .map_err(|_| DeviceError::AlreadyRegistered)?;
        info!("registered device state observer");
        Ok(())
    }

    /// Snapshot of all registered devices, in no particular order
    pub fn get_all_devices(&self) -> Vec<DeviceSnapshot<C>> {
        self.read()
            .iter()
            .map(|(id, entry)| DeviceSnapshot {
                id: *id,
                client_object: Arc::clone(&entry.client_object),
                promise_cache: entry.promise_cache.clone(),
                reachable: entry.reachable,
            })
            .collect()
    }

    /// Ids of all registered devices, in no particular order
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.read().keys().copied().collect()
    }

    /// Number of registered devices
    pub fn count_devices(&self) -> usize {
        self.read().len()
    }

    /// Check if a device is registered
    pub fn is_device_registered(&self, id: DeviceId) -> bool {
        self.read().contains_key(&id)
    }

    /// Check if a device is registered and reachable
    pub fn is_reachable(&self, id: DeviceId) -> bool {
        self.read().get(&id).map_or(false, |entry| entry.reachable)
    }

    /// The device's client object, if the device is registered and reachable
    pub fn get_client_object_if_reachable(&self, id: DeviceId) -> Option<Arc<C>> {
        self.read()
            .get(&id)
            .filter(|entry| entry.reachable)
            .map(|entry| Arc::clone(&entry.client_object))
    }

    /// The device's promise cache
    pub fn get_cache_promise(&self, id: DeviceId) -> Result<PromiseCache<Value>> {
        self.read()
            .get(&id)
            .map(|entry| entry.promise_cache.clone())
            .ok_or(DeviceError::InvalidId(id))
    }

    /// Update a device's reachability; unknown ids are ignored
    ///
    /// The state change observer is not notified.
    pub fn update_reachable(&self, id: DeviceId, reachable: bool) {
        match self.write().get_mut(&id) {
            Some(entry) => {
                if entry.reachable != reachable {
                    debug!(device_id = %id, reachable, "device reachability changed");
                }
                entry.reachable = reachable;
            }
            None => debug!(device_id = %id, "ignoring reachability update for unknown device"),
        }
    }

    /// Update a device's reachability from a dynamic value
    ///
    /// Anything other than a boolean leaves the entry untouched.
    pub fn update_reachable_from_value(&self, id: DeviceId, reachable: &Value) {
        match reachable.as_bool() {
            Some(reachable) => self.update_reachable(id, reachable),
            None => debug!(device_id = %id, value = ?reachable, "ignoring non-boolean reachability"),
        }
    }
}

impl<C> Default for DeviceStateRegistry<C>
where
    C: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A shared device state registry that can be cloned
pub struct SharedDeviceStateRegistry<C>(Arc<DeviceStateRegistry<C>>);

impl<C> SharedDeviceStateRegistry<C>
where
    C: Send + Sync + 'static,
{
    /// Create a new shared registry with the default cache duration
    pub fn new() -> Self {
        Self(Arc::new(DeviceStateRegistry::new()))
    }

    /// Create a new shared registry from the device state configuration
    pub fn from_config(config: &DeviceStateConfig) -> Self {
        Self(Arc::new(DeviceStateRegistry::from_config(config)))
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &DeviceStateRegistry<C> {
        &self.0
    }
}

impl<C> Clone for SharedDeviceStateRegistry<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<C> fmt::Debug for SharedDeviceStateRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedDeviceStateRegistry").field(&self.0).finish()
    }
}

impl<C> Default for SharedDeviceStateRegistry<C>
where
    C: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> AsRef<DeviceStateRegistry<C>> for SharedDeviceStateRegistry<C> {
    fn as_ref(&self) -> &DeviceStateRegistry<C> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    struct Lamp {
        name: &'static str,
    }

    fn lamp(name: &'static str) -> Lamp {
        Lamp { name }
    }

    #[test]
    fn test_add_device_registers_reachable_entry() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::new();
        let id = DeviceId::new(1);
        let client = Arc::new(lamp("hall"));

        registry.add_device(id, Arc::clone(&client));

        assert!(registry.is_device_registered(id));
        assert!(registry.is_reachable(id));
        let found = registry.get_client_object_if_reachable(id).unwrap();
        assert!(Arc::ptr_eq(&found, &client));
    }

    #[test]
    fn test_unknown_ids_are_misses_not_errors() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::new();
        let id = DeviceId::new(404);

        assert!(!registry.is_device_registered(id));
        assert!(!registry.is_reachable(id));
        assert!(registry.get_client_object_if_reachable(id).is_none());
        assert!(matches!(
            registry.get_cache_promise(id),
            Err(DeviceError::InvalidId(missing)) if missing == id
        ));
    }

    #[test]
    fn test_unreachable_device_hides_client_object() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::new();
        let id = DeviceId::new(2);

        registry.add_device_with_reachability(id, lamp("porch"), false);

        assert!(registry.is_device_registered(id));
        assert!(!registry.is_reachable(id));
        assert!(registry.get_client_object_if_reachable(id).is_none());
    }

    #[test]
    fn test_re_registration_replaces_entry_and_cache() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::new();
        let id = DeviceId::new(3);

        registry.add_device_with_reachability(id, lamp("old"), false);
        let old_cache = registry.get_cache_promise(id).unwrap();

        registry.add_device(id, lamp("new"));
        let new_cache = registry.get_cache_promise(id).unwrap();

        assert_eq!(registry.count_devices(), 1);
        assert!(!old_cache.same_cache(&new_cache));
        assert!(registry.is_reachable(id));
        assert_eq!(
            registry.get_client_object_if_reachable(id).unwrap().name,
            "new"
        );
    }

    #[test]
    fn test_cache_is_labelled_and_sized_per_registry() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::with_cache_duration(Duration::from_millis(250));
        registry.add_device(DeviceId::new(9), lamp("den"));

        let cache = registry.get_cache_promise(DeviceId::new(9)).unwrap();
        assert_eq!(cache.label(), "device-9");
        assert_eq!(cache.duration(), Duration::from_millis(250));
        assert!(cache.same_cache(&registry.get_cache_promise(DeviceId::new(9)).unwrap()));
    }

    #[test]
    fn test_from_config_uses_configured_duration() {
        let config = DeviceStateConfig {
            cache_duration_ms: 1500,
        };
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::from_config(&config);
        assert_eq!(registry.cache_duration(), Duration::from_millis(1500));
        assert_eq!(
            DeviceStateRegistry::<Lamp>::default().cache_duration(),
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn test_observer_called_on_every_add() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        registry
            .register_state_update(move |id: DeviceId, client: &Arc<Lamp>| {
                sink.lock().unwrap().push((id, client.name));
            })
            .unwrap();

        registry.add_device(DeviceId::new(1), lamp("a"));
        registry.add_device(DeviceId::new(1), lamp("b"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(DeviceId::new(1), "a"), (DeviceId::new(1), "b")]
        );
    }

    #[test]
    fn test_second_observer_is_rejected() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::new();
        let first_calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first_calls);
        registry
            .register_state_update(move |_: DeviceId, _: &Arc<Lamp>| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let second = registry.register_state_update(|_: DeviceId, _: &Arc<Lamp>| {});
        assert!(matches!(second, Err(DeviceError::AlreadyRegistered)));

        // The original observer stays in place.
        registry.add_device(DeviceId::new(5), lamp("kitchen"));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_may_read_registry() {
        let registry = Arc::new(DeviceStateRegistry::<Lamp>::new());
        let observed = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&registry);
        let count = Arc::clone(&observed);
        registry
            .register_state_update(move |id: DeviceId, _: &Arc<Lamp>| {
                if let Some(registry) = weak.upgrade() {
                    assert!(registry.is_device_registered(id));
                    count.store(registry.count_devices(), Ordering::SeqCst);
                }
            })
            .unwrap();

        registry.add_device(DeviceId::new(1), lamp("a"));
        registry.add_device(DeviceId::new(2), lamp("b"));
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_update_reachable_toggles_state_without_notifying() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::new();
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notifications);
        registry
            .register_state_update(move |_: DeviceId, _: &Arc<Lamp>| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let id = DeviceId::new(7);
        registry.add_device(id, lamp("stairs"));

        registry.update_reachable(id, false);
        assert!(!registry.is_reachable(id));
        registry.update_reachable(id, true);
        assert!(registry.is_reachable(id));

        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_reachable_ignores_unknown_and_non_boolean() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::new();
        let id = DeviceId::new(8);
        registry.add_device(id, lamp("garage"));

        registry.update_reachable(DeviceId::new(99), false);
        assert!(!registry.is_device_registered(DeviceId::new(99)));

        registry.update_reachable_from_value(id, &Value::from("false"));
        registry.update_reachable_from_value(id, &Value::Integer(0));
        registry.update_reachable_from_value(id, &Value::Null);
        assert!(registry.is_reachable(id));

        registry.update_reachable_from_value(id, &Value::Bool(false));
        assert!(!registry.is_reachable(id));
    }

    #[test]
    fn test_get_all_devices_snapshot() {
        let registry: DeviceStateRegistry<Lamp> = DeviceStateRegistry::new();
        registry.add_device(DeviceId::new(1), lamp("a"));
        registry.add_device_with_reachability(DeviceId::new(2), lamp("b"), false);

        let mut devices = registry.get_all_devices();
        devices.sort_by_key(|device| device.id);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].client_object.name, "a");
        assert!(devices[0].reachable);
        assert_eq!(devices[1].client_object.name, "b");
        assert!(!devices[1].reachable);
        assert_eq!(devices[1].promise_cache.label(), "device-2");

        // Later updates do not leak into an existing snapshot.
        registry.update_reachable(DeviceId::new(2), true);
        assert!(!devices[1].reachable);

        let mut ids = registry.device_ids();
        ids.sort();
        assert_eq!(ids, vec![DeviceId::new(1), DeviceId::new(2)]);
    }

    #[test]
    fn test_shared_registry_clones_share_state() {
        let shared: SharedDeviceStateRegistry<Lamp> = SharedDeviceStateRegistry::new();
        let other = shared.clone();

        shared.registry().add_device(DeviceId::new(4), lamp("attic"));
        assert!(other.as_ref().is_device_registered(DeviceId::new(4)));
    }
}
