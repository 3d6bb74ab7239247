/*!
 * Lazy handler resolution through device discovery.
 *
 * A request names a device id and the component it wants to talk to. When the
 * adapter does not know a handler for that pair yet, the resolver runs the
 * adapter's discovery component once and looks the handler up again.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, WeakShared};
use tracing::{debug, warn, Instrument};

use adapterflow_core::logging::operation_span;
use adapterflow_core::types::DeviceId;

use crate::error::{DeviceError, Result};

/// Component key under which an adapter registers its discovery handler
pub const DISCOVERY_COMPONENT: &str = "discover";

/// Which capability of which adapter a request targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicAdapterContext {
    /// The adapter name
    pub adapter_name: String,
    /// The component of the adapter
    pub component: String,
}

impl DynamicAdapterContext {
    /// Create a new descriptor
    pub fn new(adapter_name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            component: component.into(),
        }
    }
}

/// Handlers an adapter exposes, keyed by component
#[derive(Debug, Clone)]
pub struct AdapterDescriptor<H> {
    name: String,
    handlers: HashMap<String, H>,
}

impl<H> AdapterDescriptor<H> {
    /// Create an adapter descriptor without handlers
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
        }
    }

    /// Add a handler for a component
    pub fn with_handler(mut self, component: impl Into<String>, handler: H) -> Self {
        self.handlers.insert(component.into(), handler);
        self
    }

    /// Add the discovery handler
    pub fn with_discovery_handler(self, handler: H) -> Self {
        self.with_handler(DISCOVERY_COMPONENT, handler)
    }

    /// The adapter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the handler for a component
    pub fn handler(&self, component: &str) -> Option<&H> {
        self.handlers.get(component)
    }

    /// The handler registered under [`DISCOVERY_COMPONENT`]
    pub fn discovery_handler(&self) -> Option<&H> {
        self.handler(DISCOVERY_COMPONENT)
    }
}

/// Everything the resolver knows about one inbound request
#[derive(Debug, Clone)]
pub struct ResolutionContext<H> {
    /// Device the request addresses
    pub device_id: Option<DeviceId>,
    /// Handler resolved for the request, if any
    pub handler: Option<H>,
    /// Pending adapter/component descriptor awaiting resolution
    pub dynamic_adapter: Option<DynamicAdapterContext>,
    /// Adapter the request is bound to
    pub adapter: Option<Arc<AdapterDescriptor<H>>>,
}

impl<H> ResolutionContext<H> {
    /// An empty context
    pub fn new() -> Self {
        Self {
            device_id: None,
            handler: None,
            dynamic_adapter: None,
            adapter: None,
        }
    }

    /// A context addressing `device_id`
    pub fn for_device(device_id: DeviceId) -> Self {
        Self {
            device_id: Some(device_id),
            ..Self::new()
        }
    }

    /// Attach the adapter this request is bound to
    pub fn with_adapter(mut self, adapter: Arc<AdapterDescriptor<H>>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Attach an already resolved handler
    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Attach a pending adapter/component descriptor
    pub fn with_dynamic_adapter(mut self, dynamic_adapter: DynamicAdapterContext) -> Self {
        self.dynamic_adapter = Some(dynamic_adapter);
        self
    }

    /// Whether the request can be routed to a device handler
    pub fn is_routable(&self) -> bool {
        self.device_id.is_some() && (self.handler.is_some() || self.dynamic_adapter.is_some())
    }
}

impl<H> Default for ResolutionContext<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// The adapter-side collaborator that owns discovered device handlers
#[async_trait]
pub trait RequestHandler<H>: Send + Sync {
    /// Handler for a component of an already discovered device
    fn get_discovered_device_component_handler(
        &self,
        device_id: DeviceId,
        component: &str,
    ) -> Option<H>;

    /// Run discovery so that `device_id` gets registered
    async fn discover(&self, discovery_handler: &H, device_id: DeviceId) -> anyhow::Result<()>;
}

type DiscoveryRun = BoxFuture<'static, std::result::Result<(), Arc<anyhow::Error>>>;

/// Discovery runs are shared per adapter and device
type DiscoveryKey = (String, DeviceId);

/// Resolves request handlers, running discovery when a device is unknown
///
/// Clones share the request handler and the set of discovery runs in flight,
/// so concurrent resolutions for one device through the same adapter wait on
/// a single run. A run nobody awaits any more is dropped, not resumed.
pub struct DiscoveryResolver<H> {
    request_handler: Arc<dyn RequestHandler<H>>,
    in_flight: Arc<Mutex<HashMap<DiscoveryKey, WeakShared<DiscoveryRun>>>>,
}

impl<H> Clone for DiscoveryResolver<H> {
    fn clone(&self) -> Self {
        Self {
            request_handler: Arc::clone(&self.request_handler),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<H> fmt::Debug for DiscoveryResolver<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryResolver").finish_non_exhaustive()
    }
}

impl<H> DiscoveryResolver<H>
where
    H: Clone + Send + Sync + 'static,
{
    /// Create a resolver bound to a shared request handler
    pub fn new(request_handler: Arc<dyn RequestHandler<H>>) -> Self {
        Self {
            request_handler,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a resolver that owns its request handler
    pub fn register_handler<R>(request_handler: R) -> Self
    where
        R: RequestHandler<H> + 'static,
    {
        Self::new(Arc::new(request_handler))
    }

    /// Attach the adapter/component the request targets
    pub fn store_data_in_request(
        &self,
        ctx: ResolutionContext<H>,
        adapter_name: impl Into<String>,
        component: impl Into<String>,
    ) -> ResolutionContext<H> {
        ctx.with_dynamic_adapter(DynamicAdapterContext::new(adapter_name, component))
    }

    /// Resolve the handler for the request, running discovery at most once
    ///
    /// The returned context carries the handler, or `None` when the device is
    /// still unknown after discovery. A context that already carries a
    /// handler is returned as is.
    pub async fn store_discovery_handler_in_request(
        &self,
        mut ctx: ResolutionContext<H>,
    ) -> Result<ResolutionContext<H>> {
        if ctx.handler.is_some() {
            return Ok(ctx);
        }

        let device_id = ctx
            .device_id
            .ok_or_else(|| DeviceError::invalid_request("missing device id"))?;
        let component = ctx
            .dynamic_adapter
            .as_ref()
            .map(|dynamic| dynamic.component.clone())
            .ok_or_else(|| DeviceError::invalid_request("missing dynamic adapter descriptor"))?;

        let span = operation_span("resolve_handler", &component);
        let handler = self
            .resolve(&ctx, device_id, &component)
            .instrument(span)
            .await?;

        ctx.handler = handler;
        Ok(ctx)
    }

    /// Whether the request carries enough to be routed
    pub fn validate_device_id_route(&self, ctx: &ResolutionContext<H>) -> bool {
        ctx.is_routable()
    }

    async fn resolve(
        &self,
        ctx: &ResolutionContext<H>,
        device_id: DeviceId,
        component: &str,
    ) -> Result<Option<H>> {
        if let Some(handler) = self
            .request_handler
            .get_discovered_device_component_handler(device_id, component)
        {
            debug!(device_id = %device_id, component, "handler already known");
            return Ok(Some(handler));
        }

        let adapter = ctx
            .adapter
            .as_ref()
            .ok_or(DeviceError::NoDiscoverComponentFound)?;
        let discovery_handler = adapter
            .discovery_handler()
            .ok_or(DeviceError::NoDiscoverComponentFound)?;

        debug!(device_id = %device_id, component, "handler unknown, running discovery");
        self.discover_once(adapter.name(), discovery_handler, device_id)
            .await?;

        let handler = self
            .request_handler
            .get_discovered_device_component_handler(device_id, component);
        if handler.is_none() {
            warn!(device_id = %device_id, component, "no handler after discovery");
        }
        Ok(handler)
    }

    /// Run discovery for `device_id`, joining a run of the same adapter already in flight
    async fn discover_once(
        &self,
        adapter_name: &str,
        discovery_handler: &H,
        device_id: DeviceId,
    ) -> Result<()> {
        let key = (adapter_name.to_string(), device_id);
        let discovery = {
            let mut in_flight = self.lock_in_flight();
            let running = in_flight
                .get(&key)
                .and_then(|weak| weak.upgrade())
                .filter(|running| running.peek().is_none());
            match running {
                Some(running) => {
                    debug!(
                        adapter = adapter_name,
                        device_id = %device_id,
                        "joining discovery already in flight"
                    );
                    running
                }
                None => {
                    let request_handler = Arc::clone(&self.request_handler);
                    let discovery_handler = discovery_handler.clone();
                    let discovery = async move {
                        request_handler
                            .discover(&discovery_handler, device_id)
                            .await
                            .map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    if let Some(weak) = discovery.downgrade() {
                        in_flight.insert(key.clone(), weak);
                    }
                    discovery
                }
            }
        };

        let outcome = discovery.clone().await;

        let mut in_flight = self.lock_in_flight();
        let settled = in_flight.get(&key).map_or(false, |weak| {
            weak.upgrade()
                .map_or(true, |running| running.ptr_eq(&discovery))
        });
        if settled {
            in_flight.remove(&key);
        }
        drop(in_flight);

        outcome.map_err(DeviceError::Discovery)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<DiscoveryKey, WeakShared<DiscoveryRun>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
