//! Lifecycle hooks and change observers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::error::{ConfigError, HookPhase};
use super::value::Map;

/// Error type returned by hook callbacks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// What a pre-load hook can see about the upcoming load.
#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    sources: Vec<String>,
}

impl LoadContext {
    pub(crate) fn new(sources: Vec<String>) -> Self {
        Self { sources }
    }

    /// Source names in load order.
    pub fn source_names(&self) -> &[String] {
        &self.sources
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

/// A lifecycle extension point.
///
/// Hooks run in ascending [`priority`](Hook::priority) order; registration
/// order breaks ties. All callbacks default to doing nothing, so a hook only
/// implements the phases it cares about. An error from any callback aborts
/// the operation that triggered it.
///
/// Callbacks run without the engine lock held and may read the [`Config`].
/// Loads are serialized, so a load hook must not call [`Config::load`].
///
/// [`Config`]: super::Config
/// [`Config::load`]: super::Config::load
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    fn pre_load(&self, _ctx: &LoadContext) -> Result<(), HookError> {
        Ok(())
    }

    /// May mutate the merged map before it is committed.
    fn post_load(&self, _data: &mut Map) -> Result<(), HookError> {
        Ok(())
    }

    fn pre_bind(&self, _target: &dyn Any) -> Result<(), HookError> {
        Ok(())
    }

    fn post_bind(&self, _target: &dyn Any) -> Result<(), HookError> {
        Ok(())
    }
}

/// Hooks sorted by priority.
#[derive(Clone, Default)]
pub struct HookManager {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
        // Stable, so equal priorities keep registration order.
        self.hooks.sort_by_key(|h| h.priority());
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.hooks.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn run_pre_load(&self, ctx: &LoadContext) -> Result<(), ConfigError> {
        self.run(HookPhase::PreLoad, |h| h.pre_load(ctx))
    }

    pub fn run_post_load(&self, data: &mut Map) -> Result<(), ConfigError> {
        self.run(HookPhase::PostLoad, |h| h.post_load(data))
    }

    pub fn run_pre_bind(&self, target: &dyn Any) -> Result<(), ConfigError> {
        self.run(HookPhase::PreBind, |h| h.pre_bind(target))
    }

    pub fn run_post_bind(&self, target: &dyn Any) -> Result<(), ConfigError> {
        self.run(HookPhase::PostBind, |h| h.post_bind(target))
    }

    fn run(
        &self,
        phase: HookPhase,
        mut call: impl FnMut(&dyn Hook) -> Result<(), HookError>,
    ) -> Result<(), ConfigError> {
        for hook in &self.hooks {
            call(hook.as_ref()).map_err(|source| ConfigError::Hook {
                phase,
                hook: hook.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookManager")
            .field("hooks", &self.names())
            .finish()
    }
}

/// Reports loads through `tracing`. Runs last.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHook;

impl Hook for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    fn priority(&self) -> i32 {
        1000
    }

    fn pre_load(&self, ctx: &LoadContext) -> Result<(), HookError> {
        info!(sources = ctx.source_count(), "Loading configuration");
        Ok(())
    }

    fn post_load(&self, data: &mut Map) -> Result<(), HookError> {
        info!(keys = data.len(), "Configuration loaded");
        Ok(())
    }
}

type MapCheck = Box<dyn Fn(&Map) -> Result<(), HookError> + Send + Sync>;

/// Rejects a load whose merged map fails a check.
pub struct ValidationHook {
    check: MapCheck,
}

impl ValidationHook {
    pub fn new(check: impl Fn(&Map) -> Result<(), HookError> + Send + Sync + 'static) -> Self {
        Self {
            check: Box::new(check),
        }
    }
}

impl fmt::Debug for ValidationHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationHook").finish_non_exhaustive()
    }
}

impl Hook for ValidationHook {
    fn name(&self) -> &str {
        "validation"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn post_load(&self, data: &mut Map) -> Result<(), HookError> {
        (self.check)(data)
    }
}

/// Fills in keys no source provided.
#[derive(Debug, Clone, Default)]
pub struct DefaultsHook {
    defaults: Map,
}

impl DefaultsHook {
    pub fn new(defaults: Map) -> Self {
        Self { defaults }
    }
}

impl Hook for DefaultsHook {
    fn name(&self) -> &str {
        "defaults"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn post_load(&self, data: &mut Map) -> Result<(), HookError> {
        for (key, value) in &self.defaults {
            data.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(())
    }
}

/// Receives the changed subset of the key space after each load.
///
/// Observers run on their own thread and must not assume any ordering
/// relative to each other or to later loads.
pub trait Observer: Send + Sync {
    fn on_change(&self, changed: &Map);
}

impl<F> Observer for F
where
    F: Fn(&Map) + Send + Sync,
{
    fn on_change(&self, changed: &Map) {
        self(changed)
    }
}
