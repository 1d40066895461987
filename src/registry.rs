//! Plugin registration: resolving named strategies, hook groups, and stats
//! handlers to concrete implementations ahead of time.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::control::ControlHandle;
use crate::hooks::HookGroup;
use crate::manifest::ProcessManifest;
use crate::ready::ReadyProbe;
use crate::stats::StatsHandler;

/// Something a manifest's `control_server` field can name, responsible for
/// exposing the supervisor's operator interface over some transport.
///
/// Transport (sockets, HTTP, etc.) is deliberately left to the plugin; this
/// crate only hands it a [`ControlHandle`] to drive the supervisor with.
pub trait ControlServer: Send + Sync {
    /// The name this control server is registered under.
    fn name(&self) -> &str;

    /// Starts serving the operator interface via `handle`. Implementations
    /// decide whether this blocks the calling thread or spawns its own.
    fn serve(&self, handle: ControlHandle);
}

/// A unit of extension: a named bundle of ready strategies, lifecycle hook
/// groups, stats handlers, and control servers.
///
/// A plugin's four accessor methods are each called exactly once, at
/// [`PluginRegistry::register`] time; the resulting name-to-implementation
/// maps are what manifests actually reference, not the `Plugin` trait object
/// itself. This keeps process startup free of any dynamic dispatch through
/// plugin code beyond the bound callable.
pub trait Plugin: Send + Sync {
    /// A human-readable name for this plugin, used only in log output.
    fn name(&self) -> &str;

    /// Named readiness strategies this plugin contributes.
    fn ready_strategies(&self) -> HashMap<String, Arc<dyn ReadyProbe>> {
        HashMap::new()
    }

    /// Named lifecycle hook groups this plugin contributes.
    fn lifecycle_hooks(&self) -> HashMap<String, HookGroup> {
        HashMap::new()
    }

    /// Named stats handler groups this plugin contributes.
    fn stats_handlers(&self) -> HashMap<String, Vec<Arc<dyn StatsHandler>>> {
        HashMap::new()
    }

    /// Named control servers this plugin contributes.
    fn control_servers(&self) -> HashMap<String, Arc<dyn ControlServer>> {
        HashMap::new()
    }
}

/// The supervisor's view of every name a manifest is allowed to reference:
/// ready strategies, lifecycle hook groups, stats handler groups, and
/// control servers, each keyed by the name plugins registered them under.
#[derive(Default)]
pub struct PluginRegistry {
    ready_strategies: HashMap<String, Arc<dyn ReadyProbe>>,
    lifecycle_hooks: HashMap<String, HookGroup>,
    stats_handlers: HashMap<String, Vec<Arc<dyn StatsHandler>>>,
    control_servers: HashMap<String, Arc<dyn ControlServer>>,
}

impl PluginRegistry {
    /// Creates an empty registry with no bound names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a plugin's four capability maps into this registry.
    ///
    /// Each accessor is invoked exactly once here. A name collision within
    /// any one of the four namespaces is logged as a warning; the most
    /// recently registered plugin wins, matching the teacher's
    /// last-writer-wins precedent for overlapping named entries.
    pub fn register(&mut self, plugin: &dyn Plugin) {
        for (name, probe) in plugin.ready_strategies() {
            if self.ready_strategies.contains_key(&name) {
                warn!(plugin = plugin.name(), %name, "overwriting ready strategy registered under the same name");
            }
            self.ready_strategies.insert(name, probe);
        }
        for (name, group) in plugin.lifecycle_hooks() {
            if self.lifecycle_hooks.contains_key(&name) {
                warn!(plugin = plugin.name(), %name, "overwriting lifecycle hook group registered under the same name");
            }
            self.lifecycle_hooks.insert(name, group);
        }
        for (name, handlers) in plugin.stats_handlers() {
            if self.stats_handlers.contains_key(&name) {
                warn!(plugin = plugin.name(), %name, "overwriting stats handler group registered under the same name");
            }
            self.stats_handlers.insert(name, handlers);
        }
        for (name, server) in plugin.control_servers() {
            if self.control_servers.contains_key(&name) {
                warn!(plugin = plugin.name(), %name, "overwriting control server registered under the same name");
            }
            self.control_servers.insert(name, server);
        }
    }

    /// Registers every plugin in `plugins`, in order.
    ///
    /// Rust cannot safely `dlopen` arbitrary plugin code the way the system
    /// this crate's design was distilled from could, so "loading from a
    /// directory" here means: construct the compiled-in `Plugin`
    /// implementations named by the descriptor files found under `dir`, in
    /// the order they are listed, and register each one. Discovery of which
    /// compiled-in plugins a directory's descriptors name is left to the
    /// embedding application; this method is the mechanical registration
    /// step once that list is known.
    pub fn load_from_directory(&mut self, plugins: &[Box<dyn Plugin>]) {
        for plugin in plugins {
            self.register(plugin.as_ref());
        }
    }

    /// Looks up a registered readiness probe by name.
    pub fn ready_strategy(&self, name: &str) -> Option<Arc<dyn ReadyProbe>> {
        self.ready_strategies.get(name).cloned()
    }

    /// Looks up a registered lifecycle hook group by name.
    pub fn lifecycle_hook_group(&self, name: &str) -> Option<&HookGroup> {
        self.lifecycle_hooks.get(name)
    }

    /// Looks up a registered stats handler group by name.
    pub fn stats_handler_group(&self, name: &str) -> Option<&[Arc<dyn StatsHandler>]> {
        self.stats_handlers.get(name).map(|v| v.as_slice())
    }

    /// Looks up a registered control server by name.
    pub fn control_server(&self, name: &str) -> Option<Arc<dyn ControlServer>> {
        self.control_servers.get(name).cloned()
    }

    /// Resolves every name a manifest's processes reference into the
    /// bindings the supervisor engine consults while running.
    ///
    /// Names that resolve to nothing are not an error here: a missing ready
    /// strategy only becomes a [`crate::error::SupervisorError::MissingStrategy`]
    /// when that process is actually started, and a missing hook or stats
    /// handler group is logged and silently skipped, since there is no
    /// single moment analogous to "using" a hook the way there is for a
    /// readiness gate.
    pub fn bind(&self, manifest: &ProcessManifest) -> HashMap<String, ProcessBindings> {
        let mut bindings = HashMap::new();
        for process in &manifest.processes {
            let ready = match &process.ready_strategy {
                Some(name) => self.ready_strategy(name),
                None => None,
            };

            let mut hooks: HookGroup = HashMap::new();
            for name in &process.lifecycle_hooks {
                match self.lifecycle_hook_group(name) {
                    Some(group) => {
                        for (phase, group_hooks) in group {
                            hooks.entry(*phase).or_default().extend(group_hooks.iter().cloned());
                        }
                    }
                    None => warn!(process = %process.name, %name, "referenced lifecycle hook group is not registered"),
                }
            }

            bindings.insert(
                process.name.clone(),
                ProcessBindings {
                    ready,
                    hooks,
                },
            );
        }
        bindings
    }
}

/// The materialized callables a single process's manifest entry resolved to,
/// computed once by [`PluginRegistry::bind`].
#[derive(Default)]
pub struct ProcessBindings {
    /// The resolved readiness probe, if `ready_strategy` named one that
    /// exists.
    pub ready: Option<Arc<dyn ReadyProbe>>,
    /// Every lifecycle hook bound to this process, grouped by phase, in the
    /// order its `lifecycle_hooks` groups were listed.
    pub hooks: HookGroup,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookPhase;

    struct TestPlugin;

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            "test"
        }

        fn ready_strategies(&self) -> HashMap<String, Arc<dyn ReadyProbe>> {
            let mut map: HashMap<String, Arc<dyn ReadyProbe>> = HashMap::new();
            map.insert("tcp".to_string(), Arc::new(crate::ready::TcpProbe));
            map
        }

        fn lifecycle_hooks(&self) -> HashMap<String, HookGroup> {
            let mut group: HookGroup = HashMap::new();
            group.insert(
                HookPhase::PostStart,
                vec![Arc::new(|_: &crate::manifest::ProcessSpec, _: Option<u32>| Ok(()))],
            );
            let mut map = HashMap::new();
            map.insert("notify".to_string(), group);
            map
        }
    }

    #[test]
    fn register_then_bind_resolves_names() {
        let mut registry = PluginRegistry::new();
        registry.register(&TestPlugin);

        let mut spec = crate::test_utils::sample_process_spec("a");
        spec.ready_strategy = Some("tcp".to_string());
        spec.ready_params
            .insert("port".to_string(), serde_json::json!(8080));
        spec.lifecycle_hooks = vec!["notify".to_string()];
        let manifest = crate::test_utils::sample_manifest(vec![spec]);

        let bindings = registry.bind(&manifest);
        let bound = bindings.get("a").unwrap();
        assert!(bound.ready.is_some());
        assert!(bound.hooks.contains_key(&HookPhase::PostStart));
    }

    #[test]
    fn bind_leaves_unresolved_names_for_use_time_errors() {
        let registry = PluginRegistry::new();
        let mut spec = crate::test_utils::sample_process_spec("a");
        spec.ready_strategy = Some("does-not-exist".to_string());
        let manifest = crate::test_utils::sample_manifest(vec![spec]);

        let bindings = registry.bind(&manifest);
        assert!(bindings.get("a").unwrap().ready.is_none());
    }
}
