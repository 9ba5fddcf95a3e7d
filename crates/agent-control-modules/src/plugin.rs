//! Plugin registration.

use crate::module::ModuleEntry;

/// A plugin as offered by a [`PluginSource`].
///
/// `entry` is the module the plugin declares as its entry point. A plugin
/// without one is a deployment error and aborts catalog discovery.
#[derive(Clone)]
pub struct Plugin {
    pub name: String,
    pub entry: Option<ModuleEntry>,
}

impl Plugin {
    /// A plugin declaring `entry`.
    pub fn new(name: impl Into<String>, entry: ModuleEntry) -> Self {
        Self {
            name: name.into(),
            entry: Some(entry),
        }
    }

    /// A plugin that declares no entry module.
    pub fn undeclared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
        }
    }
}

/// A discoverable source of plugins.
pub trait PluginSource: Send + Sync {
    /// Every plugin currently offered, in a stable order.
    fn plugins(&self) -> Vec<Plugin>;
}

/// Plugins registered explicitly at startup.
#[derive(Clone, Default)]
pub struct StaticPlugins {
    plugins: Vec<Plugin>,
}

impl StaticPlugins {
    /// Create an empty plugin set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `name`.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, entry: ModuleEntry) -> Self {
        self.plugins.push(Plugin::new(name, entry));
        self
    }

    /// Add a plugin as-is.
    pub fn add(&mut self, plugin: Plugin) {
        self.plugins.push(plugin);
    }
}

impl PluginSource for StaticPlugins {
    fn plugins(&self) -> Vec<Plugin> {
        self.plugins.clone()
    }
}
