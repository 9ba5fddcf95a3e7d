//! Catalog of discovered modules.

use std::{collections::BTreeMap, sync::Arc};

use clap::ArgMatches;
use thiserror::Error;

use crate::{
    category::CategoryTree,
    command::{CommandLineError, split_command_line},
    module::{Completer, ModuleDescriptor},
    plugin::PluginSource,
};

/// Plugin name reserved for shared helper code; never a module.
const HELPER_PACKAGE: &str = "lib";

/// Catalog error.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Plugin {0:?} does not declare an entry module")]
    MissingEntry(String),
    #[error("Plugin {0:?} is registered more than once")]
    DuplicatePlugin(String),
    #[error("No such module: {0}")]
    NotFound(String),
}

impl CatalogError {
    /// Whether the error is a fatal deployment mistake.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingEntry(_) | Self::DuplicatePlugin(_))
    }
}

/// Argument validation error.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Parse(#[from] clap::Error),
    #[error(transparent)]
    Line(#[from] CommandLineError),
}

/// Modules discovered from a plugin source, keyed by name.
///
/// The catalog is immutable; rediscover to pick up plugin changes.
#[derive(Debug, Default, Clone)]
pub struct ModuleCatalog {
    modules: BTreeMap<String, Arc<ModuleDescriptor>>,
    categories: CategoryTree,
}

impl ModuleCatalog {
    /// Scan `source` and build the catalog.
    ///
    /// # Errors
    /// Returns `MissingEntry` for the first plugin without an entry module
    /// and `DuplicatePlugin` if a name is offered twice. Either aborts the
    /// whole discovery.
    pub fn discover(source: &dyn PluginSource) -> Result<Self, CatalogError> {
        let mut modules = BTreeMap::new();
        let mut categories = CategoryTree::new();

        for plugin in source.plugins() {
            if plugin.name == HELPER_PACKAGE {
                continue;
            }
            let Some(entry) = plugin.entry else {
                tracing::error!(plugin = %plugin.name, "Plugin declares no entry module");
                return Err(CatalogError::MissingEntry(plugin.name));
            };
            if modules.contains_key(&plugin.name) {
                return Err(CatalogError::DuplicatePlugin(plugin.name));
            }

            categories.insert(&entry.category, &plugin.name);
            let descriptor = ModuleDescriptor::new(plugin.name.clone(), entry);
            modules.insert(plugin.name, Arc::new(descriptor));
        }

        tracing::debug!(count = modules.len(), "Module catalog discovered");
        Ok(Self {
            modules,
            categories,
        })
    }

    /// All modules, ordered by name.
    pub fn modules(&self) -> impl Iterator<Item = &Arc<ModuleDescriptor>> {
        self.modules.values()
    }

    /// Number of modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the catalog has no modules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Look up a module by exact name.
    ///
    /// # Errors
    /// Returns `NotFound` if no module has that name.
    pub fn resolve(&self, name: &str) -> Result<Arc<ModuleDescriptor>, CatalogError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    /// Map a virtual category path to a module name.
    ///
    /// Paths that do not end on a module come back unchanged.
    #[must_use]
    pub fn resolve_category_path(&self, path: &str) -> String {
        self.categories
            .resolve(path)
            .map_or_else(|| path.to_string(), str::to_string)
    }

    /// Category tree for path completion.
    #[must_use]
    pub const fn categories(&self) -> &CategoryTree {
        &self.categories
    }

    /// Argument completer of a module, read from an inspection instance.
    ///
    /// # Errors
    /// Returns `NotFound` if no module has that name.
    pub fn completer(&self, name: &str) -> Result<Arc<dyn Completer>, CatalogError> {
        Ok(self.resolve(name)?.inspect().arg_parser().get_completer())
    }

    /// Validate `args` against a module's schema.
    ///
    /// # Errors
    /// Returns `Catalog` if the module is unknown and `Parse` with clap's
    /// error if the arguments do not fit the schema.
    pub fn parse_args<S: AsRef<str>>(&self, name: &str, args: &[S]) -> Result<ArgMatches, ArgsError> {
        let module = self.resolve(name)?.inspect();
        Ok(module
            .arg_parser()
            .parse_args(args.iter().map(|a| a.as_ref().to_string()))?)
    }

    /// Split a shell-style argument line, then validate it.
    ///
    /// # Errors
    /// Returns `Line` for unbalanced quoting, otherwise as
    /// [`ModuleCatalog::parse_args`].
    pub fn parse_arg_line(&self, name: &str, line: &str) -> Result<ArgMatches, ArgsError> {
        let args = split_command_line(line)?;
        self.parse_args(name, &args)
    }
}
