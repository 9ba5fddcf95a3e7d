//! Pluggable module catalog.
//!
//! Provides:
//! - Plugin registration (`PluginSource`, `StaticPlugins`)
//! - `ModuleCatalog` with category path resolution
//! - Argument schemas and completion for modules

pub mod catalog;
pub mod category;
pub mod command;
pub mod module;
pub mod plugin;

pub use catalog::{ArgsError, CatalogError, ModuleCatalog};
pub use category::CategoryTree;
pub use command::{CommandLineError, split_command_line};
pub use module::{
    ArgParser, Completer, FlagCompleter, Module, ModuleContext, ModuleDescriptor, ModuleEntry,
    ModuleFactory,
};
pub use plugin::{Plugin, PluginSource, StaticPlugins};
