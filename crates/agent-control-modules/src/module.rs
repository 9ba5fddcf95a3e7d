//! Module definitions, argument schemas and completion.

use std::{ffi::OsString, fmt, sync::Arc};

use agent_control_core::Connection;
use clap::{ArgMatches, Command};

/// Live connections a module instance operates on.
///
/// Modules built without a context are in inspection mode: they expose
/// their schema but are never run.
#[derive(Clone, Default)]
pub struct ModuleContext {
    pub connections: Vec<Arc<dyn Connection>>,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.connections.iter().map(|c| c.id()))
            .finish()
    }
}

/// Completion provider for module arguments.
pub trait Completer: Send + Sync {
    /// Candidates for the word `text`, given the full argument `line`.
    fn complete(&self, text: &str, line: &str) -> Vec<String>;
}

/// Completer derived from a command's declared flags and possible values.
#[derive(Debug, Clone, Default)]
pub struct FlagCompleter {
    flags: Vec<String>,
    values: Vec<String>,
}

impl FlagCompleter {
    /// Collect the flags and enumerated values of `command`.
    #[must_use]
    pub fn from_command(command: &Command) -> Self {
        let mut flags = Vec::new();
        let mut values = Vec::new();
        for arg in command.get_arguments() {
            if let Some(long) = arg.get_long() {
                flags.push(format!("--{long}"));
            }
            if let Some(short) = arg.get_short() {
                flags.push(format!("-{short}"));
            }
            values.extend(
                arg.get_possible_values()
                    .iter()
                    .map(|v| v.get_name().to_string()),
            );
        }
        flags.sort();
        flags.dedup();
        values.sort();
        values.dedup();
        Self { flags, values }
    }
}

impl Completer for FlagCompleter {
    fn complete(&self, text: &str, _line: &str) -> Vec<String> {
        let pool = if text.starts_with('-') {
            &self.flags
        } else {
            &self.values
        };
        pool.iter().filter(|c| c.starts_with(text)).cloned().collect()
    }
}

/// A module's argument schema plus its optional completer.
#[derive(Clone)]
pub struct ArgParser {
    command: Command,
    completer: Option<Arc<dyn Completer>>,
}

impl ArgParser {
    /// Wrap a clap command. Argument lists never include a binary name.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command: command.no_binary_name(true),
            completer: None,
        }
    }

    /// Use a custom completer instead of the flag completer.
    #[must_use]
    pub fn with_completer(mut self, completer: Arc<dyn Completer>) -> Self {
        self.completer = Some(completer);
        self
    }

    /// The underlying schema.
    #[must_use]
    pub const fn command(&self) -> &Command {
        &self.command
    }

    /// The completer for this schema.
    #[must_use]
    pub fn get_completer(&self) -> Arc<dyn Completer> {
        self.completer
            .clone()
            .unwrap_or_else(|| Arc::new(FlagCompleter::from_command(&self.command)))
    }

    /// Validate `args` against the schema.
    ///
    /// # Errors
    /// Returns clap's own error when validation fails.
    pub fn parse_args<I, T>(&self, args: I) -> Result<ArgMatches, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        self.command.clone().try_get_matches_from(args)
    }
}

impl fmt::Debug for ArgParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgParser")
            .field("command", &self.command.get_name())
            .field("custom_completer", &self.completer.is_some())
            .finish()
    }
}

/// A pluggable unit of remote functionality.
pub trait Module: Send + Sync {
    /// Argument schema of the module.
    fn arg_parser(&self) -> &ArgParser;

    /// Most sessions one job of this module may target, if limited.
    fn max_sessions(&self) -> Option<usize> {
        None
    }
}

/// Factory building a module instance, in inspection mode when the
/// context is `None`.
pub type ModuleFactory = Arc<dyn Fn(Option<ModuleContext>) -> Box<dyn Module> + Send + Sync>;

/// Entry point a plugin declares for its module.
#[derive(Clone)]
pub struct ModuleEntry {
    pub category: String,
    pub description: String,
    pub factory: ModuleFactory,
}

impl ModuleEntry {
    /// Create an entry from a category path, description and factory.
    pub fn new<F>(category: impl Into<String>, description: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Option<ModuleContext>) -> Box<dyn Module> + Send + Sync + 'static,
    {
        Self {
            category: category.into(),
            description: description.into(),
            factory: Arc::new(factory),
        }
    }
}

/// A discovered module, immutable once loaded.
#[derive(Clone)]
pub struct ModuleDescriptor {
    name: String,
    entry: ModuleEntry,
}

impl ModuleDescriptor {
    pub(crate) const fn new(name: String, entry: ModuleEntry) -> Self {
        Self { name, entry }
    }

    /// Module name, the catalog key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Virtual category the module lives under.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.entry.category
    }

    /// One-line description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.entry.description
    }

    /// Full virtual path, `category/name`.
    #[must_use]
    pub fn path(&self) -> String {
        let category = self.category().trim_matches('/');
        if category.is_empty() {
            self.name.clone()
        } else {
            format!("{category}/{}", self.name)
        }
    }

    /// Build an instance bound to live connections.
    #[must_use]
    pub fn instantiate(&self, context: ModuleContext) -> Box<dyn Module> {
        (self.entry.factory)(Some(context))
    }

    /// Build an instance in inspection mode.
    #[must_use]
    pub fn inspect(&self) -> Box<dyn Module> {
        (self.entry.factory)(None)
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("category", &self.entry.category)
            .finish_non_exhaustive()
    }
}
