//! Command tree nodes.
//!
//! Commands form an immutable tree built once at program start. Each node
//! carries option and argument schemas, help text, per-encoding encoder
//! factories, the run function, and optional pre/post hooks. Resolution
//! walks a path of subcommand names and returns copies of the visited
//! nodes extended with their ancestors' options; the copies share the
//! underlying option schemas and subcommand nodes, so they are cheap and
//! mutating them never touches the source tree.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::argument::{Argument, ArgumentKind};
use crate::emitter::{EmitterKind, ResponseEmitter};
use crate::encoding::{EncoderFactory, EncodingType};
use crate::error::{CommandError, Error};
use crate::executor;
use crate::helptext::HelpText;
use crate::option::Opt;
use crate::request::Request;

/// Synchronous body of a callable command.
pub type RunFn = Arc<dyn Fn(&Request, &mut dyn ResponseEmitter, &dyn Any) + Send + Sync>;

/// Hook invoked before the run function; an error aborts the invocation.
pub type PreRunFn = Arc<dyn Fn(&Request, &dyn Any) -> Result<(), CommandError> + Send + Sync>;

/// Post-processing stage: receives the downstream emitter and returns the
/// emitter handed to the run function.
pub type PostRunFn =
    Arc<dyn Fn(&Request, Box<dyn ResponseEmitter>) -> Box<dyn ResponseEmitter> + Send + Sync>;

/// PostRun stages keyed by the emitter kind they apply to.
pub type PostRunMap = HashMap<EmitterKind, PostRunFn>;

/// Node in the command dispatch tree.
#[derive(Clone, Default)]
pub struct Command {
    /// Options declared on this node. Resolved copies also carry every
    /// ancestor's options, root first.
    pub options: Vec<Opt>,
    /// Positional and file argument schema.
    pub arguments: Vec<Argument>,
    /// Help text shown by the help system.
    pub helptext: HelpText,
    /// Encoder factories declared for this command, keyed by encoding tag.
    pub encoders: HashMap<EncodingType, EncoderFactory>,
    /// The command body. A command is callable iff this is set.
    pub run: Option<RunFn>,
    /// Hook invoked before `run`.
    pub pre_run: Option<PreRunFn>,
    /// Post-processing stages keyed by emitter kind.
    pub post_run: PostRunMap,
    /// Child commands. Keys are case-sensitive and unique per parent.
    pub subcommands: BTreeMap<String, Arc<Command>>,
}

impl Command {
    /// Returns true if the command has a run function.
    pub fn is_callable(&self) -> bool {
        self.run.is_some()
    }

    /// Returns the child named `name`, extended with this command's
    /// options.
    ///
    /// The returned command is a copy: its option vector is this node's
    /// options followed by the child's own, deduplicated by primary name.
    pub fn subcommand(&self, name: &str) -> Option<Command> {
        self.subcommands
            .get(name)
            .map(|child| self.inherited_copy(child))
    }

    /// Resolves a path of subcommand names from this node.
    ///
    /// Returns the chain of commands from this node to the leaf, inclusive,
    /// so the result always holds `path.len() + 1` entries. Every returned
    /// command is a copy extended with its ancestors' options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCommand`] naming the first path segment that
    /// does not exist at its depth.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Result<Vec<Command>, Error> {
        let mut chain = Vec::with_capacity(path.len() + 1);
        chain.push(self.clone());

        for segment in path {
            let name = segment.as_ref();
            let next = chain
                .last()
                .and_then(|current: &Command| current.subcommand(name))
                .ok_or_else(|| Error::unknown_command(name))?;
            chain.push(next);
        }
        Ok(chain)
    }

    /// Visits every node of the subtree rooted here, depth first.
    ///
    /// Children are visited in key order, so the traversal is
    /// deterministic.
    pub fn walk(&self, visit: &mut dyn FnMut(&Command)) {
        visit(self);
        for child in self.subcommands.values() {
            child.walk(visit);
        }
    }

    /// Returns the merged option set along `path`, collision-checked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OptionCollision`] when two commands along the path
    /// share an option name or alias, and [`Error::UnknownCommand`] when a
    /// path segment does not resolve.
    pub fn get_options<S: AsRef<str>>(&self, path: &[S]) -> Result<Vec<Opt>, Error> {
        let mut merged = Vec::new();
        let mut seen = HashSet::new();

        let mut current = self;
        collect_options(current, &mut merged, &mut seen)?;
        for segment in path {
            let name = segment.as_ref();
            current = current
                .subcommands
                .get(name)
                .ok_or_else(|| Error::unknown_command(name))?;
            collect_options(current, &mut merged, &mut seen)?;
        }
        Ok(merged)
    }

    /// Fills empty long descriptions from short descriptions, recursively.
    pub fn process_help(&mut self) {
        if self.helptext.long_description.is_empty() && !self.helptext.short_description.is_empty()
        {
            self.helptext.long_description = self.helptext.short_description.clone();
        }
        for child in self.subcommands.values_mut() {
            Arc::make_mut(child).process_help();
        }
    }

    /// Runs the command through the default executor.
    ///
    /// # Errors
    ///
    /// Propagates dispatch and runtime errors from [`executor::execute`].
    pub fn call(
        &self,
        req: &mut Request,
        re: Box<dyn ResponseEmitter>,
        env: &dyn Any,
    ) -> Result<(), Error> {
        executor::execute(req, re, env)
    }

    /// Validates positional and file arguments against the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArguments`] when a required argument is
    /// missing or the request carries more arguments than declared.
    pub fn check_arguments(&self, req: &Request) -> Result<(), Error> {
        let string_args: Vec<&Argument> = self
            .arguments
            .iter()
            .filter(|arg| arg.kind() == ArgumentKind::String)
            .collect();

        let required = string_args.iter().filter(|arg| arg.is_required()).count();
        if req.arguments.len() < required {
            let missing = string_args
                .iter()
                .filter(|arg| arg.is_required())
                .nth(req.arguments.len())
                .map(|arg| arg.name().to_owned())
                .unwrap_or_default();
            return Err(Error::invalid_arguments(format!(
                "argument {missing:?} is required"
            )));
        }

        let variadic = string_args.iter().any(|arg| arg.is_variadic());
        if !variadic && req.arguments.len() > string_args.len() {
            return Err(Error::invalid_arguments(format!(
                "expected at most {} arguments, got {}",
                string_args.len(),
                req.arguments.len()
            )));
        }

        let file_required = self
            .arguments
            .iter()
            .any(|arg| arg.kind() == ArgumentKind::File && arg.is_required());
        if file_required && req.files.is_empty() {
            return Err(Error::invalid_arguments("a file argument is required"));
        }
        Ok(())
    }

    /// Finds the declared option matching `name` (any of its names).
    pub(crate) fn option_schema(&self, name: &str) -> Option<&Opt> {
        self.options.iter().find(|opt| opt.matches(name))
    }

    fn inherited_copy(&self, child: &Command) -> Command {
        let mut options = Vec::with_capacity(self.options.len() + child.options.len());
        let mut primaries = HashSet::new();
        for opt in self.options.iter().chain(child.options.iter()) {
            if primaries.insert(opt.primary_name().to_owned()) {
                options.push(opt.clone());
            }
        }

        let mut copy = child.clone();
        copy.options = options;
        copy
    }
}

fn collect_options<'a>(
    command: &'a Command,
    merged: &mut Vec<Opt>,
    seen: &mut HashSet<&'a str>,
) -> Result<(), Error> {
    for opt in &command.options {
        for name in opt.names() {
            if !seen.insert(name.as_str()) {
                return Err(Error::option_collision(name.clone()));
            }
        }
        merged.push(opt.clone());
    }
    Ok(())
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field(
                "options",
                &self
                    .options
                    .iter()
                    .map(Opt::primary_name)
                    .collect::<Vec<_>>(),
            )
            .field("arguments", &self.arguments.len())
            .field("callable", &self.is_callable())
            .field(
                "subcommands",
                &self.subcommands.keys().collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
