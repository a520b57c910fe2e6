//! Native extension libraries
//!
//! A shared library exports a constructor, `create_extension` by default:
//!
//! ```ignore
//! #[no_mangle]
//! pub fn create_extension() -> Box<dyn Extension> {
//!     Box::new(MyExtension::default())
//! }
//! ```
//!
//! The library must be built against the same version of this crate and the
//! same compiler as the host.

use crate::application::errors::{ExtensionFault, HostError};
use crate::application::services::ExtensionHost;
use crate::domain::entities::{
    CommandContext, CommandRegistration, ContentBundle, HookSpec, ReloadSnapshot,
};
use crate::domain::traits::{Capabilities, Extension, HookResult};
use libloading::{Library, Symbol};
use serde_json::Value;
use std::any::Any;
use std::path::Path;
use std::sync::Arc;

/// Symbol looked up when a manifest does not name one
pub const DEFAULT_ENTRY_SYMBOL: &str = "create_extension";

/// Signature of the exported constructor
pub type CreateExtensionFn = fn() -> Box<dyn Extension>;

/// An extension instance together with the library its code lives in
pub struct LibraryExtension {
    // Declared first so it is dropped before the library is unmapped
    instance: Box<dyn Extension>,
    library: Arc<Library>,
}

/// Owner of code that registered handlers may still call into
type Keepalive = Arc<dyn Any + Send + Sync>;

/// A handler plus whatever its code lives in. Fields drop in order,
/// so the handler goes before the library it points into.
struct Pinned<T: ?Sized> {
    inner: Arc<T>,
    _keep: Keepalive,
}

/// Make a hook hold `keep` for as long as any copy of its closures exists
fn pin_hook(mut hook: HookSpec, keep: &Keepalive) -> HookSpec {
    let handler = Pinned {
        inner: hook.handler,
        _keep: keep.clone(),
    };
    hook.handler = Arc::new(move |payload: &Value| (handler.inner)(payload));
    if let Some(filter) = hook.filter.take() {
        let filter = Pinned {
            inner: filter,
            _keep: keep.clone(),
        };
        hook.filter = Some(Arc::new(move |payload: &Value| (filter.inner)(payload)));
    }
    hook
}

fn pin_command(mut command: CommandRegistration, keep: &Keepalive) -> CommandRegistration {
    let handler = Pinned {
        inner: command.handler,
        _keep: keep.clone(),
    };
    command.handler = Arc::new(move |args: &[String], ctx: &CommandContext| (handler.inner)(args, ctx));
    command
}

/// Open `path` and call its constructor
pub fn load_library(path: &Path, symbol: Option<&str>) -> Result<LibraryExtension, HostError> {
    let source_name = path.display().to_string();
    if !path.exists() {
        return Err(HostError::malformed(&source_name, "library not found"));
    }

    let library = unsafe {
        Library::new(path)
            .map_err(|e| HostError::malformed(&source_name, format!("Failed to load library: {}", e)))?
    };

    let symbol = symbol.unwrap_or(DEFAULT_ENTRY_SYMBOL);
    let constructor: CreateExtensionFn = unsafe {
        let found: Symbol<CreateExtensionFn> = library.get(symbol.as_bytes()).map_err(|e| {
            HostError::malformed(&source_name, format!("Failed to find {}: {}", symbol, e))
        })?;
        *found
    };

    let instance = std::panic::catch_unwind(constructor).map_err(|payload| {
        HostError::malformed(&source_name, ExtensionFault::from_panic(payload).to_string())
    })?;

    tracing::info!("Loaded native extension from {}", source_name);
    Ok(LibraryExtension {
        instance,
        library: Arc::new(library),
    })
}

impl Extension for LibraryExtension {
    fn capabilities(&self) -> Capabilities {
        self.instance.capabilities()
    }

    fn on_load(&mut self, host: &ExtensionHost) -> HookResult {
        self.instance.on_load(host)
    }

    fn on_unload(&mut self, host: &ExtensionHost) -> HookResult {
        self.instance.on_unload(host)
    }

    fn on_enable(&mut self, host: &ExtensionHost) -> HookResult {
        self.instance.on_enable(host)
    }

    fn on_disable(&mut self, host: &ExtensionHost) -> HookResult {
        self.instance.on_disable(host)
    }

    // Dispatch snapshots can outlive the unload that drops this value
    fn register_hooks(&mut self) -> Result<Vec<HookSpec>, ExtensionFault> {
        let keep: Keepalive = self.library.clone();
        let hooks = self.instance.register_hooks()?;
        Ok(hooks.into_iter().map(|hook| pin_hook(hook, &keep)).collect())
    }

    fn register_commands(&mut self) -> Result<Vec<CommandRegistration>, ExtensionFault> {
        let keep: Keepalive = self.library.clone();
        let commands = self.instance.register_commands()?;
        Ok(commands
            .into_iter()
            .map(|command| pin_command(command, &keep))
            .collect())
    }

    fn register_content(&mut self) -> Result<ContentBundle, ExtensionFault> {
        self.instance.register_content()
    }

    fn before_reload(&mut self) -> Result<ReloadSnapshot, ExtensionFault> {
        self.instance.before_reload()
    }

    fn after_reload(&mut self, snapshot: ReloadSnapshot) -> HookResult {
        self.instance.after_reload(snapshot)
    }

    fn set_config(&mut self, config: &Value) -> HookResult {
        self.instance.set_config(config)
    }
}
