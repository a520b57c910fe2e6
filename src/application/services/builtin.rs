//! Commands the host registers for itself

use super::lifecycle::{ExtensionHost, WeakHost};
use crate::application::errors::ExtensionFault;
use crate::domain::entities::{CommandContext, CommandRegistration, HOST_OWNER};

/// Permission required by commands that change extension state
pub const ADMIN_PERMISSION: &str = "admin";

const CATEGORY: &str = "system";

type BuiltinFn = fn(&ExtensionHost, &[String], &CommandContext) -> Result<String, ExtensionFault>;

fn bind(host: &WeakHost, name: &str, run: BuiltinFn) -> CommandRegistration {
    let host = host.clone();
    CommandRegistration::new(name, move |args, ctx| {
        let host = host
            .upgrade()
            .ok_or_else(|| ExtensionFault::new("host is shutting down"))?;
        run(&host, args, ctx)
    })
    .with_category(CATEGORY)
}

pub(crate) fn register(host: &ExtensionHost) {
    let weak = host.downgrade();
    let commands = vec![
        bind(&weak, "help", help)
            .with_help("Show available commands")
            .with_usage("/help [command|category]")
            .with_args(0, Some(1)),
        bind(&weak, "extensions", list)
            .with_help("List extensions and their states")
            .with_alias("plugins")
            .with_args(0, Some(1)),
        bind(&weak, "extension_info", info)
            .with_help("Show details about an extension")
            .with_usage("/extension_info <id>")
            .with_alias("plugin_info")
            .with_args(1, Some(1)),
        bind(&weak, "enable", enable)
            .with_help("Enable an extension")
            .with_usage("/enable <id>")
            .with_args(1, Some(1))
            .with_permission(ADMIN_PERMISSION),
        bind(&weak, "disable", disable)
            .with_help("Disable an extension")
            .with_usage("/disable <id>")
            .with_args(1, Some(1))
            .with_permission(ADMIN_PERMISSION),
        bind(&weak, "reload", reload)
            .with_help("Hot-reload an extension")
            .with_usage("/reload <id>")
            .with_args(1, Some(1))
            .with_permission(ADMIN_PERMISSION),
        bind(&weak, "content", content)
            .with_help("List registered content")
            .with_usage("/content [type]")
            .with_args(0, Some(1)),
    ];

    for command in commands {
        if let Err(e) = host.commands().register(command, HOST_OWNER) {
            tracing::warn!("Built-in command not registered: {}", e);
        }
    }
}

fn help(host: &ExtensionHost, args: &[String], _: &CommandContext) -> Result<String, ExtensionFault> {
    Ok(host.commands().get_help(args.first().map(String::as_str)))
}

fn list(host: &ExtensionHost, args: &[String], _: &CommandContext) -> Result<String, ExtensionFault> {
    let extensions = match args.first() {
        Some(tag) => host.extensions_by_tag(tag),
        None => host.extensions(),
    };
    if extensions.is_empty() {
        return Ok("No extensions found".to_string());
    }

    let mut lines = vec![format!("Extensions ({}):", extensions.len())];
    for extension in extensions {
        lines.push(format!(
            "  {} v{} [{}] - {}",
            extension.id, extension.version, extension.state, extension.name
        ));
    }
    Ok(lines.join("\n"))
}

fn info(host: &ExtensionHost, args: &[String], _: &CommandContext) -> Result<String, ExtensionFault> {
    let id = &args[0];
    let (Some(summary), Some(descriptor)) = (host.extension(id), host.descriptor(id)) else {
        return Err(ExtensionFault::new(format!("Extension not found: {}", id)));
    };

    let mut lines = vec![
        format!("{} ({}) v{}", summary.name, summary.id, summary.version),
        format!("Author: {}", summary.author),
        format!("State: {}", summary.state),
        format!("Source: {} ({})", summary.location, descriptor.kind),
    ];
    if !summary.description.is_empty() {
        lines.push(summary.description.clone());
    }
    let required: Vec<&str> = descriptor.dependencies.required.iter().map(String::as_str).collect();
    if !required.is_empty() {
        lines.push(format!("Requires: {}", required.join(", ")));
    }
    if !summary.tags.is_empty() {
        let tags: Vec<&str> = summary.tags.iter().map(String::as_str).collect();
        lines.push(format!("Tags: {}", tags.join(", ")));
    }
    Ok(lines.join("\n"))
}

fn enable(host: &ExtensionHost, args: &[String], _: &CommandContext) -> Result<String, ExtensionFault> {
    host.enable(&args[0])
        .map_err(|e| ExtensionFault::new(e.to_string()))?;
    Ok(format!("Enabled {}", args[0]))
}

fn disable(host: &ExtensionHost, args: &[String], _: &CommandContext) -> Result<String, ExtensionFault> {
    host.disable(&args[0])
        .map_err(|e| ExtensionFault::new(e.to_string()))?;
    Ok(format!("Disabled {}", args[0]))
}

fn reload(host: &ExtensionHost, args: &[String], _: &CommandContext) -> Result<String, ExtensionFault> {
    let outcome = host
        .reload(&args[0])
        .map_err(|e| ExtensionFault::new(e.to_string()))?;
    Ok(format!(
        "Reloaded {} ({} -> {})",
        outcome.id, outcome.previous_version, outcome.version
    ))
}

fn content(host: &ExtensionHost, args: &[String], _: &CommandContext) -> Result<String, ExtensionFault> {
    match args.first() {
        Some(content_type) => {
            let entries = host.content().get_all(content_type);
            if entries.is_empty() {
                return Ok(format!("No {} registered", content_type));
            }
            let ids: Vec<&str> = entries.keys().map(String::as_str).collect();
            Ok(format!("{} ({}): {}", content_type, ids.len(), ids.join(", ")))
        }
        None => {
            let stats = host.content().stats();
            let mut lines = vec![format!("Content entries: {}", stats.total)];
            for (content_type, count) in stats.by_type {
                lines.push(format!("  {}: {}", content_type, count));
            }
            Ok(lines.join("\n"))
        }
    }
}
