//! Event, Command and Content Integration Tests
//! Run with: cargo test --test registry_test

use extension_host::{
    CommandContext, CommandRegistration, EventCategory, ExtensionBuilder, ExtensionHost,
    ExtensionState, HandlerReply, HookSpec,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> impl Fn(&serde_json::Value) -> Result<HandlerReply, extension_host::ExtensionFault> + Send + Sync + 'static {
    let log = log.clone();
    let label = label.to_string();
    move |_| {
        log.lock().unwrap().push(label.clone());
        Ok(HandlerReply::value(label.clone()))
    }
}

#[test]
fn test_handlers_run_by_priority_across_extensions() {
    ensure_init();
    let log = Arc::new(Mutex::new(Vec::new()));
    let host = ExtensionHost::new();
    host.add_source(
        ExtensionBuilder::new("late")
            .hook(HookSpec::new(EventCategory::EnemyKilled, recorder(&log, "late")).with_priority(90))
            .build(),
    )
    .unwrap();
    host.add_source(
        ExtensionBuilder::new("early")
            .hook(HookSpec::new(EventCategory::EnemyKilled, recorder(&log, "early")).with_priority(10))
            .hook(HookSpec::new(EventCategory::EnemyKilled, recorder(&log, "early-again")).with_priority(10))
            .build(),
    )
    .unwrap();
    host.load_all();

    let results = host.publish(EventCategory::EnemyKilled, json!({"enemy": "slime"}));
    assert_eq!(results.len(), 3);
    assert_eq!(*log.lock().unwrap(), vec!["early", "early-again", "late"]);
    assert_eq!(results[2].owner, "late");
}

#[test]
fn test_stop_once_and_filters() {
    ensure_init();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let host = ExtensionHost::new();
    host.add_source(
        ExtensionBuilder::new("gate")
            .hook(
                HookSpec::new(EventCategory::ShopBuy, |payload| {
                    if payload["item"] == "contraband" {
                        Ok(HandlerReply::stop("refused"))
                    } else {
                        Ok(HandlerReply::none())
                    }
                })
                .with_priority(0),
            )
            .hook(
                HookSpec::new(EventCategory::ShopBuy, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(HandlerReply::none())
                })
                .with_priority(10),
            )
            .hook(
                HookSpec::new(EventCategory::ShopBuy, |_| Ok(HandlerReply::value("first sale")))
                    .with_priority(20)
                    .once(),
            )
            .hook(
                HookSpec::new(EventCategory::ShopBuy, |_| Ok(HandlerReply::value("bulk")))
                    .with_priority(30)
                    .with_filter(|payload| payload["quantity"].as_u64().unwrap_or(0) >= 10),
            )
            .build(),
    )
    .unwrap();
    host.load("gate").unwrap();

    let refused = host.publish(EventCategory::ShopBuy, json!({"item": "contraband"}));
    assert_eq!(refused.len(), 1);
    assert_eq!(refused[0].outcome, Ok(json!("refused")));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let first = host.publish(EventCategory::ShopBuy, json!({"item": "apple", "quantity": 12}));
    assert_eq!(first.len(), 4);
    let second = host.publish(EventCategory::ShopBuy, json!({"item": "apple", "quantity": 1}));
    assert_eq!(second.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_faulty_handler_does_not_stop_dispatch() {
    ensure_init();
    let host = ExtensionHost::new();
    host.add_source(
        ExtensionBuilder::new("buggy")
            .hook(HookSpec::new(EventCategory::QuestComplete, |_| panic!("bad quest")).with_priority(1))
            .hook(HookSpec::new(EventCategory::QuestComplete, |_| Ok(HandlerReply::value("reward"))))
            .build(),
    )
    .unwrap();
    host.load("buggy").unwrap();

    let results = host.publish(EventCategory::QuestComplete, json!({}));
    assert_eq!(results.len(), 2);
    assert!(results[0].is_fault());
    assert_eq!(results[1].outcome, Ok(json!("reward")));
    assert_eq!(host.state("buggy"), Some(ExtensionState::Enabled));
}

#[test]
fn test_alias_collision_rejects_the_second_extension() {
    ensure_init();
    let host = ExtensionHost::new();
    host.add_source(
        ExtensionBuilder::new("healer")
            .command(CommandRegistration::new("heal", |_, _| Ok("Healed".into())).with_alias("h"))
            .build(),
    )
    .unwrap();
    host.add_source(
        ExtensionBuilder::new("hunter")
            .command(CommandRegistration::new("hunt", |_, _| Ok("Hunting".into())))
            .command(CommandRegistration::new("h", |_, _| Ok("Hmm".into())))
            .build(),
    )
    .unwrap();

    host.load("healer").unwrap();
    let err = host.load("hunter").unwrap_err();
    assert_eq!(err.kind(), "DuplicateCommand");
    assert!(host.state("hunter").unwrap().is_error());

    // Nothing from the failed load survives
    assert!(!host.commands().contains("hunt"));
    let outcome = host.execute_line("/h", &CommandContext::new());
    assert_eq!(outcome.message, "Healed");
}

#[test]
fn test_command_permissions_and_arguments() {
    ensure_init();
    let host = ExtensionHost::new();
    host.add_source(
        ExtensionBuilder::new("teleporter")
            .command(
                CommandRegistration::new("warp", |args, _| Ok(format!("Warped to {}", args.join(" "))))
                    .with_args(1, Some(2))
                    .with_permission("travel"),
            )
            .build(),
    )
    .unwrap();
    host.load("teleporter").unwrap();

    let guest = CommandContext::for_caller("guest");
    let denied = host.execute_line("/warp town", &guest);
    assert!(!denied.success);
    assert_eq!(denied.message, "Permission denied: requires travel");

    let traveller = CommandContext::for_caller("traveller").with_permission("travel");
    assert!(!host.execute_line("/warp", &traveller).success);
    let outcome = host.execute_line("/warp old town", &traveller);
    assert!(outcome.success);
    assert_eq!(outcome.message, "Warped to old town");

    let unknown = host.execute_line("/fly", &traveller);
    assert_eq!(unknown.message, "Unknown command: fly");
}

#[test]
fn test_disable_keeps_content_but_withdraws_behavior() {
    ensure_init();
    let host = ExtensionHost::new();
    host.add_source(
        ExtensionBuilder::new("market")
            .command(CommandRegistration::new("prices", |_, _| Ok("cheap".into())))
            .hook(HookSpec::new(EventCategory::ShopOpen, |_| Ok(HandlerReply::none())))
            .content("items", "bread", json!({"name": "Bread", "value": 2}))
            .build(),
    )
    .unwrap();
    host.load("market").unwrap();
    host.disable("market").unwrap();

    assert!(!host.commands().contains("prices"));
    assert!(host.publish(EventCategory::ShopOpen, json!({})).is_empty());
    assert!(host.content().get("items", "bread").is_some());

    host.enable("market").unwrap();
    assert!(host.commands().contains("prices"));
    assert_eq!(host.publish(EventCategory::ShopOpen, json!({})).len(), 1);
    assert_eq!(host.content().owned_by("market"), 1);
}

#[test]
fn test_content_queries_and_factories() {
    ensure_init();
    let host = ExtensionHost::new();
    host.add_source(
        ExtensionBuilder::new("armory")
            .content("items", "dagger", json!({"name": "Dagger", "damage": 3}))
            .content("items", "axe", json!({"name": "Axe", "damage": 8}))
            .build(),
    )
    .unwrap();
    host.load("armory").unwrap();

    let heavy = host
        .content()
        .query("items", |_, payload| payload["damage"].as_i64().unwrap_or(0) > 5);
    assert_eq!(heavy.len(), 1);
    assert_eq!(heavy[0].0, "axe");

    let created = host
        .content()
        .create("items", "rusty_dagger", &json!({"name": "Rusty Dagger"}))
        .unwrap();
    assert_eq!(created["id"], "rusty_dagger");
    assert!(host.content().create("unknown_type", "x", &json!({})).is_err());
}
