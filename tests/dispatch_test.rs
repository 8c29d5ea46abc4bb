//! Message pipeline, command routing and event fan-out
//! Run with: cargo test --test dispatch_test

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use carik_runtime::application::errors::PluginError;
use carik_runtime::domain::entities::{Command, CommandDefinition, Event, Message, Permission, User};
use common::{manager, manifest, Mock};

const RW: &[&str] = &["read-messages", "write-messages"];

fn message(content: &str) -> Message {
    Message::new("general", User::new("42").with_username("ana"), content)
}

fn command(name: &str) -> Command {
    Command::new(name, User::new("42"), "general")
}

#[tokio::test]
async fn processors_run_in_ascending_priority() {
    let manager = manager();
    for (name, priority) in [("five", 5), ("one", 1), ("three", 3)] {
        manager
            .register_plugin(manifest(name, RW, ""), Arc::new(Mock::new(name).processor(priority)))
            .await
            .unwrap();
    }

    let output = manager.process_message(message("hi")).await.unwrap();
    assert!(output.is_clean());
    assert_eq!(output.message.content, "hi|one|three|five");
    assert_eq!(output.message.author.id, "42");
}

#[tokio::test]
async fn failing_stage_is_skipped_with_the_previous_message() {
    let manager = manager();
    for (name, priority) in [("five", 5), ("one", 1), ("three", 3)] {
        let mut mock = Mock::new(name).processor(priority);
        if priority == 1 {
            mock = mock.failing();
        }
        manager
            .register_plugin(manifest(name, RW, ""), Arc::new(mock))
            .await
            .unwrap();
    }

    let output = manager.process_message(message("hi")).await.unwrap();
    assert_eq!(output.message.content, "hi|three|five");
    assert_eq!(output.errors.len(), 1);
    assert_eq!(output.errors[0].plugin, "one");
    assert!(matches!(output.errors[0].error, PluginError::Execution { .. }));
    assert_eq!(manager.monitor().peek("one").unwrap().failed_calls, 1);
}

#[tokio::test]
async fn read_only_processor_cannot_rewrite_content() {
    let manager = manager();
    manager
        .register_plugin(manifest("reader", &["read-messages"], ""), Arc::new(Mock::new("reader").processor(1)))
        .await
        .unwrap();

    let output = manager.process_message(message("hi")).await.unwrap();
    assert_eq!(output.message.content, "hi");
    assert!(matches!(
        output.errors[0].error,
        PluginError::PermissionDenied { ref permission, .. } if permission == "write-messages"
    ));
}

#[tokio::test]
async fn read_only_processor_passing_nested_markup_through_is_clean() {
    let manager = manager();
    manager
        .register_plugin(
            manifest("pass", &["read-messages"], ""),
            Arc::new(Mock::new("pass").processor(1).pass_through()),
        )
        .await
        .unwrap();

    let output = manager
        .process_message(message("<scr<iframe>ipt>alert(1)"))
        .await
        .unwrap();
    assert!(output.is_clean(), "unexpected stage errors: {:?}", output.errors);
    assert_eq!(output.message.content, "alert(1)");
}

#[tokio::test]
async fn message_content_is_sanitized_before_processors() {
    let manager = manager();
    manager
        .register_plugin(manifest("tail", RW, ""), Arc::new(Mock::new("tail").processor(1).tagged("ok")))
        .await
        .unwrap();

    let output = manager
        .process_message(message("hi <script>alert(1)</script>there"))
        .await
        .unwrap();
    assert!(!output.message.content.contains("<script>"));
    assert!(output.message.content.ends_with("|ok"));
}

#[tokio::test]
async fn unknown_command_is_reported() {
    let manager = manager();
    let err = manager.handle_command(command("nope")).await.unwrap_err();
    assert_eq!(err, PluginError::UnknownCommand("nope".to_string()));
}

#[tokio::test]
async fn commands_route_by_name_and_alias() {
    let manager = manager();
    let mock = Arc::new(Mock::new("pinger").command(
        CommandDefinition::new("ping").with_aliases(vec!["p".to_string()]),
    ));
    manager
        .register_plugin(manifest("pinger", &[], ""), mock.clone())
        .await
        .unwrap();

    let response = manager.handle_command(command("P")).await.unwrap();
    assert_eq!(response.content, "pinger handled ping");
    assert_eq!(mock.commands_handled(), 1);
}

#[tokio::test]
async fn first_loaded_handler_owns_a_shared_command() {
    let manager = manager();
    for name in ["early", "late"] {
        manager
            .register_plugin(
                manifest(name, &[], ""),
                Arc::new(Mock::new(name).command(CommandDefinition::new("stats"))),
            )
            .await
            .unwrap();
    }

    let response = manager.handle_command(command("stats")).await.unwrap();
    assert_eq!(response.content, "early handled stats");
}

#[tokio::test]
async fn command_permission_is_checked_before_invocation() {
    let manager = manager();
    let mock = Arc::new(
        Mock::new("vault").command(CommandDefinition::new("secret").with_permission(Permission::AccessDb)),
    );
    manager
        .register_plugin(manifest("vault", &["read-messages"], ""), mock.clone())
        .await
        .unwrap();

    let err = manager.handle_command(command("secret")).await.unwrap_err();
    assert_eq!(
        err,
        PluginError::PermissionDenied {
            plugin: "vault".to_string(),
            permission: "access-db".to_string()
        }
    );
    assert_eq!(mock.commands_handled(), 0);
}

#[tokio::test]
async fn slow_listener_times_out_without_blocking_others() {
    let manager = manager();
    let slow = Arc::new(Mock::new("slow").listening("member_join").slow_events(Duration::from_secs(5)));
    let fast = Arc::new(Mock::new("fast").listening("member_join"));
    manager
        .register_plugin(manifest("slow", &[], ""), slow.clone())
        .await
        .unwrap();
    manager
        .register_plugin(manifest("fast", &[], ""), fast.clone())
        .await
        .unwrap();

    let started = Instant::now();
    let dispatch = manager
        .emit_event(Event::new("member_join").with_data("user", "ana"))
        .await;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(dispatch.listener_count(), 2);

    let outcomes = dispatch.join().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    for outcome in outcomes {
        match outcome.plugin.as_str() {
            "slow" => assert!(matches!(outcome.result, Err(PluginError::Timeout { .. }))),
            "fast" => assert!(outcome.result.is_ok()),
            other => panic!("unexpected listener {}", other),
        }
    }
    assert_eq!(fast.events_handled(), 1);
    assert_eq!(slow.events_handled(), 0);
    assert_eq!(manager.monitor().peek("slow").unwrap().timed_out_calls, 1);
}

#[tokio::test]
async fn listener_over_its_concurrency_cap_is_refused() {
    let manager = manager();
    let capped = Arc::new(Mock::new("capped").listening("tick").slow_events(Duration::from_millis(60)));
    manager
        .register_plugin(manifest("capped", &[], "resources:\n  max_goroutines: 1\n"), capped.clone())
        .await
        .unwrap();

    let first = manager.emit_event(Event::new("tick")).await;
    let second = manager.emit_event(Event::new("tick")).await;
    let mut outcomes = first.join().await;
    outcomes.extend(second.join().await);

    let refused = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o.result,
                Err(PluginError::ResourceLimitExceeded { ref resource, .. }) if resource == "concurrency"
            )
        })
        .count();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(refused, 1);
    assert_eq!(capped.events_handled(), 1);
    assert_eq!(manager.monitor().peek("capped").unwrap().failed_calls, 1);
}

#[tokio::test]
async fn event_slot_limit_serializes_listener_startup() {
    let mut settings = common::settings();
    settings.max_concurrent_events = 1;
    let manager = carik_runtime::application::manager::ExtensionManager::new(settings);
    let first = Arc::new(Mock::new("first").listening("tick").slow_events(Duration::from_millis(50)));
    let second = Arc::new(Mock::new("second").listening("tick").slow_events(Duration::from_millis(50)));
    manager
        .register_plugin(manifest("first", &[], ""), first.clone())
        .await
        .unwrap();
    manager
        .register_plugin(manifest("second", &[], ""), second.clone())
        .await
        .unwrap();

    let started = Instant::now();
    let dispatch = manager.emit_event(Event::new("tick")).await;
    // the second listener only got a slot once the first had finished
    assert!(started.elapsed() >= Duration::from_millis(45));
    assert_eq!(first.events_handled(), 1);

    let outcomes = dispatch.join().await;
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    assert!(started.elapsed() >= Duration::from_millis(95));
    assert_eq!(second.events_handled(), 1);
}

#[tokio::test]
async fn manifest_events_narrow_subscriptions() {
    let manager = manager();
    let mock = Arc::new(Mock::new("narrow").listening("member_join").listening("member_leave"));
    manager
        .register_plugin(manifest("narrow", &[], "events: [member_join]\n"), mock.clone())
        .await
        .unwrap();

    let dispatch = manager.emit_event(Event::new("member_leave")).await;
    assert_eq!(dispatch.listener_count(), 0);
    let dispatch = manager.emit_event(Event::new("member_join")).await;
    assert_eq!(dispatch.join().await.len(), 1);
    assert_eq!(mock.events_handled(), 1);
}

#[tokio::test]
async fn dispatch_stops_after_shutdown() {
    let manager = manager();
    manager.shutdown().await.unwrap();
    assert_eq!(
        manager.process_message(message("hi")).await.unwrap_err(),
        PluginError::ShuttingDown
    );
    assert_eq!(
        manager.handle_command(command("ping")).await.unwrap_err(),
        PluginError::ShuttingDown
    );
    assert_eq!(manager.emit_event(Event::new("member_join")).await.listener_count(), 0);
}
