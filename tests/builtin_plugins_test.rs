//! Shipped manifests and built-in plugins loaded through the directory scanner
//! Run with: cargo test --test builtin_plugins_test

mod common;

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use carik_runtime::application::errors::PluginError;
use carik_runtime::application::manager::ExtensionManager;
use carik_runtime::domain::entities::event::MEMBER_JOIN;
use carik_runtime::domain::entities::{Command, Event, Message, PluginManifest, User};
use carik_runtime::domain::traits::{HttpMethod, Plugin};
use carik_runtime::infrastructure::database::SqliteDatabase;
use carik_runtime::infrastructure::plugins::BuiltinLoader;
use carik_runtime::infrastructure::router::RouteTable;
use carik_runtime::plugins::builtin_loader;
use common::{ensure_init, settings, Mock};

fn shipped_plugins() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("plugins")
}

fn host(routes: &RouteTable) -> ExtensionManager {
    ensure_init();
    ExtensionManager::builder(settings())
        .with_loader(Arc::new(builtin_loader()))
        .with_database(Arc::new(SqliteDatabase::open_in_memory().unwrap()))
        .with_router(Arc::new(routes.clone()))
        .build()
}

fn user() -> User {
    User::new("42").with_username("ana")
}

#[tokio::test]
async fn shipped_plugins_load_and_serve() {
    let routes = RouteTable::new();
    let manager = host(&routes);

    let summary = manager.load_all(shipped_plugins()).await.unwrap();
    assert!(summary.failed.is_empty(), "failed: {:?}", summary.failed);
    assert_eq!(summary.loaded, vec!["moderation", "notes", "welcome"]);

    // moderation
    let output = manager
        .process_message(Message::new("general", user(), "darn it"))
        .await
        .unwrap();
    assert_eq!(output.message.content, "**** it");

    // welcome
    let response = manager
        .handle_command(Command::new("welcome", user(), "general").with_args(vec!["bo".to_string()]))
        .await
        .unwrap();
    assert_eq!(response.content, "Welcome aboard, bo!");
    let outcomes = manager
        .emit_event(Event::new(MEMBER_JOIN).with_data("user", "cy"))
        .await
        .join()
        .await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].result.is_ok());

    // notes, through the command path and the HTTP route
    let response = manager
        .handle_command(
            Command::new("note", user(), "general")
                .with_args(vec!["add".to_string(), "buy".to_string(), "milk".to_string()]),
        )
        .await
        .unwrap();
    assert_eq!(response.content, "Note saved.");

    let api = routes
        .dispatch(HttpMethod::Get, "/plugins/notes/notes", HashMap::new(), Value::Null)
        .await;
    assert_eq!(api.status, 200);
    assert_eq!(api.body["notes"][0]["body"], "buy milk");

    manager.unload_plugin("notes").await.unwrap();
    assert!(routes.is_empty());
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn notes_without_database_fail_to_initialize() {
    ensure_init();
    let manager = ExtensionManager::builder(settings())
        .with_loader(Arc::new(builtin_loader()))
        .build();

    let err = manager
        .load_plugin(shipped_plugins().join("notes"))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::InitializationFailed { ref reason, .. } if reason.contains("no database")));
    assert_eq!(manager.plugin_count(), 0);
}

fn write_manifest(root: &Path, dir: &str, yaml: &str) {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("plugin.yaml"), yaml).unwrap();
}

#[tokio::test]
async fn load_all_retries_dependencies_and_collects_failures() {
    ensure_init();
    let root = tempfile::tempdir().unwrap();
    write_manifest(
        root.path(),
        "a-child",
        "name: child\nversion: '1'\nentry_point: builtin:mock\ndependencies: [parent]\n",
    );
    write_manifest(root.path(), "b-parent", "name: parent\nversion: '1'\nentry_point: builtin:mock\n");
    write_manifest(
        root.path(),
        "c-orphan",
        "name: orphan\nversion: '1'\nentry_point: builtin:mock\ndependencies: [ghost]\n",
    );
    write_manifest(root.path(), "d-broken", "name: [not, a, name\n");
    std::fs::create_dir_all(root.path().join(".hidden")).unwrap();
    std::fs::create_dir_all(root.path().join("no-manifest")).unwrap();

    let loader = BuiltinLoader::new().with(
        "mock",
        Arc::new(|m: &PluginManifest| Arc::new(Mock::new(&m.name)) as Arc<dyn Plugin>),
    );
    let manager = ExtensionManager::builder(settings())
        .with_loader(Arc::new(loader))
        .build();

    let summary = manager.load_all(root.path()).await.unwrap();
    assert_eq!(summary.loaded, vec!["parent", "child"]);
    assert_eq!(summary.failed.len(), 2);
    assert!(summary
        .failed
        .iter()
        .any(|(_, e)| matches!(e, PluginError::MissingDependency { dependency, .. } if dependency == "ghost")));
    assert!(summary
        .failed
        .iter()
        .any(|(_, e)| matches!(e, PluginError::Manifest(_))));

    let names: Vec<String> = manager.list_plugins().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["parent", "child"]);
}

#[tokio::test]
async fn missing_plugin_directory_is_not_an_error() {
    let manager = ExtensionManager::new(settings());
    let summary = manager.load_all("/nonexistent/carik/plugins").await.unwrap();
    assert!(summary.loaded.is_empty());
    assert!(summary.failed.is_empty());
}
