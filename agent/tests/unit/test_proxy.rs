//! Proxy compiler against a real file system

use std::sync::Arc;

use rollagent::models::Proxy;
use rollagent::proxy::caddy::ControlRoutes;
use rollagent::proxy::{Options, ProxyCompiler};
use rollagent::store::{EntityStore, MemoryStore};

use crate::common::FakeRunner;

struct Setup {
    store: Arc<MemoryStore>,
    runner: Arc<FakeRunner>,
    compiler: ProxyCompiler,
    _dir: tempfile::TempDir,
}

fn setup(control: ControlRoutes) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let runner = Arc::new(FakeRunner::default());
    let options = Options {
        config_path: dir.path().join("caddy").join("Caddyfile"),
        control,
        ..Default::default()
    };
    let compiler = ProxyCompiler::new(options, store.clone(), runner.clone());
    Setup {
        store,
        runner,
        compiler,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_refresh_only_writes_on_change() {
    let setup = setup(ControlRoutes::default());
    let path = setup.compiler.config_path().to_path_buf();

    setup.compiler.compile().await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    assert_eq!(
        setup.runner.commands(),
        vec![format!("caddy reload -c {}", path.display())]
    );

    assert!(!setup.compiler.refresh().await.unwrap());
    assert_eq!(setup.runner.commands().len(), 1);

    setup
        .store
        .insert_proxy(&Proxy::new("a.example.com", "10.0.0.1", 40000, "e1", "d1"))
        .await
        .unwrap();
    setup
        .store
        .insert_proxy(&Proxy::new("a.example.com", "10.0.0.2", 40001, "e1", "d1"))
        .await
        .unwrap();
    assert!(setup.compiler.refresh().await.unwrap());
    assert_eq!(setup.runner.commands().len(), 2);

    let config = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        config,
        "a.example.com {\n    reverse_proxy * 10.0.0.1:40000 10.0.0.2:40001\n}\n\n"
    );
    assert!(!setup.compiler.refresh().await.unwrap());
}

#[tokio::test]
async fn test_failed_reload_keeps_the_written_config() {
    let setup = setup(ControlRoutes {
        agent_domain: Some("agent.example.com".to_string()),
        ..Default::default()
    });
    setup.runner.fail_when("caddy reload");

    setup
        .store
        .insert_proxy(&Proxy::new("b.example.com", "10.0.0.3", 41000, "e2", "d2"))
        .await
        .unwrap();
    setup.compiler.compile().await.unwrap();

    let config = std::fs::read_to_string(setup.compiler.config_path()).unwrap();
    assert!(config.starts_with("agent.example.com {\n"));
    assert!(config.contains("    handle /hey {\n        reverse_proxy localhost:5445\n    }\n"));
    assert!(config.contains("    handle {\n        abort\n    }\n"));
    assert!(!config.contains("\n    abort\n"));
    assert!(config.contains("reverse_proxy * 10.0.0.3:41000"));

    // Not retried while nothing changes
    assert!(!setup.compiler.refresh().await.unwrap());
    assert_eq!(setup.runner.count("caddy reload"), 1);
}
