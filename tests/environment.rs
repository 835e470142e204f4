use mittons_fixtures::testkit::{Call, FakeGateway};
use mittons_fixtures::{
    CancellationToken, Directive, Environment, EnvironmentDefinition, Error, HealthStatus,
    RunContext, ServiceState,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn environment(fake: &Arc<FakeGateway>, definition: EnvironmentDefinition) -> Environment {
    Environment::new(fake.clone(), definition)
}

fn position(calls: &[Call], wanted: &Call) -> usize {
    calls
        .iter()
        .position(|call| call == wanted)
        .unwrap_or_else(|| panic!("{wanted:?} was not observed in {calls:?}"))
}

#[tokio::test]
async fn duplicate_networks_fail_before_any_runtime_call() {
    let fake = Arc::new(FakeGateway::new());
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .network("net1")
        .network("net2")
        .network("net1")
        .network("net2")
        .service("db", vec![Directive::image("postgres:16")]);
    let mut env = environment(&fake, definition);

    match env.initialize(&CancellationToken::new()).await {
        Err(Error::DuplicateNetworkDefinition { names }) => {
            assert_eq!(names, vec!["net1".to_string(), "net2".to_string()])
        }
        other => panic!("expected duplicate network error, got {other:?}"),
    }
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn services_share_a_network_under_their_own_aliases() {
    let fake = Arc::new(FakeGateway::new());
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .network("net1")
        .service(
            "db",
            vec![Directive::image("postgres:16"), Directive::attach("net1", "db")],
        )
        .service(
            "cache",
            vec![Directive::image("redis:7"), Directive::attach("net1", "cache")],
        );
    let mut env = environment(&fake, definition);
    let cancel = CancellationToken::new();

    env.initialize(&cancel).await.expect("environment initializes");
    assert_eq!(env.state(), ServiceState::Ready);

    let network_id = env
        .network("net1")
        .and_then(|network| network.service_id())
        .expect("network created")
        .to_string();
    let mut connections = fake.connections();
    connections.sort_by(|a, b| a.2.cmp(&b.2));
    assert_eq!(connections.len(), 2);
    assert!(connections.iter().all(|(id, _, _)| *id == network_id));
    assert_eq!(connections[0].2, "cache");
    assert_eq!(connections[1].2, "db");

    let db = env.service("db").expect("db declared");
    assert_eq!(db.state(), ServiceState::Ready);
    assert!(env.service("missing").is_none());

    env.dispose(&cancel).await.expect("environment disposes");

    let calls = fake.calls();
    let network_removed = position(&calls, &Call::RemoveNetwork(network_id));
    for service in env.services() {
        let service_id = service.service_id().expect("service created").to_string();
        assert!(position(&calls, &Call::RemoveService(service_id)) < network_removed);
    }
    assert_eq!(env.state(), ServiceState::Disposed);
}

#[tokio::test]
async fn failed_service_disposes_everything_already_created() {
    let fake = Arc::new(FakeGateway::new());
    fake.fail_on("broken:latest");
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .network("net1")
        .service("good", vec![Directive::image("redis:7")])
        .service("bad", vec![Directive::image("broken:latest")]);
    let mut env = environment(&fake, definition);

    let err = env
        .initialize(&CancellationToken::new())
        .await
        .expect_err("one service cannot be created");

    assert!(matches!(err, Error::Runtime { .. }));
    assert_eq!(env.state(), ServiceState::Failed);

    let good = env
        .service("good")
        .and_then(|service| service.service_id())
        .expect("good service was created")
        .to_string();
    assert_eq!(fake.removed_services(), vec![good]);
    assert_eq!(fake.removed_networks().len(), 1);
    assert_eq!(env.service("bad").and_then(|service| service.service_id()), None);
}

#[tokio::test]
async fn unhealthy_service_times_out_and_is_removed() {
    let fake = Arc::new(FakeGateway::new());
    fake.script_health("slow:1", [HealthStatus::Unhealthy]);
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .with_health_timeout(Duration::from_millis(200))
        .service("slow", vec![Directive::image("slow:1")]);
    let mut env = environment(&fake, definition);

    let err = env
        .initialize(&CancellationToken::new())
        .await
        .expect_err("service never becomes healthy");

    assert!(err.is_timeout());
    assert_eq!(fake.removed_services().len(), 1);
}

#[tokio::test]
async fn cancelled_initialization_still_removes_the_created_service() {
    let fake = Arc::new(FakeGateway::new().with_latency(Duration::from_millis(10)));
    fake.script_health("slow:1", [HealthStatus::Unknown]);
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .network("net1")
        .service("slow", vec![Directive::image("slow:1")]);
    let mut env = environment(&fake, definition);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        }
    });

    let err = env
        .initialize(&cancel)
        .await
        .expect_err("initialization is cancelled during the health wait");

    assert!(matches!(err, Error::Cancelled(_)), "{err}");
    let created: Vec<String> = fake
        .created_specs()
        .into_iter()
        .map(|(service_id, _)| service_id)
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(fake.removed_services(), created);
    assert_eq!(fake.removed_networks().len(), 1);

    env.dispose(&CancellationToken::new())
        .await
        .expect("nothing is left to remove");
    assert_eq!(fake.removed_services().len(), 1);
}

#[tokio::test]
async fn cleanup_failures_after_a_failed_initialization_are_reported() {
    let fake = Arc::new(FakeGateway::new());
    fake.fail_on("broken:latest");
    fake.fail_on("service-1");
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .service("good", vec![Directive::image("redis:7")])
        .service("bad", vec![Directive::image("broken:latest")]);
    let mut env = environment(&fake, definition);

    let err = env
        .initialize(&CancellationToken::new())
        .await
        .expect_err("one service cannot be created");

    match err {
        Error::Initialization { source, disposal } => {
            assert!(matches!(*source, Error::Runtime { .. }), "{source}");
            assert_eq!(disposal.len(), 1);
        }
        other => panic!("expected cleanup failures to be attached, got {other:?}"),
    }
    assert_eq!(
        env.service("good").and_then(|service| service.service_id()),
        Some("service-1")
    );
    assert!(fake.removed_services().is_empty());

    fake.recover("service-1");
    env.dispose(&CancellationToken::new())
        .await
        .expect("removal is retried");
    assert_eq!(fake.removed_services(), vec!["service-1".to_string()]);
}

#[tokio::test]
async fn unknown_network_attachment_is_rejected_before_creating_the_service() {
    let fake = Arc::new(FakeGateway::new());
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .network("net1")
        .service(
            "db",
            vec![Directive::image("postgres:16"), Directive::attach("other", "db")],
        );
    let mut env = environment(&fake, definition);

    let err = env
        .initialize(&CancellationToken::new())
        .await
        .expect_err("attachment names an undeclared network");

    assert!(matches!(err, Error::UnknownNetwork { ref network, .. } if network == "other"));
    assert!(fake.created_specs().is_empty());
    assert_eq!(fake.removed_networks().len(), 1);
}

#[tokio::test]
async fn disposal_continues_past_failures_and_reports_them() {
    let fake = Arc::new(FakeGateway::new());
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .network("net1")
        .service("first", vec![Directive::image("redis:7")])
        .service("second", vec![Directive::image("postgres:16")]);
    let mut env = environment(&fake, definition);
    let cancel = CancellationToken::new();

    env.initialize(&cancel).await.expect("environment initializes");
    let first = env
        .service("first")
        .and_then(|service| service.service_id())
        .expect("created")
        .to_string();
    let second = env
        .service("second")
        .and_then(|service| service.service_id())
        .expect("created")
        .to_string();
    fake.fail_on(&first);

    match env.dispose(&cancel).await {
        Err(Error::Disposal(failures)) => assert_eq!(failures.len(), 1),
        other => panic!("expected aggregated disposal failure, got {other:?}"),
    }
    assert_eq!(fake.removed_services(), vec![second]);
    assert_eq!(fake.removed_networks().len(), 1);
}

#[tokio::test]
async fn nothing_is_removed_when_the_run_keeps_its_resources() {
    let fake = Arc::new(FakeGateway::new());
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", false))
        .network("net1")
        .service(
            "db",
            vec![Directive::image("postgres:16"), Directive::attach("net1", "db")],
        );
    let mut env = environment(&fake, definition);
    let cancel = CancellationToken::new();

    env.initialize(&cancel).await.expect("environment initializes");
    env.dispose(&cancel).await.expect("environment disposes");

    assert!(fake.removed_services().is_empty());
    assert!(fake.removed_networks().is_empty());
}

#[tokio::test]
async fn discovered_resources_are_reachable_by_service_name() {
    let fake = Arc::new(FakeGateway::new());
    fake.script_resources(
        "postgres:16",
        vec![(
            Url::parse("tcp://localhost:5432").expect("valid url"),
            Url::parse("tcp://127.0.0.1:49160").expect("valid url"),
        )],
    );
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .service("db", vec![Directive::image("postgres:16")]);
    let mut env = environment(&fake, definition);
    let cancel = CancellationToken::new();

    env.initialize(&cancel).await.expect("environment initializes");

    let resources = env.service("db").expect("declared").resources();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].host_uri.port(), Some(49160));

    env.dispose(&cancel).await.expect("environment disposes");
}

#[tokio::test]
async fn an_environment_initializes_only_once() {
    let fake = Arc::new(FakeGateway::new());
    let definition = EnvironmentDefinition::new(RunContext::new("run-1", true))
        .service("db", vec![Directive::image("postgres:16")]);
    let mut env = environment(&fake, definition);
    let cancel = CancellationToken::new();

    env.initialize(&cancel).await.expect("environment initializes");
    assert!(matches!(
        env.initialize(&cancel).await,
        Err(Error::InvalidOperation(_))
    ));

    env.dispose(&cancel).await.expect("environment disposes");
}
