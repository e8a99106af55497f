// ABOUTME: Integration tests for the container service against a scripted runner.
// ABOUTME: Covers creation, the start/stop state machine, deletion, waits, logs and linking.

mod support;

use hearth::error::Error;
use hearth::events::{Event, EventBus};
use hearth::logs::LogAggregator;
use hearth::model::{Container, ContainerPatch, ContainerStatus, ContainerUpdate, LogMessage, Tag};
use hearth::service::{ContainerService, CreateOptions, ServiceSettings};
use hearth::store::Stores;
use hearth::template::{TemplateStore, parse_template};
use hearth::types::{ContainerId, TemplateId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use support::runner::{ScriptedRunner, StartScript, StopScript};

const WEB: &str = r#"
version: 3
name: Web
ports:
  - name: HTTP
    port: "80"
environment:
  - name: GREETING
    default: hello
  - name: DB_HOST
  - name: DB_PORT
databases:
  main:
    display_name: Main database
    types: [postgres]
    names:
      host: DB_HOST
      port: DB_PORT
      username: DB_USER
      password: DB_PASSWORD
      database: DB_NAME
methods:
  docker:
    image: nginx
    image_tag: "1.27"
    volumes:
      data: /usr/share/nginx/html
"#;

const POSTGRES: &str = r#"
version: 3
name: Postgres
features:
  databases:
    - type: postgres
      port: PGPORT
      username: POSTGRES_USER
      password: POSTGRES_PASSWORD
      database: POSTGRES_DB
environment:
  - name: PGPORT
    default: "5432"
  - name: POSTGRES_USER
    default: admin
  - name: POSTGRES_PASSWORD
    default: secret
  - name: POSTGRES_DB
    default: app
ports:
  - name: SQL
    port: "5432"
methods:
  docker:
    image: postgres
"#;

const BUILT: &str = r#"
version: 3
name: Built
methods:
  docker:
    clone:
      repository: https://example.com/app.git
"#;

struct Harness {
    service: ContainerService,
    runner: Arc<ScriptedRunner>,
    stores: Stores,
    events: Arc<Mutex<Vec<Event>>>,
    _dir: tempfile::TempDir,
}

fn settings() -> ServiceSettings {
    ServiceSettings {
        start_timeout: Duration::from_secs(5),
        stop_timeout: Duration::from_secs(5),
        wait_timeout: Duration::from_secs(5),
        database_host: "db.local".into(),
    }
}

fn harness_with(settings: ServiceSettings) -> Harness {
    support::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut templates = TemplateStore::empty();
    for (id, yaml) in [("web", WEB), ("postgres", POSTGRES), ("built", BUILT)] {
        templates.insert(parse_template(id, yaml).unwrap());
    }
    let bus = Arc::new(EventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bus.subscribe_fn("recorder", move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    let runner = Arc::new(ScriptedRunner::default());
    let stores = Stores::in_memory();
    let service = ContainerService::new(
        stores.clone(),
        Arc::new(templates),
        runner.clone(),
        bus,
        Arc::new(LogAggregator::new(dir.path(), 50)),
        settings,
    );
    Harness {
        service,
        runner,
        stores,
        events,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(settings())
}

impl Harness {
    async fn create(&self, template: &str) -> Container {
        self.service
            .create_container(CreateOptions {
                template_id: Some(TemplateId::new(template)),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn running(&self, template: &str) -> ContainerId {
        let c = self.create(template).await;
        self.service.start(&c.id).await.unwrap();
        c.id
    }

    async fn status(&self, id: &ContainerId) -> ContainerStatus {
        self.service.get(id).await.unwrap().status
    }

    fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(Event::event_type).collect()
    }

    fn statuses(&self, id: &ContainerId) -> Vec<ContainerStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::ContainerStatusChange { id: i, status, .. } if i == id => Some(*status),
                _ => None,
            })
            .collect()
    }
}

mod create {
    use super::*;

    #[tokio::test]
    async fn template_rows_are_seeded_and_announced() {
        let h = harness();
        let c = h.create("web").await;

        assert_eq!(c.name, "Web");
        assert_eq!(c.status, ContainerStatus::Off);
        let rows = h.stores.resources(&c.id).await.unwrap();
        assert_eq!(rows.ports.len(), 1);
        assert_eq!(rows.env.len(), 3);
        assert_eq!(rows.env_value("GREETING"), Some("hello"));
        assert_eq!(rows.volumes.len(), 1);
        assert_eq!(h.stores.containers.get(&c.id).await.unwrap().id, c.id);
        assert_eq!(h.event_types(), vec!["container_created", "containers_change"]);
    }

    #[tokio::test]
    async fn unknown_template_is_not_found() {
        let h = harness();
        let err = h
            .service
            .create_container(CreateOptions {
                template_id: Some(TemplateId::new("missing")),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(_)));
        assert!(h.service.get_containers().await.is_empty());
    }

    #[tokio::test]
    async fn build_templates_fetch_their_source_first() {
        let h = harness();
        let c = h.create("built").await;
        assert_eq!(
            h.runner.calls(),
            vec![format!("prepare_source {} https://example.com/app.git", c.id)]
        );
    }

    #[tokio::test]
    async fn raw_image_needs_no_template() {
        let h = harness();
        let c = h
            .service
            .create_container(CreateOptions {
                image: Some("redis".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(c.template_id, None);
        assert_eq!(c.image, "redis");
    }
}

mod start {
    use super::*;

    #[tokio::test]
    async fn reaches_running_through_each_status() {
        let h = harness();
        let id = h.running("web").await;

        assert_eq!(h.status(&id).await, ContainerStatus::Running);
        assert_eq!(
            h.statuses(&id),
            vec![
                ContainerStatus::Building,
                ContainerStatus::Starting,
                ContainerStatus::Running
            ]
        );
        let request = &h.runner.requests()[0];
        assert_eq!(request.resources.ports.len(), 1);
        assert_eq!(request.container.image_reference(), "nginx:1.27");
    }

    #[tokio::test]
    async fn starting_a_running_container_fails() {
        let h = harness();
        let id = h.running("web").await;
        let err = h.service.start(&id).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn runner_failure_ends_in_error() {
        let h = harness();
        let c = h.create("web").await;
        h.runner.set_start(StartScript::Fail);

        let err = h.service.start(&c.id).await.unwrap_err();
        assert!(matches!(err, Error::StartFailed { .. }));
        assert_eq!(h.status(&c.id).await, ContainerStatus::Error);
    }

    #[tokio::test]
    async fn errored_container_can_start_again() {
        let h = harness();
        let c = h.create("web").await;
        h.runner.set_start(StartScript::Fail);
        assert!(h.service.start(&c.id).await.is_err());

        h.runner.set_start(StartScript::Run);
        h.service.start(&c.id).await.unwrap();
        assert_eq!(h.status(&c.id).await, ContainerStatus::Running);
    }

    #[tokio::test]
    async fn timeout_keeps_the_last_reported_status() {
        let h = harness_with(ServiceSettings {
            start_timeout: Duration::from_millis(100),
            ..settings()
        });
        let c = h.create("web").await;
        h.runner.set_start(StartScript::Hang);

        let err = h.service.start(&c.id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                status: ContainerStatus::Running,
                ..
            }
        ));
        assert_eq!(h.status(&c.id).await, ContainerStatus::Building);
    }

    #[tokio::test]
    async fn start_while_busy_is_a_no_op() {
        let h = harness_with(ServiceSettings {
            start_timeout: Duration::from_millis(500),
            ..settings()
        });
        let c = h.create("web").await;
        h.runner.set_start(StartScript::Hang);

        let service = h.service.clone();
        let id = c.id.clone();
        let first = tokio::spawn(async move { service.start(&id).await });
        h.service
            .wait_status(&c.id, ContainerStatus::Building, None)
            .await
            .unwrap();

        h.service.start(&c.id).await.unwrap();
        h.service.stop(&c.id).await.unwrap();
        assert!(first.await.unwrap().is_err());
        assert_eq!(h.runner.requests().len(), 1);
    }

    #[tokio::test]
    async fn crash_while_running_is_an_error() {
        let h = harness();
        let id = h.running("web").await;
        h.runner.report(&id, ContainerStatus::Error);
        assert_eq!(h.status(&id).await, ContainerStatus::Error);
    }

    #[tokio::test]
    async fn missing_container_is_not_found() {
        let h = harness();
        let err = h.service.start(&ContainerId::new("nope")).await.unwrap_err();
        assert!(matches!(err, Error::ContainerNotFound(_)));
    }
}

mod stop {
    use super::*;

    #[tokio::test]
    async fn running_container_goes_off() {
        let h = harness();
        let id = h.running("web").await;
        h.service.stop(&id).await.unwrap();

        assert_eq!(h.status(&id).await, ContainerStatus::Off);
        let statuses = h.statuses(&id);
        assert_eq!(
            &statuses[statuses.len() - 2..],
            &[ContainerStatus::Stopping, ContainerStatus::Off]
        );
    }

    #[tokio::test]
    async fn stopped_container_is_not_running() {
        let h = harness();
        let c = h.create("web").await;
        let err = h.service.stop(&c.id).await.unwrap_err();
        assert!(matches!(err, Error::NotRunning(_)));
    }

    #[tokio::test]
    async fn exit_after_stop_is_not_an_error() {
        let h = harness();
        let id = h.running("web").await;
        h.service.stop(&id).await.unwrap();
        h.runner.report(&id, ContainerStatus::Error);
        assert_eq!(h.status(&id).await, ContainerStatus::Off);
    }

    #[tokio::test]
    async fn failed_stop_returns_to_running() {
        let h = harness();
        let id = h.running("web").await;
        h.runner.set_stop(StopScript::Fail);
        assert!(h.service.stop(&id).await.is_err());
        assert_eq!(h.status(&id).await, ContainerStatus::Running);
    }

    #[tokio::test]
    async fn stop_timeout_returns_to_running() {
        let h = harness_with(ServiceSettings {
            stop_timeout: Duration::from_millis(50),
            ..settings()
        });
        let id = h.running("web").await;
        h.runner.set_stop(StopScript::Hang);
        let err = h.service.stop(&id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                status: ContainerStatus::Off,
                ..
            }
        ));
        assert_eq!(h.status(&id).await, ContainerStatus::Running);
    }

    #[tokio::test]
    async fn reports_from_an_earlier_run_are_dropped() {
        let h = harness();
        let id = h.running("web").await;
        let earlier = h.runner.last_setter(&id).unwrap();
        h.service.stop(&id).await.unwrap();
        h.service.start(&id).await.unwrap();

        earlier(ContainerStatus::Error);
        assert_eq!(h.status(&id).await, ContainerStatus::Running);
    }
}

mod recreate_and_delete {
    use super::*;

    #[tokio::test]
    async fn recreate_stops_replaces_and_starts() {
        let h = harness();
        let id = h.running("web").await;
        h.service.recreate_container(&id).await.unwrap();

        assert_eq!(
            h.runner.calls(),
            vec![
                format!("start {id}"),
                format!("stop {id}"),
                format!("delete_container {id}"),
                format!("start {id}"),
            ]
        );
        assert_eq!(h.status(&id).await, ContainerStatus::Running);
    }

    #[tokio::test]
    async fn running_container_cannot_be_deleted() {
        let h = harness();
        let id = h.running("web").await;
        let err = h.service.delete(&id).await.unwrap_err();
        assert!(matches!(err, Error::StillRunning(_)));
        assert!(h.service.get(&id).await.is_ok());
    }

    #[tokio::test]
    async fn delete_removes_everything() {
        let h = harness();
        let c = h.create("web").await;
        let tag = Tag::new("media");
        h.stores.tags.insert(&tag).await.unwrap();
        h.service.add_tag(&c.id, &tag.id).await.unwrap();

        h.service.delete(&c.id).await.unwrap();

        assert!(matches!(
            h.service.get(&c.id).await,
            Err(Error::ContainerNotFound(_))
        ));
        assert!(h.stores.containers.list().await.unwrap().is_empty());
        let rows = h.stores.resources(&c.id).await.unwrap();
        assert!(rows.ports.is_empty() && rows.env.is_empty() && rows.volumes.is_empty());
        assert!(
            h.stores
                .tags
                .containers_with_any(&[tag.id.clone()])
                .await
                .unwrap()
                .is_empty()
        );
        assert!(h.runner.calls().contains(&format!("delete_mounts {}", c.id)));
        assert_eq!(
            &h.event_types()[2..],
            &["container_deleted", "containers_change"]
        );
    }
}

mod queries {
    use super::*;

    #[tokio::test]
    async fn wait_status_sees_a_later_change() {
        let h = harness();
        let c = h.create("web").await;
        let service = h.service.clone();
        let id = c.id.clone();
        let waiter = tokio::spawn(async move {
            service
                .wait_status(&id, ContainerStatus::Running, None)
                .await
        });
        h.service.start(&c.id).await.unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn racing_reports_leave_wait_in_step_with_the_record() {
        let h = harness();
        let id = h.running("web").await;
        let setter = h.runner.last_setter(&id).unwrap();

        let threads: Vec<_> = [ContainerStatus::Running, ContainerStatus::Error]
            .into_iter()
            .map(|status| {
                let setter = setter.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        setter(status);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let recorded = h.status(&id).await;
        h.service
            .wait_status(&id, recorded, Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(h.statuses(&id).last(), Some(&recorded));
    }

    #[tokio::test]
    async fn wait_status_times_out() {
        let h = harness();
        let c = h.create("web").await;
        let err = h
            .service
            .wait_status(&c.id, ContainerStatus::Running, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn tag_filter_matches_any_tag() {
        let h = harness();
        let a = h.create("web").await;
        let b = h.create("postgres").await;
        let _c = h.create("web").await;
        let media = Tag::new("media");
        let data = Tag::new("data");
        h.stores.tags.insert(&media).await.unwrap();
        h.stores.tags.insert(&data).await.unwrap();
        h.service.add_tag(&a.id, &media.id).await.unwrap();
        h.service.add_tag(&b.id, &data.id).await.unwrap();

        let all = h.service.get_containers_with_filters(&[]).await.unwrap();
        assert_eq!(all.len(), 3);

        let mut found: Vec<_> = h
            .service
            .get_containers_with_filters(&[media.id.clone(), data.id.clone()])
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        found.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn output_reaches_the_log_buffer() {
        let h = harness();
        let c = h.create("web").await;
        h.runner.set_stdout(&["booting", "ready"]);
        h.service.start(&c.id).await.unwrap();

        let mut lines = Vec::new();
        for _ in 0..100 {
            lines = h.service.logs(&c.id).await.unwrap();
            if lines.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let texts: Vec<_> = lines.iter().map(|l| l.message.clone()).collect();
        assert_eq!(
            texts,
            vec![
                LogMessage::Text("booting".into()),
                LogMessage::Text("ready".into())
            ]
        );
    }

    #[tokio::test]
    async fn update_checks_are_recorded() {
        let h = harness();
        let a = h.create("web").await;
        let b = h.create("web").await;
        let update = ContainerUpdate {
            current_version: "sha256:old".into(),
            latest_version: "sha256:new".into(),
        };
        h.runner.set_update(&a.id, update.clone());

        let found = h.service.check_for_updates().await;
        assert_eq!(found, vec![(a.id.clone(), update.clone())]);
        assert_eq!(h.service.get(&a.id).await.unwrap().update, Some(update));
        assert_eq!(h.service.get(&b.id).await.unwrap().update, None);
    }

    #[tokio::test]
    async fn patch_is_persisted() {
        let h = harness();
        let c = h.create("web").await;
        let patched = h
            .service
            .patch_container(
                &c.id,
                ContainerPatch {
                    name: Some("Homepage".into()),
                    launch_on_startup: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(patched.name, "Homepage");
        let stored = h.stores.containers.get(&c.id).await.unwrap();
        assert!(stored.launch_on_startup);
    }
}

mod load {
    use super::*;

    #[tokio::test]
    async fn persisted_status_is_reset() {
        let h = harness();
        let mut c = Container::new(ContainerId::new("c1"), "web", "nginx");
        c.status = ContainerStatus::Running;
        h.stores.containers.insert(&c).await.unwrap();

        assert_eq!(h.service.load().await.unwrap(), 1);
        assert_eq!(h.status(&c.id).await, ContainerStatus::Off);
        assert!(
            h.events
                .lock()
                .contains(&Event::ContainersLoaded { count: 1 })
        );
    }

    #[tokio::test]
    async fn server_events_drive_startup_containers() {
        let h = harness();
        let lifecycle = h.service.install_lifecycle();
        let flagged = h.create("web").await;
        let other = h.create("web").await;
        h.service
            .patch_container(
                &flagged.id,
                ContainerPatch {
                    launch_on_startup: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        h.service.bus().publish(&Event::ServerStart).unwrap();
        lifecycle.join().await;
        assert_eq!(h.status(&flagged.id).await, ContainerStatus::Running);
        assert_eq!(h.status(&other.id).await, ContainerStatus::Off);

        h.service.bus().publish(&Event::ServerStop).unwrap();
        lifecycle.join().await;
        assert_eq!(h.status(&flagged.id).await, ContainerStatus::Off);
    }
}

mod databases {
    use super::*;

    #[tokio::test]
    async fn linking_writes_connection_env() {
        let h = harness();
        let db = h.create("postgres").await;
        let mut ports = h.stores.ports.list(&db.id).await.unwrap();
        ports[0].external = "15432".into();
        h.service.save_ports(&db.id, ports).await.unwrap();

        let app = h.create("web").await;
        h.service
            .set_databases(
                &app.id,
                BTreeMap::from([("main".to_string(), db.id.clone())]),
                BTreeMap::new(),
            )
            .await
            .unwrap();

        let rows = h.stores.resources(&app.id).await.unwrap();
        assert_eq!(rows.env_value("DB_HOST"), Some("db.local"));
        assert_eq!(rows.env_value("DB_PORT"), Some("15432"));
        assert_eq!(rows.env_value("DB_USER"), Some("admin"));
        assert_eq!(rows.env_value("DB_PASSWORD"), Some("secret"));
        assert_eq!(rows.env_value("DB_NAME"), Some("app"));
        assert_eq!(
            h.service.get(&app.id).await.unwrap().databases.get("main"),
            Some(&db.id)
        );
    }

    #[tokio::test]
    async fn override_names_the_database() {
        let h = harness();
        let db = h.create("postgres").await;
        let app = h.create("web").await;
        h.service
            .set_databases(
                &app.id,
                BTreeMap::from([("main".to_string(), db.id.clone())]),
                BTreeMap::from([("main".to_string(), "blog".to_string())]),
            )
            .await
            .unwrap();
        let rows = h.stores.resources(&app.id).await.unwrap();
        assert_eq!(rows.env_value("DB_NAME"), Some("blog"));
        assert_eq!(rows.env_value("DB_PORT"), Some("5432"));
    }

    #[tokio::test]
    async fn undeclared_role_is_rejected() {
        let h = harness();
        let db = h.create("postgres").await;
        let app = h.create("web").await;
        let err = h
            .service
            .set_databases(
                &app.id,
                BTreeMap::from([("cache".to_string(), db.id.clone())]),
                BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

mod resources {
    use super::*;
    use hearth::model::{EnvVariable, Port};

    fn port_pairs(rows: &[Port]) -> Vec<(String, String)> {
        rows.iter()
            .map(|p| (p.internal.clone(), p.external.clone()))
            .collect()
    }

    #[tokio::test]
    async fn rejected_port_save_keeps_previous_rows() {
        let h = harness();
        let c = h.create("web").await;
        let before = port_pairs(&h.stores.ports.list(&c.id).await.unwrap());
        assert_eq!(before, vec![("80".to_string(), "80".to_string())]);

        let err = h
            .service
            .save_ports(
                &c.id,
                vec![
                    Port::new(c.id.clone(), "81", "8081"),
                    Port::new(c.id.clone(), "", "80"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(port_pairs(&h.stores.ports.list(&c.id).await.unwrap()), before);
    }

    #[tokio::test]
    async fn rejected_env_save_keeps_previous_rows() {
        let h = harness();
        let c = h.create("web").await;
        let before = h.stores.env.list(&c.id).await.unwrap();

        let err = h
            .service
            .save_env(
                &c.id,
                vec![
                    EnvVariable::plain(c.id.clone(), "TZ", "UTC"),
                    EnvVariable::plain(c.id.clone(), " ", "nameless"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.stores.env.list(&c.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn rows_of_another_container_are_refused() {
        let h = harness();
        let c = h.create("web").await;
        let other = h.create("postgres").await;

        let err = h
            .service
            .save_ports(&c.id, vec![Port::new(other.id.clone(), "81", "8081")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.stores.ports.list(&c.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn valid_save_replaces_the_whole_kind() {
        let h = harness();
        let c = h.create("web").await;
        h.service
            .save_ports(
                &c.id,
                vec![
                    Port::new(c.id.clone(), "81", "8081"),
                    Port::new(c.id.clone(), "443", "8443"),
                ],
            )
            .await
            .unwrap();
        let mut pairs = port_pairs(&h.stores.ports.list(&c.id).await.unwrap());
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("443".to_string(), "8443".to_string()),
                ("81".to_string(), "8081".to_string())
            ]
        );
    }
}
