// ABOUTME: Integration tests for loading templates from disk.
// ABOUTME: Mixed-version directories, skipped documents and icon lookup.

use hearth::template::{MAX_SUPPORTED_VERSION, TEMPLATE_FILENAME, TemplateStore};
use hearth::types::TemplateId;
use std::fs;
use std::path::Path;

fn write_template(root: &Path, id: &str, yaml: &str) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(TEMPLATE_FILENAME), yaml).unwrap();
}

const V1_REDIS: &str = r#"
name: Redis
environment:
  - type: port
    name: REDIS_PORT
    display_name: Redis port
    default: 6379
methods:
  docker:
    image: redis
    ports:
      "6379": "6379"
"#;

const V2_WIKI: &str = r#"
version: 2
name: Wiki
icon: wiki.svg
environment:
  - type: port
    name: HTTP_PORT
    default: "3000"
  - name: SITE_NAME
    default: My wiki
methods:
  docker:
    image: requarks/wiki
    volumes:
      ./data: /wiki/data
"#;

const V3_MINIMAL: &str = "version: 3\nname: Minimal\n";

#[test]
fn every_version_loads_in_current_shape() {
    let dir = tempfile::tempdir().unwrap();
    write_template(dir.path(), "redis", V1_REDIS);
    write_template(dir.path(), "wiki", V2_WIKI);
    write_template(dir.path(), "minimal", V3_MINIMAL);

    let store = TemplateStore::load(dir.path()).unwrap();
    assert_eq!(store.list().count(), 3);
    assert!(
        store
            .list()
            .all(|t| t.version == MAX_SUPPORTED_VERSION)
    );

    let redis = store.get(&TemplateId::new("redis")).unwrap();
    assert!(redis.environment.is_empty());
    assert_eq!(redis.ports.len(), 1);
    assert_eq!(redis.ports[0].name, "Redis port");
    assert_eq!(redis.ports[0].port, "6379");

    let wiki = store.get(&TemplateId::new("wiki")).unwrap();
    assert_eq!(wiki.env_default("SITE_NAME"), Some("My wiki"));
    assert_eq!(wiki.ports[0].port, "3000");
    let docker = wiki.docker().unwrap();
    assert_eq!(docker.volumes.get("./data").map(String::as_str), Some("/wiki/data"));
}

#[test]
fn bad_documents_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_template(dir.path(), "good", V3_MINIMAL);
    write_template(dir.path(), "future", "version: 99\nname: Future\n");
    write_template(dir.path(), "broken", "name: [unclosed\n");
    fs::create_dir_all(dir.path().join("empty")).unwrap();

    let store = TemplateStore::load(dir.path()).unwrap();
    let ids: Vec<_> = store.list().map(|t| t.id.to_string()).collect();
    assert_eq!(ids, vec!["good"]);
}

#[test]
fn missing_directory_is_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = TemplateStore::load(&dir.path().join("absent")).unwrap();
    assert_eq!(store.list().count(), 0);
}

#[test]
fn icon_is_resolved_inside_the_template_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_template(dir.path(), "wiki", V2_WIKI);
    write_template(
        dir.path(),
        "sneaky",
        "version: 3\nname: Sneaky\nicon: ../wiki/wiki.svg\n",
    );
    let store = TemplateStore::load(dir.path()).unwrap();
    assert_eq!(store.icon_path(&TemplateId::new("wiki")), None);

    fs::write(dir.path().join("wiki/wiki.svg"), "<svg/>").unwrap();
    assert_eq!(
        store.icon_path(&TemplateId::new("wiki")),
        Some(dir.path().join("wiki").join("wiki.svg"))
    );
    assert_eq!(store.icon_path(&TemplateId::new("sneaky")), None);
}
