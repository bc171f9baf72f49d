//! End-to-end scenarios driving the built `creep` binary against a real
//! temp filesystem: each test lays out a `source/` tree and a pre-created
//! `target/` directory, runs `creep -y` with an inline JSON definition, and
//! inspects the target afterwards.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use assert_cmd::Command;
use serde_json::json;

fn creep() -> Command {
    Command::cargo_bin("creep").unwrap()
}

fn run(source: &std::path::Path, definition: &serde_json::Value) {
    creep()
        .arg("-y")
        .arg("-b")
        .arg(source)
        .arg("-d")
        .arg(definition.to_string())
        .assert()
        .success();
}

#[test]
fn single_file() {
    let td = tempfile::tempdir().unwrap();
    let source = td.path().join("source");
    let target = td.path().join("target");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("test"), b"Hello, World!").unwrap();

    run(
        &source,
        &json!({"environment": {"default": {"connection": "file:///../target"}}}),
    );

    assert_eq!(fs::read(target.join("test")).unwrap(), b"Hello, World!");
    assert!(!target.join(".creep.env").exists());
}

#[test]
fn multi_level_tree() {
    let td = tempfile::tempdir().unwrap();
    let source = td.path().join("source");
    let target = td.path().join("target");
    fs::create_dir_all(source.join("b")).unwrap();
    fs::create_dir_all(source.join("c/c")).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("aaa"), b"a").unwrap();
    fs::write(source.join("b/bb"), b"b").unwrap();
    fs::write(source.join("c/c/c"), b"c").unwrap();

    run(
        &source,
        &json!({"environment": {"default": {"connection": "file:///../target"}}}),
    );

    assert_eq!(fs::read(target.join("aaa")).unwrap(), b"a");
    assert_eq!(fs::read(target.join("b/bb")).unwrap(), b"b");
    assert_eq!(fs::read(target.join("c/c/c")).unwrap(), b"c");
    assert!(!target.join(".creep.env").exists());
}

#[test]
fn incremental_replace() {
    let td = tempfile::tempdir().unwrap();
    let source = td.path().join("source");
    let target = td.path().join("target");
    fs::create_dir_all(source.join("a")).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a/a"), b"a").unwrap();

    let definition = json!({"environment": {"default": {"connection": "file:///../target"}}});
    run(&source, &definition);
    assert_eq!(fs::read(target.join("a/a")).unwrap(), b"a");

    fs::write(source.join("a/a"), b"aaa").unwrap();
    run(&source, &definition);

    assert_eq!(fs::read(target.join("a/a")).unwrap(), b"aaa");
}

#[test]
fn incremental_delete() {
    let td = tempfile::tempdir().unwrap();
    let source = td.path().join("source");
    let target = td.path().join("target");
    fs::create_dir_all(source.join("a")).unwrap();
    fs::create_dir_all(source.join("b")).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("a/a"), b"a").unwrap();
    fs::write(source.join("b/b"), b"b").unwrap();

    let definition = json!({"environment": {"default": {"connection": "file:///../target"}}});
    run(&source, &definition);
    assert!(target.join("a/a").exists());
    assert!(target.join("b/b").exists());

    fs::remove_file(source.join("b/b")).unwrap();
    run(&source, &definition);

    assert!(target.join("a/a").exists());
    assert!(!target.join("b/b").exists());
}

#[test]
fn filter_modifier() {
    let td = tempfile::tempdir().unwrap();
    let source = td.path().join("source");
    let target = td.path().join("target");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("aaa"), b"a").unwrap();
    fs::write(source.join("bbb"), b"b").unwrap();

    run(
        &source,
        &json!({
            "environment": {"default": {"connection": "file:///../target"}},
            "modifiers": [{"pattern": "^bbb$", "filter": ""}],
        }),
    );

    assert_eq!(fs::read(target.join("aaa")).unwrap(), b"a");
    assert!(!target.join("bbb").exists());
}

#[test]
fn rename_and_chmod() {
    let td = tempfile::tempdir().unwrap();
    let source = td.path().join("source");
    let target = td.path().join("target");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&target).unwrap();
    fs::write(source.join("aaa"), b"a").unwrap();

    run(
        &source,
        &json!({
            "environment": {"default": {"connection": "file:///../target"}},
            "modifiers": [{"pattern": "^(...)$", "rename": "r_\\1", "chmod": "642"}],
        }),
    );

    let renamed = target.join("r_aaa");
    assert_eq!(fs::read(&renamed).unwrap(), b"a");
    assert!(!target.join("aaa").exists());
    let mode = fs::metadata(&renamed).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o642);
}

#[test]
fn cascade() {
    let td = tempfile::tempdir().unwrap();
    let source = td.path().join("source");
    let cascade_source = td.path().join("source-cascade");
    let target1 = td.path().join("target1");
    let target2 = td.path().join("target2");
    fs::create_dir_all(&source).unwrap();
    fs::create_dir_all(&cascade_source).unwrap();
    fs::create_dir_all(&target1).unwrap();
    fs::create_dir_all(&target2).unwrap();
    fs::write(source.join("a"), b"a").unwrap();
    fs::write(cascade_source.join("b"), b"b").unwrap();
    fs::write(cascade_source.join("c"), b"c").unwrap();

    run(
        &source,
        &json!({
            "environment": {"default": {"connection": "file:///../target1"}},
            "cascades": [{
                "origin": "../source-cascade",
                "environment": {"default": {"connection": "file:///../target2"}},
                "modifiers": [{"pattern": "^c$", "filter": ""}],
            }],
        }),
    );

    assert!(target1.join("a").exists());
    assert!(target2.join("b").exists());
    assert!(!target2.join("c").exists());
}
