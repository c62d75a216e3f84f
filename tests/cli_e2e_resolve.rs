//! End-to-end tests for the `resolve` command.
//!
//! Lockfile generation runs entirely against local manifest files here, so
//! these tests need no network and no git remotes.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_fs::prelude::*;
use predicates::prelude::*;

fn init_workspace(temp: &assert_fs::TempDir) {
    cargo_bin_cmd!("grove")
        .current_dir(temp.path())
        .arg("init")
        .assert()
        .success();
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_resolve_writes_lockfile() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_workspace(&temp);
    temp.child(".grove_manifest")
        .write_str(
            r#"
<manifest>
  <projects>
    <project name="alpha" path="src/alpha" remote="https://host/alpha" revision="abc123"/>
  </projects>
</manifest>
"#,
        )
        .unwrap();

    let mut cmd = cargo_bin_cmd!("grove");
    cmd.current_dir(temp.path()).arg("resolve").assert().success();

    temp.child("grove.lock").assert(
        predicate::str::contains("\"alpha\"").and(predicate::str::contains("abc123")),
    );
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_resolve_output_is_deterministic() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_workspace(&temp);
    temp.child(".grove_manifest")
        .write_str(
            r#"
<manifest>
  <projects>
    <project name="zeta" path="src/zeta" remote="https://host/zeta" revision="fff"/>
    <project name="alpha" path="src/alpha" remote="https://host/alpha" revision="abc"/>
  </projects>
</manifest>
"#,
        )
        .unwrap();

    cargo_bin_cmd!("grove")
        .current_dir(temp.path())
        .arg("resolve")
        .assert()
        .success();
    let first = std::fs::read_to_string(temp.child("grove.lock").path()).unwrap();

    cargo_bin_cmd!("grove")
        .current_dir(temp.path())
        .arg("resolve")
        .assert()
        .success();
    let second = std::fs::read_to_string(temp.child("grove.lock").path()).unwrap();

    assert_eq!(first, second);
    // Entries come out sorted regardless of manifest order
    assert!(first.find("alpha").unwrap() < first.find("zeta").unwrap());
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_resolve_conflicting_pins_fail() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_workspace(&temp);
    temp.child("a.xml")
        .write_str(
            r#"<manifest><projects><project name="alpha" path="src/alpha" remote="https://host/alpha" revision="r1"/></projects></manifest>"#,
        )
        .unwrap();
    temp.child("b.xml")
        .write_str(
            r#"<manifest><projects><project name="alpha" path="src/alpha" remote="https://host/alpha" revision="r2"/></projects></manifest>"#,
        )
        .unwrap();

    let mut cmd = cargo_bin_cmd!("grove");
    cmd.current_dir(temp.path())
        .arg("resolve")
        .arg("a.xml")
        .arg("b.xml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("alpha"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_resolve_allow_conflicts_last_wins() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_workspace(&temp);
    temp.child("a.xml")
        .write_str(
            r#"<manifest><projects><project name="alpha" path="src/alpha" remote="https://host/alpha" revision="r1"/></projects></manifest>"#,
        )
        .unwrap();
    temp.child("b.xml")
        .write_str(
            r#"<manifest><projects><project name="alpha" path="src/alpha" remote="https://host/alpha" revision="r2"/></projects></manifest>"#,
        )
        .unwrap();

    let mut cmd = cargo_bin_cmd!("grove");
    cmd.current_dir(temp.path())
        .arg("resolve")
        .arg("--allow-conflicts")
        .arg("a.xml")
        .arg("b.xml")
        .assert()
        .success();

    temp.child("grove.lock")
        .assert(predicate::str::contains("r2").and(predicate::str::contains("r1").not()));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_resolve_custom_output_path() {
    let temp = assert_fs::TempDir::new().unwrap();
    init_workspace(&temp);
    temp.child(".grove_manifest")
        .write_str(
            r#"<manifest><projects><project name="alpha" path="src/alpha" remote="https://host/alpha" revision="abc"/></projects></manifest>"#,
        )
        .unwrap();

    let mut cmd = cargo_bin_cmd!("grove");
    cmd.current_dir(temp.path())
        .arg("resolve")
        .arg("-o")
        .arg("pins/custom.lock")
        .assert()
        .success();

    temp.child("pins/custom.lock")
        .assert(predicate::path::is_file());
}
