//! End-to-end tests for the `manifest` command.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_fs::prelude::*;
use predicates::prelude::*;

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_manifest_prints_flattened_xml() {
    let temp = assert_fs::TempDir::new().unwrap();
    cargo_bin_cmd!("grove")
        .current_dir(temp.path())
        .arg("init")
        .assert()
        .success();
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
    cmd.current_dir(temp.path())
        .arg("manifest")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("<manifest")
                .and(predicate::str::contains("alpha"))
                .and(predicate::str::contains("abc123")),
        );
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_manifest_outside_workspace_fails() {
    let temp = assert_fs::TempDir::new().unwrap();

    let mut cmd = cargo_bin_cmd!("grove");
    cmd.current_dir(temp.path())
        .arg("manifest")
        .assert()
        .failure()
        .stderr(predicate::str::contains(".grove"));
}
