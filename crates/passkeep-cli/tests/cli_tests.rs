use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const PASSPHRASE: &str = "a long enough passphrase";

fn passkeep(db: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("passkeep").unwrap();
    cmd.env("PASSKEEP_PASSPHRASE", PASSPHRASE)
        .env_remove("PASSKEEP_NEW_PASSPHRASE")
        .env_remove("RUST_LOG")
        .arg("--db")
        .arg(db);
    cmd
}

/// Fresh store at `db` holding `records`.
fn store_with(dir: &Path, db: &Path, records: serde_json::Value) {
    passkeep(db).arg("init").assert().success();
    let export = dir.join("import.json");
    fs::write(
        &export,
        serde_json::to_vec(&serde_json::json!({ "records": records })).unwrap(),
    )
    .unwrap();
    passkeep(db).arg("import").arg(&export).assert().success();
}

#[test]
fn hashpass_matches_the_reference_vector() {
    let mut cmd = assert_cmd::Command::cargo_bin("passkeep").unwrap();
    cmd.env("PASSKEEP_PASSPHRASE", "cabezon")
        .args(["hashpass", "--site", "xyzzy", "--length", "32"]);
    cmd.assert()
        .success()
        .stdout("Hf*w_Tv/nZRWDVJf#=9u$Yhu@DnKl@ez\n")
        .stderr(predicate::str::contains("entropy: ~192 bits"));
}

#[test]
fn hashpass_rejects_unknown_alphabet() {
    let mut cmd = assert_cmd::Command::cargo_bin("passkeep").unwrap();
    cmd.env("PASSKEEP_PASSPHRASE", "cabezon")
        .args(["hashpass", "--site", "x", "--alphabet", "digits+emoji"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("emoji"));
}

#[test]
fn random_generators() {
    let out = assert_cmd::Command::cargo_bin("passkeep")
        .unwrap()
        .args(["random", "chars", "--length", "4", "--no-symbols"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let pw = String::from_utf8(out.stdout).unwrap();
    assert_eq!(pw.trim_end().len(), 8);
    assert!(pw.trim_end().chars().all(|c| c.is_ascii_alphanumeric()));

    let out = assert_cmd::Command::cargo_bin("passkeep")
        .unwrap()
        .args(["random", "words", "--count", "4", "--joiner", "."])
        .output()
        .unwrap();
    assert!(out.status.success());
    let phrase = String::from_utf8(out.stdout).unwrap();
    assert_eq!(phrase.trim_end().split('.').count(), 4);
}

#[test]
fn store_lifecycle() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("passkeep.db");

    passkeep(&db).arg("init").assert().success();
    passkeep(&db)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let export = dir.path().join("import.json");
    fs::write(
        &export,
        serde_json::to_vec(&serde_json::json!({
            "records": [
                {"label": "bank", "password": "hunter2", "hosts": "bank.com"},
                {"label": "other", "hosts": ["bank.example"], "username": "jdoe"}
            ]
        }))
        .unwrap(),
    )
    .unwrap();
    passkeep(&db)
        .arg("import")
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 records"));

    passkeep(&db)
        .args(["pass", "bank"])
        .assert()
        .success()
        .stdout("hunter2\n");

    passkeep(&db)
        .args(["pass", "nothing-here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No matches"));

    let out = passkeep(&db).arg("export").output().unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["records"][1]["username"], "jdoe");

    let on_disk: serde_json::Value = serde_json::from_slice(&fs::read(&db).unwrap()).unwrap();
    assert_eq!(on_disk["format"], "ks1");
    assert!(!String::from_utf8_lossy(&fs::read(&db).unwrap()).contains("hunter2"));
}

#[test]
fn wrong_passphrase_is_rejected() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("passkeep.db");
    passkeep(&db).arg("init").assert().success();
    passkeep(&db)
        .env("PASSKEEP_PASSPHRASE", "not the passphrase")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("decrypt failed"));
}

#[test]
fn missing_store_mentions_init() {
    let dir = tempdir().unwrap();
    passkeep(&dir.path().join("absent.db"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("run init first"));
}

#[test]
fn show_masks_secrets_unless_revealed() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("passkeep.db");
    store_with(
        dir.path(),
        &db,
        serde_json::json!([{
            "label": "bank",
            "password": "hunter2",
            "details": [
                {"label": "pin", "value": "0000", "hidden": true},
                {"label": "acct", "value": "9999"}
            ]
        }]),
    );

    passkeep(&db)
        .args(["show", "bank"])
        .assert()
        .success()
        .stdout(predicate::str::contains("password: ********"))
        .stdout(predicate::str::contains("pin: ********"))
        .stdout(predicate::str::contains("acct: 9999"))
        .stdout(predicate::str::contains("hunter2").not())
        .stdout(predicate::str::contains("0000").not());

    passkeep(&db)
        .args(["show", "bank", "--reveal"])
        .assert()
        .success()
        .stdout(predicate::str::contains("password: hunter2"))
        .stdout(predicate::str::contains("pin: 0000"));
}

#[test]
fn list_hides_archived_records_by_default() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("passkeep.db");
    store_with(
        dir.path(),
        &db,
        serde_json::json!([
            {"label": "current", "hosts": "bank.com"},
            {"label": "oldbank", "archived": true}
        ]),
    );

    passkeep(&db)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("current"))
        .stdout(predicate::str::contains("oldbank").not());

    passkeep(&db)
        .args(["list", "--archived"])
        .assert()
        .success()
        .stdout(predicate::str::contains("current"))
        .stdout(predicate::str::contains("oldbank  (archived)"));
}

#[test]
fn rekey_replaces_the_passphrase() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("passkeep.db");
    store_with(
        dir.path(),
        &db,
        serde_json::json!([{"label": "bank", "password": "hunter2"}]),
    );
    let before = fs::read(&db).unwrap();

    let fresh = "another long passphrase";
    passkeep(&db)
        .env("PASSKEEP_NEW_PASSPHRASE", fresh)
        .arg("rekey")
        .assert()
        .success()
        .stdout(predicate::str::contains("re-encrypted"));
    assert_ne!(fs::read(&db).unwrap(), before);

    passkeep(&db)
        .env("PASSKEEP_PASSPHRASE", fresh)
        .args(["pass", "bank"])
        .assert()
        .success()
        .stdout("hunter2\n");
    passkeep(&db)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("decrypt failed"));
}

#[test]
fn rekey_refuses_a_short_passphrase() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("passkeep.db");
    passkeep(&db).arg("init").assert().success();
    let before = fs::read(&db).unwrap();

    passkeep(&db)
        .env("PASSKEEP_NEW_PASSPHRASE", "short")
        .arg("rekey")
        .assert()
        .failure()
        .stderr(predicate::str::contains("too short"));
    assert_eq!(fs::read(&db).unwrap(), before);
}

#[cfg(unix)]
#[test]
fn edit_reports_untouched_records() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("passkeep.db");
    store_with(
        dir.path(),
        &db,
        serde_json::json!([{"label": "bank", "password": "hunter2"}]),
    );
    let before = fs::read(&db).unwrap();

    passkeep(&db)
        .env("VISUAL", "true")
        .args(["edit", "bank"])
        .assert()
        .success()
        .stdout("No changes\n");
    assert_eq!(fs::read(&db).unwrap(), before);

    passkeep(&db)
        .env("VISUAL", "true")
        .args(["edit", "bank", "--editor", "false"])
        .assert()
        .success()
        .stdout("Edit abandoned\n");
}

#[cfg(unix)]
#[test]
fn edit_saves_a_rewritten_record() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("passkeep.db");
    store_with(
        dir.path(),
        &db,
        serde_json::json!([{"label": "bank", "password": "hunter2"}]),
    );
    let script = dir.path().join("ed.sh");
    fs::write(
        &script,
        "#!/bin/sh\nprintf '{\"label\":\"bank\",\"password\":\"correct-horse\"}' > \"$1\"\n",
    )
    .unwrap();

    passkeep(&db)
        .arg("edit")
        .arg("bank")
        .arg("--editor")
        .arg(format!("sh {}", script.display()))
        .assert()
        .success()
        .stdout("Record saved\n");

    passkeep(&db)
        .args(["pass", "bank"])
        .assert()
        .success()
        .stdout("correct-horse\n");
}
