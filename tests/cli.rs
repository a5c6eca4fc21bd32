use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::tempdir;
use vetclinic_lib::error::{BACKEND_NOT_FOUND, VALIDATION_PREFIX};

fn vetclinic(db: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("vetclinic")?;
    cmd.env("VETCLINIC_LOG", "off").arg("--db").arg(db);
    Ok(cmd)
}

fn stdout_json(output: &std::process::Output) -> Result<Value> {
    Ok(serde_json::from_slice(&output.stdout)?)
}

#[test]
fn db_init_creates_the_database_file() -> Result<()> {
    let tmp = tempdir()?;
    let db = tmp.path().join("data").join("clinic.sqlite3");

    let output = vetclinic(&db)?.args(["db", "init"]).output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Database ready at"));
    assert!(db.exists());
    Ok(())
}

#[test]
fn household_create_show_and_rename() -> Result<()> {
    let tmp = tempdir()?;
    let db = tmp.path().join("clinic.sqlite3");

    let created = vetclinic(&db)?
        .args(["household", "create", "  Murphy  "])
        .output()?;
    assert!(
        created.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&created.stderr)
    );
    let created = stdout_json(&created)?;
    assert_eq!(created["householdName"], "Murphy");
    let id = created["id"].as_i64().expect("numeric id");

    let renamed = vetclinic(&db)?
        .args(["household", "rename", &id.to_string(), "Murphy-Lee"])
        .output()?;
    assert!(renamed.status.success());
    assert_eq!(stdout_json(&renamed)?["householdName"], "Murphy-Lee");

    let shown = vetclinic(&db)?
        .args(["household", "show", &id.to_string()])
        .output()?;
    assert!(shown.status.success());
    let shown = stdout_json(&shown)?;
    assert_eq!(shown["householdName"], "Murphy-Lee");
    assert_eq!(shown["petCount"], 0);
    Ok(())
}

#[test]
fn missing_rows_exit_with_one() -> Result<()> {
    let tmp = tempdir()?;
    let db = tmp.path().join("clinic.sqlite3");

    let output = vetclinic(&db)?.args(["household", "show", "99"]).output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains(BACKEND_NOT_FOUND));

    let output = vetclinic(&db)?.args(["record", "archive", "5"]).output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    Ok(())
}

#[test]
fn blank_household_name_is_a_validation_error() -> Result<()> {
    let tmp = tempdir()?;
    let db = tmp.path().join("clinic.sqlite3");

    let output = vetclinic(&db)?
        .args(["household", "create", "   "])
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains(VALIDATION_PREFIX));
    Ok(())
}
