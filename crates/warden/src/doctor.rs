// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `warden doctor` command implementation.
//!
//! Checks configuration, database health, and migration state, printing a
//! line per check. Exits non-zero if any check fails.

use warden_config::WardenConfig;
use warden_core::WardenError;
use warden_storage::Database;

struct Check {
    name: &'static str,
    result: Result<String, String>,
}

fn report(checks: &[Check]) -> bool {
    let mut ok = true;
    for check in checks {
        match &check.result {
            Ok(detail) => println!("  ok   {} -- {detail}", check.name),
            Err(detail) => {
                ok = false;
                println!("  FAIL {} -- {detail}", check.name);
            }
        }
    }
    ok
}

pub async fn run_doctor(config: WardenConfig) -> Result<(), WardenError> {
    println!("warden doctor");
    let mut checks = Vec::new();

    // Config was already loaded and validated to get here.
    checks.push(Check {
        name: "config",
        result: Ok(format!(
            "workers={} inbox={} db={}",
            config.runtime.worker_cap, config.runtime.inbox_capacity, config.storage.database_path
        )),
    });

    // Database open runs migrations; a query proves the file is usable.
    match Database::open(&config.storage.database_path).await {
        Ok(db) => {
            let query = db
                .connection()
                .call(|conn| -> Result<(i64, i64), rusqlite::Error> {
                    let records: i64 =
                        conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
                    let tasks: i64 =
                        conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
                    Ok((records, tasks))
                })
                .await;
            checks.push(Check {
                name: "storage",
                result: match query {
                    Ok((records, tasks)) => {
                        Ok(format!("{records} records, {tasks} pending tasks"))
                    }
                    Err(e) => Err(format!("schema query failed: {e}")),
                },
            });

            let wal = db
                .connection()
                .call(|conn| -> Result<String, rusqlite::Error> {
                    conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                })
                .await;
            checks.push(Check {
                name: "journal",
                result: match wal {
                    Ok(mode) if mode.eq_ignore_ascii_case("wal") => Ok("wal".to_string()),
                    Ok(mode) => Err(format!("expected wal, got {mode}")),
                    Err(e) => Err(format!("pragma query failed: {e}")),
                },
            });

            let _ = db.close().await;
        }
        Err(e) => {
            checks.push(Check { name: "storage", result: Err(format!("open failed: {e}")) });
        }
    }

    if report(&checks) {
        println!("all checks passed");
        Ok(())
    } else {
        Err(WardenError::Internal("doctor checks failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn doctor_passes_on_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WardenConfig::default();
        config.storage.database_path =
            dir.path().join("doctor.db").to_string_lossy().into_owned();

        assert!(run_doctor(config).await.is_ok());
    }
}
