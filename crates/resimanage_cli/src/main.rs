//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `resimanage_core` linkage and storage bootstrap from a shell.
//! - Keep output deterministic for quick local sanity checks.

use resimanage_core::db::migrations::{current_user_version, latest_version};
use resimanage_core::db::open_db_in_memory;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("resimanage_core ping={}", resimanage_core::ping());
    println!("resimanage_core version={}", resimanage_core::core_version());

    let schema_version = open_db_in_memory()
        .map_err(|err| err.to_string())
        .and_then(|conn| current_user_version(&conn).map_err(|err| err.to_string()));
    match schema_version {
        Ok(version) => {
            println!("resimanage_core schema_version={version}/{}", latest_version());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("resimanage_core storage bootstrap failed: {err}");
            ExitCode::FAILURE
        }
    }
}
