//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `memodeck_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    // Opening an in-memory database exercises connection bootstrap and the
    // full migration chain without touching disk.
    let schema = match memodeck_core::db::open_db_in_memory() {
        Ok(_) => "ok",
        Err(_) => "failed",
    };
    println!("memodeck_core version={}", memodeck_core::core_version());
    println!(
        "memodeck_core schema={schema} latest_migration={}",
        memodeck_core::db::migrations::latest_version()
    );
}
