//! Common test utilities for database-backed integration tests
//!
//! Each test gets its own PostgreSQL database cloned from the
//! `artpero_test_template` template, so tests stay isolated and can run in
//! parallel. Migrations run on the template once per test session.
//!
//! # Usage
//!
//! ```no_run
//! use common::TestDatabase;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     let test_db = TestDatabase::new()
//!         .await
//!         .expect("Failed to create test database");
//!     let pool = test_db.pool();
//!
//!     // Database is dropped when test_db goes out of scope
//! }
//! ```

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use std::sync::Once;
use std::thread;
use std::time::Duration;

// Embed migrations at compile time
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

// Ensure migrations only run once per test session
static MIGRATIONS_RUN: Once = Once::new();

type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Ensures the template database exists with the latest migrations applied.
/// Called automatically by `TestDatabase::new()`; runs once per session.
fn ensure_template_migrated() {
    MIGRATIONS_RUN.call_once(|| {
        dotenvy::dotenv().ok();

        let base_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/artpero_test".to_string());

        let admin_url = base_url
            .replace("/artpero_test", "/postgres")
            .replace("/artpero_test_template", "/postgres");

        let template_url = base_url.replace("/artpero_test", "/artpero_test_template");

        // Create template database if it doesn't exist
        if let Ok(mut admin_conn) = PgConnection::establish(&admin_url) {
            let exists: Result<bool, _> = diesel::sql_query(
                "SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = 'artpero_test_template')",
            )
            .get_result::<TemplateExists>(&mut admin_conn)
            .map(|r| r.exists);

            if exists != Ok(true) {
                let _ = diesel::sql_query("CREATE DATABASE artpero_test_template")
                    .execute(&mut admin_conn);
            }

            // Unmark as template temporarily to allow connections for migrations
            let _ = diesel::sql_query(
                "UPDATE pg_database SET datistemplate = FALSE, datallowconn = TRUE \
                 WHERE datname = 'artpero_test_template'",
            )
            .execute(&mut admin_conn);

            drop(admin_conn);
        }

        // Run pending migrations on template
        if let Ok(mut template_conn) = PgConnection::establish(&template_url) {
            match template_conn.run_pending_migrations(MIGRATIONS) {
                Ok(applied) => {
                    if !applied.is_empty() {
                        eprintln!("Applied {} migration(s) to test template", applied.len());
                    }
                }
                Err(e) => {
                    eprintln!("Warning: Failed to run migrations on template: {}", e);
                }
            }

            drop(template_conn);
        }

        // Let PostgreSQL fully close the connection before re-marking the
        // template, otherwise parallel cloning hits "source database is
        // being accessed by other users"
        thread::sleep(Duration::from_millis(50));

        // Re-mark as template
        if let Ok(mut admin_conn) = PgConnection::establish(&admin_url) {
            let _ = diesel::sql_query(
                "UPDATE pg_database SET datistemplate = TRUE, datallowconn = FALSE \
                 WHERE datname = 'artpero_test_template'",
            )
            .execute(&mut admin_conn);

            drop(admin_conn);
        }

        thread::sleep(Duration::from_millis(20));
    });
}

#[derive(QueryableByName)]
struct TemplateExists {
    #[diesel(sql_type = diesel::sql_types::Bool)]
    exists: bool,
}

/// Manages an isolated test database created from a template.
///
/// Each instance creates a unique database from `artpero_test_template`
/// and drops it when this struct is dropped, including on test panic.
/// Requires PostgreSQL 13+ for `DROP DATABASE ... WITH (FORCE)`.
pub struct TestDatabase {
    db_name: String,
    pool: PgPool,
    admin_url: String,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        ensure_template_migrated();

        dotenvy::dotenv().ok();

        let base_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/artpero_test".to_string());

        let (admin_url, db_name) = Self::generate_database_info(&base_url)?;

        Self::create_database(&admin_url, &db_name)
            .await
            .context("Failed to create test database from template")?;

        let test_db_url = Self::build_database_url(&base_url, &db_name);

        let manager = ConnectionManager::<PgConnection>::new(&test_db_url);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .with_context(|| format!("Failed to create connection pool for {}", db_name))?;

        Ok(TestDatabase {
            db_name,
            pool,
            admin_url,
        })
    }

    /// Returns a clone of the connection pool for this test database.
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &str {
        &self.db_name
    }

    fn generate_database_info(base_url: &str) -> Result<(String, String)> {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let random_bytes: u64 = rng.next_u64();
        let suffix = format!("{:016x}", random_bytes);

        let db_name = format!("artpero_test_{}", suffix);

        let admin_url = base_url
            .replace("/artpero_test", "/postgres")
            .replace("/artpero_test_template", "/postgres");

        Ok((admin_url, db_name))
    }

    fn build_database_url(base_url: &str, db_name: &str) -> String {
        base_url
            .replace("/artpero_test", &format!("/{}", db_name))
            .replace("/artpero_test_template", &format!("/{}", db_name))
    }

    /// Creates a new database from the template. A file-based lock
    /// serializes cloning so concurrent tests don't trip over the
    /// single-accessor restriction on template sources.
    async fn create_database(admin_url: &str, db_name: &str) -> Result<()> {
        use diesel::Connection;
        use fs2::FileExt;
        use std::fs::OpenOptions;

        let admin_url = admin_url.to_string();
        let db_name = db_name.to_string();

        tokio::task::spawn_blocking(move || {
            let lock_path = std::env::temp_dir().join("artpero_test_template.lock");
            let lock_file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)
                .context("Failed to create lock file for template database cloning")?;

            lock_file
                .lock_exclusive()
                .context("Failed to acquire lock for template database cloning")?;

            let mut conn = PgConnection::establish(&admin_url).context(
                "Failed to connect to PostgreSQL for database creation. Is PostgreSQL running?",
            )?;

            let terminate_sql = "
                SELECT pg_terminate_backend(pg_stat_activity.pid)
                FROM pg_stat_activity
                WHERE pg_stat_activity.datname = 'artpero_test_template'
                  AND pid <> pg_backend_pid()
            ";

            diesel::sql_query(terminate_sql)
                .execute(&mut conn)
                .context("Failed to terminate connections to template database")?;

            // db_name is randomly generated alphanumeric, safe from SQL injection
            let create_sql = format!(
                "CREATE DATABASE \"{}\" TEMPLATE artpero_test_template",
                db_name
            );

            let result = diesel::sql_query(&create_sql)
                .execute(&mut conn)
                .with_context(|| {
                    format!(
                        "Failed to create database '{}' from the \
                         'artpero_test_template' template database",
                        db_name
                    )
                });

            drop(lock_file);

            result?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("Database creation task panicked")?
    }

    fn cleanup(&self) {
        use diesel::Connection;
        use std::panic::AssertUnwindSafe;

        let db_name = self.db_name.clone();
        let admin_url = self.admin_url.clone();

        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let mut conn = PgConnection::establish(&admin_url).ok()?;

            let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", db_name);

            diesel::sql_query(&drop_sql).execute(&mut conn).ok()
        }));

        if result.is_err() {
            eprintln!(
                "Warning: Failed to drop test database '{}'. \
                 You may need to manually clean up: DROP DATABASE {};",
                self.db_name, self.db_name
            );
        }
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        self.cleanup();
    }
}
