//! Migrations shipped with the user service.
//!
//! Append one function per schema change and add it to [`all_migrations`].
//! Never edit or reorder an entry once it has been released.

use crate::migration::Migration;
use chrono::{DateTime, Utc};

/// Get all migrations in order.
#[must_use]
pub fn all_migrations() -> Vec<Migration> {
    vec![
        v001_initialise_users(),
        v002_add_user_salt(),
        v003_create_names(),
        v004_create_attendance(),
    ]
}

/// Authoring timestamps are written in Melbourne time, as the authors did.
#[allow(clippy::expect_used)]
fn authored(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.with_timezone(&Utc))
        .expect("catalog timestamps are valid RFC 3339")
}

/// V1: Create the users table.
#[must_use]
pub fn v001_initialise_users() -> Migration {
    Migration::new(
        1,
        authored("2020-03-22T22:59:00+10:00"),
        r#"
        CREATE SCHEMA IF NOT EXISTS autocrat;

        CREATE TABLE IF NOT EXISTS autocrat.users (
            id        BIGSERIAL    PRIMARY KEY,
            email     VARCHAR(254) NOT NULL UNIQUE CHECK (email <> ''),
            firstname TEXT         NOT NULL,
            lastname  TEXT         NOT NULL,
            password  TEXT         NOT NULL
        );
        "#,
    )
    .with_description("Initialise required tables.")
}

/// V2: Store a per-user password salt.
#[must_use]
pub fn v002_add_user_salt() -> Migration {
    Migration::new(
        2,
        authored("2020-04-05T19:12:00+10:00"),
        r#"
        ALTER TABLE autocrat.users ADD COLUMN IF NOT EXISTS salt TEXT NOT NULL DEFAULT '';
        "#,
    )
    .with_description("Add password salt to users.")
}

/// V3: Name counter table, counting from 1.
#[must_use]
pub fn v003_create_names() -> Migration {
    Migration::new(
        3,
        authored("2020-04-11T10:30:00+10:00"),
        r#"
        CREATE TABLE IF NOT EXISTS autocrat.names (
            id    SERIAL       PRIMARY KEY,
            name  VARCHAR(246) NOT NULL UNIQUE CHECK (name <> ''),
            count INT          NOT NULL DEFAULT 1
        );
        "#,
    )
    .with_description("Track how many times each name has been seen.")
}

/// V4: Attendance records.
#[must_use]
pub fn v004_create_attendance() -> Migration {
    Migration::new(
        4,
        authored("2020-05-02T14:05:00+10:00"),
        r#"
        CREATE TABLE IF NOT EXISTS autocrat.attendance (
            id         BIGSERIAL   PRIMARY KEY,
            user_id    BIGINT      NOT NULL REFERENCES autocrat.users(id) ON DELETE CASCADE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );

        CREATE INDEX IF NOT EXISTS idx_attendance_user_id ON autocrat.attendance(user_id);
        CREATE INDEX IF NOT EXISTS idx_attendance_created_at ON autocrat.attendance(created_at);
        "#,
    )
    .with_description("Record user attendance.")
}
