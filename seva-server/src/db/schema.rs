//! Schema bootstrap for the portal tables
//!
//! Idempotent: every statement is `IF NOT EXISTS`. Timestamps and dates are
//! stored as text in the configured zone; booleans as 0/1 integers.

use super::access::Database;
use super::error::DbError;
use super::sql::Dialect;

struct Table {
    name: &'static str,
    /// `{float}` expands to the dialect's double type.
    columns: &'static [&'static str],
    indexes: &'static [(&'static str, &'static str)],
}

const TIMESTAMPS: &str = "created_at VARCHAR(19), updated_at VARCHAR(19), deleted_at VARCHAR(19)";

const TABLES: &[Table] = &[
    Table {
        name: "users",
        columns: &[
            "name VARCHAR(120) NOT NULL",
            "email VARCHAR(191) NOT NULL UNIQUE",
            "role VARCHAR(16) NOT NULL",
            "roll_number VARCHAR(32)",
            "department VARCHAR(80)",
        ],
        indexes: &[("idx_users_role", "role")],
    },
    Table {
        name: "teachers",
        columns: &[
            "user_id BIGINT",
            "name VARCHAR(120) NOT NULL",
            "department VARCHAR(80) NOT NULL",
            "designation VARCHAR(80)",
            "email VARCHAR(191)",
            "cabin VARCHAR(40)",
            "available INTEGER NOT NULL DEFAULT 1",
        ],
        indexes: &[("idx_teachers_department", "department")],
    },
    Table {
        name: "bookings",
        columns: &[
            "student_id BIGINT NOT NULL",
            "teacher_id BIGINT NOT NULL",
            "booking_date VARCHAR(10) NOT NULL",
            "time_slot VARCHAR(20) NOT NULL",
            "purpose TEXT",
            "status VARCHAR(16) NOT NULL DEFAULT 'pending'",
        ],
        indexes: &[
            ("idx_bookings_student", "student_id"),
            ("idx_bookings_teacher_date", "teacher_id, booking_date"),
        ],
    },
    Table {
        name: "vehicles",
        columns: &[
            "registration VARCHAR(20) NOT NULL",
            "name VARCHAR(80) NOT NULL",
            "route VARCHAR(80) NOT NULL",
            "driver_name VARCHAR(120)",
            "capacity INTEGER NOT NULL DEFAULT 0",
            "latitude {float}",
            "longitude {float}",
            "active INTEGER NOT NULL DEFAULT 1",
            "location_updated_at VARCHAR(19)",
        ],
        indexes: &[("idx_vehicles_route", "route")],
    },
    Table {
        name: "feedback",
        columns: &[
            "user_id BIGINT NOT NULL",
            "category VARCHAR(32) NOT NULL",
            "rating INTEGER NOT NULL",
            "subject VARCHAR(200) NOT NULL",
            "message TEXT NOT NULL",
        ],
        indexes: &[("idx_feedback_category", "category")],
    },
];

/// Table names managed by [`ensure`].
pub fn table_names() -> Vec<&'static str> {
    TABLES.iter().map(|t| t.name).collect()
}

fn statements(dialect: Dialect) -> Vec<String> {
    let mut out = Vec::new();

    for table in TABLES {
        let mut defs = vec![dialect.id_column().to_string()];
        defs.extend(
            table
                .columns
                .iter()
                .map(|c| c.replace("{float}", dialect.float_type())),
        );
        defs.push(TIMESTAMPS.to_string());

        match dialect {
            Dialect::MySql => {
                defs.extend(
                    table
                        .indexes
                        .iter()
                        .map(|(name, cols)| format!("INDEX {} ({})", name, cols)),
                );
                out.push(format!(
                    "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE=InnoDB",
                    table.name,
                    defs.join(", ")
                ));
            }
            Dialect::Postgres | Dialect::Sqlite => {
                out.push(format!(
                    "CREATE TABLE IF NOT EXISTS {} ({})",
                    table.name,
                    defs.join(", ")
                ));
                out.extend(table.indexes.iter().map(|(name, cols)| {
                    format!("CREATE INDEX IF NOT EXISTS {} ON {} ({})", name, table.name, cols)
                }));
            }
        }
    }
    out
}

/// Create any missing portal tables and indexes.
pub async fn ensure(db: &Database) -> Result<(), DbError> {
    let dialect = db.dialect();
    for statement in statements(dialect) {
        db.execute(&statement, &[]).await?;
    }
    tracing::info!(dialect = dialect.name(), tables = TABLES.len(), "schema ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::sqlite_db;
    use crate::db::Conditions;

    #[test]
    fn mysql_indexes_are_inline() {
        let sql = statements(Dialect::MySql);
        assert_eq!(sql.len(), TABLES.len());
        assert!(sql[2].contains("INDEX idx_bookings_teacher_date (teacher_id, booking_date)"));
        assert!(sql[3].contains("latitude DOUBLE"));
    }

    #[test]
    fn postgres_uses_bigserial() {
        let sql = statements(Dialect::Postgres);
        assert!(sql[0].contains("id BIGSERIAL PRIMARY KEY"));
        assert!(sql.iter().any(|s| s.starts_with("CREATE INDEX IF NOT EXISTS idx_users_role")));
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let db = sqlite_db().await;
        ensure(&db).await.unwrap();
        ensure(&db).await.unwrap();

        for table in table_names() {
            assert_eq!(db.count(table, &Conditions::new()).await.unwrap(), 0);
        }
    }
}
