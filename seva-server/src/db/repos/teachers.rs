//! Teacher directory - read-mostly, so the availability list is cached

use std::time::Duration;

use serde::Serialize;

use crate::db::{Conditions, Database, DbError, FindOptions, OrderBy, Row};
use crate::params;

const TABLE: &str = "teachers";

/// Teacher availability changes rarely.
const AVAILABLE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Teacher {
    pub id: i64,
    pub name: String,
    pub department: String,
    pub designation: Option<String>,
    pub email: Option<String>,
    pub cabin: Option<String>,
    pub available: bool,
}

impl Teacher {
    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.i64("id")?,
            name: row.text("name")?,
            department: row.text("department")?,
            designation: row.opt_text("designation")?,
            email: row.opt_text("email")?,
            cabin: row.opt_text("cabin")?,
            available: row.bool("available")?,
        })
    }
}

pub struct TeacherRepo<'a> {
    db: &'a Database,
}

impl<'a> TeacherRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Teachers accepting appointments, by name.
    pub async fn list_available(&self) -> Result<Vec<Teacher>, DbError> {
        self.db
            .fetch_all(
                "SELECT * FROM teachers WHERE available = ? AND deleted_at IS NULL ORDER BY name",
                &params![true],
                Some(AVAILABLE_TTL),
            )
            .await?
            .iter()
            .map(Teacher::from_row)
            .collect()
    }

    pub async fn by_department(&self, department: &str) -> Result<Vec<Teacher>, DbError> {
        let conditions = Conditions::new()
            .eq("department", department)
            .is_null("deleted_at");
        let options = FindOptions::new().order(OrderBy::asc("name"));
        self.db
            .find_all(TABLE, &conditions, &options)
            .await?
            .iter()
            .map(Teacher::from_row)
            .collect()
    }

    pub async fn get(&self, id: i64) -> Result<Teacher, DbError> {
        let conditions = Conditions::new().eq("id", id).is_null("deleted_at");
        let row = self
            .db
            .find_where(TABLE, &conditions)
            .await?
            .ok_or_else(|| DbError::NotFound {
                resource: "teacher",
                id: id.to_string(),
            })?;
        Teacher::from_row(&row)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::testing::portal_db;
    use crate::fields;

    pub(crate) async fn seed_teacher(db: &Database, name: &str, department: &str, available: bool) -> i64 {
        db.insert(
            TABLE,
            fields! {
                "name" => name,
                "department" => department,
                "designation" => "Assistant Professor",
                "available" => available,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn list_available_is_sorted_and_filtered() {
        let db = portal_db().await;
        seed_teacher(&db, "Dr. Rao", "CSE", true).await;
        seed_teacher(&db, "Dr. Banerjee", "ECE", true).await;
        seed_teacher(&db, "Dr. Iyer", "CSE", false).await;

        let teachers = TeacherRepo::new(&db).list_available().await.unwrap();
        let names: Vec<&str> = teachers.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Dr. Banerjee", "Dr. Rao"]);
        assert!(teachers.iter().all(|t| t.available));
    }

    #[tokio::test]
    async fn availability_list_is_cached_until_teachers_change() {
        let db = portal_db().await;
        let repo = TeacherRepo::new(&db);
        seed_teacher(&db, "Dr. Rao", "CSE", true).await;

        assert_eq!(repo.list_available().await.unwrap().len(), 1);
        assert_eq!(repo.list_available().await.unwrap().len(), 1);
        assert_eq!(db.cache().counters().hits, 1);

        seed_teacher(&db, "Dr. Sen", "ME", true).await;
        assert_eq!(repo.list_available().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn by_department_and_get() {
        let db = portal_db().await;
        let id = seed_teacher(&db, "Dr. Rao", "CSE", true).await;
        seed_teacher(&db, "Dr. Das", "ECE", true).await;

        let repo = TeacherRepo::new(&db);
        let cse = repo.by_department("CSE").await.unwrap();
        assert_eq!(cse.len(), 1);
        assert_eq!(cse[0].id, id);

        assert_eq!(repo.get(id).await.unwrap().name, "Dr. Rao");
        assert!(matches!(repo.get(id + 100).await, Err(DbError::NotFound { .. })));
    }
}
