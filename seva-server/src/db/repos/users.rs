//! User repository
//!
//! Accounts for the three portal roles. Authentication itself lives outside
//! this layer; only lookups and creation are needed here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::{Conditions, Database, DbError, FindOptions, OrderBy, Row};
use crate::fields;

const TABLE: &str = "users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Staff,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Teacher, Role::Staff];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Staff => "staff",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            "staff" => Ok(Self::Staff),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub created_at: Option<String>,
}

impl User {
    fn from_row(row: &Row) -> Result<Self, DbError> {
        let role = row.text("role")?;
        Ok(Self {
            id: row.i64("id")?,
            name: row.text("name")?,
            email: row.text("email")?,
            role: role.parse().map_err(|reason| DbError::Decode {
                column: "role".to_string(),
                reason,
            })?,
            roll_number: row.opt_text("roll_number")?,
            department: row.opt_text("department")?,
            created_at: row.opt_text("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub roll_number: Option<String>,
    pub department: Option<String>,
}

pub struct UserRepo<'a> {
    db: &'a Database,
}

impl<'a> UserRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Emails are matched case-insensitively by storing them lower-cased.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let conditions = Conditions::new()
            .eq("email", email.trim().to_lowercase())
            .is_null("deleted_at");
        self.db
            .find_where(TABLE, &conditions)
            .await?
            .as_ref()
            .map(User::from_row)
            .transpose()
    }

    pub async fn list_by_role(&self, role: Role) -> Result<Vec<User>, DbError> {
        let conditions = Conditions::new().eq("role", role.as_str()).is_null("deleted_at");
        let options = FindOptions::new().order(OrderBy::asc("name"));
        self.db
            .find_all(TABLE, &conditions, &options)
            .await?
            .iter()
            .map(User::from_row)
            .collect()
    }

    pub async fn get(&self, id: i64) -> Result<User, DbError> {
        let row = self.db.find(TABLE, id).await?.ok_or_else(|| DbError::NotFound {
            resource: "user",
            id: id.to_string(),
        })?;
        User::from_row(&row)
    }

    /// Duplicate emails are a conflict, not a query failure.
    pub async fn create(&self, user: NewUser) -> Result<User, DbError> {
        let email = user.email.trim().to_lowercase();
        if self.find_by_email(&email).await?.is_some() {
            return Err(DbError::Conflict(format!("an account for '{}' already exists", email)));
        }

        let id = self
            .db
            .insert(
                TABLE,
                fields! {
                    "name" => user.name,
                    "email" => email,
                    "role" => user.role.as_str(),
                    "roll_number" => user.roll_number,
                    "department" => user.department,
                },
            )
            .await?;
        tracing::info!(user_id = id, role = %user.role, "user created");
        self.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::portal_db;

    fn student(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            role: Role::Student,
            roll_number: Some("2105123".to_string()),
            department: None,
        }
    }

    #[tokio::test]
    async fn create_and_find_by_email() {
        let db = portal_db().await;
        let repo = UserRepo::new(&db);

        let created = repo.create(student("Asha", "Asha@KIIT.ac.in ")).await.unwrap();
        assert_eq!(created.email, "asha@kiit.ac.in");
        assert_eq!(created.role, Role::Student);
        assert!(created.created_at.is_some());

        let found = repo.find_by_email("ASHA@kiit.ac.in").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(repo.find_by_email("nobody@kiit.ac.in").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let db = portal_db().await;
        let repo = UserRepo::new(&db);
        repo.create(student("Asha", "asha@kiit.ac.in")).await.unwrap();

        let err = repo.create(student("Other", "asha@kiit.ac.in")).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_by_role_sorted_by_name() {
        let db = portal_db().await;
        let repo = UserRepo::new(&db);
        repo.create(student("Zoya", "z@kiit.ac.in")).await.unwrap();
        repo.create(student("Arjun", "a@kiit.ac.in")).await.unwrap();
        repo.create(NewUser {
            role: Role::Staff,
            ..student("Meera", "m@kiit.ac.in")
        })
        .await
        .unwrap();

        let students = repo.list_by_role(Role::Student).await.unwrap();
        let names: Vec<&str> = students.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Arjun", "Zoya"]);
        assert_eq!(repo.list_by_role(Role::Staff).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let db = portal_db().await;
        let err = UserRepo::new(&db).get(42).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { resource: "user", .. }));
    }
}
