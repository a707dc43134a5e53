//! Student and staff feedback

use std::time::Duration;

use serde::Serialize;

use crate::db::{Conditions, Database, DbError, FindOptions, OrderBy, Row};
use crate::fields;

const TABLE: &str = "feedback";

pub const FEEDBACK_CATEGORIES: &[&str] = &["academic", "transport", "facilities", "hostel", "other"];

const SUMMARY_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    pub id: i64,
    pub user_id: i64,
    pub category: String,
    pub rating: i64,
    pub subject: String,
    pub message: String,
    pub created_at: Option<String>,
}

impl Feedback {
    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.i64("id")?,
            user_id: row.i64("user_id")?,
            category: row.text("category")?,
            rating: row.i64("rating")?,
            subject: row.text("subject")?,
            message: row.text("message")?,
            created_at: row.opt_text("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub user_id: i64,
    pub category: String,
    pub rating: i64,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub category: String,
    pub count: i64,
    pub average_rating: f64,
}

pub struct FeedbackRepo<'a> {
    db: &'a Database,
}

impl<'a> FeedbackRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn submit(&self, feedback: NewFeedback) -> Result<i64, DbError> {
        if !FEEDBACK_CATEGORIES.contains(&feedback.category.as_str()) {
            return Err(DbError::invalid(format!("unknown feedback category '{}'", feedback.category)));
        }
        if !(1..=5).contains(&feedback.rating) {
            return Err(DbError::invalid(format!("rating {} is outside 1-5", feedback.rating)));
        }

        let id = self
            .db
            .insert(
                TABLE,
                fields! {
                    "user_id" => feedback.user_id,
                    "category" => feedback.category,
                    "rating" => feedback.rating,
                    "subject" => feedback.subject,
                    "message" => feedback.message,
                },
            )
            .await?;
        tracing::info!(feedback_id = id, "feedback submitted");
        Ok(id)
    }

    pub async fn recent(&self, limit: u64) -> Result<Vec<Feedback>, DbError> {
        let options = FindOptions::new()
            .order(OrderBy::desc("created_at"))
            .order(OrderBy::desc("id"))
            .limit(limit);
        self.collect(&Conditions::new().is_null("deleted_at"), &options)
            .await
    }

    pub async fn for_user(&self, user_id: i64) -> Result<Vec<Feedback>, DbError> {
        let conditions = Conditions::new().eq("user_id", user_id).is_null("deleted_at");
        let options = FindOptions::new().order(OrderBy::desc("id"));
        self.collect(&conditions, &options).await
    }

    /// Count and mean rating per category, alphabetical.
    pub async fn summary_by_category(&self) -> Result<Vec<CategorySummary>, DbError> {
        let sql = format!(
            "SELECT category, COUNT(*) AS total, {} AS average_rating FROM feedback \
             WHERE deleted_at IS NULL GROUP BY category ORDER BY category",
            self.db.dialect().float_cast("AVG(rating)")
        );
        self.db
            .fetch_all(&sql, &[], Some(SUMMARY_TTL))
            .await?
            .iter()
            .map(|row| {
                Ok(CategorySummary {
                    category: row.text("category")?,
                    count: row.i64("total")?,
                    average_rating: row.f64("average_rating")?,
                })
            })
            .collect()
    }

    async fn collect(&self, conditions: &Conditions, options: &FindOptions) -> Result<Vec<Feedback>, DbError> {
        self.db
            .find_all(TABLE, conditions, options)
            .await?
            .iter()
            .map(Feedback::from_row)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::portal_db;

    fn note(user_id: i64, category: &str, rating: i64) -> NewFeedback {
        NewFeedback {
            user_id,
            category: category.to_string(),
            rating,
            subject: "Bus timing".to_string(),
            message: "The 8am bus is often late.".to_string(),
        }
    }

    #[tokio::test]
    async fn submit_and_list() {
        let db = portal_db().await;
        let repo = FeedbackRepo::new(&db);
        let first = repo.submit(note(1, "transport", 2)).await.unwrap();
        let second = repo.submit(note(2, "hostel", 4)).await.unwrap();

        let recent = repo.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second);

        let mine = repo.for_user(1).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, first);
    }

    #[tokio::test]
    async fn rejects_unknown_category_and_bad_rating() {
        let db = portal_db().await;
        let repo = FeedbackRepo::new(&db);
        assert!(matches!(
            repo.submit(note(1, "canteen", 3)).await,
            Err(DbError::InvalidOperation(_))
        ));
        assert!(matches!(
            repo.submit(note(1, "academic", 0)).await,
            Err(DbError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn summary_groups_and_averages() {
        let db = portal_db().await;
        let repo = FeedbackRepo::new(&db);
        repo.submit(note(1, "transport", 2)).await.unwrap();
        repo.submit(note(2, "transport", 5)).await.unwrap();
        repo.submit(note(3, "academic", 4)).await.unwrap();

        let summary = repo.summary_by_category().await.unwrap();
        assert_eq!(
            summary,
            vec![
                CategorySummary {
                    category: "academic".to_string(),
                    count: 1,
                    average_rating: 4.0,
                },
                CategorySummary {
                    category: "transport".to_string(),
                    count: 2,
                    average_rating: 3.5,
                },
            ]
        );

        // new feedback invalidates the cached summary
        repo.submit(note(4, "academic", 2)).await.unwrap();
        let summary = repo.summary_by_category().await.unwrap();
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[0].average_rating, 3.0);
    }
}
