//! Teacher appointment bookings
//!
//! A slot is taken while a booking for it is pending or confirmed. Creation
//! checks and inserts inside one transaction so a conflict leaves nothing
//! behind.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::{Conditions, Database, DbError, FindOptions, OrderBy, Paginated, Pagination, Row, Transaction};
use crate::fields;

const TABLE: &str = "bookings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Statuses that hold a teacher's slot.
    pub fn holds_slot(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    fn holding() -> [&'static str; 2] {
        [Self::Pending.as_str(), Self::Confirmed.as_str()]
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown booking status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Booking {
    pub id: i64,
    pub student_id: i64,
    pub teacher_id: i64,
    pub booking_date: NaiveDate,
    pub time_slot: String,
    pub purpose: Option<String>,
    pub status: BookingStatus,
    pub created_at: Option<String>,
}

impl Booking {
    fn from_row(row: &Row) -> Result<Self, DbError> {
        let status = row.text("status")?;
        Ok(Self {
            id: row.i64("id")?,
            student_id: row.i64("student_id")?,
            teacher_id: row.i64("teacher_id")?,
            booking_date: row.date("booking_date")?,
            time_slot: row.text("time_slot")?,
            purpose: row.opt_text("purpose")?,
            status: status.parse().map_err(|reason| DbError::Decode {
                column: "status".to_string(),
                reason,
            })?,
            created_at: row.opt_text("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub student_id: i64,
    pub teacher_id: i64,
    pub booking_date: NaiveDate,
    pub time_slot: String,
    pub purpose: Option<String>,
}

pub struct BookingRepo<'a> {
    db: &'a Database,
}

impl<'a> BookingRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: i64) -> Result<Booking, DbError> {
        let row = self.db.find(TABLE, id).await?.ok_or_else(|| DbError::NotFound {
            resource: "booking",
            id: id.to_string(),
        })?;
        Booking::from_row(&row)
    }

    /// A student's bookings, newest date first.
    pub async fn for_student(&self, student_id: i64) -> Result<Vec<Booking>, DbError> {
        let options = FindOptions::new()
            .order(OrderBy::desc("booking_date"))
            .order(OrderBy::desc("id"));
        self.collect(&Conditions::new().eq("student_id", student_id), &options)
            .await
    }

    /// A teacher's schedule for one day, by slot.
    pub async fn for_teacher_on(&self, teacher_id: i64, date: NaiveDate) -> Result<Vec<Booking>, DbError> {
        let conditions = Conditions::new()
            .eq("teacher_id", teacher_id)
            .eq("booking_date", date);
        let options = FindOptions::new().order(OrderBy::asc("time_slot"));
        self.collect(&conditions, &options).await
    }

    pub async fn has_conflict(&self, teacher_id: i64, date: NaiveDate, time_slot: &str) -> Result<bool, DbError> {
        self.db.exists(TABLE, &slot_conditions(teacher_id, date, time_slot)).await
    }

    /// Book a slot. Fails with [`DbError::Conflict`] when it is already held.
    pub async fn create(&self, booking: NewBooking) -> Result<Booking, DbError> {
        let mut tx = self.db.begin_transaction().await?;

        match insert_unless_taken(&mut tx, &booking).await {
            Ok(id) => {
                tx.commit().await?;
                tracing::info!(
                    booking_id = id,
                    teacher_id = booking.teacher_id,
                    date = %booking.booking_date,
                    "booking created"
                );
                self.get(id).await
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "rollback after failed booking failed");
                }
                Err(e)
            }
        }
    }

    pub async fn update_status(&self, id: i64, status: BookingStatus) -> Result<(), DbError> {
        let updated = self
            .db
            .update(
                TABLE,
                fields! { "status" => status.as_str() },
                &Conditions::new().eq("id", id),
            )
            .await?;
        if updated == 0 {
            return Err(DbError::NotFound {
                resource: "booking",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Cancel a student's own booking while it still holds its slot.
    pub async fn cancel(&self, id: i64, student_id: i64) -> Result<(), DbError> {
        let owned = Conditions::new().eq("id", id).eq("student_id", student_id);
        let cancellable = Conditions::new()
            .eq("id", id)
            .eq("student_id", student_id)
            .any_of("status", BookingStatus::holding());

        let updated = self
            .db
            .update(
                TABLE,
                fields! { "status" => BookingStatus::Cancelled.as_str() },
                &cancellable,
            )
            .await?;
        if updated > 0 {
            return Ok(());
        }

        if self.db.exists(TABLE, &owned).await? {
            Err(DbError::Conflict(format!("booking {} can no longer be cancelled", id)))
        } else {
            Err(DbError::NotFound {
                resource: "booking",
                id: id.to_string(),
            })
        }
    }

    /// One page of a student's bookings, newest date first.
    pub async fn page_for_student(&self, student_id: i64, page: Pagination) -> Result<Paginated<Booking>, DbError> {
        self.db
            .paginate(
                TABLE,
                &Conditions::new().eq("student_id", student_id),
                &[OrderBy::desc("booking_date"), OrderBy::desc("id")],
                page,
            )
            .await?
            .try_map(|row| Booking::from_row(&row))
    }

    async fn collect(&self, conditions: &Conditions, options: &FindOptions) -> Result<Vec<Booking>, DbError> {
        self.db
            .find_all(TABLE, conditions, options)
            .await?
            .iter()
            .map(Booking::from_row)
            .collect()
    }
}

async fn insert_unless_taken(tx: &mut Transaction<'_>, booking: &NewBooking) -> Result<i64, DbError> {
    let slot = slot_conditions(booking.teacher_id, booking.booking_date, &booking.time_slot);
    if tx.exists(TABLE, &slot).await? {
        return Err(DbError::Conflict(format!(
            "slot {} on {} is already booked",
            booking.time_slot, booking.booking_date
        )));
    }

    tx.insert(
        TABLE,
        fields! {
            "student_id" => booking.student_id,
            "teacher_id" => booking.teacher_id,
            "booking_date" => booking.booking_date,
            "time_slot" => booking.time_slot.as_str(),
            "purpose" => booking.purpose.clone(),
            "status" => BookingStatus::Pending.as_str(),
        },
    )
    .await
}

fn slot_conditions(teacher_id: i64, date: NaiveDate, time_slot: &str) -> Conditions {
    Conditions::new()
        .eq("teacher_id", teacher_id)
        .eq("booking_date", date)
        .eq("time_slot", time_slot)
        .any_of("status", BookingStatus::holding())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::portal_db;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn request(student_id: i64, day: &str, slot: &str) -> NewBooking {
        NewBooking {
            student_id,
            teacher_id: 7,
            booking_date: date(day),
            time_slot: slot.to_string(),
            purpose: Some("project review".to_string()),
        }
    }

    #[tokio::test]
    async fn create_books_a_free_slot() {
        let db = portal_db().await;
        let repo = BookingRepo::new(&db);

        let booking = repo.create(request(1, "2024-03-11", "10:00-10:30")).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.booking_date, date("2024-03-11"));
        assert_eq!(db.transaction_depth(), 0);
        assert!(repo.has_conflict(7, date("2024-03-11"), "10:00-10:30").await.unwrap());
    }

    #[tokio::test]
    async fn taken_slot_is_a_conflict_and_rolls_back() {
        let db = portal_db().await;
        let repo = BookingRepo::new(&db);
        repo.create(request(1, "2024-03-11", "10:00-10:30")).await.unwrap();

        let err = repo.create(request(2, "2024-03-11", "10:00-10:30")).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        assert_eq!(db.transaction_depth(), 0);
        assert!(repo.for_student(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn simultaneous_requests_book_a_slot_once() {
        let db = portal_db().await;
        let attempts: Vec<_> = (1..=3)
            .map(|student| {
                let db = db.clone();
                tokio::spawn(async move {
                    BookingRepo::new(&db)
                        .create(request(student, "2024-03-13", "15:00-15:30"))
                        .await
                })
            })
            .collect();

        let mut booked = 0;
        let mut conflicts = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => booked += 1,
                Err(DbError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((booked, conflicts), (1, 2));
        assert_eq!(db.transaction_depth(), 0);
    }

    #[tokio::test]
    async fn student_history_pages() {
        let db = portal_db().await;
        let repo = BookingRepo::new(&db);
        for (day, slot) in [("2024-03-10", "09:00-09:30"), ("2024-03-11", "09:00-09:30"), ("2024-03-12", "09:00-09:30")] {
            repo.create(request(1, day, slot)).await.unwrap();
        }

        let first = repo.page_for_student(1, Pagination::new(1, 2)).await.unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(first.total_pages(), 2);
        assert!(first.has_next());
        assert_eq!(first.items[0].booking_date, date("2024-03-12"));

        let last = repo.page_for_student(1, Pagination::new(2, 2)).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].booking_date, date("2024-03-10"));
        assert!(!last.has_next());
        assert!(last.has_prev());
    }

    #[tokio::test]
    async fn cancelled_slot_can_be_rebooked() {
        let db = portal_db().await;
        let repo = BookingRepo::new(&db);
        let first = repo.create(request(1, "2024-03-11", "11:00-11:30")).await.unwrap();

        repo.cancel(first.id, 1).await.unwrap();
        assert_eq!(repo.get(first.id).await.unwrap().status, BookingStatus::Cancelled);

        let second = repo.create(request(2, "2024-03-11", "11:00-11:30")).await.unwrap();
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn cancel_checks_owner_and_state() {
        let db = portal_db().await;
        let repo = BookingRepo::new(&db);
        let booking = repo.create(request(1, "2024-03-12", "09:00-09:30")).await.unwrap();

        assert!(matches!(repo.cancel(booking.id, 99).await, Err(DbError::NotFound { .. })));

        repo.update_status(booking.id, BookingStatus::Completed).await.unwrap();
        assert!(matches!(repo.cancel(booking.id, 1).await, Err(DbError::Conflict(_))));
    }

    #[tokio::test]
    async fn listings_are_ordered() {
        let db = portal_db().await;
        let repo = BookingRepo::new(&db);
        repo.create(request(1, "2024-03-10", "14:00-14:30")).await.unwrap();
        repo.create(request(1, "2024-03-12", "09:00-09:30")).await.unwrap();
        repo.create(request(2, "2024-03-12", "08:00-08:30")).await.unwrap();

        let mine: Vec<NaiveDate> = repo
            .for_student(1)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.booking_date)
            .collect();
        assert_eq!(mine, vec![date("2024-03-12"), date("2024-03-10")]);

        let day: Vec<String> = repo
            .for_teacher_on(7, date("2024-03-12"))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.time_slot)
            .collect();
        assert_eq!(day, vec!["08:00-08:30", "09:00-09:30"]);
    }

    #[tokio::test]
    async fn update_status_on_missing_booking() {
        let db = portal_db().await;
        let err = BookingRepo::new(&db)
            .update_status(404, BookingStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { resource: "booking", .. }));
    }

    #[test]
    fn only_open_bookings_hold_slots() {
        assert!(BookingStatus::Pending.holds_slot());
        assert!(BookingStatus::Confirmed.holds_slot());
        assert!(!BookingStatus::Cancelled.holds_slot());
        assert_eq!("completed".parse::<BookingStatus>(), Ok(BookingStatus::Completed));
    }
}
