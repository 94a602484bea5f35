use std::str::FromStr;

use anyhow::Context;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqlitePool};

use crate::dataset::StudentRecord;
use crate::models::{
    CourseScore, ImportSummary, NewStudent, PerformanceRecord, SleepPerformance, Student,
};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url '{database_url}'"))?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to open SQLite database")
}

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert the student unless the id already exists.
/// Returns whether a row was inserted.
pub async fn insert_student_if_absent<'e, E>(executor: E, student: &NewStudent) -> anyhow::Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO students (student_id, full_name, email, department, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (student_id) DO NOTHING
        "#,
    )
    .bind(&student.student_id)
    .bind(&student.full_name)
    .bind(&student.email)
    .bind(&student.department)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn upsert_performance<'e, E>(executor: E, performance: &PerformanceRecord) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO student_performance
        (student_id, attendance, midterm_score, final_score, assignments_avg, quizzes_avg,
         participation_score, projects_score, study_hours_per_week, stress_level,
         sleep_hours_per_night, total_score, grade, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT (student_id) DO UPDATE
        SET attendance = excluded.attendance,
            midterm_score = excluded.midterm_score,
            final_score = excluded.final_score,
            assignments_avg = excluded.assignments_avg,
            quizzes_avg = excluded.quizzes_avg,
            participation_score = excluded.participation_score,
            projects_score = excluded.projects_score,
            study_hours_per_week = excluded.study_hours_per_week,
            stress_level = excluded.stress_level,
            sleep_hours_per_night = excluded.sleep_hours_per_night,
            total_score = excluded.total_score,
            grade = excluded.grade,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&performance.student_id)
    .bind(performance.attendance)
    .bind(performance.midterm_score)
    .bind(performance.final_score)
    .bind(performance.assignments_avg)
    .bind(performance.quizzes_avg)
    .bind(performance.participation_score)
    .bind(performance.projects_score)
    .bind(performance.study_hours_per_week)
    .bind(performance.stress_level)
    .bind(performance.sleep_hours_per_night)
    .bind(performance.total_score)
    .bind(&performance.grade)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(())
}

/// Import dataset rows in one transaction: students are inserted once,
/// performance rows are replaced.
pub async fn import_records(pool: &SqlitePool, records: &[StudentRecord]) -> anyhow::Result<ImportSummary> {
    tracing::info!("Importing {} student rows", records.len());
    let mut tx = pool.begin().await?;
    let mut summary = ImportSummary::default();

    for record in records {
        let inserted = insert_student_if_absent(&mut *tx, &NewStudent::from(record))
            .await
            .with_context(|| format!("failed to insert student {}", record.student_id))?;
        if inserted {
            summary.students_inserted += 1;
        } else {
            summary.students_skipped += 1;
        }

        upsert_performance(&mut *tx, &PerformanceRecord::from(record))
            .await
            .with_context(|| format!("failed to store performance for {}", record.student_id))?;
        summary.performance_upserted += 1;
    }

    tx.commit().await?;
    tracing::info!(
        "Import finished: {} new students, {} already present",
        summary.students_inserted,
        summary.students_skipped
    );
    Ok(summary)
}

fn student_from_row(row: &SqliteRow) -> Student {
    Student {
        student_id: row.get("student_id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        department: row.get("department"),
        created_at: row.get("created_at"),
    }
}

pub async fn fetch_student(pool: &SqlitePool, student_id: &str) -> anyhow::Result<Option<Student>> {
    let row = sqlx::query(
        "SELECT student_id, full_name, email, department, created_at \
         FROM students WHERE student_id = ?1",
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(student_from_row))
}

pub async fn list_students(pool: &SqlitePool) -> anyhow::Result<Vec<Student>> {
    let rows = sqlx::query(
        "SELECT student_id, full_name, email, department, created_at \
         FROM students ORDER BY student_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(student_from_row).collect())
}

pub async fn fetch_performance(
    pool: &SqlitePool,
    student_id: &str,
) -> anyhow::Result<Option<PerformanceRecord>> {
    let row = sqlx::query("SELECT * FROM student_performance WHERE student_id = ?1")
        .bind(student_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| PerformanceRecord {
        student_id: row.get("student_id"),
        attendance: row.get("attendance"),
        midterm_score: row.get("midterm_score"),
        final_score: row.get("final_score"),
        assignments_avg: row.get("assignments_avg"),
        quizzes_avg: row.get("quizzes_avg"),
        participation_score: row.get("participation_score"),
        projects_score: row.get("projects_score"),
        study_hours_per_week: row.get("study_hours_per_week"),
        stress_level: row.get("stress_level"),
        sleep_hours_per_night: row.get("sleep_hours_per_night"),
        total_score: row.get("total_score"),
        grade: row.get("grade"),
    }))
}

pub async fn add_course_score(
    pool: &SqlitePool,
    student_id: &str,
    course: &str,
    score: f64,
) -> anyhow::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO course_scores (student_id, course, score, recorded_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(student_id)
    .bind(course)
    .bind(score)
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("cannot record score for student {student_id}"))?;

    Ok(result.last_insert_rowid())
}

pub async fn fetch_course_scores(pool: &SqlitePool, student_id: &str) -> anyhow::Result<Vec<CourseScore>> {
    let rows = sqlx::query(
        "SELECT id, student_id, course, score, recorded_at \
         FROM course_scores WHERE student_id = ?1 ORDER BY id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mut scores = Vec::new();
    for row in rows {
        scores.push(CourseScore {
            id: row.get("id"),
            student_id: row.get("student_id"),
            course: row.get("course"),
            score: row.get("score"),
            recorded_at: row.get("recorded_at"),
        });
    }
    Ok(scores)
}

pub async fn fetch_sleep_performance(pool: &SqlitePool) -> anyhow::Result<Vec<SleepPerformance>> {
    let rows = sqlx::query(
        "SELECT sleep_hours_per_night, total_score FROM student_performance \
         WHERE sleep_hours_per_night IS NOT NULL AND total_score IS NOT NULL \
         ORDER BY student_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SleepPerformance {
            sleep_hours: row.get("sleep_hours_per_night"),
            total_score: row.get("total_score"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::synthetic_records;

    async fn memory_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        init_db(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn duplicate_student_is_skipped_not_an_error() {
        let pool = memory_pool().await;
        let record = &synthetic_records(&[("CS", 1)], 1)[0];
        let student = NewStudent::from(record);

        assert!(insert_student_if_absent(&pool, &student).await.unwrap());
        let renamed = NewStudent {
            full_name: "Someone Else".to_string(),
            ..student.clone()
        };
        assert!(!insert_student_if_absent(&pool, &renamed).await.unwrap());

        let stored = fetch_student(&pool, &student.student_id).await.unwrap().unwrap();
        assert_eq!(stored.full_name, student.full_name);
    }

    #[tokio::test]
    async fn import_is_idempotent_and_replaces_performance() {
        let pool = memory_pool().await;
        let mut records = synthetic_records(&[("CS", 3), ("Business", 2)], 1);

        let first = import_records(&pool, &records).await.unwrap();
        assert_eq!(first.students_inserted, 5);
        assert_eq!(first.students_skipped, 0);

        records[0].total_score = Some(12.5);
        let second = import_records(&pool, &records).await.unwrap();
        assert_eq!(second.students_inserted, 0);
        assert_eq!(second.students_skipped, 5);
        assert_eq!(second.performance_upserted, 5);

        let performance = fetch_performance(&pool, &records[0].student_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(performance.total_score, Some(12.5));
        assert_eq!(list_students(&pool).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn unknown_student_has_no_rows() {
        let pool = memory_pool().await;
        assert!(fetch_student(&pool, "nobody").await.unwrap().is_none());
        assert!(fetch_performance(&pool, "nobody").await.unwrap().is_none());
        assert!(fetch_course_scores(&pool, "nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn course_scores_belong_to_known_students() {
        let pool = memory_pool().await;
        let records = synthetic_records(&[("CS", 1)], 1);
        import_records(&pool, &records).await.unwrap();
        let id = &records[0].student_id;

        add_course_score(&pool, id, "Algorithms", 88.0).await.unwrap();
        add_course_score(&pool, id, "Data Structures", 91.5).await.unwrap();
        let scores = fetch_course_scores(&pool, id).await.unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].course, "Algorithms");

        assert!(add_course_score(&pool, "ghost", "Algorithms", 50.0).await.is_err());
    }

    #[tokio::test]
    async fn sleep_performance_skips_incomplete_rows() {
        let pool = memory_pool().await;
        let mut records = synthetic_records(&[("CS", 4)], 1);
        records[1].sleep_hours_per_night = None;
        import_records(&pool, &records).await.unwrap();

        let pairs = fetch_sleep_performance(&pool).await.unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].sleep_hours, records[0].sleep_hours_per_night.unwrap());
    }
}
