use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dataset::StudentRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub student_id: String,
    pub full_name: String,
    pub email: String,
    pub department: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStudent {
    pub student_id: String,
    pub full_name: String,
    pub email: String,
    pub department: String,
}

impl From<&StudentRecord> for NewStudent {
    fn from(record: &StudentRecord) -> Self {
        Self {
            student_id: record.student_id.clone(),
            full_name: record.full_name(),
            email: record.email.clone(),
            department: record.department.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceRecord {
    pub student_id: String,
    pub attendance: Option<f64>,
    pub midterm_score: Option<f64>,
    pub final_score: Option<f64>,
    pub assignments_avg: Option<f64>,
    pub quizzes_avg: Option<f64>,
    pub participation_score: Option<f64>,
    pub projects_score: Option<f64>,
    pub study_hours_per_week: Option<f64>,
    pub stress_level: Option<i64>,
    pub sleep_hours_per_night: Option<f64>,
    pub total_score: Option<f64>,
    pub grade: String,
}

impl From<&StudentRecord> for PerformanceRecord {
    fn from(record: &StudentRecord) -> Self {
        Self {
            student_id: record.student_id.clone(),
            attendance: record.attendance,
            midterm_score: record.midterm_score,
            final_score: record.final_score,
            assignments_avg: record.assignments_avg,
            quizzes_avg: record.quizzes_avg,
            participation_score: record.participation_score,
            projects_score: record.projects_score,
            study_hours_per_week: record.study_hours_per_week,
            stress_level: record.stress_level.map(|s| s.round() as i64),
            sleep_hours_per_night: record.sleep_hours_per_night,
            total_score: record.total_score,
            grade: record.grade.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseScore {
    pub id: i64,
    pub student_id: String,
    pub course: String,
    pub score: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SleepPerformance {
    pub sleep_hours: f64,
    pub total_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub students_inserted: usize,
    pub students_skipped: usize,
    pub performance_upserted: usize,
}
