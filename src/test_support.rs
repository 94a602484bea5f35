use std::path::Path;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::dataset::StudentRecord;

pub(crate) const GRADES: [&str; 5] = ["A", "B", "C", "D", "F"];

/// Deterministic student rows whose scores track their grade band.
pub(crate) fn synthetic_records(departments: &[(&str, usize)], seed: u64) -> Vec<StudentRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let education = ["High School", "Bachelor's", "Master's", "PhD"];
    let income = ["Low", "Medium", "High"];
    let mut records = Vec::new();
    let mut next_id = 1;

    for (department, count) in departments {
        for i in 0..*count {
            let band = i % GRADES.len();
            let base = 92.0 - band as f64 * 11.0;
            let mut score = |spread: f64| base + rng.gen_range(-spread..spread);
            let midterm = score(4.0);
            let final_score = score(4.0);
            let assignments = score(5.0);
            let quizzes = score(5.0);
            let projects = score(5.0);
            let attendance = score(3.0).min(100.0);

            records.push(StudentRecord {
                student_id: format!("S{next_id:04}"),
                first_name: format!("First{next_id}"),
                last_name: format!("Last{next_id}"),
                email: format!("student{next_id}@university.com"),
                gender: Some(if i % 2 == 0 { "Female" } else { "Male" }.to_string()),
                age: Some(rng.gen_range(18..25) as f64),
                department: department.to_string(),
                attendance: Some(attendance),
                midterm_score: Some(midterm),
                final_score: Some(final_score),
                assignments_avg: Some(assignments),
                quizzes_avg: Some(quizzes),
                participation_score: Some(rng.gen_range(0.0..10.0)),
                projects_score: Some(projects),
                total_score: Some((midterm + final_score + assignments + quizzes + projects) / 5.0),
                grade: GRADES[band].to_string(),
                study_hours_per_week: Some(rng.gen_range(5.0..30.0)),
                extracurricular_activities: Some(if i % 3 == 0 { "Yes" } else { "No" }.to_string()),
                internet_access_at_home: Some("Yes".to_string()),
                parent_education_level: Some(education[i % education.len()].to_string()),
                family_income_level: Some(income[i % income.len()].to_string()),
                stress_level: Some(rng.gen_range(1..=10) as f64),
                sleep_hours_per_night: Some(rng.gen_range(4.0..9.0)),
            });
            next_id += 1;
        }
    }

    records
}

pub(crate) fn write_csv(path: &Path, records: &[StudentRecord]) {
    let mut writer = csv::Writer::from_path(path).expect("create fixture csv");
    for record in records {
        writer.serialize(record).expect("write fixture row");
    }
    writer.flush().expect("flush fixture csv");
}
