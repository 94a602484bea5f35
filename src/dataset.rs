use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// One row of the student performance dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    #[serde(rename = "Student_ID")]
    pub student_id: String,
    #[serde(rename = "First_Name")]
    pub first_name: String,
    #[serde(rename = "Last_Name")]
    pub last_name: String,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Gender")]
    pub gender: Option<String>,
    #[serde(rename = "Age")]
    pub age: Option<f64>,
    #[serde(rename = "Department")]
    pub department: String,
    #[serde(rename = "Attendance (%)")]
    pub attendance: Option<f64>,
    #[serde(rename = "Midterm_Score")]
    pub midterm_score: Option<f64>,
    #[serde(rename = "Final_Score")]
    pub final_score: Option<f64>,
    #[serde(rename = "Assignments_Avg")]
    pub assignments_avg: Option<f64>,
    #[serde(rename = "Quizzes_Avg")]
    pub quizzes_avg: Option<f64>,
    #[serde(rename = "Participation_Score")]
    pub participation_score: Option<f64>,
    #[serde(rename = "Projects_Score")]
    pub projects_score: Option<f64>,
    #[serde(rename = "Total_Score", default)]
    pub total_score: Option<f64>,
    #[serde(rename = "Grade")]
    pub grade: String,
    #[serde(rename = "Study_Hours_per_Week")]
    pub study_hours_per_week: Option<f64>,
    #[serde(rename = "Extracurricular_Activities", default)]
    pub extracurricular_activities: Option<String>,
    #[serde(rename = "Internet_Access_at_Home", default)]
    pub internet_access_at_home: Option<String>,
    #[serde(rename = "Parent_Education_Level")]
    pub parent_education_level: Option<String>,
    #[serde(rename = "Family_Income_Level")]
    pub family_income_level: Option<String>,
    #[serde(rename = "Stress_Level (1-10)")]
    pub stress_level: Option<f64>,
    #[serde(rename = "Sleep_Hours_per_Night")]
    pub sleep_hours_per_night: Option<f64>,
}

impl StudentRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericalColumn {
    Age,
    Attendance,
    MidtermScore,
    FinalScore,
    AssignmentsAvg,
    QuizzesAvg,
    ParticipationScore,
    ProjectsScore,
    StudyHoursPerWeek,
    StressLevel,
    SleepHoursPerNight,
}

impl NumericalColumn {
    pub const ALL: [Self; 11] = [
        Self::Age,
        Self::Attendance,
        Self::MidtermScore,
        Self::FinalScore,
        Self::AssignmentsAvg,
        Self::QuizzesAvg,
        Self::ParticipationScore,
        Self::ProjectsScore,
        Self::StudyHoursPerWeek,
        Self::StressLevel,
        Self::SleepHoursPerNight,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Self::Age => "Age",
            Self::Attendance => "Attendance (%)",
            Self::MidtermScore => "Midterm_Score",
            Self::FinalScore => "Final_Score",
            Self::AssignmentsAvg => "Assignments_Avg",
            Self::QuizzesAvg => "Quizzes_Avg",
            Self::ParticipationScore => "Participation_Score",
            Self::ProjectsScore => "Projects_Score",
            Self::StudyHoursPerWeek => "Study_Hours_per_Week",
            Self::StressLevel => "Stress_Level (1-10)",
            Self::SleepHoursPerNight => "Sleep_Hours_per_Night",
        }
    }

    pub fn value(self, record: &StudentRecord) -> Option<f64> {
        match self {
            Self::Age => record.age,
            Self::Attendance => record.attendance,
            Self::MidtermScore => record.midterm_score,
            Self::FinalScore => record.final_score,
            Self::AssignmentsAvg => record.assignments_avg,
            Self::QuizzesAvg => record.quizzes_avg,
            Self::ParticipationScore => record.participation_score,
            Self::ProjectsScore => record.projects_score,
            Self::StudyHoursPerWeek => record.study_hours_per_week,
            Self::StressLevel => record.stress_level,
            Self::SleepHoursPerNight => record.sleep_hours_per_night,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoricalColumn {
    Gender,
    Department,
    ParentEducationLevel,
    FamilyIncomeLevel,
}

impl CategoricalColumn {
    pub const ALL: [Self; 4] = [
        Self::Gender,
        Self::Department,
        Self::ParentEducationLevel,
        Self::FamilyIncomeLevel,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Self::Gender => "Gender",
            Self::Department => "Department",
            Self::ParentEducationLevel => "Parent_Education_Level",
            Self::FamilyIncomeLevel => "Family_Income_Level",
        }
    }

    pub fn value(self, record: &StudentRecord) -> Option<&str> {
        match self {
            Self::Gender => record.gender.as_deref(),
            Self::Department => Some(record.department.as_str()),
            Self::ParentEducationLevel => record.parent_education_level.as_deref(),
            Self::FamilyIncomeLevel => record.family_income_level.as_deref(),
        }
    }
}

/// Feature names in encoded-vector order: numerical columns, then categorical codes.
pub fn feature_names() -> Vec<String> {
    NumericalColumn::ALL
        .iter()
        .map(|c| c.header().to_string())
        .chain(
            CategoricalColumn::ALL
                .iter()
                .map(|c| format!("{}_encoded", c.header())),
        )
        .collect()
}

const IDENTITY_HEADERS: [&str; 6] = [
    "Student_ID",
    "First_Name",
    "Last_Name",
    "Email",
    "Department",
    "Grade",
];

fn required_headers() -> Vec<&'static str> {
    let mut headers: Vec<&'static str> = IDENTITY_HEADERS.to_vec();
    headers.extend(NumericalColumn::ALL.iter().map(|c| c.header()));
    headers.extend(
        CategoricalColumn::ALL
            .iter()
            .map(|c| c.header())
            .filter(|h| *h != "Department"),
    );
    headers
}

/// Read the dataset CSV into memory.
///
/// Every identity and feature header must be present. Feature cells may be
/// empty; identity cells may not. Numeric cells must be finite.
pub fn load_dataset(path: &Path) -> Result<Vec<StudentRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| PipelineError::data_source(path, e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::data_source(path, e.to_string()))?
        .clone();

    let missing: Vec<&str> = required_headers()
        .into_iter()
        .filter(|required| !headers.iter().any(|h| h == *required))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::data_source(
            path,
            format!("missing required columns: {}", missing.join(", ")),
        ));
    }

    let mut records = Vec::new();
    for (index, result) in reader.deserialize::<StudentRecord>().enumerate() {
        // header is line 1
        let line = index + 2;
        let record =
            result.map_err(|e| PipelineError::data_source(path, format!("line {line}: {e}")))?;

        let empty_identity = [
            ("Student_ID", &record.student_id),
            ("First_Name", &record.first_name),
            ("Last_Name", &record.last_name),
            ("Email", &record.email),
            ("Department", &record.department),
            ("Grade", &record.grade),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());
        if let Some((column, _)) = empty_identity {
            return Err(PipelineError::data_source(
                path,
                format!("line {line}: empty value in column {column}"),
            ));
        }

        let non_finite = NumericalColumn::ALL
            .iter()
            .find(|column| column.value(&record).is_some_and(|v| !v.is_finite()));
        if let Some(column) = non_finite {
            return Err(PipelineError::data_source(
                path,
                format!("line {line}: column {} is not finite", column.header()),
            ));
        }

        records.push(record);
    }

    tracing::info!(
        "Loaded {} student rows from '{}'",
        records.len(),
        path.display()
    );
    Ok(records)
}

pub fn find_record<'a>(records: &'a [StudentRecord], student_id: &str) -> Option<&'a StudentRecord> {
    records.iter().find(|r| r.student_id == student_id)
}
