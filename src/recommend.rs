use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogCourse, CourseCatalog};

pub const DEFAULT_TOP_N: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    /// Listed under the requested department.
    Catalog,
    /// Department not in the catalog.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSuggestion {
    pub course_name: String,
    pub credit_units: u32,
    pub source_tag: SourceTag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub student_id: String,
    pub department: String,
    pub courses: Vec<CourseSuggestion>,
}

/// Catalog lookup keyed by department.
///
/// The ranking does not consult the trained classifier; every student in a
/// department gets the same courses.
#[derive(Debug, Clone)]
pub struct Recommender {
    catalog: CourseCatalog,
    default_top_n: usize,
}

impl Recommender {
    pub fn new(catalog: CourseCatalog, default_top_n: usize) -> Self {
        Self {
            catalog,
            default_top_n,
        }
    }

    pub fn default_top_n(&self) -> usize {
        self.default_top_n
    }

    /// First `top_n` courses for `department`, or of the fallback list when the
    /// department is unknown.
    pub fn recommend(&self, department: &str, top_n: usize) -> Vec<CourseSuggestion> {
        let (courses, source_tag) = match self.catalog.courses_for(department) {
            Some(courses) => (courses, SourceTag::Catalog),
            None => (self.catalog.fallback.as_slice(), SourceTag::Fallback),
        };
        courses
            .iter()
            .take(top_n)
            .map(|course: &CatalogCourse| CourseSuggestion {
                course_name: course.name.clone(),
                credit_units: course.credit_units,
                source_tag,
            })
            .collect()
    }

    pub fn recommend_for(&self, student_id: &str, department: &str, top_n: usize) -> Recommendation {
        Recommendation {
            student_id: student_id.to_string(),
            department: department.to_string(),
            courses: self.recommend(department, top_n),
        }
    }
}
