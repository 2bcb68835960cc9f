//! Search Tool Set
//!
//! Five narrow tools the agent may call. Each takes one string argument and
//! returns plain text, so a negative result ("the related data is not present
//! in the system") reaches the model as ordinary context instead of an error.

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::search::{read_lines, search_document};
use super::{file_label, Category, DocumentStore};
use crate::types::{ToolCall, ToolDefinition};

/// Suffix shared by every negative result
pub const DATA_NOT_PRESENT: &str = "The related data is not present in the system.";

pub const SEARCH_UNIVERSITY_INFO: &str = "search_university_info";
pub const SEARCH_ACADEMIC_CALENDAR: &str = "search_academic_calendar";
pub const CHECK_IF_DATE_IS_HOLIDAY: &str = "check_if_date_is_holiday";
pub const GET_UNIVERSITY_CONTACT_INFO: &str = "get_university_contact_info";
pub const SEARCH_EDUCATIONAL_RESOURCES: &str = "search_educational_resources";

const CONTACT_HEADER: &str = "[Contact Information]";

/// How a category-wide search labels and reports its results
struct CategorySearch {
    category: Category,
    context_lines: usize,
    label_sources: bool,
    no_files: &'static str,
    no_match: String,
}

#[derive(Debug, Clone)]
pub struct SearchTools {
    store: DocumentStore,
}

impl SearchTools {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Tool schemas bound to tool-capable models
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            definition(
                SEARCH_UNIVERSITY_INFO,
                "Search administrative information files for university policies, procedures, \
                 programs, services, fees, admissions, student services, IT support, campus \
                 facilities, financial aid and contact information.",
                "query",
                "Search query describing what information is needed",
            ),
            definition(
                SEARCH_ACADEMIC_CALENDAR,
                "Search academic files for dates, holidays, deadlines, semester start and end \
                 dates, registration periods, exam schedules, breaks and university closures.",
                "query",
                "Date query, e.g. \"November 1\", \"Thanksgiving\", \"Fall semester start\"",
            ),
            definition(
                CHECK_IF_DATE_IS_HOLIDAY,
                "Check whether a specific date is a university holiday or a day without classes.",
                "date_str",
                "Date to check, e.g. \"November 1\", \"Nov 1\", \"Thanksgiving\"",
            ),
            definition(
                GET_UNIVERSITY_CONTACT_INFO,
                "Get contact information (email, phone) for a university department or office.",
                "department",
                "Name of the department, e.g. \"Bursar\", \"Admissions\", \"IT Help Desk\"",
            ),
            definition(
                SEARCH_EDUCATIONAL_RESOURCES,
                "Search educational resource files for course materials, syllabi, study guides \
                 and learning materials.",
                "query",
                "Search query for educational content",
            ),
        ]
    }

    /// Run the tool named by `call`; unknown tools and bad arguments come back as text
    pub async fn execute(&self, call: &ToolCall) -> String {
        debug!(tool = %call.name, arguments = %call.arguments, "Executing tool");
        match call.name.as_str() {
            SEARCH_UNIVERSITY_INFO => {
                self.search_university_info(&argument_text(&call.arguments, "query"))
                    .await
            }
            SEARCH_ACADEMIC_CALENDAR => {
                self.search_academic_calendar(&argument_text(&call.arguments, "query"))
                    .await
            }
            CHECK_IF_DATE_IS_HOLIDAY => {
                self.check_if_date_is_holiday(&argument_text(&call.arguments, "date_str"))
                    .await
            }
            GET_UNIVERSITY_CONTACT_INFO => {
                self.get_university_contact_info(&argument_text(&call.arguments, "department"))
                    .await
            }
            SEARCH_EDUCATIONAL_RESOURCES => {
                self.search_educational_resources(&argument_text(&call.arguments, "query"))
                    .await
            }
            other => {
                warn!(tool = %other, "Model requested an unknown tool");
                format!(
                    "Error: unknown tool '{}'. Available tools: {}",
                    other,
                    Self::definitions()
                        .iter()
                        .map(|d| d.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
        }
    }

    pub async fn search_university_info(&self, query: &str) -> String {
        self.search_category(
            query,
            CategorySearch {
                category: Category::Administrative,
                context_lines: 5,
                label_sources: true,
                no_files: "No administrative information files found.",
                no_match: format!("No relevant administrative information found for query: {}.", query),
            },
        )
        .await
    }

    pub async fn search_academic_calendar(&self, query: &str) -> String {
        self.search_category(
            query,
            CategorySearch {
                category: Category::Academic,
                context_lines: 3,
                label_sources: true,
                no_files: "No academic calendar files found.",
                no_match: format!("No relevant academic information found for query: {}.", query),
            },
        )
        .await
    }

    pub async fn check_if_date_is_holiday(&self, date_str: &str) -> String {
        self.search_category(
            &format!("{} holiday", date_str),
            CategorySearch {
                category: Category::Academic,
                context_lines: 2,
                label_sources: false,
                no_files: "No academic calendar files found.",
                no_match: format!("No holiday information found for {}.", date_str),
            },
        )
        .await
    }

    pub async fn search_educational_resources(&self, query: &str) -> String {
        self.search_category(
            query,
            CategorySearch {
                category: Category::Educational,
                context_lines: 5,
                label_sources: true,
                no_files: "No educational resource files found.",
                no_match: format!("No relevant educational resources found for query: {}.", query),
            },
        )
        .await
    }

    /// Scan `[Contact Information]` sections for lines naming `department`
    pub async fn get_university_contact_info(&self, department: &str) -> String {
        let files = match self.store.list_documents(Category::Administrative).await {
            Ok(files) if !files.is_empty() => files,
            Ok(_) => return format!("No administrative files found. {}", DATA_NOT_PRESENT),
            Err(e) => {
                warn!(error = %e, "Failed to list administrative documents");
                return format!("No administrative files found. {}", DATA_NOT_PRESENT);
            }
        };

        let needle = department.trim().to_lowercase();
        if !needle.is_empty() {
            for path in &files {
                let lines = match read_lines(path).await {
                    Ok(lines) => lines,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "Skipping unreadable document");
                        continue;
                    }
                };

                let relevant: Vec<&str> = contact_section(&lines)
                    .into_iter()
                    .filter(|line| line.to_lowercase().contains(&needle))
                    .collect();
                if !relevant.is_empty() {
                    return relevant.join("\n");
                }
            }
        }

        format!(
            "Contact information for '{}' not found. {}",
            department, DATA_NOT_PRESENT
        )
    }

    async fn search_category(&self, query: &str, target: CategorySearch) -> String {
        let files = match self.store.list_documents(target.category).await {
            Ok(files) => files,
            Err(e) => {
                warn!(category = %target.category, error = %e, "Failed to list documents");
                Vec::new()
            }
        };
        if files.is_empty() {
            return format!("{} {}", target.no_files, DATA_NOT_PRESENT);
        }

        let mut results = Vec::new();
        for path in &files {
            match search_document(path, query, target.context_lines).await {
                Ok(Some(found)) if target.label_sources => {
                    results.push(format!("From {}:\n{}", file_label(path), found))
                }
                Ok(Some(found)) => results.push(found),
                Ok(None) => {}
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable document"),
            }
        }

        if results.is_empty() {
            format!("{} {}", target.no_match, DATA_NOT_PRESENT)
        } else {
            results.join("\n\n---\n\n")
        }
    }
}

/// Lines after a `[Contact Information]` header up to the next bracketed header
fn contact_section(lines: &[String]) -> Vec<&str> {
    let mut section = Vec::new();
    let mut in_contact = false;
    for line in lines {
        if line.contains(CONTACT_HEADER) {
            in_contact = true;
        } else if in_contact {
            if line.trim().starts_with('[') {
                break;
            }
            section.push(line.as_str());
        }
    }
    section
}

fn definition(name: &str, description: &str, arg: &str, arg_description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                arg: { "type": "string", "description": arg_description }
            },
            "required": [arg]
        }),
    }
}

/// The single free-text argument of a tool call.
///
/// Models do not always use the declared parameter name, so any string field
/// of the arguments object is accepted.
fn argument_text(arguments: &Value, key: &str) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get(key)
            .and_then(Value::as_str)
            .or_else(|| map.values().find_map(Value::as_str))
            .map(str::to_string)
            .unwrap_or_default(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
