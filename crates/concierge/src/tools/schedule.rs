use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use relay::{params_for, ToolDescriptor, ToolError};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::LocalTool;
use crate::types::ScheduleRow;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ScheduleArgs {
    /// Department: engineering, marketing, hr, finance, or all
    pub department: Option<String>,
}

struct Employee {
    name: &'static str,
    position: &'static str,
    tasks: [&'static str; 3],
}

const DEPARTMENTS: &[(&str, &[Employee])] = &[
    (
        "engineering",
        &[
            Employee {
                name: "Zhang San",
                position: "Senior Engineer",
                tasks: ["Build the new feature module", "Code review", "Write technical docs"],
            },
            Employee {
                name: "Li Si",
                position: "Frontend Engineer",
                tasks: ["Polish the UI", "Responsive layout fixes", "Frontend performance tuning"],
            },
            Employee {
                name: "Wang Wu",
                position: "Backend Engineer",
                tasks: ["API development", "Database tuning", "Server maintenance"],
            },
        ],
    ),
    (
        "marketing",
        &[
            Employee {
                name: "Zhao Liu",
                position: "Marketing Manager",
                tasks: ["Market research", "Campaign planning", "Client visits"],
            },
            Employee {
                name: "Qian Qi",
                position: "Marketing Specialist",
                tasks: ["Social media", "Run the launch event", "Analytics report"],
            },
        ],
    ),
    (
        "hr",
        &[
            Employee {
                name: "Sun Ba",
                position: "HR Manager",
                tasks: ["Interviews", "Staff training", "Performance reviews"],
            },
            Employee {
                name: "Zhou Jiu",
                position: "HR Specialist",
                tasks: ["Personnel records", "Attendance report", "Benefits payout"],
            },
        ],
    ),
    (
        "finance",
        &[
            Employee {
                name: "Wu Shi",
                position: "Finance Manager",
                tasks: ["Review financial statements", "Budget planning", "Tax filing"],
            },
            Employee {
                name: "Zheng Shiyi",
                position: "Accountant",
                tasks: ["Daily bookkeeping", "Invoice management", "Expense approvals"],
            },
        ],
    ),
];

/// Company schedule lookup over a built-in dataset. Task `i` of each
/// employee falls on `today + i`.
#[derive(Debug, Clone)]
pub struct ScheduleLookup {
    today: Option<NaiveDate>,
}

impl Default for ScheduleLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleLookup {
    pub fn new() -> Self {
        Self { today: None }
    }

    /// Pin the date rows are generated from.
    pub fn on(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }

    pub fn departments() -> impl Iterator<Item = &'static str> {
        DEPARTMENTS.iter().map(|(name, _)| *name)
    }

    pub fn lookup(&self, department: Option<&str>) -> Result<Value, ToolError> {
        let wanted = department
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty() && d != "all");

        let selected: Vec<_> = match &wanted {
            Some(name) => {
                let found: Vec<_> = DEPARTMENTS.iter().filter(|(d, _)| *d == name.as_str()).collect();
                if found.is_empty() {
                    return Err(ToolError::schema_mismatch(format!(
                        "unknown department '{}'; available: {}",
                        name,
                        Self::departments().collect::<Vec<_>>().join(", ")
                    )));
                }
                found
            }
            None => DEPARTMENTS.iter().collect(),
        };

        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let mut rows = Vec::new();
        for (department, employees) in selected {
            for employee in employees.iter() {
                for (i, task) in employee.tasks.iter().enumerate() {
                    let date = today
                        .checked_add_days(Days::new(i as u64))
                        .unwrap_or(today);
                    rows.push(ScheduleRow {
                        department: department.to_string(),
                        employee_name: employee.name.to_string(),
                        position: employee.position.to_string(),
                        date: date.format("%Y-%m-%d").to_string(),
                        task: task.to_string(),
                        status: if i == 0 { "in progress" } else { "pending" }.to_string(),
                        priority: if i == 0 { "high" } else { "medium" }.to_string(),
                    });
                }
            }
        }

        Ok(json!({
            "success": true,
            "total_count": rows.len(),
            "query_department": wanted.as_deref().unwrap_or("all"),
            "schedules": rows,
        }))
    }
}

#[async_trait]
impl LocalTool for ScheduleLookup {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "schedule_lookup",
            "Look up employee schedules and work plans by department",
        )
        .with_title("schedule lookup")
        .with_params(params_for::<ScheduleArgs>())
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: ScheduleArgs = match arguments {
            Value::Null => ScheduleArgs::default(),
            other => serde_json::from_value(other)
                .map_err(|e| ToolError::schema_mismatch(format!("invalid arguments: {}", e)))?,
        };
        self.lookup(args.department.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay::FailureKind;

    fn lookup() -> ScheduleLookup {
        ScheduleLookup::on(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
    }

    #[test]
    fn test_engineering_rows() {
        let result = lookup().lookup(Some("Engineering")).unwrap();
        assert_eq!(result["query_department"], "engineering");
        assert_eq!(result["total_count"], 9);

        let rows: Vec<ScheduleRow> = serde_json::from_value(result["schedules"].clone()).unwrap();
        assert!(rows.iter().all(|r| r.department == "engineering"));
        assert_eq!(rows[0].date, "2025-03-10");
        assert_eq!(rows[0].status, "in progress");
        assert_eq!(rows[0].priority, "high");
        assert_eq!(rows[2].date, "2025-03-12");
        assert_eq!(rows[2].status, "pending");
        assert_eq!(rows[2].priority, "medium");
    }

    #[test]
    fn test_all_departments() {
        let everyone = lookup().lookup(None).unwrap();
        assert_eq!(everyone["query_department"], "all");
        assert_eq!(everyone["total_count"], 27);
        assert_eq!(lookup().lookup(Some("all")).unwrap(), everyone);
    }

    #[test]
    fn test_unknown_department_lists_available() {
        let err = lookup().lookup(Some("legal")).unwrap_err();
        assert_eq!(err.kind, FailureKind::SchemaMismatch);
        assert!(err.message.contains("engineering, marketing, hr, finance"));
    }

    #[test]
    fn test_descriptor_department_is_optional() {
        let descriptor = lookup().descriptor();
        assert_eq!(descriptor.label(), "schedule lookup");
        assert_eq!(descriptor.params.len(), 1);
        assert!(!descriptor.params[0].required);
    }
}
