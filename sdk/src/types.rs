//! Decision and action types shared between the engine and its callers
//!
//! A [`StepDecision`] is what the model produces on every Decide phase. Its
//! optional [`Action`] is a closed, tagged enumeration over the task API
//! operations with typed parameter records, so a malformed proposal fails at
//! the deserialization boundary instead of inside the loop.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::EngineError;

/// Hard ceiling the task API applies to every list/search call
pub const PAGE_LIMIT: u32 = 5;

fn default_limit() -> u32 {
    PAGE_LIMIT
}

/// Terminal outcome category reported for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    OkAnswer,
    OkNotFound,
    DeniedSecurity,
    NoneClarificationNeeded,
    NoneUnsupported,
    ErrorInternal,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::OkAnswer => "ok_answer",
            Outcome::OkNotFound => "ok_not_found",
            Outcome::DeniedSecurity => "denied_security",
            Outcome::NoneClarificationNeeded => "none_clarification_needed",
            Outcome::NoneUnsupported => "none_unsupported",
            Outcome::ErrorInternal => "error_internal",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of business entity an identifier refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Project,
    Employee,
    Customer,
}

impl EntityKind {
    /// Infer the kind from the identifier prefix (`proj_`, `emp_`, `cust_`)
    pub fn from_id(id: &str) -> Option<Self> {
        if id.contains("proj_") {
            Some(EntityKind::Project)
        } else if id.contains("emp_") {
            Some(EntityKind::Employee)
        } else if id.contains("cust_") {
            Some(EntityKind::Customer)
        } else {
            None
        }
    }
}

/// Reference to an entity attached to the final answer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityLink {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityLink {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Build a link when the identifier has a recognizable prefix
    pub fn from_id(id: &str) -> Option<Self> {
        EntityKind::from_id(id).map(|kind| Self::new(kind, id))
    }
}

/// Final answer reported to the task API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub message: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub links: Vec<EntityLink>,
}

impl AgentResponse {
    pub fn new(message: impl Into<String>, outcome: Outcome, links: Vec<EntityLink>) -> Self {
        Self {
            message: message.into(),
            outcome,
            links,
        }
    }

    /// Response without entity links
    pub fn bare(message: impl Into<String>, outcome: Outcome) -> Self {
        Self::new(message, outcome, Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Operation parameter records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchProjects {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_member: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_archived: Option<bool>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetById {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProjectStatus {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub employee: String,
    #[serde(default)]
    pub time_slice: f64,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProjectTeam {
    pub id: String,
    pub team: Vec<TeamMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateWiki {
    pub file: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillFilter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEmployees {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<SkillFilter>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillLevel {
    pub name: String,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEmployeeInfo {
    pub employee: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<SkillLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wills: Option<Vec<SkillLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCustomers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deal_phase: Vec<String>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTimeEntry {
    pub employee: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    pub date: String,
    pub hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One task API operation proposed by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum Action {
    ListProjects(ListPage),
    SearchProjects(SearchProjects),
    GetProject(GetById),
    UpdateProjectStatus(UpdateProjectStatus),
    UpdateProjectTeam(UpdateProjectTeam),
    UpdateWiki(UpdateWiki),
    ListEmployees(ListPage),
    SearchEmployees(SearchEmployees),
    GetEmployee(GetById),
    UpdateEmployeeInfo(UpdateEmployeeInfo),
    ListCustomers(ListPage),
    SearchCustomers(SearchCustomers),
    GetCustomer(GetById),
    LogTimeEntry(LogTimeEntry),
}

impl Action {
    /// Every operation name, in declaration order
    pub const NAMES: [&'static str; 14] = [
        "list_projects",
        "search_projects",
        "get_project",
        "update_project_status",
        "update_project_team",
        "update_wiki",
        "list_employees",
        "search_employees",
        "get_employee",
        "update_employee_info",
        "list_customers",
        "search_customers",
        "get_customer",
        "log_time_entry",
    ];

    /// Wire name of the operation (matches the `tool` tag)
    pub fn name(&self) -> &'static str {
        match self {
            Action::ListProjects(_) => "list_projects",
            Action::SearchProjects(_) => "search_projects",
            Action::GetProject(_) => "get_project",
            Action::UpdateProjectStatus(_) => "update_project_status",
            Action::UpdateProjectTeam(_) => "update_project_team",
            Action::UpdateWiki(_) => "update_wiki",
            Action::ListEmployees(_) => "list_employees",
            Action::SearchEmployees(_) => "search_employees",
            Action::GetEmployee(_) => "get_employee",
            Action::UpdateEmployeeInfo(_) => "update_employee_info",
            Action::ListCustomers(_) => "list_customers",
            Action::SearchCustomers(_) => "search_customers",
            Action::GetCustomer(_) => "get_customer",
            Action::LogTimeEntry(_) => "log_time_entry",
        }
    }

    /// Endpoint path relative to the task base URL
    pub fn path(&self) -> &'static str {
        match self {
            Action::ListProjects(_) => "/projects/list",
            Action::SearchProjects(_) => "/projects/search",
            Action::GetProject(_) => "/projects/get",
            Action::UpdateProjectStatus(_) => "/projects/status/update",
            Action::UpdateProjectTeam(_) => "/projects/team/update",
            Action::UpdateWiki(_) => "/wiki/update",
            Action::ListEmployees(_) => "/employees/list",
            Action::SearchEmployees(_) => "/employees/search",
            Action::GetEmployee(_) => "/employees/get",
            Action::UpdateEmployeeInfo(_) => "/employees/update",
            Action::ListCustomers(_) => "/customers/list",
            Action::SearchCustomers(_) => "/customers/search",
            Action::GetCustomer(_) => "/customers/get",
            Action::LogTimeEntry(_) => "/time/log",
        }
    }

    /// Whether the operation changes external state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Action::UpdateProjectStatus(_)
                | Action::UpdateProjectTeam(_)
                | Action::UpdateWiki(_)
                | Action::UpdateEmployeeInfo(_)
                | Action::LogTimeEntry(_)
        )
    }

    /// Entity identifiers carried in the `id`, `employee`, `project` and
    /// `customer` fields
    pub fn identifiers(&self) -> Vec<&str> {
        match self {
            Action::GetProject(p) | Action::GetEmployee(p) | Action::GetCustomer(p) => {
                vec![p.id.as_str()]
            }
            Action::UpdateProjectStatus(p) => vec![p.id.as_str()],
            Action::UpdateProjectTeam(p) => vec![p.id.as_str()],
            Action::SearchProjects(p) => p.customer.as_deref().into_iter().collect(),
            Action::UpdateEmployeeInfo(p) => vec![p.employee.as_str()],
            Action::LogTimeEntry(p) => {
                let mut ids = vec![p.employee.as_str(), p.project.as_str()];
                ids.extend(p.customer.as_deref());
                ids
            }
            Action::ListProjects(_)
            | Action::UpdateWiki(_)
            | Action::ListEmployees(_)
            | Action::SearchEmployees(_)
            | Action::ListCustomers(_)
            | Action::SearchCustomers(_) => Vec::new(),
        }
    }

    fn page_limit_mut(&mut self) -> Option<&mut u32> {
        match self {
            Action::ListProjects(p) | Action::ListEmployees(p) | Action::ListCustomers(p) => {
                Some(&mut p.limit)
            }
            Action::SearchProjects(p) => Some(&mut p.limit),
            Action::SearchEmployees(p) => Some(&mut p.limit),
            Action::SearchCustomers(p) => Some(&mut p.limit),
            _ => None,
        }
    }

    /// Clamp a list/search page size to `max`.
    ///
    /// Returns the original limit when it had to be lowered.
    pub fn clamp_page_limit(&mut self, max: u32) -> Option<u32> {
        let limit = self.page_limit_mut()?;
        if *limit > max {
            let original = *limit;
            *limit = max;
            Some(original)
        } else {
            None
        }
    }

    /// Key identifying the operation together with its parameters
    pub fn loop_key(&self) -> String {
        let params = serde_json::to_string(self).unwrap_or_default();
        format!("{}:{}", self.name(), params)
    }

    /// Fill operation defaults that depend on the acting user.
    ///
    /// Time entries get `logged_by`, `work_category`, `status` and `billable`
    /// defaults. Employee updates lose empty strings and lists so they never
    /// clear stored data. Skill filters treat `max_level = 0` as unbounded.
    pub fn apply_defaults(&mut self, current_user: Option<&str>) {
        match self {
            Action::LogTimeEntry(entry) => {
                if entry.logged_by.as_deref().map_or(true, str::is_empty) {
                    entry.logged_by = current_user.map(str::to_string);
                }
                entry
                    .work_category
                    .get_or_insert_with(|| "development".to_string());
                entry.status.get_or_insert_with(|| "draft".to_string());
                entry.billable.get_or_insert(true);
            }
            Action::UpdateEmployeeInfo(update) => {
                for field in [
                    &mut update.department,
                    &mut update.location,
                    &mut update.notes,
                ] {
                    if field.as_deref().map_or(false, |v| v.trim().is_empty()) {
                        *field = None;
                    }
                }
                for list in [&mut update.skills, &mut update.wills] {
                    if list.as_ref().map_or(false, Vec::is_empty) {
                        *list = None;
                    }
                }
                if update.changed_by.as_deref().map_or(true, str::is_empty) {
                    update.changed_by = current_user.map(str::to_string);
                }
            }
            Action::SearchEmployees(search) => {
                for skill in &mut search.skills {
                    if skill.max_level == Some(0) {
                        skill.max_level = None;
                    }
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// StepDecision
// ---------------------------------------------------------------------------

/// Terminal declaration carried by a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub outcome: Outcome,
    pub message: String,
    #[serde(default)]
    pub links: Vec<EntityLink>,
}

/// Structured output of one Decide phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDecision {
    /// Brief reasoning
    pub think: String,

    /// Working hypotheses, appended to the bounded scratch buffer
    #[serde(default)]
    pub scratch: String,

    /// `|`-separated facts to retain
    #[serde(default)]
    pub memory: String,

    /// Mutations the model believes it already performed (informational)
    #[serde(default)]
    pub actions_done: Vec<String>,

    /// Next one or two steps (informational)
    #[serde(default)]
    pub plan: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
}

impl StepDecision {
    /// Decision that only dispatches an action
    pub fn act(think: impl Into<String>, action: Action) -> Self {
        Self {
            think: think.into(),
            scratch: String::new(),
            memory: String::new(),
            actions_done: Vec::new(),
            plan: Vec::new(),
            action: Some(action),
            completion: None,
        }
    }

    /// Decision that only declares completion
    pub fn complete(think: impl Into<String>, outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            think: think.into(),
            scratch: String::new(),
            memory: String::new(),
            actions_done: Vec::new(),
            plan: Vec::new(),
            action: None,
            completion: Some(Completion {
                outcome,
                message: message.into(),
                links: Vec::new(),
            }),
        }
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    pub fn with_scratch(mut self, scratch: impl Into<String>) -> Self {
        self.scratch = scratch.into();
        self
    }

    pub fn with_links(mut self, links: Vec<EntityLink>) -> Self {
        if let Some(completion) = self.completion.as_mut() {
            completion.links = links;
        }
        self
    }

    /// An action is required unless the step declares completion
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.action.is_none() && self.completion.is_none() {
            return Err(EngineError::SchemaViolation(
                "decision has neither an action nor a completion".to_string(),
            ));
        }
        Ok(())
    }
}
