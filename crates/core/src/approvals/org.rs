use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::approval::Approver;
use crate::errors::IntegrationError;

const SERVICE: &str = "org_directory";

/// Resolves who approves a request and who may override decisions.
#[async_trait]
pub trait OrgDirectory: Send + Sync {
    /// Ordered approvers for a requester; `levels` comes from the approval
    /// policy. An empty chain means nobody could be resolved.
    async fn approval_chain(
        &self,
        email: &str,
        levels: usize,
    ) -> Result<Vec<Approver>, IntegrationError>;

    async fn is_hr(&self, person_id: &str) -> Result<bool, IntegrationError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Employee {
    pub email: String,
    pub name: String,
    pub person_id: String,
    #[serde(default)]
    pub manager_email: Option<String>,
    #[serde(default)]
    pub is_senior_manager: bool,
    #[serde(default)]
    pub is_hr: bool,
}

impl Employee {
    fn as_approver(&self) -> Approver {
        Approver {
            person_id: self.person_id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    employees: Vec<Employee>,
}

/// Reporting lines loaded from a JSON directory file.
#[derive(Clone, Debug, Default)]
pub struct OrgHierarchy {
    by_email: HashMap<String, Employee>,
    hr_person_ids: HashSet<String>,
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

impl OrgHierarchy {
    pub fn new(employees: Vec<Employee>, hr_user_ids: &[String]) -> Self {
        let by_email =
            employees.into_iter().map(|employee| (normalize_key(&employee.email), employee)).collect();
        let hr_person_ids = hr_user_ids.iter().map(|id| id.trim().to_owned()).collect();
        Self { by_email, hr_person_ids }
    }

    pub fn from_json(raw: &str, hr_user_ids: &[String]) -> Result<Self, IntegrationError> {
        let decode = |message: String| IntegrationError::Decode { service: SERVICE, message };
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|err| decode(err.to_string()))?;
        if !value.is_object() {
            return Err(decode("directory file must be an object with an `employees` list".to_owned()));
        }
        let file: DirectoryFile =
            serde_json::from_value(value).map_err(|err| decode(err.to_string()))?;
        Ok(Self::new(file.employees, hr_user_ids))
    }

    pub fn load(path: &Path, hr_user_ids: &[String]) -> Result<Self, IntegrationError> {
        let raw = fs::read_to_string(path).map_err(|err| IntegrationError::Request {
            service: SERVICE,
            message: format!("could not read `{}`: {err}", path.display()),
        })?;
        let hierarchy = Self::from_json(&raw, hr_user_ids)?;
        info!(
            event_name = "org.directory.loaded",
            employees = hierarchy.len(),
            path = %path.display(),
            "loaded organisation directory"
        );
        Ok(hierarchy)
    }

    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_email.is_empty()
    }

    pub fn employee(&self, email: &str) -> Option<&Employee> {
        self.by_email.get(&normalize_key(email))
    }

    pub fn manager_of(&self, email: &str) -> Option<&Employee> {
        self.employee(email)?.manager_email.as_deref().and_then(|manager| self.employee(manager))
    }

    /// Nearest senior manager at or above `start`, walking manager links
    /// with a visited set so a cyclic directory cannot loop forever.
    fn nearest_senior_manager<'a>(&'a self, start: &'a Employee) -> Option<&'a Employee> {
        let mut visited = HashSet::new();
        let mut current = Some(start);

        while let Some(employee) = current {
            if !visited.insert(normalize_key(&employee.email)) {
                warn!(
                    event_name = "org.directory.cycle",
                    correlation_id = %employee.email,
                    "reporting chain loops back on itself"
                );
                return None;
            }
            if employee.is_senior_manager {
                return Some(employee);
            }
            current =
                employee.manager_email.as_deref().and_then(|manager| self.employee(manager));
        }
        None
    }

    pub fn chain_for(&self, email: &str, levels: usize) -> Vec<Approver> {
        if levels == 0 {
            return Vec::new();
        }
        let Some(manager) = self.manager_of(email) else {
            return Vec::new();
        };

        let mut chain = vec![manager.as_approver()];
        if levels >= 2 {
            if let Some(senior) = self.nearest_senior_manager(manager) {
                if senior.person_id != manager.person_id {
                    chain.push(senior.as_approver());
                }
            }
        }
        chain
    }

    pub fn is_hr_person(&self, person_id: &str) -> bool {
        self.hr_person_ids.contains(person_id)
            || self.by_email.values().any(|employee| employee.is_hr && employee.person_id == person_id)
    }
}

#[async_trait]
impl OrgDirectory for OrgHierarchy {
    async fn approval_chain(
        &self,
        email: &str,
        levels: usize,
    ) -> Result<Vec<Approver>, IntegrationError> {
        Ok(self.chain_for(email, levels))
    }

    async fn is_hr(&self, person_id: &str) -> Result<bool, IntegrationError> {
        Ok(self.is_hr_person(person_id))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{Employee, OrgHierarchy};

    pub fn employee(id: &str, manager: Option<&str>) -> Employee {
        Employee {
            email: format!("{id}@example.com"),
            name: id.to_owned(),
            person_id: format!("U0{}", id.to_ascii_uppercase()),
            manager_email: manager.map(|manager| format!("{manager}@example.com")),
            is_senior_manager: false,
            is_hr: false,
        }
    }

    /// alice -> bob -> carol (senior) -> dana (senior); hank is HR.
    pub fn hierarchy() -> OrgHierarchy {
        let mut carol = employee("carol", Some("dana"));
        carol.is_senior_manager = true;
        let mut dana = employee("dana", None);
        dana.is_senior_manager = true;
        let mut hank = employee("hank", Some("dana"));
        hank.is_hr = true;

        OrgHierarchy::new(
            vec![
                employee("alice", Some("bob")),
                employee("bob", Some("carol")),
                carol,
                dana,
                hank,
                employee("orphan", None),
            ],
            &["U0PAYROLL".to_owned()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{employee, hierarchy};
    use super::{OrgDirectory, OrgHierarchy};
    use crate::errors::IntegrationError;

    #[tokio::test]
    async fn one_level_chain_is_the_direct_manager() {
        let chain = hierarchy().approval_chain("alice@example.com", 1).await.expect("chain");

        let ids: Vec<&str> = chain.iter().map(|approver| approver.person_id.as_str()).collect();
        assert_eq!(ids, ["U0BOB"]);
    }

    #[tokio::test]
    async fn two_level_chain_adds_the_nearest_senior_manager() {
        let chain = hierarchy().approval_chain("ALICE@example.com", 2).await.expect("chain");

        let ids: Vec<&str> = chain.iter().map(|approver| approver.person_id.as_str()).collect();
        assert_eq!(ids, ["U0BOB", "U0CAROL"]);
    }

    #[test]
    fn senior_manager_as_direct_manager_is_not_listed_twice() {
        let chain = hierarchy().chain_for("bob@example.com", 2);

        let ids: Vec<&str> = chain.iter().map(|approver| approver.person_id.as_str()).collect();
        assert_eq!(ids, ["U0CAROL"]);
    }

    #[test]
    fn unknown_people_and_missing_managers_give_an_empty_chain() {
        let org = hierarchy();
        assert!(org.chain_for("nobody@example.com", 1).is_empty());
        assert!(org.chain_for("orphan@example.com", 2).is_empty());
    }

    #[test]
    fn cyclic_reporting_lines_terminate() {
        let org = OrgHierarchy::new(
            vec![
                employee("ann", Some("ben")),
                employee("ben", Some("cat")),
                employee("cat", Some("ben")),
            ],
            &[],
        );

        let chain = org.chain_for("ann@example.com", 2);
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn hr_comes_from_the_directory_flag_or_configured_ids() {
        let org = hierarchy();
        assert!(org.is_hr("U0HANK").await.expect("lookup"));
        assert!(org.is_hr("U0PAYROLL").await.expect("lookup"));
        assert!(!org.is_hr("U0BOB").await.expect("lookup"));
    }

    #[test]
    fn directory_file_parses_with_optional_flags() {
        let org = OrgHierarchy::from_json(
            r#"{"employees": [
                {"email": "a@example.com", "name": "A", "person_id": "U1", "manager_email": "b@example.com"},
                {"email": "b@example.com", "name": "B", "person_id": "U2", "is_senior_manager": true}
            ]}"#,
            &[],
        )
        .expect("valid directory");

        assert_eq!(org.len(), 2);
        assert_eq!(org.manager_of("a@example.com").map(|m| m.person_id.as_str()), Some("U2"));
    }

    #[test]
    fn directory_files_must_be_objects() {
        for raw in ["[]", "[[]]", "\"employees\"", "not json"] {
            assert!(
                matches!(OrgHierarchy::from_json(raw, &[]), Err(IntegrationError::Decode { .. })),
                "accepted {raw}"
            );
        }
    }
}
