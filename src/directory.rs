use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::engine::SchedulerError;
use crate::limits::{MAX_DISPLAY_NAME_LEN, MAX_PEOPLE};
use crate::model::*;
use crate::ports::PersonDirectory;

#[derive(Debug)]
pub enum DirectoryError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    DuplicateId(PersonId),
    Invalid(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::Io(e) => write!(f, "cannot read people file: {e}"),
            DirectoryError::Parse(e) => write!(f, "malformed people file: {e}"),
            DirectoryError::DuplicateId(id) => write!(f, "person {id} listed twice"),
            DirectoryError::Invalid(msg) => write!(f, "invalid people file: {msg}"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// On-disk entry. Roles are matched case-insensitively.
#[derive(Deserialize)]
struct PersonEntry {
    id: PersonId,
    display_name: String,
    role: String,
}

/// A fixed list of people, loaded once.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    people: Vec<Person>,
}

impl StaticDirectory {
    pub fn new(people: Vec<Person>) -> Result<Self, DirectoryError> {
        if people.len() > MAX_PEOPLE {
            return Err(DirectoryError::Invalid(format!(
                "{} people, at most {MAX_PEOPLE} allowed",
                people.len()
            )));
        }
        let mut seen = HashSet::with_capacity(people.len());
        for p in &people {
            if !seen.insert(p.id) {
                return Err(DirectoryError::DuplicateId(p.id));
            }
            if p.display_name.len() > MAX_DISPLAY_NAME_LEN {
                return Err(DirectoryError::Invalid(format!("display name of {} too long", p.id)));
            }
        }
        Ok(Self { people })
    }

    /// Parse a JSON array of `{"id", "display_name", "role"}` objects.
    pub fn from_json(json: &str) -> Result<Self, DirectoryError> {
        let entries: Vec<PersonEntry> = serde_json::from_str(json).map_err(DirectoryError::Parse)?;
        let people = entries
            .into_iter()
            .map(|e| {
                let role = Role::parse(&e.role).ok_or_else(|| {
                    DirectoryError::Invalid(format!("unknown role {:?} for {}", e.role, e.id))
                })?;
                Ok(Person {
                    id: e.id,
                    display_name: e.display_name,
                    role,
                })
            })
            .collect::<Result<Vec<_>, DirectoryError>>()?;
        Self::new(people)
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let json = std::fs::read_to_string(path).map_err(DirectoryError::Io)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }
}

#[async_trait]
impl PersonDirectory for StaticDirectory {
    async fn list_people_by_role(&self, role: Role) -> Result<Vec<Person>, SchedulerError> {
        Ok(self.people.iter().filter(|p| p.role == role).cloned().collect())
    }

    async fn find_person(&self, id: PersonId) -> Result<Option<Person>, SchedulerError> {
        Ok(self.people.iter().find(|p| p.id == id).cloned())
    }
}
