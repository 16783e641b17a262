use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;

/// Read-only staff and service data owned by the rest of the application.
#[async_trait]
pub trait StaffDirectory: Send + Sync {
    async fn staff_schedule(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
    ) -> Result<Option<StaffSchedule>, EngineError>;

    /// Currently active staff, in a stable order.
    async fn active_staff(&self) -> Result<Vec<StaffMember>, EngineError>;

    async fn service_duration(&self, service_id: Ulid) -> Result<Option<Minutes>, EngineError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaffEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub schedule: StaffSchedule,
}

fn default_active() -> bool {
    true
}

/// On-disk layout of a directory file.
#[derive(Debug, Default, Deserialize)]
pub struct DirectoryFile {
    #[serde(default)]
    pub staff: Vec<StaffEntry>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

pub struct InMemoryDirectory {
    staff: DashMap<Ulid, StaffEntry>,
    services: DashMap<Ulid, ServiceSpec>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            staff: DashMap::new(),
            services: DashMap::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let file: DirectoryFile = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidInput(format!("directory: {e}")))?;
        let dir = Self::new();
        for entry in file.staff {
            dir.upsert_staff(entry)?;
        }
        for service in file.services {
            dir.upsert_service(service)?;
        }
        Ok(dir)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Persistence(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn upsert_staff(&self, entry: StaffEntry) -> Result<(), EngineError> {
        entry
            .schedule
            .validate()
            .map_err(|msg| EngineError::InvalidInput(format!("staff {}: {msg}", entry.schedule.staff_id)))?;
        if entry.name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::InvalidInput("staff name too long".into()));
        }
        self.staff.insert(entry.schedule.staff_id, entry);
        Ok(())
    }

    pub fn set_active(&self, staff_id: Ulid, active: bool) -> Result<(), EngineError> {
        let mut entry = self
            .staff
            .get_mut(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        entry.active = active;
        Ok(())
    }

    pub fn upsert_service(&self, service: ServiceSpec) -> Result<(), EngineError> {
        if service.duration_minutes == 0 || service.duration_minutes > MAX_SERVICE_DURATION_MIN {
            return Err(EngineError::InvalidInput(format!(
                "service {}: duration must be 1..={MAX_SERVICE_DURATION_MIN} minutes",
                service.service_id
            )));
        }
        self.services.insert(service.service_id, service);
        Ok(())
    }

    pub fn staff_count(&self) -> usize {
        self.staff.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

#[async_trait]
impl StaffDirectory for InMemoryDirectory {
    async fn staff_schedule(
        &self,
        staff_id: Ulid,
        _date: NaiveDate,
    ) -> Result<Option<StaffSchedule>, EngineError> {
        Ok(self.staff.get(&staff_id).map(|e| e.schedule.clone()))
    }

    async fn active_staff(&self) -> Result<Vec<StaffMember>, EngineError> {
        let mut members: Vec<StaffMember> = self
            .staff
            .iter()
            .filter(|e| e.active)
            .map(|e| StaffMember {
                id: *e.key(),
                name: e.name.clone(),
            })
            .collect();
        members.sort_by_key(|m| m.id);
        Ok(members)
    }

    async fn service_duration(&self, service_id: Ulid) -> Result<Option<Minutes>, EngineError> {
        Ok(self.services.get(&service_id).map(|s| s.duration_minutes))
    }
}
