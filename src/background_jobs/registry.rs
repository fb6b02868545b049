//! In-memory catalog of job templates, rebuilt from the store by `load()`.

use super::error::JobError;
use super::job::Job;
use super::queue::ExecutionQueue;
use super::task::TaskSettings;
use super::template::JobTemplate;
use crate::job_store::{JobStore, TemplateKind, TemplateRecord, TemplateStatus, TemplateType};
use chrono::{Timelike, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use tracing::{debug, info};

type TemplateMap = HashMap<String, Arc<JobTemplate>>;

pub struct TemplateRegistry {
    store: Arc<dyn JobStore>,
    queue: Arc<ExecutionQueue>,
    task_settings: TaskSettings,
    /// `None` until `load()` has run.
    templates: RwLock<Option<TemplateMap>>,
    /// Serializes create/delete so uniqueness checks and writes don't interleave.
    write_lock: tokio::sync::Mutex<()>,
}

impl TemplateRegistry {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<ExecutionQueue>,
        task_settings: TaskSettings,
    ) -> Self {
        Self {
            store,
            queue,
            task_settings,
            templates: RwLock::new(None),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<TemplateMap>> {
        self.templates.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<TemplateMap>> {
        self.templates.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_loaded(&self) -> bool {
        self.read().is_some()
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    fn make_template(&self, record: TemplateRecord) -> Arc<JobTemplate> {
        Arc::new(JobTemplate::from_record(
            record,
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            self.task_settings,
        ))
    }

    /// Read every persisted template into memory.
    ///
    /// On a reload, templates already in memory keep their identity and take the
    /// stored status; those no longer in the store are marked deleted. Reloading
    /// picks up changes made through another registry on the same database.
    pub async fn load(&self) -> Result<usize, JobError> {
        let _guard = self.write_lock.lock().await;
        let records = self.store.load_templates().await?;

        let mut guard = self.write();
        let mut previous = guard.take().unwrap_or_default();
        let mut templates = TemplateMap::with_capacity(records.len());
        for record in records {
            let template = match previous.remove(&record.id) {
                Some(existing) => {
                    existing.sync_status(record.status);
                    existing
                }
                None => self.make_template(record),
            };
            templates.insert(template.id().to_string(), template);
        }
        for gone in previous.values() {
            gone.mark_deleted();
        }

        let count = templates.len();
        *guard = Some(templates);
        debug!("Loaded {} job templates", count);
        Ok(count)
    }

    /// Validate, persist, then register a new template.
    pub async fn create(
        &self,
        kind: TemplateKind,
        function_id: &str,
    ) -> Result<Arc<JobTemplate>, JobError> {
        let _guard = self.write_lock.lock().await;
        self.validate_new(&kind, function_id)?;

        let id = uuid::Uuid::new_v4().to_string();
        let record = TemplateRecord {
            short_id: id.chars().take(8).collect(),
            id,
            kind,
            status: TemplateStatus::NotStarted,
            function_id: function_id.to_string(),
            created_at: Utc::now(),
        };
        self.store.persist_template(&record).await?;

        let template = self.make_template(record);
        self.write()
            .as_mut()
            .ok_or(JobError::NotInitialized)?
            .insert(template.id().to_string(), Arc::clone(&template));
        info!(
            "Created {} template {} for function {}",
            template.kind()?.template_type().as_str(),
            template.short_id(),
            function_id
        );
        Ok(template)
    }

    fn validate_new(&self, kind: &TemplateKind, function_id: &str) -> Result<(), JobError> {
        let guard = self.read();
        let templates = guard.as_ref().ok_or(JobError::NotInitialized)?;

        if !self.queue.functions().contains(function_id) {
            return Err(JobError::UnknownFunction(function_id.to_string()));
        }

        match kind {
            TemplateKind::Periodic {
                time_of_invocation,
                days_of_invocation,
            } => {
                if time_of_invocation.second() != 0 || time_of_invocation.nanosecond() != 0 {
                    return Err(JobError::Validation(format!(
                        "time of invocation {} is not minute-aligned",
                        time_of_invocation
                    )));
                }
                if days_of_invocation.is_empty() {
                    return Err(JobError::Validation(
                        "periodic templates need at least one day of invocation".to_string(),
                    ));
                }
            }
            TemplateKind::RestInvoked { url_path } => {
                if !url_path.starts_with('/') {
                    return Err(JobError::Validation(format!(
                        "url path '{}' must start with '/'",
                        url_path
                    )));
                }
                let taken = templates.values().any(|t| {
                    matches!(t.kind(), Ok(TemplateKind::RestInvoked { url_path: p }) if p == url_path)
                });
                if taken {
                    return Err(JobError::Validation(format!(
                        "url path '{}' is already in use",
                        url_path
                    )));
                }
            }
        }
        Ok(())
    }

    /// Remove a template by id or short id, from the store and from memory.
    ///
    /// References held elsewhere start failing with [`JobError::Deleted`].
    pub async fn delete(&self, id_or_short_id: &str) -> Result<(), JobError> {
        let _guard = self.write_lock.lock().await;
        let template = self
            .get_by_id(id_or_short_id)?
            .ok_or_else(|| JobError::NotFound(format!("template {}", id_or_short_id)))?;

        self.store.delete_template(template.id()).await?;
        if let Some(templates) = self.write().as_mut() {
            templates.remove(template.id());
        }
        template.mark_deleted();
        info!("Deleted template {}", template.short_id());
        Ok(())
    }

    /// Snapshot of all templates, oldest first.
    pub fn list(&self) -> Result<Vec<Arc<JobTemplate>>, JobError> {
        let guard = self.read();
        let templates = guard.as_ref().ok_or(JobError::NotInitialized)?;
        let mut list: Vec<_> = templates.values().cloned().collect();
        list.sort_by(|a, b| {
            a.created_at()
                .ok()
                .cmp(&b.created_at().ok())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(list)
    }

    pub fn list_by_kind(&self, kind: TemplateType) -> Result<Vec<Arc<JobTemplate>>, JobError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|t| t.kind().map(|k| k.template_type() == kind).unwrap_or(false))
            .collect())
    }

    /// Look a template up by id or short id. `Ok(None)` if there is no such template.
    pub fn get_by_id(&self, id_or_short_id: &str) -> Result<Option<Arc<JobTemplate>>, JobError> {
        let guard = self.read();
        let templates = guard.as_ref().ok_or(JobError::NotInitialized)?;
        if let Some(template) = templates.get(id_or_short_id) {
            return Ok(Some(Arc::clone(template)));
        }
        Ok(templates
            .values()
            .find(|t| t.short_id() == id_or_short_id)
            .cloned())
    }

    pub fn find_rest_template(&self, url_path: &str) -> Result<Option<Arc<JobTemplate>>, JobError> {
        Ok(self
            .list_by_kind(TemplateType::RestInvoked)?
            .into_iter()
            .find(|t| {
                matches!(t.kind(), Ok(TemplateKind::RestInvoked { url_path: p }) if p == url_path)
            }))
    }

    /// Invoke the REST-invoked template registered under `url_path`.
    pub async fn invoke_rest_template(
        &self,
        url_path: &str,
        args: Value,
    ) -> Result<Arc<Job>, JobError> {
        let template = self
            .find_rest_template(url_path)?
            .ok_or_else(|| JobError::NotFound(format!("no template at {}", url_path)))?;
        let job = template.invoke(args).await?;
        crate::server::metrics::record_template_triggered("rest");
        Ok(job)
    }
}
