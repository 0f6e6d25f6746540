//! In-process entity store
//!
//! Used for single-node development and for simulating several agents against
//! one shared state in tests. Rows keep insertion order, so "newest first"
//! queries are stable even when two rows share a `CreatedAt`.

use std::cmp::Reverse;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::AgentError;
use crate::models::{
    ContainerJob, Deployment, DeploymentJob, DeploymentJobStatus, DeploymentStatus, EnvLog,
    Environment, Image, ImageJob, ImageStatus, JobStatus, LogWindow, Machine, Proxy, Service,
};
use crate::store::EntityStore;

#[derive(Default)]
struct Tables {
    machines: Vec<Machine>,
    services: Vec<Service>,
    environments: Vec<Environment>,
    deployments: Vec<Deployment>,
    images: Vec<Image>,
    deployment_jobs: Vec<DeploymentJob>,
    container_jobs: Vec<ContainerJob>,
    image_jobs: Vec<ImageJob>,
    proxies: Vec<Proxy>,
    env_logs: Vec<EnvLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_unique<T: Clone>(
    table: &mut Vec<T>,
    row: &T,
    id_of: impl Fn(&T) -> &str,
    name: &str,
) -> Result<(), AgentError> {
    let id = id_of(row);
    if table.iter().any(|existing| id_of(existing) == id) {
        return Err(AgentError::StoreError(format!(
            "UNIQUE constraint failed: {}.Id ({})",
            name, id
        )));
    }
    table.push(row.clone());
    Ok(())
}

/// Rows sorted by `key` descending, ties broken by later insertion first
fn newest_first<T>(rows: impl DoubleEndedIterator<Item = T>, key: impl Fn(&T) -> i64) -> Vec<T> {
    let mut rows: Vec<T> = rows.rev().collect();
    rows.sort_by_key(|row| Reverse(key(row)));
    rows
}

fn set_status<T, S: PartialEq + Copy>(
    rows: &mut [T],
    id: &str,
    status: S,
    expected: Option<S>,
    id_of: impl Fn(&T) -> &str,
    status_of: impl Fn(&mut T) -> &mut S,
) -> bool {
    match rows.iter_mut().find(|row| id_of(row) == id) {
        Some(row) => {
            let current = status_of(row);
            if expected.is_some_and(|e| *current != e) {
                return false;
            }
            *current = status;
            true
        }
        None => false,
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn init(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn insert_machine(&self, machine: &Machine) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.machines, machine, |m| m.id.as_str(), "Machine")
    }

    async fn find_machine_by_name(&self, name: &str) -> Result<Option<Machine>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables.machines.iter().find(|m| m.name == name).cloned())
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, AgentError> {
        Ok(self.tables.read().await.machines.clone())
    }

    async fn insert_service(&self, service: &Service) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.services, service, |s| s.id.as_str(), "Service")
    }

    async fn get_service(&self, id: &str) -> Result<Option<Service>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables.services.iter().find(|s| s.id == id).cloned())
    }

    async fn insert_environment(&self, environment: &Environment) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.environments, environment, |e| e.id.as_str(), "Environment")
    }

    async fn get_environment(&self, id: &str) -> Result<Option<Environment>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables.environments.iter().find(|e| e.id == id).cloned())
    }

    async fn delete_environment(&self, id: &str) -> Result<(), AgentError> {
        self.tables.write().await.environments.retain(|e| e.id != id);
        Ok(())
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.deployments, deployment, |d| d.id.as_str(), "Deployment")
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables.deployments.iter().find(|d| d.id == id).cloned())
    }

    async fn list_deployments_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .deployments
            .iter()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }

    async fn list_deployments_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<Deployment>, AgentError> {
        let tables = self.tables.read().await;
        let rows = tables
            .deployments
            .iter()
            .filter(|d| d.environment_id == environment_id)
            .cloned();
        Ok(newest_first(rows, |d| d.created_at))
    }

    async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        expected: Option<DeploymentStatus>,
    ) -> Result<bool, AgentError> {
        let mut tables = self.tables.write().await;
        Ok(set_status(
            &mut tables.deployments,
            id,
            status,
            expected,
            |d| d.id.as_str(),
            |d| &mut d.status,
        ))
    }

    async fn insert_image(&self, image: &Image) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.images, image, |i| i.id.as_str(), "Image")
    }

    async fn get_image(&self, id: &str) -> Result<Option<Image>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables.images.iter().find(|i| i.id == id).cloned())
    }

    async fn list_images_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<Image>, AgentError> {
        let tables = self.tables.read().await;
        let rows = tables
            .images
            .iter()
            .filter(|i| i.environment_id == environment_id)
            .cloned();
        Ok(newest_first(rows, |i| i.created_at))
    }

    async fn update_image_status(
        &self,
        id: &str,
        status: ImageStatus,
        expected: Option<ImageStatus>,
    ) -> Result<bool, AgentError> {
        let mut tables = self.tables.write().await;
        Ok(set_status(
            &mut tables.images,
            id,
            status,
            expected,
            |i| i.id.as_str(),
            |i| &mut i.status,
        ))
    }

    async fn set_image_error(&self, id: &str, error_msg: &str) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        if let Some(image) = tables.images.iter_mut().find(|i| i.id == id) {
            image.error_msg = error_msg.to_string();
        }
        Ok(())
    }

    async fn insert_deployment_job(&self, job: &DeploymentJob) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.deployment_jobs, job, |j| j.id.as_str(), "DeploymentJob")
    }

    async fn list_deployment_jobs_for_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<DeploymentJob>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .deployment_jobs
            .iter()
            .filter(|j| j.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    async fn update_deployment_job_status(
        &self,
        id: &str,
        status: DeploymentJobStatus,
        expected: Option<DeploymentJobStatus>,
    ) -> Result<bool, AgentError> {
        let mut tables = self.tables.write().await;
        Ok(set_status(
            &mut tables.deployment_jobs,
            id,
            status,
            expected,
            |j| j.id.as_str(),
            |j| &mut j.status,
        ))
    }

    async fn insert_container_job(&self, job: &ContainerJob) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.container_jobs, job, |j| j.id.as_str(), "ContainerJob")
    }

    async fn list_container_jobs_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ContainerJob>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .container_jobs
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }

    async fn list_container_jobs_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<ContainerJob>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .container_jobs
            .iter()
            .filter(|j| j.environment_id == environment_id)
            .cloned()
            .collect())
    }

    async fn update_container_job_status(
        &self,
        id: &str,
        status: JobStatus,
    ) -> Result<bool, AgentError> {
        let mut tables = self.tables.write().await;
        Ok(set_status(
            &mut tables.container_jobs,
            id,
            status,
            None,
            |j| j.id.as_str(),
            |j| &mut j.status,
        ))
    }

    async fn insert_image_job(&self, job: &ImageJob) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.image_jobs, job, |j| j.id.as_str(), "ImageJob")
    }

    async fn list_image_jobs_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ImageJob>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .image_jobs
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }

    async fn list_image_jobs_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<ImageJob>, AgentError> {
        let tables = self.tables.read().await;
        Ok(tables
            .image_jobs
            .iter()
            .filter(|j| j.environment_id == environment_id)
            .cloned()
            .collect())
    }

    async fn update_image_job_status(
        &self,
        id: &str,
        status: JobStatus,
    ) -> Result<bool, AgentError> {
        let mut tables = self.tables.write().await;
        Ok(set_status(
            &mut tables.image_jobs,
            id,
            status,
            None,
            |j| j.id.as_str(),
            |j| &mut j.status,
        ))
    }

    async fn insert_proxy(&self, proxy: &Proxy) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.proxies, proxy, |p| p.id.as_str(), "Proxy")
    }

    async fn list_proxies(&self) -> Result<Vec<Proxy>, AgentError> {
        Ok(self.tables.read().await.proxies.clone())
    }

    async fn delete_superseded_proxies(
        &self,
        environment_id: &str,
        deployment_id: &str,
    ) -> Result<u64, AgentError> {
        let mut tables = self.tables.write().await;
        let before = tables.proxies.len();
        tables
            .proxies
            .retain(|p| p.environment_id != environment_id || p.deployment_id == deployment_id);
        Ok((before - tables.proxies.len()) as u64)
    }

    async fn delete_proxies_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<u64, AgentError> {
        let mut tables = self.tables.write().await;
        let before = tables.proxies.len();
        tables.proxies.retain(|p| p.environment_id != environment_id);
        Ok((before - tables.proxies.len()) as u64)
    }

    async fn insert_env_log(&self, entry: &EnvLog) -> Result<(), AgentError> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.env_logs, entry, |l| l.id.as_str(), "EnvironmentLog")
    }

    async fn list_env_logs(
        &self,
        environment_id: &str,
        window: LogWindow,
        limit: usize,
    ) -> Result<Vec<EnvLog>, AgentError> {
        let tables = self.tables.read().await;
        let rows = tables
            .env_logs
            .iter()
            .filter(|l| l.environment_id == environment_id && window.contains(l.published_at))
            .cloned();
        let mut rows = newest_first(rows, |l| l.published_at);
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_conditional_status_update() {
        let store = MemoryStore::new();
        let image = Image::new("d1", "e1", ImageStatus::ToBuild);
        store.insert_image(&image).await.unwrap();

        let claimed = store
            .update_image_status(&image.id, ImageStatus::Building, Some(ImageStatus::ToBuild))
            .await
            .unwrap();
        assert!(claimed);

        let claimed_again = store
            .update_image_status(&image.id, ImageStatus::Building, Some(ImageStatus::ToBuild))
            .await
            .unwrap();
        assert!(!claimed_again);

        assert!(!store
            .update_image_status("missing", ImageStatus::Ready, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = MemoryStore::new();
        let image = Image::new("d1", "e1", ImageStatus::ToBuild);
        store.insert_image(&image).await.unwrap();
        assert!(store.insert_image(&image).await.is_err());
    }

    #[tokio::test]
    async fn test_newest_first_with_equal_timestamps() {
        let store = MemoryStore::new();
        let mut first = Deployment::new("e1", "i1", None);
        let mut second = Deployment::new("e1", "i2", None);
        first.created_at = 10;
        second.created_at = 10;
        store.insert_deployment(&first).await.unwrap();
        store.insert_deployment(&second).await.unwrap();

        let listed = store.list_deployments_for_environment("e1").await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn test_superseded_proxies() {
        let store = MemoryStore::new();
        store
            .insert_proxy(&Proxy::new("a.com", "10.0.0.1", 4000, "e1", "d1"))
            .await
            .unwrap();
        store
            .insert_proxy(&Proxy::new("a.com", "10.0.0.1", 4001, "e1", "d2"))
            .await
            .unwrap();
        store
            .insert_proxy(&Proxy::new("b.com", "10.0.0.2", 4002, "e2", "d9"))
            .await
            .unwrap();

        let removed = store.delete_superseded_proxies("e1", "d2").await.unwrap();
        assert_eq!(removed, 1);

        let left: Vec<String> = store
            .list_proxies()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.deployment_id)
            .collect();
        assert_eq!(left, vec!["d2", "d9"]);
    }
}
