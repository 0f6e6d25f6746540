//! Entity store backed by an rqlite cluster

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::http::client::{HttpClient, Statement};
use crate::models::{
    ContainerJob, Deployment, DeploymentJob, DeploymentJobStatus, DeploymentStatus, EnvLog,
    Environment, Image, ImageJob, ImageStatus, JobStatus, LogWindow, Machine, MachineStatus,
    MachineType, Proxy, Service,
};
use crate::store::EntityStore;
use crate::utils::{calc_exp_backoff, CooldownOptions};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS Machine (Id TEXT PRIMARY KEY, VPNIp TEXT, PublicIp TEXT, Name TEXT, Types TEXT, Status TEXT, CreatedAt INTEGER)",
    "CREATE INDEX IF NOT EXISTS idx_machine_name ON Machine (Name)",
    "CREATE TABLE IF NOT EXISTS Service (Id TEXT PRIMARY KEY, Name TEXT, GitURL TEXT, ImageName TEXT, ProjectId TEXT)",
    "CREATE TABLE IF NOT EXISTS Environment (Id TEXT PRIMARY KEY, ServiceId TEXT, Name TEXT, Branch TEXT, GitTag TEXT, Domains TEXT, MachineIds TEXT, Port TEXT, CreatedAt INTEGER)",
    "CREATE TABLE IF NOT EXISTS Deployment (Id TEXT PRIMARY KEY, Status TEXT, EnvironmentId TEXT, ImageId TEXT, SourceFolder TEXT, CreatedAt INTEGER)",
    "CREATE INDEX IF NOT EXISTS idx_deployment_status ON Deployment (Status)",
    "CREATE INDEX IF NOT EXISTS idx_deployment_env ON Deployment (EnvironmentId, CreatedAt)",
    "CREATE TABLE IF NOT EXISTS Image (Id TEXT PRIMARY KEY, Status TEXT, DeploymentId TEXT, EnvironmentId TEXT, ErrorMsg TEXT, CreatedAt INTEGER)",
    "CREATE INDEX IF NOT EXISTS idx_image_env ON Image (EnvironmentId, CreatedAt)",
    "CREATE TABLE IF NOT EXISTS DeploymentJob (Id TEXT PRIMARY KEY, Status TEXT, DeploymentId TEXT, MachineId TEXT, CreatedAt INTEGER)",
    "CREATE INDEX IF NOT EXISTS idx_deployment_job_status ON DeploymentJob (Status)",
    "CREATE INDEX IF NOT EXISTS idx_deployment_job_deployment ON DeploymentJob (DeploymentId)",
    "CREATE TABLE IF NOT EXISTS ContainerJob (Id TEXT PRIMARY KEY, Status TEXT, EnvironmentId TEXT, MachineId TEXT, JobType TEXT, CreatedAt INTEGER)",
    "CREATE INDEX IF NOT EXISTS idx_container_job_status ON ContainerJob (Status)",
    "CREATE TABLE IF NOT EXISTS ImageJob (Id TEXT PRIMARY KEY, Status TEXT, EnvironmentId TEXT, JobType TEXT, CreatedAt INTEGER)",
    "CREATE INDEX IF NOT EXISTS idx_image_job_status ON ImageJob (Status)",
    "CREATE TABLE IF NOT EXISTS Proxy (Id TEXT PRIMARY KEY, ServerPrivateIP TEXT, Port INTEGER, Domain TEXT, EnvironmentId TEXT, DeploymentId TEXT, CreatedAt INTEGER)",
    "CREATE INDEX IF NOT EXISTS idx_proxy_env ON Proxy (EnvironmentId)",
    "CREATE TABLE IF NOT EXISTS EnvironmentLog (Id TEXT PRIMARY KEY, EnvironmentId TEXT, DeploymentId TEXT, MachineId TEXT, ImageId TEXT, Level INTEGER, Message TEXT, PublishedAt INTEGER)",
    "CREATE INDEX IF NOT EXISTS idx_environment_log_env ON EnvironmentLog (EnvironmentId, PublishedAt)",
];

/// Options for the rqlite backend
#[derive(Debug, Clone)]
pub struct Options {
    /// Leader probes before giving up
    pub leader_attempts: u32,

    /// Backoff between leader probes
    pub cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            leader_attempts: 10,
            cooldown: CooldownOptions::default(),
        }
    }
}

pub struct RqliteStore {
    client: HttpClient,
    options: Options,
}

impl RqliteStore {
    pub fn new(client: HttpClient, options: Options) -> Self {
        Self { client, options }
    }

    async fn wait_for_leader(&self) -> Result<String, AgentError> {
        for attempt in 0..self.options.leader_attempts {
            match self.client.leader().await {
                Ok(Some(leader)) => return Ok(leader),
                Ok(None) => warn!("Store at {} has no leader yet", self.client.base_url()),
                Err(e) => warn!("Store at {} unreachable: {}", self.client.base_url(), e),
            }
            tokio::time::sleep(calc_exp_backoff(&self.options.cooldown, attempt)).await;
        }
        Err(AgentError::StoreError(format!(
            "no leader after {} attempts",
            self.options.leader_attempts
        )))
    }

    async fn exec(&self, statement: Statement) -> Result<u64, AgentError> {
        let results = self.client.execute(&[statement]).await?;
        Ok(results.first().map(|r| r.rows_affected).unwrap_or(0))
    }

    async fn fetch<T: DeserializeOwned>(&self, statement: Statement) -> Result<Vec<T>, AgentError> {
        self.client.query(&statement).await?.into_rows()
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        statement: Statement,
    ) -> Result<Option<T>, AgentError> {
        Ok(self.fetch(statement).await?.into_iter().next())
    }

    async fn set_status(
        &self,
        table: &'static str,
        id: &str,
        status: &str,
        expected: Option<&str>,
    ) -> Result<bool, AgentError> {
        let statement = match expected {
            None => Statement::new(format!("UPDATE {table} SET Status = ? WHERE Id = ?"))
                .bind(status)
                .bind(id),
            Some(expected) => Statement::new(format!(
                "UPDATE {table} SET Status = ? WHERE Id = ? AND Status = ?"
            ))
            .bind(status)
            .bind(id)
            .bind(expected),
        };
        Ok(self.exec(statement).await? > 0)
    }
}

fn join_list(items: &[String]) -> String {
    items.join(";")
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct MachineRow {
    id: String,
    #[serde(rename = "VPNIp")]
    vpn_ip: String,
    public_ip: String,
    name: String,
    types: String,
    status: MachineStatus,
    created_at: i64,
}

impl From<MachineRow> for Machine {
    fn from(row: MachineRow) -> Self {
        Machine {
            id: row.id,
            vpn_ip: row.vpn_ip,
            public_ip: row.public_ip,
            name: row.name,
            types: split_list(&row.types)
                .iter()
                .filter_map(|t| MachineType::parse(t))
                .collect(),
            status: row.status,
            created_at: row.created_at,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct EnvironmentRow {
    id: String,
    service_id: String,
    name: String,
    branch: String,
    git_tag: String,
    domains: String,
    machine_ids: String,
    port: String,
    created_at: i64,
}

impl From<EnvironmentRow> for Environment {
    fn from(row: EnvironmentRow) -> Self {
        Environment {
            id: row.id,
            service_id: row.service_id,
            name: row.name,
            branch: row.branch,
            git_tag: row.git_tag,
            domains: split_list(&row.domains),
            machine_ids: split_list(&row.machine_ids),
            port: row.port,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl EntityStore for RqliteStore {
    async fn init(&self) -> Result<(), AgentError> {
        let leader = self.wait_for_leader().await?;
        info!("Store leader is {}", leader);

        let statements: Vec<Statement> = SCHEMA.iter().map(|sql| Statement::new(*sql)).collect();
        self.client.execute(&statements).await?;
        debug!("Store schema ready ({} statements)", statements.len());
        Ok(())
    }

    async fn insert_machine(&self, machine: &Machine) -> Result<(), AgentError> {
        let types: Vec<String> = machine.types.iter().map(|t| t.as_str().to_string()).collect();
        self.exec(
            Statement::new(
                "INSERT INTO Machine (Id, VPNIp, PublicIp, Name, Types, Status, CreatedAt) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(machine.id.as_str())
            .bind(machine.vpn_ip.as_str())
            .bind(machine.public_ip.as_str())
            .bind(machine.name.as_str())
            .bind(join_list(&types))
            .bind(machine.status.as_str())
            .bind(machine.created_at),
        )
        .await?;
        Ok(())
    }

    async fn find_machine_by_name(&self, name: &str) -> Result<Option<Machine>, AgentError> {
        let row: Option<MachineRow> = self
            .fetch_one(Statement::new("SELECT * FROM Machine WHERE Name = ?").bind(name))
            .await?;
        Ok(row.map(Machine::from))
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, AgentError> {
        let rows: Vec<MachineRow> = self
            .fetch(Statement::new("SELECT * FROM Machine ORDER BY CreatedAt, rowid"))
            .await?;
        Ok(rows.into_iter().map(Machine::from).collect())
    }

    async fn insert_service(&self, service: &Service) -> Result<(), AgentError> {
        self.exec(
            Statement::new(
                "INSERT INTO Service (Id, Name, GitURL, ImageName, ProjectId) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(service.id.as_str())
            .bind(service.name.as_str())
            .bind(service.git_url.as_str())
            .bind(service.image_name.as_str())
            .bind(service.project_id.as_str()),
        )
        .await?;
        Ok(())
    }

    async fn get_service(&self, id: &str) -> Result<Option<Service>, AgentError> {
        self.fetch_one(Statement::new("SELECT * FROM Service WHERE Id = ?").bind(id))
            .await
    }

    async fn insert_environment(&self, environment: &Environment) -> Result<(), AgentError> {
        self.exec(
            Statement::new(
                "INSERT INTO Environment (Id, ServiceId, Name, Branch, GitTag, Domains, MachineIds, Port, CreatedAt) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(environment.id.as_str())
            .bind(environment.service_id.as_str())
            .bind(environment.name.as_str())
            .bind(environment.branch.as_str())
            .bind(environment.git_tag.as_str())
            .bind(join_list(&environment.domains))
            .bind(join_list(&environment.machine_ids))
            .bind(environment.port.as_str())
            .bind(environment.created_at),
        )
        .await?;
        Ok(())
    }

    async fn get_environment(&self, id: &str) -> Result<Option<Environment>, AgentError> {
        let row: Option<EnvironmentRow> = self
            .fetch_one(Statement::new("SELECT * FROM Environment WHERE Id = ?").bind(id))
            .await?;
        Ok(row.map(Environment::from))
    }

    async fn delete_environment(&self, id: &str) -> Result<(), AgentError> {
        self.exec(Statement::new("DELETE FROM Environment WHERE Id = ?").bind(id))
            .await?;
        Ok(())
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> Result<(), AgentError> {
        self.exec(
            Statement::new(
                "INSERT INTO Deployment (Id, Status, EnvironmentId, ImageId, SourceFolder, CreatedAt) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(deployment.id.as_str())
            .bind(deployment.status.as_str())
            .bind(deployment.environment_id.as_str())
            .bind(deployment.image_id.as_str())
            .bind(deployment.source_folder.clone())
            .bind(deployment.created_at),
        )
        .await?;
        Ok(())
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, AgentError> {
        self.fetch_one(Statement::new("SELECT * FROM Deployment WHERE Id = ?").bind(id))
            .await
    }

    async fn list_deployments_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, AgentError> {
        self.fetch(
            Statement::new("SELECT * FROM Deployment WHERE Status = ? ORDER BY CreatedAt, rowid")
                .bind(status.as_str()),
        )
        .await
    }

    async fn list_deployments_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<Deployment>, AgentError> {
        self.fetch(
            Statement::new(
                "SELECT * FROM Deployment WHERE EnvironmentId = ? ORDER BY CreatedAt DESC, rowid DESC",
            )
            .bind(environment_id),
        )
        .await
    }

    async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        expected: Option<DeploymentStatus>,
    ) -> Result<bool, AgentError> {
        self.set_status(
            "Deployment",
            id,
            status.as_str(),
            expected.map(|s| s.as_str()),
        )
        .await
    }

    async fn insert_image(&self, image: &Image) -> Result<(), AgentError> {
        self.exec(
            Statement::new(
                "INSERT INTO Image (Id, Status, DeploymentId, EnvironmentId, ErrorMsg, CreatedAt) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(image.id.as_str())
            .bind(image.status.as_str())
            .bind(image.deployment_id.as_str())
            .bind(image.environment_id.as_str())
            .bind(image.error_msg.as_str())
            .bind(image.created_at),
        )
        .await?;
        Ok(())
    }

    async fn get_image(&self, id: &str) -> Result<Option<Image>, AgentError> {
        self.fetch_one(Statement::new("SELECT * FROM Image WHERE Id = ?").bind(id))
            .await
    }

    async fn list_images_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<Image>, AgentError> {
        self.fetch(
            Statement::new(
                "SELECT * FROM Image WHERE EnvironmentId = ? ORDER BY CreatedAt DESC, rowid DESC",
            )
            .bind(environment_id),
        )
        .await
    }

    async fn update_image_status(
        &self,
        id: &str,
        status: ImageStatus,
        expected: Option<ImageStatus>,
    ) -> Result<bool, AgentError> {
        self.set_status("Image", id, status.as_str(), expected.map(|s| s.as_str()))
            .await
    }

    async fn set_image_error(&self, id: &str, error_msg: &str) -> Result<(), AgentError> {
        self.exec(
            Statement::new("UPDATE Image SET ErrorMsg = ? WHERE Id = ?")
                .bind(error_msg)
                .bind(id),
        )
        .await?;
        Ok(())
    }

    async fn insert_deployment_job(&self, job: &DeploymentJob) -> Result<(), AgentError> {
        self.exec(
            Statement::new(
                "INSERT INTO DeploymentJob (Id, Status, DeploymentId, MachineId, CreatedAt) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(job.id.as_str())
            .bind(job.status.as_str())
            .bind(job.deployment_id.as_str())
            .bind(job.machine_id.as_str())
            .bind(job.created_at),
        )
        .await?;
        Ok(())
    }

    async fn list_deployment_jobs_for_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<DeploymentJob>, AgentError> {
        self.fetch(
            Statement::new(
                "SELECT * FROM DeploymentJob WHERE DeploymentId = ? ORDER BY CreatedAt, rowid",
            )
            .bind(deployment_id),
        )
        .await
    }

    async fn update_deployment_job_status(
        &self,
        id: &str,
        status: DeploymentJobStatus,
        expected: Option<DeploymentJobStatus>,
    ) -> Result<bool, AgentError> {
        self.set_status(
            "DeploymentJob",
            id,
            status.as_str(),
            expected.map(|s| s.as_str()),
        )
        .await
    }

    async fn insert_container_job(&self, job: &ContainerJob) -> Result<(), AgentError> {
        self.exec(
            Statement::new(
                "INSERT INTO ContainerJob (Id, Status, EnvironmentId, MachineId, JobType, CreatedAt) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(job.id.as_str())
            .bind(job.status.as_str())
            .bind(job.environment_id.as_str())
            .bind(job.machine_id.as_str())
            .bind(job.job_type.as_str())
            .bind(job.created_at),
        )
        .await?;
        Ok(())
    }

    async fn list_container_jobs_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ContainerJob>, AgentError> {
        self.fetch(
            Statement::new("SELECT * FROM ContainerJob WHERE Status = ? ORDER BY CreatedAt, rowid")
                .bind(status.as_str()),
        )
        .await
    }

    async fn list_container_jobs_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<ContainerJob>, AgentError> {
        self.fetch(
            Statement::new(
                "SELECT * FROM ContainerJob WHERE EnvironmentId = ? ORDER BY CreatedAt, rowid",
            )
            .bind(environment_id),
        )
        .await
    }

    async fn update_container_job_status(
        &self,
        id: &str,
        status: JobStatus,
    ) -> Result<bool, AgentError> {
        self.set_status("ContainerJob", id, status.as_str(), None)
            .await
    }

    async fn insert_image_job(&self, job: &ImageJob) -> Result<(), AgentError> {
        self.exec(
            Statement::new(
                "INSERT INTO ImageJob (Id, Status, EnvironmentId, JobType, CreatedAt) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(job.id.as_str())
            .bind(job.status.as_str())
            .bind(job.environment_id.as_str())
            .bind(job.job_type.as_str())
            .bind(job.created_at),
        )
        .await?;
        Ok(())
    }

    async fn list_image_jobs_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<ImageJob>, AgentError> {
        self.fetch(
            Statement::new("SELECT * FROM ImageJob WHERE Status = ? ORDER BY CreatedAt, rowid")
                .bind(status.as_str()),
        )
        .await
    }

    async fn list_image_jobs_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<Vec<ImageJob>, AgentError> {
        self.fetch(
            Statement::new(
                "SELECT * FROM ImageJob WHERE EnvironmentId = ? ORDER BY CreatedAt, rowid",
            )
            .bind(environment_id),
        )
        .await
    }

    async fn update_image_job_status(
        &self,
        id: &str,
        status: JobStatus,
    ) -> Result<bool, AgentError> {
        self.set_status("ImageJob", id, status.as_str(), None).await
    }

    async fn insert_proxy(&self, proxy: &Proxy) -> Result<(), AgentError> {
        self.exec(
            Statement::new(
                "INSERT INTO Proxy (Id, ServerPrivateIP, Port, Domain, EnvironmentId, DeploymentId, CreatedAt) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(proxy.id.as_str())
            .bind(proxy.server_private_ip.as_str())
            .bind(proxy.port)
            .bind(proxy.domain.as_str())
            .bind(proxy.environment_id.as_str())
            .bind(proxy.deployment_id.as_str())
            .bind(proxy.created_at),
        )
        .await?;
        Ok(())
    }

    async fn list_proxies(&self) -> Result<Vec<Proxy>, AgentError> {
        self.fetch(Statement::new("SELECT * FROM Proxy ORDER BY CreatedAt, rowid"))
            .await
    }

    async fn delete_superseded_proxies(
        &self,
        environment_id: &str,
        deployment_id: &str,
    ) -> Result<u64, AgentError> {
        self.exec(
            Statement::new("DELETE FROM Proxy WHERE EnvironmentId = ? AND DeploymentId != ?")
                .bind(environment_id)
                .bind(deployment_id),
        )
        .await
    }

    async fn delete_proxies_for_environment(
        &self,
        environment_id: &str,
    ) -> Result<u64, AgentError> {
        self.exec(Statement::new("DELETE FROM Proxy WHERE EnvironmentId = ?").bind(environment_id))
            .await
    }

    async fn insert_env_log(&self, entry: &EnvLog) -> Result<(), AgentError> {
        self.exec(
            Statement::new(
                "INSERT INTO EnvironmentLog (Id, EnvironmentId, DeploymentId, MachineId, ImageId, Level, Message, PublishedAt) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(entry.id.as_str())
            .bind(entry.environment_id.as_str())
            .bind(entry.deployment_id.as_str())
            .bind(entry.machine_id.as_str())
            .bind(entry.image_id.as_str())
            .bind(entry.level)
            .bind(entry.message.as_str())
            .bind(entry.published_at),
        )
        .await?;
        Ok(())
    }

    async fn list_env_logs(
        &self,
        environment_id: &str,
        window: LogWindow,
        limit: usize,
    ) -> Result<Vec<EnvLog>, AgentError> {
        let (op, ts) = match window {
            LogWindow::Before(ts) => ("<=", ts),
            LogWindow::After(ts) => (">=", ts),
        };
        self.fetch(
            Statement::new(format!(
                "SELECT * FROM EnvironmentLog WHERE EnvironmentId = ? AND PublishedAt {op} ? ORDER BY PublishedAt DESC, rowid DESC LIMIT ?"
            ))
            .bind(environment_id)
            .bind(ts)
            .bind(limit as u64),
        )
        .await
    }
}
