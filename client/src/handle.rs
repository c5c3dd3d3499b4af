use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};
use tracing::{debug, info};

use common::config::Settings;
use common::results::{JobEvent, JobInfo, JobResults, JobStatus, SubmitReply};
use common::storage::Services;
use common::{ExecContext, JobError, JobOptions, JobSpec, Result};

/// Ruta del controlador para crear jobs nuevos.
pub const NEW_JOB_PATH: &str = "/api/v1/jobs/new";

/// Prefijo de las claves fuera de banda con estadísticas de profiling.
pub const PROFILE_PREFIX: &str = "profile-";

/// Operaciones remotas del controlador. Todas (menos `submit`) reciben el
/// nombre del job como primer argumento.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn submit(&self, path: &str, jobpack: Vec<u8>) -> anyhow::Result<SubmitReply>;
    async fn clean(&self, name: &str) -> anyhow::Result<()>;
    async fn events(&self, name: &str, offset: u64) -> anyhow::Result<Vec<JobEvent>>;
    async fn kill(&self, name: &str) -> anyhow::Result<()>;
    async fn jobinfo(&self, name: &str) -> anyhow::Result<JobInfo>;
    async fn jobpack(&self, name: &str) -> anyhow::Result<Vec<u8>>;
    async fn oob_get(&self, name: &str, key: &str) -> anyhow::Result<Vec<u8>>;
    async fn oob_list(&self, name: &str) -> anyhow::Result<Vec<String>>;
    async fn purge(&self, name: &str) -> anyhow::Result<()>;
    async fn results(&self, name: &str) -> anyhow::Result<JobResults>;
    async fn mapresults(&self, name: &str) -> anyhow::Result<JobResults>;
}

fn transport(e: anyhow::Error) -> JobError {
    JobError::collaborator("transporte", e)
}

/// Handle de un job: antes de `run` el nombre es el prefijo pedido,
/// después es el nombre que asignó el controlador.
pub struct Job<'a, C: Controller> {
    name: String,
    controller: &'a C,
    settings: &'a Settings,
}

impl<'a, C: Controller> Job<'a, C> {
    pub fn new(controller: &'a C, settings: &'a Settings, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            controller,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Construye la especificación con el nombre del handle como prefijo,
    /// la empaqueta y la envía al controlador.
    pub async fn run(&mut self, mut options: JobOptions, services: &Services<'_>) -> Result<&str> {
        options.prefix = Some(self.name.clone());
        let spec = JobSpec::build(options, self.settings, services)?;
        let jobpack = spec.pack(services.files)?;

        let reply = self
            .controller
            .submit(NEW_JOB_PATH, jobpack)
            .await
            .map_err(transport)?;

        if reply.status != "ok" {
            return Err(JobError::Submission(reply.response));
        }
        info!("job {} creado como {}", self.name, reply.response);
        self.name = reply.response;
        Ok(&self.name)
    }

    pub async fn clean(&self) -> Result<()> {
        self.controller.clean(&self.name).await.map_err(transport)
    }

    pub async fn events(&self, offset: u64) -> Result<Vec<JobEvent>> {
        self.controller
            .events(&self.name, offset)
            .await
            .map_err(transport)
    }

    pub async fn kill(&self) -> Result<()> {
        self.controller.kill(&self.name).await.map_err(transport)
    }

    pub async fn jobinfo(&self) -> Result<JobInfo> {
        self.controller.jobinfo(&self.name).await.map_err(transport)
    }

    /// Trae el jobpack del controlador y lo reconstruye contra `ctx`.
    pub async fn jobspec(&self, ctx: &ExecContext, services: &Services<'_>) -> Result<JobSpec> {
        let bytes = self
            .controller
            .jobpack(&self.name)
            .await
            .map_err(transport)?;
        JobSpec::unpack(&bytes, ctx, None, self.settings, services)
    }

    pub async fn oob_get(&self, key: &str) -> Result<Vec<u8>> {
        self.controller
            .oob_get(&self.name, key)
            .await
            .map_err(transport)
    }

    pub async fn oob_list(&self) -> Result<Vec<String>> {
        self.controller.oob_list(&self.name).await.map_err(transport)
    }

    /// Resultados de profiling guardados como claves `profile-*`.
    pub async fn profile_stats(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut stats = BTreeMap::new();
        for key in self.oob_list().await? {
            if key.starts_with(PROFILE_PREFIX) {
                let value = self.oob_get(&key).await?;
                stats.insert(key, value);
            }
        }
        Ok(stats)
    }

    pub async fn purge(&self) -> Result<()> {
        self.controller.purge(&self.name).await.map_err(transport)
    }

    pub async fn results(&self) -> Result<JobResults> {
        self.controller.results(&self.name).await.map_err(transport)
    }

    pub async fn mapresults(&self) -> Result<JobResults> {
        self.controller
            .mapresults(&self.name)
            .await
            .map_err(transport)
    }

    /// Consulta `results` cada `poll` hasta que el job deja de estar activo.
    pub async fn wait(&self, poll: Duration, timeout: Option<Duration>) -> Result<JobResults> {
        let started = Instant::now();
        loop {
            let results = self.results().await?;
            match results.status {
                JobStatus::Active => {}
                JobStatus::Ready => return Ok(results),
                status @ (JobStatus::Dead | JobStatus::Unknown) => {
                    return Err(JobError::JobFailed {
                        name: self.name.clone(),
                        status,
                    })
                }
            }

            let waited = started.elapsed();
            if timeout.is_some_and(|t| waited >= t) {
                return Err(JobError::Timeout {
                    name: self.name.clone(),
                    waited,
                });
            }
            debug!("job {} sigue activo", self.name);
            tokio::time::sleep(poll).await;
        }
    }
}
