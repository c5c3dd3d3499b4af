use serde::{Deserialize, Serialize};

/* --------- Respuestas del controlador --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Ready,
    Dead,
    Unknown,
}

impl JobStatus {
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Active)
    }
}

/// Respuesta de `submit`: status "ok" trae el nombre asignado en `response`,
/// cualquier otro status trae el motivo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReply {
    pub status: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResults {
    pub status: JobStatus,
    /// Una lista de réplicas por cada salida
    #[serde(default)]
    pub urls: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub owner: String,
    pub status: JobStatus,

    /// -------- Métricas del job --------
    #[serde(default)]
    pub total_tasks: u32,
    #[serde(default)]
    pub completed_tasks: u32,
    #[serde(default)]
    pub failed_tasks: u32,
    #[serde(default)]
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub offset: u64,
    pub host: String,
    pub message: String,
}
