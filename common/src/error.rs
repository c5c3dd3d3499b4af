use thiserror::Error;

use crate::results::JobStatus;

pub type Result<T> = std::result::Result<T, JobError>;

/// Errores del codec de objetos opacos (funciones + datos capturados).
#[derive(Debug, Error)]
pub enum CodecError {
    /// La función no está registrada en el contexto de ejecución
    #[error("función desconocida en el contexto: {0}")]
    UnknownFunction(String),

    /// Ya hay una función registrada con ese nombre
    #[error("la función '{0}' ya está registrada")]
    Duplicate(String),

    /// Nombre de parámetro inválido o privado
    #[error("nombre de parámetro inválido: {0:?}")]
    InvalidName(String),

    /// Función anónima: no hay nombre con el que reconstruirla del otro lado
    #[error("no se puede codificar una función anónima")]
    Anonymous,

    /// El token no tiene la forma que esperaba el tipo destino
    #[error("token inesperado: se esperaba {expected}, llegó {found}")]
    Mismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Valor literal que no se pudo convertir desde/hacia JSON
    #[error("literal inválido: {0}")]
    Literal(#[source] serde_json::Error),

    /// Bytes del jobpack mal formados
    #[error("jobpack mal formado: {0}")]
    Wire(#[source] serde_json::Error),
}

/// Errores al construir, empaquetar o enviar una especificación de job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Invariante violada durante la construcción
    #[error("configuración inválida: {0}")]
    Config(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Error propagado tal cual desde un colaborador externo
    /// (resolución de direcciones, índices, módulos, archivos, transporte)
    #[error("{what} falló: {cause:#}")]
    Collaborator {
        what: &'static str,
        cause: anyhow::Error,
    },

    /// El controlador respondió con un status distinto de "ok"
    #[error("no se pudo iniciar el job. El servidor respondió: {0}")]
    Submission(String),

    /// El job dejó de estar activo sin llegar a "ready"
    #[error("el job {name} terminó en estado {status:?}")]
    JobFailed { name: String, status: JobStatus },

    #[error("el job {name} sigue activo después de {waited:?}")]
    Timeout {
        name: String,
        waited: std::time::Duration,
    },
}

impl JobError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn collaborator(what: &'static str, cause: anyhow::Error) -> Self {
        Self::Collaborator { what, cause }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_codec(&self) -> bool {
        matches!(self, Self::Codec(_))
    }
}
