use std::{env, path::PathBuf};

pub const DEFAULT_MASTER_URL: &str = "http://localhost:8080";
pub const DEFAULT_WORKER: &str = "worker";
pub const DEFAULT_DATA_ROOT: &str = "/data";
pub const DEFAULT_LIB_DIR: &str = "/data/lib";

/// Configuración del cliente y valores por defecto de los jobs.
///
/// Se lee de variables de entorno, igual que MASTER_URL en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub master_url: String,
    /// Programa worker que ejecuta las tareas
    pub worker: String,
    pub owner: String,
    pub jobhome: String,
    /// Raíz local para dir:// y tag://
    pub data_root: PathBuf,
    /// Dónde se materializan los required_files al desempaquetar
    pub lib_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una función de búsqueda (útil en tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let owner = lookup("JOB_OWNER").unwrap_or_else(|| {
            let user = lookup("USER").unwrap_or_else(|| "unknown".to_string());
            format!("{}@{}", user, local_hostname())
        });

        Self {
            master_url: lookup("MASTER_URL").unwrap_or_else(|| DEFAULT_MASTER_URL.to_string()),
            worker: lookup("JOB_WORKER").unwrap_or_else(|| DEFAULT_WORKER.to_string()),
            owner,
            jobhome: lookup("JOBHOME").unwrap_or_default(),
            data_root: lookup("DATA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT)),
            lib_dir: lookup("JOB_LIB_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LIB_DIR)),
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn valores_por_defecto() {
        let s = Settings::from_lookup(|_| None);
        assert_eq!(s.master_url, DEFAULT_MASTER_URL);
        assert_eq!(s.worker, DEFAULT_WORKER);
        assert!(s.owner.starts_with("unknown@"));
        assert_eq!(s.jobhome, "");
        assert_eq!(s.data_root, PathBuf::from("/data"));
    }

    #[test]
    fn variables_de_entorno_pisan_los_defaults() {
        let vars: HashMap<&str, &str> = [
            ("MASTER_URL", "http://master:8080"),
            ("USER", "ana"),
            ("DATA_ROOT", "/tmp/datos"),
            ("JOB_WORKER", "bin/worker"),
        ]
        .into_iter()
        .collect();

        let s = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(s.master_url, "http://master:8080");
        assert!(s.owner.starts_with("ana@"));
        assert_eq!(s.data_root, PathBuf::from("/tmp/datos"));
        assert_eq!(s.worker, "bin/worker");
    }
}
