use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};
use crate::storage::AddressResolver;

/// Esquema de los directorios de resultados particionados.
pub const PARTITIONED_SCHEME: &str = "dir://";
pub const TAG_SCHEME: &str = "tag://";

/// Entrada tal como la escribe el usuario:
/// - una URL suelta: `"raw://hola"`
/// - una lista de réplicas redundantes, en orden de preferencia: `["u1", "u2"]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputDescriptor {
    Url(String),
    Replicas(Vec<String>),
}

impl From<&str> for InputDescriptor {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for InputDescriptor {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<Vec<&str>> for InputDescriptor {
    fn from(urls: Vec<&str>) -> Self {
        Self::Replicas(urls.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for InputDescriptor {
    fn from(urls: Vec<String>) -> Self {
        Self::Replicas(urls)
    }
}

/// Esquema de una URL ("dir", "http", ...) o None si es una ruta local.
pub fn scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

pub fn is_partitioned_url(url: &str) -> bool {
    url.starts_with(PARTITIONED_SCHEME)
}

/// true sólo si hay entradas y *todas* las URLs son `dir://`.
pub fn input_is_partitioned(input: &[Vec<String>]) -> bool {
    !input.is_empty()
        && input
            .iter()
            .flat_map(|replicas| replicas.iter())
            .all(|url| is_partitioned_url(url))
}

/// Normaliza las entradas crudas a una lista de listas de réplicas concretas.
///
/// `listdirs` habilita la expansión de directorios `dir://` (sólo tiene
/// sentido cuando hay función map).
pub fn normalize(
    raw: &[InputDescriptor],
    listdirs: bool,
    resolver: &dyn AddressResolver,
) -> Result<Vec<Vec<String>>> {
    let mut out = Vec::new();
    for descriptor in raw {
        let resolved = resolver
            .resolve(descriptor, listdirs)
            .map_err(|e| JobError::collaborator("resolución de entradas", e))?;

        for replicas in resolved {
            if replicas.is_empty() {
                return Err(JobError::config(format!(
                    "entrada sin réplicas: {:?}",
                    descriptor
                )));
            }
            out.push(replicas);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Resolver que devuelve cada descriptor tal cual (URL suelta -> lista de uno).
    struct Passthrough;

    impl AddressResolver for Passthrough {
        fn resolve(
            &self,
            input: &InputDescriptor,
            _listdirs: bool,
        ) -> anyhow::Result<Vec<Vec<String>>> {
            Ok(match input {
                InputDescriptor::Url(url) => vec![vec![url.clone()]],
                InputDescriptor::Replicas(urls) => vec![urls.clone()],
            })
        }
    }

    #[test]
    fn normaliza_urls_sueltas_y_preserva_orden_de_replicas() {
        let raw: Vec<InputDescriptor> = vec!["u1".into(), vec!["u2a", "u2b"].into()];
        let input = normalize(&raw, true, &Passthrough).unwrap();
        assert_eq!(
            input,
            vec![
                vec!["u1".to_string()],
                vec!["u2a".to_string(), "u2b".to_string()]
            ]
        );
    }

    #[test]
    fn descriptor_se_lee_desde_json_mixto() {
        let raw: Vec<InputDescriptor> = serde_json::from_str(r#"["u1", ["u2a", "u2b"]]"#).unwrap();
        assert_eq!(raw, vec!["u1".into(), vec!["u2a", "u2b"].into()]);
    }

    #[test]
    fn lista_de_replicas_vacia_es_error_de_configuracion() {
        let raw = vec![InputDescriptor::Replicas(vec![])];
        let err = normalize(&raw, false, &Passthrough).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn input_particionado_requiere_todo_dir() {
        let all_dir = vec![
            vec!["dir://n1/job/index".to_string()],
            vec!["dir://n2/job/index".to_string()],
        ];
        assert!(input_is_partitioned(&all_dir));

        let mixed = vec![
            vec!["dir://n1/job/index".to_string()],
            vec!["http://n2/data".to_string()],
        ];
        assert!(!input_is_partitioned(&mixed));

        let mixed_replicas = vec![vec![
            "dir://n1/job/index".to_string(),
            "raw://x".to_string(),
        ]];
        assert!(!input_is_partitioned(&mixed_replicas));

        assert!(!input_is_partitioned(&[]));
    }

    #[test]
    fn esquema_de_urls() {
        assert_eq!(scheme("dir://n1/x"), Some("dir"));
        assert_eq!(scheme("/home/bob/file.txt"), None);
    }
}
