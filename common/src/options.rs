use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};

use crate::context::{ExecContext, Func};
use crate::error::{JobError, Result};
use crate::input::InputDescriptor;
use crate::params::Params;
use crate::storage::RequiredModule;

pub const DEFAULT_MAX_CORES: u32 = 1 << 31;
pub const DEFAULT_STATUS_INTERVAL: u64 = 100_000;

/// Política de ubicación de tareas ya resuelta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduler {
    pub max_cores: u32,
    /// Siempre correr en el nodo donde están los datos
    pub force_local: bool,
    /// Nunca correr en el nodo donde están los datos
    pub force_remote: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            max_cores: DEFAULT_MAX_CORES,
            force_local: false,
            force_remote: false,
        }
    }
}

/// Overrides parciales del scheduler que escribe el usuario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_local: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_remote: Option<bool>,
}

impl SchedulerOptions {
    pub fn merge_onto(self, base: Scheduler) -> Scheduler {
        Scheduler {
            max_cores: self.max_cores.unwrap_or(base.max_cores),
            force_local: self.force_local.unwrap_or(base.force_local),
            force_remote: self.force_remote.unwrap_or(base.force_remote),
        }
    }
}

impl From<Scheduler> for SchedulerOptions {
    fn from(s: Scheduler) -> Self {
        Self {
            max_cores: Some(s.max_cores),
            force_local: Some(s.force_local),
            force_remote: Some(s.force_remote),
        }
    }
}

/// Archivos extra del job: rutas a leer o contenido ya cargado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequiredFiles {
    Paths(Vec<PathBuf>),
    Contents(BTreeMap<String, Vec<u8>>),
}

impl Default for RequiredFiles {
    fn default() -> Self {
        Self::Contents(BTreeMap::new())
    }
}

/// Opciones que da el usuario. Todo lo que quede en `None` toma el valor por defecto.
///
/// `partition` y `reduce_reader` tienen un default distinto de "nada", por eso
/// son `Option<Option<Func>>`: `Some(None)` pide explícitamente no usar ninguna.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub prefix: Option<String>,
    pub input: Option<Vec<InputDescriptor>>,
    pub jobhome: Option<String>,
    pub worker: Option<String>,
    pub owner: Option<String>,
    pub version: Option<String>,

    pub map: Option<Func>,
    pub map_init: Option<Func>,
    pub map_reader: Option<Func>,
    pub map_input_stream: Option<Vec<Func>>,
    pub map_output_stream: Option<Vec<Func>>,
    pub combiner: Option<Func>,
    pub partition: Option<Option<Func>>,

    pub reduce: Option<Func>,
    pub reduce_init: Option<Func>,
    pub reduce_reader: Option<Option<Func>>,
    pub reduce_input_stream: Option<Vec<Func>>,
    pub reduce_output_stream: Option<Vec<Func>>,

    pub partitions: Option<u32>,
    pub merge_partitions: Option<bool>,
    pub scheduler: Option<SchedulerOptions>,

    pub params: Option<Params>,
    pub ext_params: Option<BTreeMap<String, Value>>,
    pub required_files: Option<RequiredFiles>,
    pub required_modules: Option<Vec<RequiredModule>>,

    pub profile: Option<bool>,
    pub save: Option<bool>,
    pub sort: Option<bool>,
    pub status_interval: Option<u64>,
}

/* =========================
   Archivo de job (JSON)
   ========================= */

/// Referencia a una función registrada, como se escribe en un archivo de job:
/// `"wordcount::map"` o `{"name": "demo::scale", "captured": 3}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FuncRef {
    Name(String),
    Bound {
        name: String,
        #[serde(default)]
        captured: Value,
    },
}

impl FuncRef {
    pub fn resolve(self, ctx: &ExecContext) -> Result<Func> {
        let (name, captured) = match self {
            FuncRef::Name(name) => (name, Value::Null),
            FuncRef::Bound { name, captured } => (name, captured),
        };
        Ok(ctx.func(&name)?.bind(captured))
    }
}

// clave ausente -> None (default); `null` -> Some(None)
fn explicit_null<'de, D, T>(d: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

/// Job descrito en JSON; las claves desconocidas se rechazan.
/// En `partition` y `reduce_reader` un `null` explícito desactiva el default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    pub prefix: Option<String>,
    pub input: Option<Vec<InputDescriptor>>,
    pub jobhome: Option<String>,
    pub worker: Option<String>,
    pub owner: Option<String>,
    pub version: Option<String>,

    pub map: Option<FuncRef>,
    pub map_init: Option<FuncRef>,
    pub map_reader: Option<FuncRef>,
    pub map_input_stream: Option<Vec<FuncRef>>,
    pub map_output_stream: Option<Vec<FuncRef>>,
    pub combiner: Option<FuncRef>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub partition: Option<Option<FuncRef>>,

    pub reduce: Option<FuncRef>,
    pub reduce_init: Option<FuncRef>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub reduce_reader: Option<Option<FuncRef>>,
    pub reduce_input_stream: Option<Vec<FuncRef>>,
    pub reduce_output_stream: Option<Vec<FuncRef>>,

    pub partitions: Option<u32>,
    pub merge_partitions: Option<bool>,
    pub scheduler: Option<SchedulerOptions>,

    pub params: Option<BTreeMap<String, Value>>,
    pub ext_params: Option<BTreeMap<String, Value>>,
    pub required_files: Option<RequiredFiles>,
    pub required_modules: Option<Vec<RequiredModule>>,

    pub profile: Option<bool>,
    pub save: Option<bool>,
    pub sort: Option<bool>,
    pub status_interval: Option<u64>,
}

impl JobFile {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| JobError::config(format!("archivo de job inválido: {e}")))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            JobError::collaborator("lectura del archivo de job", anyhow::Error::new(e))
        })?;
        Self::from_slice(&bytes)
    }

    /// Resuelve las funciones por nombre contra `ctx`.
    pub fn into_options(self, ctx: &ExecContext) -> Result<JobOptions> {
        let one = |f: Option<FuncRef>| f.map(|f| f.resolve(ctx)).transpose();
        let nullable = |f: Option<Option<FuncRef>>| f.map(one).transpose();
        let many = |fs: Option<Vec<FuncRef>>| {
            fs.map(|fs| fs.into_iter().map(|f| f.resolve(ctx)).collect::<Result<Vec<_>>>())
                .transpose()
        };

        let params = match self.params {
            Some(values) => {
                let mut params = Params::new();
                for (name, value) in values {
                    params.set(&name, value)?;
                }
                Some(params)
            }
            None => None,
        };

        Ok(JobOptions {
            prefix: self.prefix,
            input: self.input,
            jobhome: self.jobhome,
            worker: self.worker,
            owner: self.owner,
            version: self.version,

            map: one(self.map)?,
            map_init: one(self.map_init)?,
            map_reader: one(self.map_reader)?,
            map_input_stream: many(self.map_input_stream)?,
            map_output_stream: many(self.map_output_stream)?,
            combiner: one(self.combiner)?,
            partition: nullable(self.partition)?,

            reduce: one(self.reduce)?,
            reduce_init: one(self.reduce_init)?,
            reduce_reader: nullable(self.reduce_reader)?,
            reduce_input_stream: many(self.reduce_input_stream)?,
            reduce_output_stream: many(self.reduce_output_stream)?,

            partitions: self.partitions,
            merge_partitions: self.merge_partitions,
            scheduler: self.scheduler,

            params,
            ext_params: self.ext_params,
            required_files: self.required_files,
            required_modules: self.required_modules,

            profile: self.profile,
            save: self.save,
            sort: self.sort,
            status_interval: self.status_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::std_context;
    use serde_json::json;

    #[test]
    fn scheduler_options_se_mezclan_sobre_el_default() {
        let opts = SchedulerOptions {
            max_cores: Some(8),
            ..Default::default()
        };
        let s = opts.merge_onto(Scheduler::default());
        assert_eq!(
            s,
            Scheduler {
                max_cores: 8,
                force_local: false,
                force_remote: false
            }
        );
    }

    #[test]
    fn job_file_resuelve_funciones_por_nombre() {
        let file = JobFile::from_slice(
            br#"{
                "prefix": "wc",
                "input": ["raw://hola mundo", ["http://a/1", "http://b/1"]],
                "map": "wordcount::map",
                "reduce": {"name": "wordcount::reduce"},
                "partitions": 4,
                "params": {"umbral": 10},
                "scheduler": {"max_cores": 2}
            }"#,
        )
        .unwrap();

        let opts = file.into_options(&std_context()).unwrap();
        assert_eq!(opts.map.as_ref().and_then(Func::name), Some("wordcount::map"));
        assert_eq!(opts.reduce.as_ref().and_then(Func::name), Some("wordcount::reduce"));
        assert_eq!(opts.partitions, Some(4));
        assert_eq!(opts.input.as_ref().map(Vec::len), Some(2));
        assert_eq!(
            opts.params.as_ref().and_then(|p| p.data("umbral")),
            Some(&json!(10))
        );
        assert_eq!(opts.scheduler.and_then(|s| s.max_cores), Some(2));
    }

    #[test]
    fn job_file_rechaza_claves_desconocidas() {
        let err = JobFile::from_slice(br#"{"mapa": "wordcount::map"}"#).unwrap_err();
        assert!(err.is_config());

        let err = JobFile::from_slice(br#"{"scheduler": {"cores": 2}}"#).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn job_file_con_funcion_no_registrada_falla() {
        let file = JobFile::from_slice(br#"{"map": "demo::nada"}"#).unwrap();
        assert!(file.into_options(&std_context()).unwrap_err().is_codec());
    }

    #[test]
    fn job_file_acepta_version_y_null_explicito() {
        let file = JobFile::from_slice(
            br#"{
                "map": "wordcount::map",
                "version": "0.9",
                "partition": null,
                "reduce_reader": "std::chain_reader"
            }"#,
        )
        .unwrap();
        let opts = file.into_options(&std_context()).unwrap();
        assert_eq!(opts.version.as_deref(), Some("0.9"));
        // null: sin partición, no la de por defecto
        assert!(matches!(opts.partition, Some(None)));
        assert_eq!(
            opts.reduce_reader.as_ref().and_then(|f| f.as_ref()).and_then(Func::name),
            Some("std::chain_reader")
        );

        // clave ausente: queda el default
        let opts = JobFile::from_slice(br#"{"map": "wordcount::map"}"#)
            .unwrap()
            .into_options(&std_context())
            .unwrap();
        assert!(opts.partition.is_none());
        assert!(opts.reduce_reader.is_none());
        assert!(opts.version.is_none());
    }

    #[test]
    fn required_files_acepta_lista_o_mapa() {
        let paths: RequiredFiles = serde_json::from_str(r#"["a.txt", "lib/b.so"]"#).unwrap();
        assert_eq!(
            paths,
            RequiredFiles::Paths(vec![PathBuf::from("a.txt"), PathBuf::from("lib/b.so")])
        );

        let contents: RequiredFiles = serde_json::from_str(r#"{"a.txt": [104, 105]}"#).unwrap();
        let mut expected = BTreeMap::new();
        expected.insert("a.txt".to_string(), b"hi".to_vec());
        assert_eq!(contents, RequiredFiles::Contents(expected));
    }
}
