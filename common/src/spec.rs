use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::builtins::{
    self, CHAIN_READER, MAP_INPUT_STREAM, MAP_OUTPUT_STREAM, REDUCE_INPUT_STREAM,
    REDUCE_OUTPUT_STREAM, TASK_OUTPUT_STREAM,
};
use crate::config::Settings;
use crate::context::Func;
use crate::error::{JobError, Result};
use crate::input::{self, InputDescriptor};
use crate::options::{JobOptions, RequiredFiles, Scheduler, DEFAULT_STATUS_INTERVAL};
use crate::params::Params;
use crate::storage::{RequiredModule, Services};

/// Especificación de job completa y validada.
///
/// Sólo se obtiene con `JobSpec::build` o `JobSpec::unpack`, y no cambia
/// después: los campos derivados (`nr_reduces`, `has_map`, `has_reduce`)
/// siempre son consistentes con el resto.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub(crate) prefix: String,
    /// Entradas lógicas; cada una es una lista de réplicas en orden de preferencia
    pub(crate) input: Vec<Vec<String>>,
    pub(crate) jobhome: String,
    pub(crate) worker: String,
    pub(crate) owner: String,
    pub(crate) version: String,

    /// -------- Fase map --------
    pub(crate) map: Option<Func>,
    pub(crate) map_init: Func,
    pub(crate) map_reader: Option<Func>,
    pub(crate) map_input_stream: Vec<Func>,
    pub(crate) map_output_stream: Vec<Func>,
    pub(crate) combiner: Option<Func>,
    pub(crate) partition: Option<Func>,

    /// -------- Fase reduce --------
    pub(crate) reduce: Option<Func>,
    pub(crate) reduce_init: Func,
    pub(crate) reduce_reader: Option<Func>,
    pub(crate) reduce_input_stream: Vec<Func>,
    pub(crate) reduce_output_stream: Vec<Func>,

    /// -------- Topología --------
    pub(crate) partitions: u32,
    pub(crate) merge_partitions: bool,
    pub(crate) nr_reduces: u32,
    pub(crate) scheduler: Scheduler,

    pub(crate) params: Params,
    pub(crate) ext_params: BTreeMap<String, Value>,
    pub(crate) required_files: RequiredFiles,
    pub(crate) required_modules: Vec<RequiredModule>,

    pub(crate) profile: bool,
    pub(crate) save: bool,
    pub(crate) sort: bool,
    pub(crate) status_interval: u64,
}

impl JobSpec {
    /// Tabla de valores por defecto. No está validada: `nr_reduces` queda en 0
    /// hasta que `build` lo derive.
    fn defaults(settings: &Settings) -> Self {
        Self {
            prefix: String::new(),
            input: Vec::new(),
            jobhome: settings.jobhome.clone(),
            worker: settings.worker.clone(),
            owner: settings.owner.clone(),
            version: default_version(),

            map: None,
            map_init: builtins::noop(),
            map_reader: None,
            map_input_stream: vec![builtins::stream_stage(MAP_INPUT_STREAM)],
            map_output_stream: vec![
                builtins::stream_stage(MAP_OUTPUT_STREAM),
                builtins::stream_stage(TASK_OUTPUT_STREAM),
            ],
            combiner: None,
            partition: Some(builtins::default_partition()),

            reduce: None,
            reduce_init: builtins::noop(),
            reduce_reader: Some(builtins::stream_stage(CHAIN_READER)),
            reduce_input_stream: vec![builtins::stream_stage(REDUCE_INPUT_STREAM)],
            reduce_output_stream: vec![
                builtins::stream_stage(REDUCE_OUTPUT_STREAM),
                builtins::stream_stage(TASK_OUTPUT_STREAM),
            ],

            partitions: 0,
            merge_partitions: false,
            nr_reduces: 0,
            scheduler: Scheduler::default(),

            params: Params::new(),
            ext_params: BTreeMap::new(),
            required_files: RequiredFiles::default(),
            required_modules: Vec::new(),

            profile: false,
            save: false,
            sort: false,
            status_interval: DEFAULT_STATUS_INTERVAL,
        }
    }

    /// Mezcla `options` sobre los defaults, deriva la topología y valida.
    ///
    /// Los colaboradores de `services` son los únicos efectos observables:
    /// descubrimiento de módulos, resolución de entradas y lectura de índices.
    pub fn build(mut options: JobOptions, settings: &Settings, services: &Services<'_>) -> Result<Self> {
        if options.map.is_none() && options.reduce.is_none() {
            return Err(JobError::config("el job necesita una función map o reduce"));
        }

        let mut spec = Self::defaults(settings);
        let raw_input = options.input.take().unwrap_or_default();
        let required_modules = options.required_modules.take();
        let scheduler = options.scheduler.take();
        spec.apply(options);

        if !spec.prefix.is_empty() && !is_job_name(&spec.prefix) {
            return Err(JobError::config(format!(
                "prefijo inválido {:?}: sólo letras, dígitos y '_'",
                spec.prefix
            )));
        }

        spec.required_modules = match required_modules {
            Some(modules) => modules,
            None => {
                let modules = services
                    .modules
                    .discover(&spec.callables())
                    .map_err(|e| JobError::collaborator("descubrimiento de módulos", e))?;
                debug!("módulos descubiertos: {:?}", modules);
                modules
            }
        };

        spec.input = input::normalize(&raw_input, spec.has_map(), services.resolver)?;
        spec.nr_reduces = spec.derive_nr_reduces(services)?;

        if spec.merge_partitions {
            if spec.partitions == 0 && !spec.input_is_partitioned() {
                return Err(JobError::config(
                    "no se pueden unir particiones sin particiones",
                ));
            }
            spec.nr_reduces = 1;
        }

        if let Some(overrides) = scheduler {
            spec.scheduler = overrides.merge_onto(Scheduler::default());
        }
        if spec.scheduler.max_cores < 1 {
            return Err(JobError::config("scheduler.max_cores debe ser >= 1"));
        }

        debug!(
            "job {:?}: {} entradas, nr_reduces={}, map={}, reduce={}",
            spec.prefix,
            spec.input.len(),
            spec.nr_reduces,
            spec.has_map(),
            spec.has_reduce()
        );
        Ok(spec)
    }

    // Pisa los defaults con todo lo que el usuario haya dado.
    fn apply(&mut self, o: JobOptions) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }

        set(&mut self.prefix, o.prefix);
        set(&mut self.jobhome, o.jobhome);
        set(&mut self.worker, o.worker);
        set(&mut self.owner, o.owner);
        set(&mut self.version, o.version);

        self.map = o.map;
        set(&mut self.map_init, o.map_init);
        self.map_reader = o.map_reader;
        set(&mut self.map_input_stream, o.map_input_stream);
        set(&mut self.map_output_stream, o.map_output_stream);
        self.combiner = o.combiner;
        set(&mut self.partition, o.partition);

        self.reduce = o.reduce;
        set(&mut self.reduce_init, o.reduce_init);
        set(&mut self.reduce_reader, o.reduce_reader);
        set(&mut self.reduce_input_stream, o.reduce_input_stream);
        set(&mut self.reduce_output_stream, o.reduce_output_stream);

        set(&mut self.partitions, o.partitions);
        set(&mut self.merge_partitions, o.merge_partitions);

        set(&mut self.params, o.params);
        set(&mut self.ext_params, o.ext_params);
        set(&mut self.required_files, o.required_files);

        set(&mut self.profile, o.profile);
        set(&mut self.save, o.save);
        set(&mut self.sort, o.sort);
        set(&mut self.status_interval, o.status_interval);
    }

    fn derive_nr_reduces(&self, services: &Services<'_>) -> Result<u32> {
        if self.has_map() {
            return Ok(self.partitions.max(1));
        }
        if !self.input_is_partitioned() {
            return Ok(1);
        }

        // job sólo-reduce encadenado a la salida particionada de otro job
        let mut max_index: Option<u32> = None;
        for replicas in &self.input {
            let index = services
                .index
                .read_index(&replicas[0])
                .map_err(|e| JobError::collaborator("lectura de índice", e))?;
            for (partition, _) in index {
                max_index = Some(max_index.map_or(partition, |m| m.max(partition)));
            }
        }

        match max_index {
            Some(k) => k.checked_add(1).ok_or_else(|| {
                JobError::config(format!("índice de partición fuera de rango: {k}"))
            }),
            None => Ok(1),
        }
    }

    /// Todas las funciones del job (para descubrir dependencias).
    pub fn callables(&self) -> Vec<&Func> {
        let mut funcs: Vec<&Func> = Vec::new();
        funcs.extend(self.map.iter());
        funcs.push(&self.map_init);
        funcs.extend(self.map_reader.iter());
        funcs.extend(self.map_input_stream.iter());
        funcs.extend(self.map_output_stream.iter());
        funcs.extend(self.combiner.iter());
        funcs.extend(self.partition.iter());
        funcs.extend(self.reduce.iter());
        funcs.push(&self.reduce_init);
        funcs.extend(self.reduce_reader.iter());
        funcs.extend(self.reduce_input_stream.iter());
        funcs.extend(self.reduce_output_stream.iter());
        funcs.extend(self.params.funcs());
        funcs
    }

    pub fn input_is_partitioned(&self) -> bool {
        input::input_is_partitioned(&self.input)
    }

    pub fn has_map(&self) -> bool {
        self.map.is_some()
    }

    pub fn has_reduce(&self) -> bool {
        self.reduce.is_some()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn input(&self) -> &[Vec<String>] {
        &self.input
    }

    pub fn jobhome(&self) -> &str {
        &self.jobhome
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn map(&self) -> Option<&Func> {
        self.map.as_ref()
    }

    pub fn map_init(&self) -> &Func {
        &self.map_init
    }

    pub fn map_reader(&self) -> Option<&Func> {
        self.map_reader.as_ref()
    }

    pub fn map_input_stream(&self) -> &[Func] {
        &self.map_input_stream
    }

    pub fn map_output_stream(&self) -> &[Func] {
        &self.map_output_stream
    }

    pub fn combiner(&self) -> Option<&Func> {
        self.combiner.as_ref()
    }

    pub fn partition(&self) -> Option<&Func> {
        self.partition.as_ref()
    }

    pub fn reduce(&self) -> Option<&Func> {
        self.reduce.as_ref()
    }

    pub fn reduce_init(&self) -> &Func {
        &self.reduce_init
    }

    pub fn reduce_reader(&self) -> Option<&Func> {
        self.reduce_reader.as_ref()
    }

    pub fn reduce_input_stream(&self) -> &[Func] {
        &self.reduce_input_stream
    }

    pub fn reduce_output_stream(&self) -> &[Func] {
        &self.reduce_output_stream
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn merge_partitions(&self) -> bool {
        self.merge_partitions
    }

    pub fn nr_reduces(&self) -> u32 {
        self.nr_reduces
    }

    pub fn scheduler(&self) -> Scheduler {
        self.scheduler
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn ext_params(&self) -> &BTreeMap<String, Value> {
        &self.ext_params
    }

    pub fn required_files(&self) -> &RequiredFiles {
        &self.required_files
    }

    pub fn required_modules(&self) -> &[RequiredModule] {
        &self.required_modules
    }

    pub fn profile(&self) -> bool {
        self.profile
    }

    pub fn save(&self) -> bool {
        self.save
    }

    pub fn sort(&self) -> bool {
        self.sort
    }

    pub fn status_interval(&self) -> u64 {
        self.status_interval
    }
}

/// Nombre de job válido: no vacío, sólo `[A-Za-z0-9_]`.
/// El controlador le agrega un sufijo único al crear el job.
pub fn is_job_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// "mayor.menor" de la versión del crate
fn default_version() -> String {
    env!("CARGO_PKG_VERSION")
        .split('.')
        .take(2)
        .collect::<Vec<_>>()
        .join(".")
}

/// Atajo para convertir entradas sueltas en descriptores.
pub fn inputs<I, D>(items: I) -> Vec<InputDescriptor>
where
    I: IntoIterator<Item = D>,
    D: Into<InputDescriptor>,
{
    items.into_iter().map(Into::into).collect()
}
