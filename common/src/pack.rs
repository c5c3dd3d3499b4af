//! Formato de transporte de la especificación (jobpack).
//!
//! Un único objeto JSON cuyas claves son exactamente los nombres de opción.
//! Las claves transparentes viajan como datos planos; el resto pasa por el
//! codec de objetos opacos.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, path::PathBuf};
use tracing::{info, warn};

use crate::codec::{Opaque, Token};
use crate::config::Settings;
use crate::context::{ExecContext, Func};
use crate::error::{CodecError, JobError, Result};
use crate::input::InputDescriptor;
use crate::options::{JobOptions, RequiredFiles, SchedulerOptions};
use crate::params::Params;
use crate::spec::JobSpec;
use crate::storage::{FileStore, RequiredModule, Services};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct JobPack {
    prefix: Option<String>,
    input: Option<Vec<Vec<String>>>,
    jobhome: Option<String>,
    worker: Option<String>,
    owner: Option<String>,
    nr_reduces: Option<u32>,
    scheduler: Option<SchedulerOptions>,
    #[serde(rename = "map?")]
    has_map: Option<bool>,
    #[serde(rename = "reduce?")]
    has_reduce: Option<bool>,

    map: Option<Token>,
    map_init: Option<Token>,
    map_reader: Option<Token>,
    map_input_stream: Option<Token>,
    map_output_stream: Option<Token>,
    combiner: Option<Token>,
    partition: Option<Token>,
    reduce: Option<Token>,
    reduce_init: Option<Token>,
    reduce_reader: Option<Token>,
    reduce_input_stream: Option<Token>,
    reduce_output_stream: Option<Token>,
    partitions: Option<Token>,
    merge_partitions: Option<Token>,
    params: Option<Token>,
    ext_params: Option<Token>,
    required_files: Option<Token>,
    required_modules: Option<Token>,
    profile: Option<Token>,
    save: Option<Token>,
    sort: Option<Token>,
    status_interval: Option<Token>,
    version: Option<Token>,
}

fn enc<T: Opaque>(value: &T) -> std::result::Result<Option<Token>, CodecError> {
    value.encode().map(Some)
}

fn dec<T: Opaque>(token: Option<Token>, ctx: &ExecContext) -> std::result::Result<Option<T>, CodecError> {
    token.map(|t| T::decode(t, ctx)).transpose()
}

impl JobSpec {
    /// Serializa la especificación (funciones incluidas) para enviarla al controlador.
    ///
    /// `required_files` dados como rutas se expanden con `files`, y se suman
    /// los fuentes de los módulos requeridos que los traigan.
    pub fn pack(&self, files: &dyn FileStore) -> Result<Vec<u8>> {
        let mut required_files = match &self.required_files {
            RequiredFiles::Contents(contents) => contents.clone(),
            RequiredFiles::Paths(paths) => files
                .expand(paths)
                .map_err(|e| JobError::collaborator("expansión de archivos", e))?,
        };

        let sources: Vec<PathBuf> = self
            .required_modules
            .iter()
            .filter_map(|m| m.source.clone())
            .collect();
        if !sources.is_empty() {
            let module_files = files
                .expand(&sources)
                .map_err(|e| JobError::collaborator("expansión de módulos", e))?;
            for (name, content) in module_files {
                match required_files.get(&name) {
                    Some(existing) if *existing != content => {
                        return Err(JobError::config(format!(
                            "archivo requerido duplicado con otro contenido: {name}"
                        )))
                    }
                    _ => {
                        required_files.insert(name, content);
                    }
                }
            }
        }

        let pack = JobPack {
            prefix: Some(self.prefix.clone()),
            input: Some(self.input.clone()),
            jobhome: Some(self.jobhome.clone()),
            worker: Some(self.worker.clone()),
            owner: Some(self.owner.clone()),
            nr_reduces: Some(self.nr_reduces),
            scheduler: Some(SchedulerOptions::from(self.scheduler)),
            has_map: Some(self.has_map()),
            has_reduce: Some(self.has_reduce()),

            map: enc(&self.map)?,
            map_init: enc(&self.map_init)?,
            map_reader: enc(&self.map_reader)?,
            map_input_stream: enc(&self.map_input_stream)?,
            map_output_stream: enc(&self.map_output_stream)?,
            combiner: enc(&self.combiner)?,
            partition: enc(&self.partition)?,
            reduce: enc(&self.reduce)?,
            reduce_init: enc(&self.reduce_init)?,
            reduce_reader: enc(&self.reduce_reader)?,
            reduce_input_stream: enc(&self.reduce_input_stream)?,
            reduce_output_stream: enc(&self.reduce_output_stream)?,
            partitions: enc(&self.partitions)?,
            merge_partitions: enc(&self.merge_partitions)?,
            params: enc(&self.params)?,
            ext_params: enc(&self.ext_params)?,
            required_files: enc(&required_files)?,
            required_modules: enc(&self.required_modules)?,
            profile: enc(&self.profile)?,
            save: enc(&self.save)?,
            sort: enc(&self.sort)?,
            status_interval: enc(&self.status_interval)?,
            version: enc(&self.version)?,
        };

        let bytes = serde_json::to_vec(&pack).map_err(CodecError::Wire)?;
        info!(
            "jobpack {:?}: {} bytes, {} archivos",
            self.prefix,
            bytes.len(),
            required_files.len()
        );
        Ok(bytes)
    }

    /// Reconstruye una especificación desde un jobpack, validándola de nuevo.
    ///
    /// Las funciones se resuelven contra `ctx`. Si se da `lib`, los
    /// `required_files` se escriben ahí antes de validar. Los campos derivados
    /// que vengan en el jobpack tienen que coincidir con los que se recalculan.
    pub fn unpack(
        bytes: &[u8],
        ctx: &ExecContext,
        lib: Option<&Path>,
        settings: &Settings,
        services: &Services<'_>,
    ) -> Result<Self> {
        let pack: JobPack = serde_json::from_slice(bytes).map_err(CodecError::Wire)?;
        let JobPack {
            prefix,
            input,
            jobhome,
            worker,
            owner,
            nr_reduces,
            scheduler,
            has_map,
            has_reduce,
            map,
            map_init,
            map_reader,
            map_input_stream,
            map_output_stream,
            combiner,
            partition,
            reduce,
            reduce_init,
            reduce_reader,
            reduce_input_stream,
            reduce_output_stream,
            partitions,
            merge_partitions,
            params,
            ext_params,
            required_files,
            required_modules,
            profile,
            save,
            sort,
            status_interval,
            version,
        } = pack;

        let required_files: Option<BTreeMap<String, Vec<u8>>> = dec(required_files, ctx)?;
        if let (Some(dest), Some(files)) = (lib, required_files.as_ref()) {
            services
                .files
                .write_all(files, dest)
                .map_err(|e| JobError::collaborator("escritura de archivos requeridos", e))?;
        }

        let options = JobOptions {
            prefix,
            // ya vienen normalizadas: cada entrada es una lista de réplicas
            input: input.map(|i| i.into_iter().map(InputDescriptor::Replicas).collect()),
            jobhome,
            worker,
            owner,
            version: dec::<String>(version, ctx)?,

            map: dec::<Option<Func>>(map, ctx)?.flatten(),
            map_init: dec(map_init, ctx)?,
            map_reader: dec::<Option<Func>>(map_reader, ctx)?.flatten(),
            map_input_stream: dec(map_input_stream, ctx)?,
            map_output_stream: dec(map_output_stream, ctx)?,
            combiner: dec::<Option<Func>>(combiner, ctx)?.flatten(),
            partition: dec(partition, ctx)?,

            reduce: dec::<Option<Func>>(reduce, ctx)?.flatten(),
            reduce_init: dec(reduce_init, ctx)?,
            reduce_reader: dec(reduce_reader, ctx)?,
            reduce_input_stream: dec(reduce_input_stream, ctx)?,
            reduce_output_stream: dec(reduce_output_stream, ctx)?,

            partitions: dec(partitions, ctx)?,
            merge_partitions: dec(merge_partitions, ctx)?,
            scheduler,

            params: dec::<Params>(params, ctx)?,
            ext_params: dec(ext_params, ctx)?,
            required_files: required_files.map(RequiredFiles::Contents),
            required_modules: dec::<Vec<RequiredModule>>(required_modules, ctx)?,

            profile: dec(profile, ctx)?,
            save: dec(save, ctx)?,
            sort: dec(sort, ctx)?,
            status_interval: dec(status_interval, ctx)?,
        };

        let spec = JobSpec::build(options, settings, services)?;

        check_derived("nr_reduces", nr_reduces, spec.nr_reduces)?;
        check_derived("map?", has_map, spec.has_map())?;
        check_derived("reduce?", has_reduce, spec.has_reduce())?;

        info!("jobpack {:?} desempaquetado", spec.prefix);
        Ok(spec)
    }
}

// Un campo derivado del jobpack que no coincide indica un payload adulterado o viejo.
fn check_derived<T>(key: &str, wire: Option<T>, derived: T) -> Result<()>
where
    T: PartialEq + std::fmt::Debug,
{
    match wire {
        Some(value) if value != derived => {
            warn!("jobpack rechazado: {key}={value:?}, se esperaba {derived:?}");
            Err(JobError::config(format!(
                "{key} del jobpack ({value:?}) no coincide con el derivado ({derived:?})"
            )))
        }
        _ => Ok(()),
    }
}
