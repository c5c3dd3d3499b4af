use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf, time::Duration};

use common::builtins::std_context;
use common::config::Settings;
use common::storage::LocalServices;
use common::{JobFile, JobSpec, RequiredFiles};

use crate::handle::Job;
use crate::http::HttpController;

const DEFAULT_JOB_NAME: &str = "job";

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI para construir, empaquetar y enviar jobs al master")]
struct Cli {
    /// URL del master (por defecto MASTER_URL o http://localhost:8080)
    #[arg(long, env = "MASTER_URL", global = true)]
    master: Option<String>,

    /// Raíz local para dir:// y tag://
    #[arg(long, env = "DATA_ROOT", global = true)]
    data_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía el job descrito en un archivo JSON
    Submit {
        #[arg(value_name = "JOB_JSON")]
        job: PathBuf,
        /// Nombre (prefijo) del job; por defecto el `prefix` del archivo
        #[arg(long)]
        name: Option<String>,
        /// Espera a que termine e imprime los resultados
        #[arg(long)]
        wait: bool,
    },
    /// Construye el jobpack sin enviarlo
    Pack {
        #[arg(value_name = "JOB_JSON")]
        job: PathBuf,
        #[arg(long, short)]
        out: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Desempaqueta un jobpack y muestra la especificación
    Inspect {
        #[arg(value_name = "JOBPACK")]
        file: PathBuf,
        /// Dónde escribir los required_files (por defecto JOB_LIB_DIR)
        #[arg(long)]
        lib: Option<PathBuf>,
        /// No escribir los required_files
        #[arg(long, conflicts_with = "lib")]
        no_lib: bool,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "NOMBRE")]
        name: String,
    },
    /// Lista las URLs de salida de un job
    Results {
        #[arg(value_name = "NOMBRE")]
        name: String,
    },
    /// Resultados de la fase map
    Mapresults {
        #[arg(value_name = "NOMBRE")]
        name: String,
    },
    /// Baja el jobpack del master y muestra la especificación
    Jobspec {
        #[arg(value_name = "NOMBRE")]
        name: String,
    },
    /// Lista las claves fuera de banda, o baja una si se da `--key`
    Oob {
        #[arg(value_name = "NOMBRE")]
        name: String,
        #[arg(long)]
        key: Option<String>,
    },
    /// Estadísticas de profiling (claves profile-*)
    Profile {
        #[arg(value_name = "NOMBRE")]
        name: String,
    },
    /// Espera a que un job termine
    Wait {
        #[arg(value_name = "NOMBRE")]
        name: String,
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    Kill {
        #[arg(value_name = "NOMBRE")]
        name: String,
    },
    Clean {
        #[arg(value_name = "NOMBRE")]
        name: String,
    },
    Purge {
        #[arg(value_name = "NOMBRE")]
        name: String,
    },
    /// Eventos del job a partir de un offset
    Events {
        #[arg(value_name = "NOMBRE")]
        name: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
}

fn job_name(cli_name: Option<String>, file: &JobFile) -> String {
    cli_name
        .or_else(|| file.prefix.clone())
        .unwrap_or_else(|| DEFAULT_JOB_NAME.to_string())
}

/// Directorio donde `inspect` materializa los required_files.
fn lib_target(lib: Option<PathBuf>, no_lib: bool, settings: &Settings) -> Option<PathBuf> {
    if no_lib {
        return None;
    }
    Some(lib.unwrap_or_else(|| settings.lib_dir.clone()))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(url) = cli.master {
        settings.master_url = url;
    }
    if let Some(root) = cli.data_root {
        settings.data_root = root;
    }

    let ctx = std_context();
    let local = LocalServices::new(settings.data_root.clone(), &ctx);
    let services = local.services();
    let controller = HttpController::new(&settings.master_url)?;

    match cli.command {
        Commands::Submit { job, name, wait } => {
            let file = JobFile::from_path(&job)?;
            let name = job_name(name, &file);
            let options = file.into_options(&ctx)?;

            let mut handle = Job::new(&controller, &settings, name);
            handle.run(options, &services).await?;
            println!("Job creado: {}", handle.name());

            if wait {
                let results = handle.wait(Duration::from_secs(1), None).await?;
                print_urls(&results.urls);
            }
        }
        Commands::Pack { job, out, name } => {
            let file = JobFile::from_path(&job)?;
            let name = job_name(name, &file);
            let mut options = file.into_options(&ctx)?;
            options.prefix = Some(name);

            let spec = JobSpec::build(options, &settings, &services)?;
            let bytes = spec.pack(services.files)?;
            fs::write(&out, &bytes).with_context(|| format!("escribiendo {}", out.display()))?;
            println!("Jobpack de {} bytes en {}", bytes.len(), out.display());
        }
        Commands::Inspect { file, lib, no_lib } => {
            let bytes = fs::read(&file).with_context(|| format!("leyendo {}", file.display()))?;
            let lib = lib_target(lib, no_lib, &settings);
            let spec = JobSpec::unpack(&bytes, &ctx, lib.as_deref(), &settings, &services)?;
            print_spec(&spec);
        }
        Commands::Status { name } => {
            let info = Job::new(&controller, &settings, name).jobinfo().await?;
            println!("Job:");
            println!("  nombre: {}", info.name);
            println!("  owner: {}", info.owner);
            println!("  estado: {:?}", info.status);
            println!(
                "  tareas: {}/{} ({} fallidas)",
                info.completed_tasks, info.total_tasks, info.failed_tasks
            );
        }
        Commands::Results { name } => {
            let results = Job::new(&controller, &settings, name).results().await?;
            println!("estado: {:?}", results.status);
            print_urls(&results.urls);
        }
        Commands::Mapresults { name } => {
            let results = Job::new(&controller, &settings, name).mapresults().await?;
            println!("estado: {:?}", results.status);
            print_urls(&results.urls);
        }
        Commands::Jobspec { name } => {
            let spec = Job::new(&controller, &settings, name)
                .jobspec(&ctx, &services)
                .await?;
            print_spec(&spec);
        }
        Commands::Oob { name, key } => {
            let job = Job::new(&controller, &settings, name);
            match key {
                Some(key) => {
                    let value = job.oob_get(&key).await?;
                    println!("{}", String::from_utf8_lossy(&value));
                }
                None => {
                    for key in job.oob_list().await? {
                        println!("{key}");
                    }
                }
            }
        }
        Commands::Profile { name } => {
            let stats = Job::new(&controller, &settings, name).profile_stats().await?;
            for (key, value) in stats {
                println!("== {key}");
                println!("{}", String::from_utf8_lossy(&value));
            }
        }
        Commands::Wait {
            name,
            poll_ms,
            timeout_secs,
        } => {
            let results = Job::new(&controller, &settings, name)
                .wait(
                    Duration::from_millis(poll_ms),
                    timeout_secs.map(Duration::from_secs),
                )
                .await?;
            print_urls(&results.urls);
        }
        Commands::Kill { name } => {
            Job::new(&controller, &settings, name.as_str()).kill().await?;
            println!("Job {name} terminado");
        }
        Commands::Clean { name } => {
            Job::new(&controller, &settings, name.as_str()).clean().await?;
            println!("Job {name} limpiado");
        }
        Commands::Purge { name } => {
            Job::new(&controller, &settings, name.as_str()).purge().await?;
            println!("Job {name} purgado");
        }
        Commands::Events { name, offset } => {
            for event in Job::new(&controller, &settings, name).events(offset).await? {
                println!("[{}] {} {}", event.offset, event.host, event.message);
            }
        }
    }

    Ok(())
}

fn print_urls(urls: &[Vec<String>]) {
    if urls.is_empty() {
        println!("(sin resultados)");
    }
    for replicas in urls {
        println!("  {}", replicas.join(" "));
    }
}

fn print_spec(spec: &JobSpec) {
    let name_of = |f: Option<&common::Func>| {
        f.and_then(|f| f.name()).unwrap_or("-").to_string()
    };

    println!("Job {}:", spec.prefix());
    println!("  owner: {}", spec.owner());
    println!("  worker: {}", spec.worker());
    println!("  map: {}", name_of(spec.map()));
    println!("  reduce: {}", name_of(spec.reduce()));
    println!("  partitions: {}", spec.partitions());
    println!("  nr_reduces: {}", spec.nr_reduces());
    println!("  scheduler: {:?}", spec.scheduler());
    println!("  entradas:");
    for replicas in spec.input() {
        println!("    {}", replicas.join(" "));
    }
    if let RequiredFiles::Contents(files) = spec.required_files() {
        for (name, content) in files {
            println!("  archivo {name}: {} bytes", content.len());
        }
    }
}
