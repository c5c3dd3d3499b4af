use anyhow::{anyhow, bail, Context};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::context::{ExecContext, Func};
use crate::input::{InputDescriptor, PARTITIONED_SCHEME, TAG_SCHEME};

/* =========================
   Colaboradores externos
   ========================= */

/// Convierte una entrada cruda en listas de URLs concretas.
pub trait AddressResolver {
    fn resolve(&self, input: &InputDescriptor, listdirs: bool) -> anyhow::Result<Vec<Vec<String>>>;
}

/// Lee el índice de un directorio particionado: pares (partición, url).
pub trait IndexReader {
    fn read_index(&self, dir_url: &str) -> anyhow::Result<Vec<(u32, String)>>;
}

/// Descubre los módulos de código que necesitan las funciones del job.
pub trait DependencyFinder {
    fn discover(&self, funcs: &[&Func]) -> anyhow::Result<Vec<RequiredModule>>;
}

/// Empaqueta archivos (ruta -> bytes) y los vuelve a escribir del otro lado.
pub trait FileStore {
    fn expand(&self, paths: &[PathBuf]) -> anyhow::Result<BTreeMap<String, Vec<u8>>>;
    fn write_all(&self, files: &BTreeMap<String, Vec<u8>>, dest: &Path) -> anyhow::Result<()>;
}

/// Módulo requerido por el job. Si trae `source`, ese archivo viaja en required_files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequiredModule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl RequiredModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
        }
    }
}

/// Conjunto de colaboradores que usa la construcción / empaquetado del job.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub resolver: &'a dyn AddressResolver,
    pub index: &'a dyn IndexReader,
    pub modules: &'a dyn DependencyFinder,
    pub files: &'a dyn FileStore,
}

/* =========================
   Implementaciones locales
   ========================= */

/// Almacenamiento sobre un directorio local (`DATA_ROOT`).
///
/// - `dir://host/ruta` se lee de `<root>/ruta`, una línea `<id> <url>` por partición
/// - `tag://nombre` se lee de `<root>/tags/<nombre>` (JSON: lista de listas de réplicas)
/// - rutas locales con comodines se expanden con glob
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_path(&self, dir_url: &str) -> anyhow::Result<PathBuf> {
        let rest = dir_url
            .strip_prefix(PARTITIONED_SCHEME)
            .ok_or_else(|| anyhow!("no es una URL de directorio: {dir_url}"))?;
        // el host no importa en local: nos quedamos con la ruta
        match rest.split_once('/') {
            Some((_host, path)) if !path.is_empty() => Ok(self.root.join(path)),
            _ => bail!("URL de directorio sin ruta: {dir_url}"),
        }
    }

    fn resolve_tag(&self, tag: &str) -> anyhow::Result<Vec<Vec<String>>> {
        let path = self.root.join("tags").join(tag);
        let raw = fs::read(&path).with_context(|| format!("leyendo tag {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("tag mal formado: {tag}"))
    }

    fn expand_glob(&self, pattern: &str) -> anyhow::Result<Vec<Vec<String>>> {
        let mut paths = Vec::new();
        for entry in glob(pattern).with_context(|| format!("patrón inválido: {pattern}"))? {
            let path = entry?;
            if path.is_file() {
                paths.push(path.to_string_lossy().to_string());
            }
        }
        if paths.is_empty() {
            bail!("el patrón {pattern} no coincide con ningún archivo");
        }
        paths.sort();
        Ok(paths.into_iter().map(|p| vec![p]).collect())
    }
}

fn is_glob(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

impl IndexReader for LocalStorage {
    fn read_index(&self, dir_url: &str) -> anyhow::Result<Vec<(u32, String)>> {
        let path = self.dir_path(dir_url)?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("leyendo índice {}", path.display()))?;

        let mut out = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (id, url) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("{}:{}: línea de índice inválida", path.display(), n + 1))?;
            let id: u32 = id
                .parse()
                .with_context(|| format!("{}:{}: partición inválida", path.display(), n + 1))?;
            out.push((id, url.trim().to_string()));
        }
        Ok(out)
    }
}

impl AddressResolver for LocalStorage {
    fn resolve(&self, input: &InputDescriptor, listdirs: bool) -> anyhow::Result<Vec<Vec<String>>> {
        let url = match input {
            // las réplicas ya son concretas
            InputDescriptor::Replicas(urls) => return Ok(vec![urls.clone()]),
            InputDescriptor::Url(url) => url,
        };

        if let Some(tag) = url.strip_prefix(TAG_SCHEME) {
            return self.resolve_tag(tag);
        }
        if url.starts_with(PARTITIONED_SCHEME) && listdirs {
            let urls = self.read_index(url)?;
            debug!("expandiendo {} en {} entradas", url, urls.len());
            return Ok(urls.into_iter().map(|(_, u)| vec![u]).collect());
        }
        if crate::input::scheme(url).is_none() && is_glob(url) {
            return self.expand_glob(url);
        }
        Ok(vec![vec![url.clone()]])
    }
}

/// Archivos del job en un directorio plano (sin subdirectorios).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl FileStore for LocalFiles {
    fn expand(&self, paths: &[PathBuf]) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
        let mut files = BTreeMap::new();
        for path in paths {
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("ruta sin nombre de archivo: {}", path.display()))?
                .to_string_lossy()
                .to_string();
            let content =
                fs::read(path).with_context(|| format!("leyendo {}", path.display()))?;
            if files.insert(name.clone(), content).is_some() {
                bail!("archivo requerido duplicado: {name}");
            }
        }
        Ok(files)
    }

    fn write_all(&self, files: &BTreeMap<String, Vec<u8>>, dest: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(dest)?;
        for (name, content) in files {
            if name.is_empty() || name == ".." || name.contains(['/', '\\']) {
                bail!("nombre de archivo inválido para un directorio plano: {name:?}");
            }
            let path = dest.join(name);
            fs::write(&path, content).with_context(|| format!("escribiendo {}", path.display()))?;
        }
        Ok(())
    }
}

/// Descubre dependencias a partir de los módulos registrados en el contexto.
/// Los módulos builtin ya están en el runtime y no se envían.
#[derive(Debug, Clone, Copy)]
pub struct ContextModules<'a> {
    ctx: &'a ExecContext,
}

impl<'a> ContextModules<'a> {
    pub fn new(ctx: &'a ExecContext) -> Self {
        Self { ctx }
    }
}

impl DependencyFinder for ContextModules<'_> {
    fn discover(&self, funcs: &[&Func]) -> anyhow::Result<Vec<RequiredModule>> {
        let modules: BTreeSet<&str> = funcs
            .iter()
            .filter_map(|f| f.module())
            .filter(|m| !self.ctx.is_builtin_module(m))
            .collect();

        Ok(modules
            .into_iter()
            .map(|name| RequiredModule {
                name: name.to_string(),
                source: self.ctx.source_of(name).map(Path::to_path_buf),
            })
            .collect())
    }
}

/// Colaboradores locales listos para usar (CLI, tests).
pub struct LocalServices<'a> {
    storage: LocalStorage,
    files: LocalFiles,
    modules: ContextModules<'a>,
}

impl<'a> LocalServices<'a> {
    pub fn new(root: impl Into<PathBuf>, ctx: &'a ExecContext) -> Self {
        Self {
            storage: LocalStorage::new(root),
            files: LocalFiles,
            modules: ContextModules::new(ctx),
        }
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            resolver: &self.storage,
            index: &self.storage,
            modules: &self.modules,
            files: &self.files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::{env, io::Write};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("storage_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn write_index(root: &Path, rel: &str, lines: &[&str]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = fs::File::create(path).unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
    }

    #[test]
    fn read_index_parsea_particiones() {
        let root = temp_dir("index");
        write_index(&root, "job1/index", &["0 http://n1/p0", "", "3 http://n2/p3"]);

        let storage = LocalStorage::new(&root);
        let index = storage.read_index("dir://n1/job1/index").unwrap();
        assert_eq!(
            index,
            vec![(0, "http://n1/p0".to_string()), (3, "http://n2/p3".to_string())]
        );
    }

    #[test]
    fn read_index_con_linea_rota_falla() {
        let root = temp_dir("index_roto");
        write_index(&root, "job1/index", &["cero http://n1/p0"]);

        let storage = LocalStorage::new(&root);
        assert!(storage.read_index("dir://n1/job1/index").is_err());
        assert!(storage.read_index("dir://n1").is_err());
    }

    #[test]
    fn dir_se_expande_solo_con_listdirs() {
        let root = temp_dir("listdirs");
        write_index(&root, "job1/index", &["0 raw://a", "1 raw://b"]);
        let storage = LocalStorage::new(&root);
        let dir: InputDescriptor = "dir://n1/job1/index".into();

        let expanded = storage.resolve(&dir, true).unwrap();
        assert_eq!(expanded, vec![vec!["raw://a".to_string()], vec!["raw://b".to_string()]]);

        let kept = storage.resolve(&dir, false).unwrap();
        assert_eq!(kept, vec![vec!["dir://n1/job1/index".to_string()]]);
    }

    #[test]
    fn tag_se_lee_desde_el_directorio_de_tags() {
        let root = temp_dir("tags");
        fs::create_dir_all(root.join("tags")).unwrap();
        fs::write(root.join("tags").join("logs"), r#"[["http://a/1", "http://b/1"]]"#).unwrap();

        let storage = LocalStorage::new(&root);
        let resolved = storage.resolve(&"tag://logs".into(), false).unwrap();
        assert_eq!(
            resolved,
            vec![vec!["http://a/1".to_string(), "http://b/1".to_string()]]
        );
        assert!(storage.resolve(&"tag://nada".into(), false).is_err());
    }

    #[test]
    fn glob_local_expande_archivos_ordenados() {
        let root = temp_dir("glob");
        fs::write(root.join("b.txt"), "b").unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();

        let storage = LocalStorage::new(&root);
        let pattern = format!("{}/*.txt", root.display());
        let resolved = storage.resolve(&pattern.into(), false).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved[0][0].ends_with("a.txt"));
        assert!(resolved[1][0].ends_with("b.txt"));
    }

    #[test]
    fn local_files_expand_y_write_all() {
        let src = temp_dir("files_src");
        let dest = temp_dir("files_dest").join("lib");
        fs::write(src.join("helper.rs"), b"pub fn x() {}").unwrap();

        let files = LocalFiles.expand(&[src.join("helper.rs")]).unwrap();
        assert_eq!(files.get("helper.rs").map(Vec::as_slice), Some(&b"pub fn x() {}"[..]));

        LocalFiles.write_all(&files, &dest).unwrap();
        assert_eq!(fs::read(dest.join("helper.rs")).unwrap(), b"pub fn x() {}");
    }

    #[test]
    fn write_all_rechaza_rutas_con_separadores() {
        let dest = temp_dir("files_malos");
        let mut files = BTreeMap::new();
        files.insert("../fuera.txt".to_string(), b"x".to_vec());
        assert!(LocalFiles.write_all(&files, &dest).is_err());
    }

    #[test]
    fn expand_con_nombres_duplicados_falla() {
        let a = temp_dir("dup_a");
        let b = temp_dir("dup_b");
        fs::write(a.join("same.txt"), "1").unwrap();
        fs::write(b.join("same.txt"), "2").unwrap();
        assert!(LocalFiles.expand(&[a.join("same.txt"), b.join("same.txt")]).is_err());
    }

    #[test]
    fn context_modules_ignora_builtins() {
        let mut ctx = ExecContext::new();
        ctx.register("std::noop", |_, _| Ok(Value::Null))
            .and_then(|c| c.register("demo::f", |_, _| Ok(Value::Null)))
            .and_then(|c| c.register("demo::g", |_, _| Ok(Value::Null)))
            .unwrap()
            .builtin_module("std")
            .module_source("demo", "/src/demo.rs");

        let noop = ctx.func("std::noop").unwrap();
        let f = ctx.func("demo::f").unwrap();
        let g = ctx.func("demo::g").unwrap();
        let anon = Func::anonymous(|_, _| Ok(Value::Null));

        let modules = ContextModules::new(&ctx)
            .discover(&[&noop, &f, &g, &anon])
            .unwrap();
        assert_eq!(
            modules,
            vec![RequiredModule {
                name: "demo".to_string(),
                source: Some(PathBuf::from("/src/demo.rs")),
            }]
        );
    }
}
