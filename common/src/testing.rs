//! Colaboradores en memoria para los tests de construcción y empaquetado.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::anyhow;

use crate::context::Func;
use crate::input::InputDescriptor;
use crate::storage::{
    AddressResolver, DependencyFinder, FileStore, IndexReader, RequiredModule, Services,
};

#[derive(Default)]
pub(crate) struct Fakes {
    /// dir_url -> entradas del índice
    pub index: BTreeMap<String, Vec<(u32, String)>>,
    pub modules: Vec<RequiredModule>,
    /// ruta -> contenido, para `expand`
    pub disk: BTreeMap<PathBuf, Vec<u8>>,
    pub discover_calls: Cell<usize>,
    pub last_listdirs: Cell<Option<bool>>,
    pub written: RefCell<Option<(PathBuf, BTreeMap<String, Vec<u8>>)>>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, dir_url: &str, entries: &[(u32, &str)]) -> Self {
        self.index.insert(
            dir_url.to_string(),
            entries.iter().map(|(i, u)| (*i, u.to_string())).collect(),
        );
        self
    }

    pub fn with_modules(mut self, modules: Vec<RequiredModule>) -> Self {
        self.modules = modules;
        self
    }

    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.disk.insert(PathBuf::from(path), content.to_vec());
        self
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            resolver: self,
            index: self,
            modules: self,
            files: self,
        }
    }
}

impl AddressResolver for Fakes {
    fn resolve(&self, input: &InputDescriptor, listdirs: bool) -> anyhow::Result<Vec<Vec<String>>> {
        self.last_listdirs.set(Some(listdirs));
        Ok(match input {
            InputDescriptor::Url(url) if url.starts_with("fail://") => {
                return Err(anyhow!("no se pudo resolver {url}"))
            }
            InputDescriptor::Url(url) => vec![vec![url.clone()]],
            InputDescriptor::Replicas(urls) => vec![urls.clone()],
        })
    }
}

impl IndexReader for Fakes {
    fn read_index(&self, dir_url: &str) -> anyhow::Result<Vec<(u32, String)>> {
        self.index
            .get(dir_url)
            .cloned()
            .ok_or_else(|| anyhow!("no hay índice en {dir_url}"))
    }
}

impl DependencyFinder for Fakes {
    fn discover(&self, _funcs: &[&Func]) -> anyhow::Result<Vec<RequiredModule>> {
        self.discover_calls.set(self.discover_calls.get() + 1);
        Ok(self.modules.clone())
    }
}

impl FileStore for Fakes {
    fn expand(&self, paths: &[PathBuf]) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
        let mut out = BTreeMap::new();
        for path in paths {
            let content = self
                .disk
                .get(path)
                .ok_or_else(|| anyhow!("no existe {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            out.insert(name, content.clone());
        }
        Ok(out)
    }

    fn write_all(&self, files: &BTreeMap<String, Vec<u8>>, dest: &Path) -> anyhow::Result<()> {
        *self.written.borrow_mut() = Some((dest.to_path_buf(), files.clone()));
        Ok(())
    }
}
