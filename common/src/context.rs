use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::error::CodecError;

/// Cuerpo nativo de una función de job: recibe los datos capturados y los argumentos.
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Representación de una closure que puede viajar por la red:
/// un nombre registrado (ej: "wordcount::map") + datos capturados.
/// Del otro lado el nombre se resuelve contra un `ExecContext`.
#[derive(Clone)]
pub struct Func {
    name: Option<String>,
    captured: Value,
    body: NativeFn,
}

impl Func {
    pub fn named<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            captured: Value::Null,
            body: Arc::new(body),
        }
    }

    /// Función sin nombre: se puede llamar localmente pero no empaquetar.
    pub fn anonymous<F>(body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: None,
            captured: Value::Null,
            body: Arc::new(body),
        }
    }

    /// Devuelve la misma función con otros datos capturados.
    pub fn bind(mut self, captured: Value) -> Self {
        self.captured = captured;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Módulo al que pertenece: todo lo anterior al último "::".
    pub fn module(&self) -> Option<&str> {
        self.name
            .as_deref()
            .and_then(|n| n.rsplit_once("::"))
            .map(|(module, _)| module)
    }

    pub fn captured(&self) -> &Value {
        &self.captured
    }

    pub fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        (self.body)(&self.captured, args)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("name", &self.name.as_deref().unwrap_or("<anonymous>"))
            .field("captured", &self.captured)
            .finish()
    }
}

impl PartialEq for Func {
    fn eq(&self, other: &Self) -> bool {
        match (&self.name, &other.name) {
            (Some(a), Some(b)) => a == b && self.captured == other.captured,
            // dos anónimas sólo son iguales si comparten el mismo cuerpo
            (None, None) => Arc::ptr_eq(&self.body, &other.body) && self.captured == other.captured,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ModuleInfo {
    builtin: bool,
    source: Option<PathBuf>,
}

/// Espacio de nombres con el código ya cargado en un proceso.
/// Es lo que permite decodificar tokens de función.
#[derive(Clone, Default)]
pub struct ExecContext {
    funcs: BTreeMap<String, NativeFn>,
    modules: BTreeMap<String, ModuleInfo>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra una función con nombre calificado ("modulo::funcion").
    /// Falla con `Duplicate` si el nombre ya está tomado.
    pub fn register<F>(&mut self, name: &str, body: F) -> Result<&mut Self, CodecError>
    where
        F: Fn(&Value, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        if self.funcs.contains_key(name) {
            return Err(CodecError::Duplicate(name.to_string()));
        }
        Ok(self.define(name, Arc::new(body)))
    }

    /// Alta sin chequeo, para las funciones del runtime (nombres constantes).
    pub(crate) fn define(&mut self, name: &str, body: NativeFn) -> &mut Self {
        if let Some((module, _)) = name.rsplit_once("::") {
            self.modules.entry(module.to_string()).or_default();
        }
        self.funcs.insert(name.to_string(), body);
        self
    }

    /// Marca un módulo como parte del runtime: no se envía con el job.
    pub fn builtin_module(&mut self, module: &str) -> &mut Self {
        self.modules.entry(module.to_string()).or_default().builtin = true;
        self
    }

    /// Asocia un archivo fuente a un módulo; se empaqueta en required_files.
    pub fn module_source(&mut self, module: &str, path: impl Into<PathBuf>) -> &mut Self {
        self.modules.entry(module.to_string()).or_default().source = Some(path.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn is_builtin_module(&self, module: &str) -> bool {
        self.modules.get(module).map(|m| m.builtin).unwrap_or(false)
    }

    pub fn source_of(&self, module: &str) -> Option<&Path> {
        self.modules.get(module).and_then(|m| m.source.as_deref())
    }

    /// Busca una función registrada y la devuelve sin datos capturados.
    pub fn func(&self, name: &str) -> Result<Func, CodecError> {
        let body = self
            .funcs
            .get(name)
            .ok_or_else(|| CodecError::UnknownFunction(name.to_string()))?;
        Ok(Func {
            name: Some(name.to_string()),
            captured: Value::Null,
            body: Arc::clone(body),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("funcs", &self.funcs.keys().collect::<Vec<_>>())
            .field("modules", &self.modules)
            .finish()
    }
}
