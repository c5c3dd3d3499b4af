use serde_json::Value;
use std::collections::BTreeMap;

use crate::codec::{Opaque, Token};
use crate::context::{ExecContext, Func};
use crate::error::{CodecError, JobError};

/// Prefijo de los nombres privados: nunca se serializan.
pub const PRIVATE_PREFIX: char = '_';

/// Valor de un parámetro: dato plano o función.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Data(Value),
    Func(Func),
}

/// Contenedor de parámetros para las tareas map / reduce.
///
/// Cada tarea recibe su propia copia (ver `for_task`), así que lo que una
/// tarea modifique no lo ve ninguna otra.
///
/// ```
/// use common::params::Params;
///
/// let mut params = Params::new();
/// params.set("c", 0).unwrap();
/// params.set("_local", "no viaja").unwrap();
///
/// let state = params.capture().unwrap();
/// assert!(state.contains_key("c"));
/// assert!(!state.contains_key("_local"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), JobError> {
        self.insert(name, Param::Data(value.into()))
    }

    pub fn set_func(&mut self, name: &str, func: Func) -> Result<(), JobError> {
        self.insert(name, Param::Func(func))
    }

    fn insert(&mut self, name: &str, param: Param) -> Result<(), JobError> {
        if !is_identifier(name) {
            return Err(JobError::config(format!(
                "nombre de parámetro inválido: {:?}",
                name
            )));
        }
        self.values.insert(name.to_string(), param);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.values.get(name)
    }

    pub fn data(&self, name: &str) -> Option<&Value> {
        match self.values.get(name) {
            Some(Param::Data(v)) => Some(v),
            _ => None,
        }
    }

    pub fn func(&self, name: &str) -> Option<&Func> {
        match self.values.get(name) {
            Some(Param::Func(f)) => Some(f),
            _ => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Param> {
        self.values.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Funciones guardadas en el contenedor (para descubrir dependencias).
    pub fn funcs(&self) -> impl Iterator<Item = &Func> {
        self.values.values().filter_map(|p| match p {
            Param::Func(f) => Some(f),
            Param::Data(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Estado transmisible: nombre público -> valor codificado.
    pub fn capture(&self) -> Result<BTreeMap<String, Token>, CodecError> {
        self.values
            .iter()
            .filter(|(name, _)| !name.starts_with(PRIVATE_PREFIX))
            .map(|(name, param)| {
                let token = match param {
                    Param::Data(v) => Token::Literal(v.clone()),
                    Param::Func(f) => f.encode()?,
                };
                Ok((name.clone(), token))
            })
            .collect()
    }

    /// Reconstruye un contenedor a partir de lo que devolvió `capture`.
    pub fn restore(state: BTreeMap<String, Token>, ctx: &ExecContext) -> Result<Self, CodecError> {
        let mut values = BTreeMap::new();
        for (name, token) in state {
            // lo mismo que aceptaría `set`, y nunca privados
            if !is_identifier(&name) || name.starts_with(PRIVATE_PREFIX) {
                return Err(CodecError::InvalidName(name));
            }
            let param = match token {
                Token::Literal(v) => Param::Data(v),
                func @ Token::Func { .. } => Param::Func(Func::decode(func, ctx)?),
                other => {
                    return Err(CodecError::Mismatch {
                        expected: "literal o func",
                        found: other.kind(),
                    })
                }
            };
            values.insert(name, param);
        }
        Ok(Self { values })
    }

    /// Copia profunda para una instancia de tarea (capture + restore).
    pub fn for_task(&self, ctx: &ExecContext) -> Result<Self, CodecError> {
        Self::restore(self.capture()?, ctx)
    }
}

/// Nombre con forma de identificador: letra o '_' seguido de alfanuméricos o '_'.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
