use anyhow::{anyhow, bail};
use serde_json::{json, Value};
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::context::{ExecContext, Func};

/// Módulo del runtime: sus funciones nunca viajan como required_modules.
pub const STD_MODULE: &str = "std";
pub const WORDCOUNT_MODULE: &str = "wordcount";

pub const NOOP: &str = "std::noop";
pub const DEFAULT_PARTITION: &str = "std::default_partition";
pub const CHAIN_READER: &str = "std::chain_reader";
pub const MAP_INPUT_STREAM: &str = "std::map_input_stream";
pub const MAP_OUTPUT_STREAM: &str = "std::map_output_stream";
pub const REDUCE_INPUT_STREAM: &str = "std::reduce_input_stream";
pub const REDUCE_OUTPUT_STREAM: &str = "std::reduce_output_stream";
pub const TASK_OUTPUT_STREAM: &str = "std::task_output_stream";

const STREAM_STAGES: [&str; 6] = [
    CHAIN_READER,
    MAP_INPUT_STREAM,
    MAP_OUTPUT_STREAM,
    REDUCE_INPUT_STREAM,
    REDUCE_OUTPUT_STREAM,
    TASK_OUTPUT_STREAM,
];

/// Contexto con todo lo que trae el runtime: `std` + `wordcount`.
pub fn std_context() -> ExecContext {
    let mut ctx = ExecContext::new();
    ctx.builtin_module(STD_MODULE)
        .builtin_module(WORDCOUNT_MODULE)
        .define(NOOP, Arc::new(noop_body))
        .define(DEFAULT_PARTITION, Arc::new(default_partition_body));
    for stage in STREAM_STAGES {
        ctx.define(stage, Arc::new(stream_stage_body));
    }
    ctx.define("wordcount::map", Arc::new(wordcount_map))
        .define("wordcount::reduce", Arc::new(wordcount_reduce))
        .define("wordcount::lower", Arc::new(wordcount_lower));
    ctx
}

pub fn noop() -> Func {
    Func::named(NOOP, noop_body)
}

pub fn default_partition() -> Func {
    Func::named(DEFAULT_PARTITION, default_partition_body)
}

/// Una etapa de stream por nombre (ej: `std::map_input_stream`).
pub fn stream_stage(name: &str) -> Func {
    Func::named(name, stream_stage_body)
}

/// Aplica una cadena de etapas en orden: la salida de una es la entrada de la siguiente.
pub fn apply_chain(chain: &[Func], input: Value) -> anyhow::Result<Value> {
    chain.iter().try_fold(input, |acc, stage| stage.call(&[acc]))
}

fn noop_body(_captured: &Value, _args: &[Value]) -> anyhow::Result<Value> {
    Ok(Value::Null)
}

// las etapas estándar dejan pasar el descriptor de stream sin tocarlo
fn stream_stage_body(_captured: &Value, args: &[Value]) -> anyhow::Result<Value> {
    Ok(args.first().cloned().unwrap_or(Value::Null))
}

/// args: [clave, nr_particiones] -> partición = hash(clave) % nr_particiones
fn default_partition_body(_captured: &Value, args: &[Value]) -> anyhow::Result<Value> {
    let key = match args.first() {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => bail!("default_partition necesita una clave"),
    };
    let partitions = args
        .get(1)
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .ok_or_else(|| anyhow!("default_partition necesita nr_particiones > 0"))?;

    Ok(json!(hash_key_to_partition(&key, partitions)))
}

fn hash_key_to_partition(key: &str, partitions: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() % partitions
}

/* =========================
   wordcount
   ========================= */

/// Normaliza un token: sólo alfanumérico y '_', en minúscula.
fn clean_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

/// línea -> [[token, 1], ...]
fn wordcount_map(_captured: &Value, args: &[Value]) -> anyhow::Result<Value> {
    let line = args.first().and_then(Value::as_str).unwrap_or("");
    let pairs: Vec<Value> = line
        .split_whitespace()
        .map(clean_token)
        .filter(|t| !t.is_empty())
        .map(|t| json!([t, 1_u64]))
        .collect();
    Ok(Value::Array(pairs))
}

/// [conteos...] -> suma
fn wordcount_reduce(_captured: &Value, args: &[Value]) -> anyhow::Result<Value> {
    let values = args
        .first()
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("wordcount::reduce espera una lista de conteos"))?;
    Ok(json!(values.iter().filter_map(Value::as_u64).sum::<u64>()))
}

fn wordcount_lower(_captured: &Value, args: &[Value]) -> anyhow::Result<Value> {
    let s = args.first().and_then(Value::as_str).unwrap_or("");
    Ok(json!(s.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;

    #[test]
    fn default_partition_es_determinista_y_esta_en_rango() {
        let f = default_partition();
        let p1 = f.call(&[json!("hola"), json!(4)]).unwrap();
        let p2 = f.call(&[json!("hola"), json!(4)]).unwrap();
        assert_eq!(p1, p2);
        assert!(p1.as_u64().unwrap() < 4);
    }

    #[test]
    fn default_partition_sin_particiones_falla() {
        assert!(default_partition().call(&[json!("x"), json!(0)]).is_err());
        assert!(default_partition().call(&[]).is_err());
    }

    #[test]
    fn wordcount_map_normaliza_tokens() {
        let ctx = std_context();
        let map = ctx.func("wordcount::map").unwrap();
        let out = map.call(&[json!("Hola hola, mundo!!")]).unwrap();
        assert_eq!(out, json!([["hola", 1], ["hola", 1], ["mundo", 1]]));
    }

    #[test]
    fn wordcount_reduce_suma() {
        let ctx = std_context();
        let reduce = ctx.func("wordcount::reduce").unwrap();
        assert_eq!(reduce.call(&[json!([1, 2, 3])]).unwrap(), json!(6));
        assert!(reduce.call(&[json!("no es lista")]).is_err());
    }

    #[test]
    fn apply_chain_respeta_el_orden() {
        let ctx = std_context();
        let chain = vec![
            stream_stage(MAP_INPUT_STREAM),
            ctx.func("wordcount::lower").unwrap(),
            Func::anonymous(|_, args| {
                let s = args.first().and_then(Value::as_str).unwrap_or("");
                Ok(json!(format!("{s}-fin")))
            }),
        ];
        assert_eq!(apply_chain(&chain, json!("ABC")).unwrap(), json!("abc-fin"));
        assert_eq!(apply_chain(&[], json!(1)).unwrap(), json!(1));
    }

    #[test]
    fn std_context_registra_los_builtins() {
        let ctx = std_context();
        for name in [NOOP, DEFAULT_PARTITION].into_iter().chain(STREAM_STAGES) {
            assert!(ctx.contains(name), "falta {name}");
        }
        assert!(ctx.is_builtin_module(STD_MODULE));
        assert!(ctx.is_builtin_module(WORDCOUNT_MODULE));
    }

    #[test]
    fn no_se_puede_pisar_un_builtin() {
        let mut ctx = std_context();
        let err = ctx.register(NOOP, |_, _| Ok(json!(1))).unwrap_err();
        assert!(matches!(err, CodecError::Duplicate(ref n) if n == NOOP));
        assert!(ctx.register("demo::propia", |_, _| Ok(json!(1))).is_ok());
    }
}
