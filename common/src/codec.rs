use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::context::{ExecContext, Func};
use crate::error::CodecError;
use crate::params::Params;
use crate::storage::RequiredModule;

/// Forma transmisible de un valor opaco.
///
/// - `literal`: datos planos, pasan tal cual (camino rápido)
/// - `func`: referencia a una función registrada + lo que captura
/// - `seq` / `map`: estructuras que contienen otros tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Token {
    Literal(Value),
    Func { name: String, captured: Value },
    Seq(Vec<Token>),
    Map(BTreeMap<String, Token>),
}

impl Token {
    pub fn kind(&self) -> &'static str {
        match self {
            Token::Literal(_) => "literal",
            Token::Func { .. } => "func",
            Token::Seq(_) => "seq",
            Token::Map(_) => "map",
        }
    }

    fn mismatch(self, expected: &'static str) -> CodecError {
        CodecError::Mismatch {
            expected,
            found: self.kind(),
        }
    }
}

/// Valores que pueden pasar por el codec de objetos opacos.
pub trait Opaque: Sized {
    fn encode(&self) -> Result<Token, CodecError>;

    /// `ctx` es el espacio de nombres contra el que se resuelven las funciones.
    fn decode(token: Token, ctx: &ExecContext) -> Result<Self, CodecError>;
}

pub fn encode<T: Opaque>(value: &T) -> Result<Token, CodecError> {
    value.encode()
}

pub fn decode<T: Opaque>(token: Token, ctx: &ExecContext) -> Result<T, CodecError> {
    T::decode(token, ctx)
}

impl Opaque for Func {
    fn encode(&self) -> Result<Token, CodecError> {
        let name = self.name().ok_or(CodecError::Anonymous)?;
        Ok(Token::Func {
            name: name.to_string(),
            captured: self.captured().clone(),
        })
    }

    fn decode(token: Token, ctx: &ExecContext) -> Result<Self, CodecError> {
        match token {
            Token::Func { name, captured } => Ok(ctx.func(&name)?.bind(captured)),
            other => Err(other.mismatch("func")),
        }
    }
}

// None viaja como literal null
impl<T: Opaque> Opaque for Option<T> {
    fn encode(&self) -> Result<Token, CodecError> {
        match self {
            Some(v) => v.encode(),
            None => Ok(Token::Literal(Value::Null)),
        }
    }

    fn decode(token: Token, ctx: &ExecContext) -> Result<Self, CodecError> {
        match token {
            Token::Literal(Value::Null) => Ok(None),
            other => T::decode(other, ctx).map(Some),
        }
    }
}

impl<T: Opaque> Opaque for Vec<T> {
    fn encode(&self) -> Result<Token, CodecError> {
        self.iter()
            .map(Opaque::encode)
            .collect::<Result<Vec<_>, _>>()
            .map(Token::Seq)
    }

    fn decode(token: Token, ctx: &ExecContext) -> Result<Self, CodecError> {
        match token {
            Token::Seq(items) => items.into_iter().map(|t| T::decode(t, ctx)).collect(),
            other => Err(other.mismatch("seq")),
        }
    }
}

impl Opaque for Params {
    fn encode(&self) -> Result<Token, CodecError> {
        self.capture().map(Token::Map)
    }

    fn decode(token: Token, ctx: &ExecContext) -> Result<Self, CodecError> {
        match token {
            Token::Map(state) => Params::restore(state, ctx),
            other => Err(other.mismatch("map")),
        }
    }
}

/// Tipos de datos planos: se codifican como literal JSON.
macro_rules! literal_opaque {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Opaque for $ty {
                fn encode(&self) -> Result<Token, CodecError> {
                    serde_json::to_value(self)
                        .map(Token::Literal)
                        .map_err(CodecError::Literal)
                }

                fn decode(token: Token, _ctx: &ExecContext) -> Result<Self, CodecError> {
                    match token {
                        Token::Literal(v) => serde_json::from_value(v).map_err(CodecError::Literal),
                        other => Err(other.mismatch("literal")),
                    }
                }
            }
        )*
    };
}

literal_opaque!(
    bool,
    u32,
    u64,
    String,
    Value,
    RequiredModule,
    BTreeMap<String, Value>,
    BTreeMap<String, Vec<u8>>,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecContext {
        let mut ctx = ExecContext::new();
        ctx.register("demo::scale", |captured, args| {
            let k = captured.as_i64().unwrap_or(1);
            let x = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(k * x))
        })
        .unwrap();
        ctx
    }

    #[test]
    fn literal_pasa_tal_cual() {
        let token = encode(&42_u32).unwrap();
        assert_eq!(token, Token::Literal(json!(42)));
        let back: u32 = decode(token, &ExecContext::new()).unwrap();
        assert_eq!(back, 42);
    }

    #[test]
    fn funcion_con_captura_se_reconstruye_y_se_comporta_igual() {
        let ctx = ctx();
        let f = ctx.func("demo::scale").unwrap().bind(json!(3));

        let wire = serde_json::to_vec(&encode(&f).unwrap()).unwrap();
        let token: Token = serde_json::from_slice(&wire).unwrap();
        let g: Func = decode(token, &ctx).unwrap();

        assert_eq!(g, f);
        assert_eq!(g.call(&[json!(7)]).unwrap(), f.call(&[json!(7)]).unwrap());
    }

    #[test]
    fn decodificar_funcion_sin_contexto_falla() {
        let f = ctx().func("demo::scale").unwrap();
        let token = encode(&f).unwrap();

        let err = decode::<Func>(token, &ExecContext::new()).unwrap_err();
        assert!(matches!(err, CodecError::UnknownFunction(_)));
    }

    #[test]
    fn funcion_anonima_no_se_puede_codificar() {
        let f = Func::anonymous(|_, _| Ok(Value::Null));
        assert!(matches!(encode(&f), Err(CodecError::Anonymous)));
    }

    #[test]
    fn option_none_es_literal_null() {
        let none: Option<Func> = None;
        let token = encode(&none).unwrap();
        assert_eq!(token, Token::Literal(Value::Null));
        assert_eq!(decode::<Option<Func>>(token, &ctx()).unwrap(), None);
    }

    #[test]
    fn token_de_tipo_incorrecto_da_mismatch() {
        let err = decode::<Vec<Func>>(Token::Literal(json!(1)), &ctx()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Mismatch {
                expected: "seq",
                found: "literal"
            }
        ));
    }

    #[test]
    fn formato_del_token_en_json() {
        let token = Token::Func {
            name: "demo::scale".to_string(),
            captured: json!(2),
        };
        assert_eq!(
            serde_json::to_value(&token).unwrap(),
            json!({"t": "func", "v": {"name": "demo::scale", "captured": 2}})
        );
    }
}
