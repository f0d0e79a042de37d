//! Typed argument codecs.
//!
//! Handlers and emitters deal in heterogeneous argument lists. Instead of
//! runtime reflection, each side declares its argument types up front:
//! [`IntoArgs`] turns a tuple into payload values at emit time, and
//! [`FromArgs`] decodes positional payload values back into a tuple at
//! dispatch time. Both are built from a small set of per-value codecs
//! ([`IntoValue`] / [`FromValue`]) covering the JSON scalar types, binary
//! buffers and, through the [`Json`] wrapper, anything serde can handle.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{ArgsError, EncodeError, Value};

/// Wrapper marking a value that should cross the wire as JSON via serde.
///
/// Lets arbitrary `Serialize`/`Deserialize` types participate in argument
/// lists without a blanket impl that would collide with the binary codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Json<T>(pub T);

/// Conversion of one argument into a payload value.
pub trait IntoValue {
    fn into_value(self) -> Result<Value, EncodeError>;
}

/// Conversion of one payload value into a declared argument type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ArgsError>;
}

impl IntoValue for Value {
    fn into_value(self) -> Result<Value, EncodeError> {
        Ok(self)
    }
}

impl IntoValue for serde_json::Value {
    fn into_value(self) -> Result<Value, EncodeError> {
        Ok(Value::from_json(self))
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Result<Value, EncodeError> {
        Ok(Value::Bool(self))
    }
}

macro_rules! int_into_value {
    ($($ty:ty),*) => {
        $(impl IntoValue for $ty {
            fn into_value(self) -> Result<Value, EncodeError> {
                Ok(Value::Number(serde_json::Number::from(self as i64)))
            }
        })*
    };
}

int_into_value!(i8, i16, i32, i64);

macro_rules! uint_into_value {
    ($($ty:ty),*) => {
        $(impl IntoValue for $ty {
            fn into_value(self) -> Result<Value, EncodeError> {
                Ok(Value::Number(serde_json::Number::from(self as u64)))
            }
        })*
    };
}

uint_into_value!(u8, u16, u32, u64, usize);

impl IntoValue for f64 {
    fn into_value(self) -> Result<Value, EncodeError> {
        serde_json::Number::from_f64(self)
            .map(Value::Number)
            .ok_or(EncodeError::NonFiniteFloat)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Result<Value, EncodeError> {
        (self as f64).into_value()
    }
}

impl IntoValue for String {
    fn into_value(self) -> Result<Value, EncodeError> {
        Ok(Value::String(self))
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Result<Value, EncodeError> {
        Ok(Value::String(self.to_owned()))
    }
}

impl IntoValue for Bytes {
    fn into_value(self) -> Result<Value, EncodeError> {
        Ok(Value::Binary(self))
    }
}

impl IntoValue for Vec<u8> {
    fn into_value(self) -> Result<Value, EncodeError> {
        Ok(Value::Binary(Bytes::from(self)))
    }
}

impl IntoValue for &[u8] {
    fn into_value(self) -> Result<Value, EncodeError> {
        Ok(Value::Binary(Bytes::copy_from_slice(self)))
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Result<Value, EncodeError> {
        match self {
            Some(v) => v.into_value(),
            None => Ok(Value::Null),
        }
    }
}

impl<T: Serialize> IntoValue for Json<T> {
    fn into_value(self) -> Result<Value, EncodeError> {
        Ok(Value::from_json(serde_json::to_value(self.0)?))
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ArgsError> {
        Ok(value)
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, ArgsError> {
        value.try_into_json()
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ArgsError> {
        match value {
            Value::Bool(b) => Ok(b),
            _ => Err(ArgsError::WrongType { expected: "bool" }),
        }
    }
}

macro_rules! int_from_value {
    ($($ty:ty),*) => {
        $(impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, ArgsError> {
                let n = match &value {
                    Value::Number(n) => n.as_i64(),
                    _ => None,
                };
                n.and_then(|n| <$ty>::try_from(n).ok())
                    .ok_or(ArgsError::WrongType { expected: stringify!($ty) })
            }
        })*
    };
}

int_from_value!(i8, i16, i32, i64);

macro_rules! uint_from_value {
    ($($ty:ty),*) => {
        $(impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, ArgsError> {
                let n = match &value {
                    Value::Number(n) => n.as_u64(),
                    _ => None,
                };
                n.and_then(|n| <$ty>::try_from(n).ok())
                    .ok_or(ArgsError::WrongType { expected: stringify!($ty) })
            }
        })*
    };
}

uint_from_value!(u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ArgsError> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .ok_or(ArgsError::WrongType { expected: "f64" }),
            _ => Err(ArgsError::WrongType { expected: "f64" }),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ArgsError> {
        match value {
            Value::String(s) => Ok(s),
            _ => Err(ArgsError::WrongType { expected: "string" }),
        }
    }
}

impl FromValue for Bytes {
    fn from_value(value: Value) -> Result<Self, ArgsError> {
        match value {
            Value::Binary(b) => Ok(b),
            _ => Err(ArgsError::WrongType { expected: "binary" }),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, ArgsError> {
        match value {
            Value::Binary(b) => Ok(b.to_vec()),
            _ => Err(ArgsError::WrongType { expected: "binary" }),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ArgsError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: DeserializeOwned> FromValue for Json<T> {
    fn from_value(value: Value) -> Result<Self, ArgsError> {
        Ok(Json(serde_json::from_value(value.try_into_json()?)?))
    }
}

/// An emit-side argument list.
pub trait IntoArgs {
    fn into_args(self) -> Result<Vec<Value>, EncodeError>;
}

/// A dispatch-side argument list with a declared arity.
///
/// `arity()` returns `None` for variadic receivers (`Vec<Value>`), which
/// accept whatever the packet carried.
pub trait FromArgs: Sized {
    fn arity() -> Option<usize>;
    fn from_args(args: Vec<Value>) -> Result<Self, ArgsError>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>, EncodeError> {
        Ok(self)
    }
}

impl FromArgs for Vec<Value> {
    fn arity() -> Option<usize> {
        None
    }

    fn from_args(args: Vec<Value>) -> Result<Self, ArgsError> {
        Ok(args)
    }
}

impl IntoArgs for () {
    fn into_args(self) -> Result<Vec<Value>, EncodeError> {
        Ok(Vec::new())
    }
}

impl FromArgs for () {
    fn arity() -> Option<usize> {
        Some(0)
    }

    fn from_args(_args: Vec<Value>) -> Result<Self, ArgsError> {
        Ok(())
    }
}

macro_rules! tuple_args {
    ($len:expr; $($ty:ident),+) => {
        #[allow(non_snake_case)]
        impl<$($ty: IntoValue),+> IntoArgs for ($($ty,)+) {
            fn into_args(self) -> Result<Vec<Value>, EncodeError> {
                let ($($ty,)+) = self;
                Ok(vec![$($ty.into_value()?),+])
            }
        }

        impl<$($ty: FromValue),+> FromArgs for ($($ty,)+) {
            fn arity() -> Option<usize> {
                Some($len)
            }

            fn from_args(args: Vec<Value>) -> Result<Self, ArgsError> {
                if args.len() < $len {
                    return Err(ArgsError::ArityMismatch {
                        expected: $len,
                        got: args.len(),
                    });
                }
                let mut iter = args.into_iter();
                Ok(($($ty::from_value(iter.next().unwrap_or(Value::Null))?,)+))
            }
        }
    };
}

tuple_args!(1; A);
tuple_args!(2; A, B);
tuple_args!(3; A, B, C);
tuple_args!(4; A, B, C, D);
tuple_args!(5; A, B, C, D, E);
tuple_args!(6; A, B, C, D, E, F);
tuple_args!(7; A, B, C, D, E, F, G);
tuple_args!(8; A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_roundtrip() {
        let args = ("hello", 7u64, Bytes::from_static(&[9, 9]))
            .into_args()
            .unwrap();
        let (s, n, b): (String, u64, Bytes) = FromArgs::from_args(args).unwrap();
        assert_eq!(s, "hello");
        assert_eq!(n, 7);
        assert_eq!(b, Bytes::from_static(&[9, 9]));
    }

    #[test]
    fn missing_argument_is_an_arity_mismatch() {
        let args = ("only",).into_args().unwrap();
        let err = <(String, u64)>::from_args(args).unwrap_err();
        assert!(matches!(
            err,
            ArgsError::ArityMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn surplus_arguments_are_ignored_by_tuples() {
        let args = ("a", "b", "c").into_args().unwrap();
        let (first,): (String,) = FromArgs::from_args(args).unwrap();
        assert_eq!(first, "a");
    }

    #[test]
    fn json_wrapper_uses_serde() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Auth {
            token: String,
        }

        let args = (Json(Auth {
            token: "t".into(),
        }),)
            .into_args()
            .unwrap();
        let (Json(auth),): (Json<Auth>,) = FromArgs::from_args(args).unwrap();
        assert_eq!(auth, Auth { token: "t".into() });
    }

    #[test]
    fn wrong_type_is_reported() {
        let args = (42u64,).into_args().unwrap();
        let err = <(String,)>::from_args(args).unwrap_err();
        assert!(matches!(err, ArgsError::WrongType { expected: "string" }));
    }
}
