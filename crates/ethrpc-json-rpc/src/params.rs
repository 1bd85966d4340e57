//! Positional argument decoding.
//!
//! Method parameters are declared as a tuple type implementing [`FromParams`].
//! Trailing arguments may be omitted when their type accepts `null`
//! (`Option<T>`), in which case they decode to `None`.

use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::value::RawValue;

use crate::error::RpcError;

/// A parameter list decodable from a positional JSON array.
pub trait FromParams: Sized + Send + 'static {
    /// Number of positional parameters
    const ARITY: usize;

    fn from_params(args: &[Box<RawValue>]) -> Result<Self, RpcError>;
}

/// Split `params` into its array elements. Absent and `null` params are an empty list.
pub fn split_positional(raw: Option<&RawValue>) -> Result<Vec<Box<RawValue>>, RpcError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let text = raw.get().trim();
    if text == "null" {
        return Ok(Vec::new());
    }
    if !text.starts_with('[') {
        return Err(RpcError::InvalidParams("non-array args".to_string()));
    }
    serde_json::from_str(text).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

/// Decode `params` positionally into `P`.
pub fn parse_positional_arguments<P: FromParams>(raw: Option<&RawValue>) -> Result<P, RpcError> {
    P::from_params(&split_positional(raw)?)
}

/// Split a subscribe call's params into the subscription name and the remaining arguments.
pub fn parse_subscription_name(
    raw: Option<&RawValue>,
) -> Result<(String, Vec<Box<RawValue>>), RpcError> {
    let mut args = split_positional(raw)?;
    let expected = || RpcError::InvalidParams("expected subscription name as first argument".to_string());
    if args.is_empty() {
        return Err(expected());
    }
    let name: String = serde_json::from_str(args[0].get()).map_err(|_| expected())?;
    args.remove(0);
    Ok((name, args))
}

fn check_arity(args: &[Box<RawValue>], arity: usize) -> Result<(), RpcError> {
    if args.len() > arity {
        return Err(RpcError::InvalidParams(format!(
            "too many arguments, want at most {arity}"
        )));
    }
    Ok(())
}

fn decode_arg<T: DeserializeOwned>(args: &[Box<RawValue>], index: usize) -> Result<T, RpcError> {
    match args.get(index) {
        Some(raw) => serde_json::from_str(raw.get())
            .map_err(|e| RpcError::InvalidParams(format!("invalid argument {index}: {e}"))),
        None => serde_json::from_value(Value::Null).map_err(|_| {
            RpcError::InvalidParams(format!("missing value for required argument {index}"))
        }),
    }
}

macro_rules! impl_from_params {
    ($len:expr; $($idx:tt $T:ident),*) => {
        impl<$($T),*> FromParams for ($($T,)*)
        where
            $($T: DeserializeOwned + Send + 'static),*
        {
            const ARITY: usize = $len;

            #[allow(unused_variables)]
            fn from_params(args: &[Box<RawValue>]) -> Result<Self, RpcError> {
                check_arity(args, $len)?;
                Ok(($(decode_arg::<$T>(args, $idx)?,)*))
            }
        }
    };
}

impl_from_params!(0;);
impl_from_params!(1; 0 A);
impl_from_params!(2; 0 A, 1 B);
impl_from_params!(3; 0 A, 1 B, 2 C);
impl_from_params!(4; 0 A, 1 B, 2 C, 3 D);
impl_from_params!(5; 0 A, 1 B, 2 C, 3 D, 4 E);
impl_from_params!(6; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_from_params!(7; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_from_params!(8; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(s: &str) -> Box<RawValue> {
        RawValue::from_string(s.to_string()).unwrap()
    }

    #[test]
    fn test_decode_exact() {
        let params = raw(r#"[1, "two", true]"#);
        let (a, b, c): (u64, String, bool) = parse_positional_arguments(Some(&params)).unwrap();
        assert_eq!((a, b.as_str(), c), (1, "two", true));
    }

    #[test]
    fn test_absent_and_null_params() {
        let () = parse_positional_arguments(None).unwrap();
        let null = raw("null");
        let (opt,): (Option<u64>,) = parse_positional_arguments(Some(&null)).unwrap();
        assert_eq!(opt, None);
    }

    #[test]
    fn test_too_many_arguments() {
        let params = raw("[1, 2]");
        let err = parse_positional_arguments::<(u64,)>(Some(&params)).unwrap_err();
        assert_eq!(err, RpcError::InvalidParams("too many arguments, want at most 1".into()));
    }

    #[test]
    fn test_missing_required_argument() {
        let params = raw("[1]");
        let err = parse_positional_arguments::<(u64, String)>(Some(&params)).unwrap_err();
        assert_eq!(
            err,
            RpcError::InvalidParams("missing value for required argument 1".into())
        );
    }

    #[test]
    fn test_missing_optional_trailing_arguments() {
        let params = raw(r#"["0x1"]"#);
        let (a, b, c): (String, Option<bool>, Option<u64>) =
            parse_positional_arguments(Some(&params)).unwrap();
        assert_eq!(a, "0x1");
        assert_eq!(b, None);
        assert_eq!(c, None);
    }

    #[test]
    fn test_invalid_argument_type() {
        let params = raw(r#"["not a number"]"#);
        let err = parse_positional_arguments::<(u64,)>(Some(&params)).unwrap_err();
        match err {
            RpcError::InvalidParams(msg) => assert!(msg.starts_with("invalid argument 0:"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_array_params() {
        let params = raw(r#"{"a": 1}"#);
        let err = parse_positional_arguments::<(u64,)>(Some(&params)).unwrap_err();
        assert_eq!(err, RpcError::InvalidParams("non-array args".into()));
    }

    #[test]
    fn test_subscription_name() {
        let params = raw(r#"["newHeads", {"fullTx": true}]"#);
        let (name, rest) = parse_subscription_name(Some(&params)).unwrap();
        assert_eq!(name, "newHeads");
        assert_eq!(rest.len(), 1);

        for bad in ["[]", "[1]", "null"] {
            let params = raw(bad);
            assert!(parse_subscription_name(Some(&params)).is_err(), "{bad}");
        }
    }
}
