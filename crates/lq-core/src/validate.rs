//! Pluggable input validation.

use std::sync::Arc;

use serde_json::Value;

/// Normalizes raw params or rejects them.
///
/// Applied once per subscribe/mutation; the output replaces the raw value
/// everywhere downstream, including fingerprinting.  Schema engines plug in
/// behind this trait.
pub trait Validator: Send + Sync {
    /// Returns the normalized value, or a human-readable rejection reason.
    fn parse(&self, raw: Value) -> Result<Value, String>;
}

struct FnValidator<F>(F);

impl<F> Validator for FnValidator<F>
where
    F: Fn(Value) -> Result<Value, String> + Send + Sync,
{
    fn parse(&self, raw: Value) -> Result<Value, String> {
        (self.0)(raw)
    }
}

/// Wrap a closure as a validator.
pub fn from_fn<F>(f: F) -> Arc<dyn Validator>
where
    F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
{
    Arc::new(FnValidator(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn closure_validator_normalizes_or_rejects() {
        let validator = from_fn(|raw| match raw.get("n") {
            Some(Value::Number(_)) => Ok(raw),
            _ => Err("n must be a number".to_owned()),
        });
        assert_eq!(validator.parse(json!({"n": 3})), Ok(json!({"n": 3})));
        assert_eq!(
            validator.parse(json!({"n": "x"})),
            Err("n must be a number".to_owned())
        );
    }
}
