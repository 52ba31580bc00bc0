use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::cache::canonical::to_canonical;
use crate::infrastructure::error::{EngineError, Result};

/// Arguments of one call, in a canonical form suitable for key derivation.
///
/// Positional arguments keep their order. Keyword arguments are kept sorted by name so
/// the order they were supplied in never affects the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments holding `value` as the single positional argument.
    ///
    /// The value is never spread: a tuple, a sequence or `None` is one argument like any
    /// other value.
    pub fn single<A: Serialize + ?Sized>(value: &A) -> Result<Self> {
        Self::new().arg(value)
    }

    pub fn arg<A: Serialize + ?Sized>(mut self, value: &A) -> Result<Self> {
        self.positional.push(to_value(value)?);
        Ok(self)
    }

    pub fn kwarg<A: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &A) -> Result<Self> {
        self.keyword.insert(name.into(), to_value(value)?);
        Ok(self)
    }

    pub fn positional_args(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword_args(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    fn canonical_json(&self) -> Result<String> {
        let document = json!({
            "args": self.positional,
            "kwargs": self.keyword,
        });
        Ok(serde_json::to_string(&document)?)
    }
}

fn to_value<A: Serialize + ?Sized>(value: &A) -> Result<Value> {
    to_canonical(value).map_err(|e| EngineError::key_build(e.to_string()))
}

/// Derives deterministic cache keys of the form `prefix:function:sha256(args)`
#[derive(Debug, Clone, Default)]
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, prefix: &str, function_identity: &str, args: &CallArgs) -> Result<String> {
        if function_identity.is_empty() {
            return Err(EngineError::key_build("function identity must not be empty"));
        }

        let canonical = args.canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        hasher.update([0u8]);
        hasher.update(function_identity.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());

        Ok(format!(
            "{}:{}:{:x}",
            prefix,
            function_identity,
            hasher.finalize()
        ))
    }
}
