use std::collections::HashMap;

use serde_json::Value;
use vcloud_core::{DispatchError, VcError, VcResult};

use crate::catalog;

/// Signature every job function implements.
pub type JobFunction = fn(&[Value]) -> Result<Value, DispatchError>;

/// 作业函数注册表
///
/// Immutable once built; vehicles share one through an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<&'static str, JobFunction>,
}

impl FunctionRegistry {
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::default()
    }

    /// Registry holding the built-in catalog.
    pub fn builtin() -> Self {
        // catalog names are unique, so build cannot fail here
        Self::builder().with_builtins().build().unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<JobFunction> {
        self.functions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Startup check that every name a deployment relies on is present.
    pub fn ensure_supported<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> VcResult<()> {
        let missing: Vec<&str> = names.into_iter().filter(|n| !self.contains(n)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(VcError::Configuration(format!(
                "unsupported job functions: {}",
                missing.join(", ")
            )))
        }
    }

    /// Resolves `name` and calls it with `args`.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, DispatchError> {
        let function = self
            .get(name)
            .ok_or_else(|| DispatchError::UnknownFunction(name.to_string()))?;
        function(args)
    }
}

#[derive(Debug, Default)]
pub struct FunctionRegistryBuilder {
    entries: Vec<(&'static str, JobFunction)>,
}

impl FunctionRegistryBuilder {
    pub fn function(mut self, name: &'static str, function: JobFunction) -> Self {
        self.entries.push((name, function));
        self
    }

    pub fn with_builtins(mut self) -> Self {
        self.entries.extend_from_slice(catalog::BUILTIN_FUNCTIONS);
        self
    }

    pub fn build(self) -> VcResult<FunctionRegistry> {
        let mut functions = HashMap::with_capacity(self.entries.len());
        for (name, function) in self.entries {
            if functions.insert(name, function).is_some() {
                return Err(VcError::Configuration(format!(
                    "job function '{name}' registered twice"
                )));
            }
        }
        Ok(FunctionRegistry { functions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(_: &[Value]) -> Result<Value, DispatchError> {
        Ok(json!("constant"))
    }

    #[test]
    fn test_builtin_catalog() {
        let registry = FunctionRegistry::builtin();
        assert!(registry.contains("add"));
        assert!(registry.contains("fibonacci"));
        assert_eq!(registry.len(), catalog::BUILTIN_FUNCTIONS.len());
        assert_eq!(registry.invoke("add", &[json!(2), json!(3)]), Ok(json!(5)));
    }

    #[test]
    fn test_unknown_function() {
        let registry = FunctionRegistry::builtin();
        assert_eq!(
            registry.invoke("nope", &[]),
            Err(DispatchError::UnknownFunction("nope".to_string()))
        );
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let result = FunctionRegistry::builder()
            .function("constant", constant)
            .function("constant", constant)
            .build();
        assert!(matches!(result, Err(VcError::Configuration(_))));
    }

    #[test]
    fn test_custom_function_alongside_builtins() {
        let registry = FunctionRegistry::builder()
            .with_builtins()
            .function("constant", constant)
            .build()
            .unwrap();
        assert_eq!(registry.invoke("constant", &[]), Ok(json!("constant")));
        assert!(registry.ensure_supported(["add", "constant"]).is_ok());
    }

    #[test]
    fn test_ensure_supported_lists_missing() {
        let registry = FunctionRegistry::builtin();
        let err = registry
            .ensure_supported(["add", "render", "train"])
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("render"));
        assert!(message.contains("train"));
        assert!(!message.contains("add,"));
    }
}
