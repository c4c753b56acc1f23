//! Registry of available functions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::function::{DeclaredFunction, FunctionDefinition};

static NEXT_FUNCTION_INIT_ID: AtomicU64 = AtomicU64::new(1);

fn next_function_init_id() -> u64 {
    NEXT_FUNCTION_INIT_ID.fetch_add(1, Ordering::SeqCst)
}

/// A function together with its default rule priority.
#[derive(Clone, Debug)]
pub struct RegisteredFunction {
    /// The function.
    pub definition: Arc<dyn FunctionDefinition>,
    /// Default priority; lower wins.
    pub priority: i32,
}

/// Ordered set of registered functions.
///
/// Every mutation assigns a new process-wide `function_init_id`, so two
/// compilations that report the same id saw the same set of functions.
#[derive(Debug)]
pub struct FunctionRepository {
    functions: Vec<RegisteredFunction>,
    function_init_id: u64,
}

impl Default for FunctionRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            function_init_id: next_function_init_id(),
        }
    }

    /// Registers a function with a default priority.
    ///
    /// Registration order breaks ties between equal priorities.
    pub fn register(&mut self, definition: Arc<dyn FunctionDefinition>, priority: i32) {
        tracing::trace!(function = definition.function_id(), priority, "Registering function");
        self.functions.push(RegisteredFunction {
            definition,
            priority,
        });
        self.function_init_id = next_function_init_id();
    }

    /// Registers a declared function using its own priority.
    pub fn register_declared(&mut self, function: DeclaredFunction) {
        let priority = function.priority;
        self.register(Arc::new(function), priority);
    }

    /// Identifier of the current function set.
    pub fn function_init_id(&self) -> u64 {
        self.function_init_id
    }

    /// Registered functions in registration order.
    pub fn functions(&self) -> &[RegisteredFunction] {
        &self.functions
    }

    /// Looks up a function by id.
    pub fn get(&self, function_id: &str) -> Option<&RegisteredFunction> {
        self.functions
            .iter()
            .find(|f| f.definition.function_id() == function_id)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl FromIterator<DeclaredFunction> for FunctionRepository {
    fn from_iter<T: IntoIterator<Item = DeclaredFunction>>(iter: T) -> Self {
        let mut repository = FunctionRepository::new();
        for function in iter {
            repository.register_declared(function);
        }
        repository
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::DeclaredOutput;
    use view_core::ComputationTargetType;

    #[test]
    fn test_init_id_changes_on_register() {
        let mut repo = FunctionRepository::new();
        let before = repo.function_init_id();
        repo.register_declared(DeclaredFunction::new(
            "A",
            ComputationTargetType::Security,
            [DeclaredOutput::named("X")],
        ));
        assert!(repo.function_init_id() > before);
        assert_eq!(repo.len(), 1);
        assert!(repo.get("A").is_some());
        assert!(repo.get("B").is_none());
    }

    #[test]
    fn test_distinct_repositories_get_distinct_ids() {
        let a = FunctionRepository::new();
        let b = FunctionRepository::new();
        assert_ne!(a.function_init_id(), b.function_init_id());
    }
}
