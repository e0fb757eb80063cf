//! Embedded interpreter context: one engine, its loaded code and its globals.

use std::sync::Arc;

use parking_lot::RwLock;
use rhai::{CallFnOptions, Dynamic, Engine, Scope, AST};

use crate::bridge;
use crate::builtins::{self, Bindings, OutputHook};
use crate::diagnostics;
use crate::error::{Error, Result};
use crate::globals::GlobalsTable;
use crate::lock::{CancelToken, ExecutionLock};
use crate::value::HostValue;

/// Engine limits and output settings for an interpreter context.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ContextConfig {
    /// Maximum operations per evaluation (0 = unlimited).
    pub max_operations: u64,
    /// Maximum function call depth.
    pub max_call_levels: usize,
    /// Maximum string length (0 = unlimited).
    pub max_string_size: usize,
    /// Maximum array length (0 = unlimited).
    pub max_array_size: usize,
    /// Maximum map size (0 = unlimited).
    pub max_map_size: usize,
    /// Reject scripts that use undeclared variables.
    pub strict_variables: bool,
    /// Echo script output to stdout.
    pub echo_output: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
            max_string_size: 0,
            max_array_size: 0,
            max_map_size: 0,
            strict_variables: false,
            echo_output: false,
        }
    }
}

impl ContextConfig {
    /// Create a new context configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operation limit.
    pub fn with_max_operations(mut self, max: u64) -> Self {
        self.max_operations = max;
        self
    }

    /// Set the call depth limit.
    pub fn with_max_call_levels(mut self, max: usize) -> Self {
        self.max_call_levels = max;
        self
    }

    /// Set the string, array and map size limits.
    pub fn with_max_sizes(mut self, string: usize, array: usize, map: usize) -> Self {
        self.max_string_size = string;
        self.max_array_size = array;
        self.max_map_size = map;
        self
    }

    /// Enable strict variable checking.
    pub fn with_strict_variables(mut self, strict: bool) -> Self {
        self.strict_variables = strict;
        self
    }

    /// Echo script output to stdout.
    pub fn with_echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    fn build_engine(&self, bindings: &Bindings) -> Engine {
        let mut engine = Engine::new();
        engine.set_fail_on_invalid_map_property(true);
        engine.set_max_operations(self.max_operations);
        engine.set_max_call_levels(self.max_call_levels);
        engine.set_max_string_size(self.max_string_size);
        engine.set_max_array_size(self.max_array_size);
        engine.set_max_map_size(self.max_map_size);
        engine.set_strict_variables(self.strict_variables);
        builtins::register(&mut engine, bindings);
        engine
    }
}

/// One isolated execution environment.
///
/// Every execution of interpreter code (top-level statements on [`load`],
/// callables on [`call`]) holds the shared [`ExecutionLock`]. Host code that
/// runs inside that execution, such as an output hook, must not call back into
/// any context on the same thread.
///
/// [`load`]: InterpreterContext::load
/// [`call`]: InterpreterContext::call
pub struct InterpreterContext {
    name: Arc<str>,
    engine: Engine,
    ast: RwLock<AST>,
    globals: Arc<GlobalsTable>,
    lock: Arc<ExecutionLock>,
    cancel: CancelToken,
    output: Arc<RwLock<Option<OutputHook>>>,
}

impl InterpreterContext {
    /// Create an empty context sharing `lock` with other contexts.
    pub fn new(name: impl Into<String>, config: &ContextConfig, lock: Arc<ExecutionLock>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let globals = Arc::new(GlobalsTable::new());
        let cancel = CancelToken::new();
        let output = Arc::new(RwLock::new(None));

        let bindings = Bindings {
            name: name.clone(),
            echo: config.echo_output,
            output: output.clone(),
            globals: globals.clone(),
            lock: lock.clone(),
            cancel: cancel.clone(),
        };

        Self {
            engine: config.build_engine(&bindings),
            name,
            ast: RwLock::new(AST::empty()),
            globals,
            lock,
            cancel,
            output,
        }
    }

    /// Get the context name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Route script output to `hook` in addition to the log.
    pub fn set_output_hook(&self, hook: Option<OutputHook>) {
        *self.output.write() = hook;
    }

    /// Compile `source` and run its top-level statements once.
    ///
    /// Functions become callable and top-level variables become globals. A
    /// context may load several sources; a later function with the same name
    /// and arity replaces the earlier one.
    pub fn load(&self, source: &str) -> Result<()> {
        let ast = self
            .engine
            .compile(source)
            .map_err(diagnostics::from_parse_error)?;
        let combined = self.ast.read().clone_functions_only().merge(&ast);

        let mut scope = self.globals.to_scope();
        {
            let _permit = self.lock.acquire()?;
            self.engine
                .run_ast_with_scope(&mut scope, &combined)
                .map_err(diagnostics::from_load_error)?;
        }

        self.globals.absorb(&scope);
        *self.ast.write() = combined.clone_functions_only();

        tracing::debug!(
            context = %self.name,
            globals = self.globals.len(),
            "loaded source"
        );
        Ok(())
    }

    /// Call a function with marshalled arguments.
    ///
    /// Top-level statements are not re-run. A function that returns nothing
    /// yields [`HostValue::Unit`].
    pub fn call(&self, name: &str, args: &[HostValue]) -> Result<HostValue> {
        let ast = self.ast.read().clone();

        let arities: Vec<usize> = ast
            .iter_functions()
            .filter(|f| f.name == name)
            .map(|f| f.params.len())
            .collect();
        if arities.is_empty() {
            return Err(Error::name_not_found(name));
        }
        if !arities.contains(&args.len()) {
            return Err(Error::ArityMismatch {
                name: name.to_string(),
                expected: arities,
                given: args.len(),
            });
        }

        let args = bridge::to_arguments(args);
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);

        let result = {
            let _permit = self.lock.acquire()?;
            self.engine
                .call_fn_with_options::<Dynamic>(options, &mut Scope::new(), &ast, name, args)
        };

        let value = result.map_err(diagnostics::from_eval_error)?;
        bridge::to_host(&value)
    }

    /// Read a global.
    pub fn get_global(&self, name: &str) -> Result<HostValue> {
        self.globals.get(name)
    }

    /// Write a global.
    pub fn set_global(&self, name: impl Into<String>, value: HostValue) -> Result<()> {
        self.globals.set(name, value)
    }

    /// Get the globals table.
    pub fn globals(&self) -> &GlobalsTable {
        &self.globals
    }

    /// List callable functions as `(name, arity)`, sorted.
    pub fn functions(&self) -> Vec<(String, usize)> {
        let mut functions: Vec<_> = self
            .ast
            .read()
            .iter_functions()
            .map(|f| (f.name.to_string(), f.params.len()))
            .collect();
        functions.sort();
        functions.dedup();
        functions
    }

    /// Check if a function with the given name exists, at any arity.
    pub fn has_function(&self, name: &str) -> bool {
        self.ast.read().iter_functions().any(|f| f.name == name)
    }

    /// Request cancellation at the next yield point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Get the execution lock shared by this context.
    pub fn lock(&self) -> &Arc<ExecutionLock> {
        &self.lock
    }
}

impl std::fmt::Debug for InterpreterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterContext")
            .field("name", &self.name)
            .field("globals", &self.globals.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> InterpreterContext {
        InterpreterContext::new(
            "ctx",
            &ContextConfig::default(),
            Arc::new(ExecutionLock::new(LockMode::Exclusive)),
        )
    }

    #[test]
    fn test_top_level_runs_once() {
        let ctx = context();
        let prints = Arc::new(AtomicUsize::new(0));
        let counter = prints.clone();
        ctx.set_output_hook(Some(Arc::new(move |_: &str, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        ctx.load(r#"print("loading"); fn ping() { 1 }"#).unwrap();
        assert_eq!(prints.load(Ordering::SeqCst), 1);

        ctx.call("ping", &[]).unwrap();
        ctx.call("ping", &[]).unwrap();
        assert_eq!(prints.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_call_errors() {
        let ctx = context();
        ctx.load(
            r#"
            fn two(a, b) { a + b }
            fn boom() { throw "bad things"; }
            fn letter() { 'c' }
            fn inc(x) { x + 1 }
            "#,
        )
        .unwrap();

        assert!(matches!(ctx.call("nope", &[]), Err(Error::NameNotFound(_))));
        assert!(matches!(
            ctx.call("two", &[HostValue::from(1)]),
            Err(Error::ArityMismatch { given: 1, .. })
        ));
        match ctx.call("boom", &[]) {
            Err(Error::Raised(msg)) => assert!(msg.contains("bad things")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(ctx.call("letter", &[]), Err(Error::UnsupportedKind(_))));
        assert!(matches!(ctx.call("inc", &[HostValue::from(true)]), Err(Error::Raised(_))));
        assert_eq!(
            ctx.call("two", &[HostValue::from(1), HostValue::from(2)]).unwrap(),
            HostValue::Integer(3)
        );
    }

    #[test]
    fn test_globals() {
        let ctx = context();
        ctx.load("let int_global = 12; const NAME = \"ctx\"; fn read(n) { get_global(n) }")
            .unwrap();

        assert_eq!(ctx.get_global("int_global").unwrap(), HostValue::Integer(12));
        assert_eq!(
            ctx.call("read", &["int_global".into()]).unwrap(),
            HostValue::Integer(12)
        );
        assert!(matches!(
            ctx.set_global("NAME", HostValue::from("x")),
            Err(Error::ReadOnlyGlobal(_))
        ));

        ctx.set_global("int_global", HostValue::from(13)).unwrap();
        assert_eq!(
            ctx.call("read", &["int_global".into()]).unwrap(),
            HostValue::Integer(13)
        );
        assert!(matches!(
            ctx.call("read", &["missing".into()]),
            Err(Error::NameNotFound(_))
        ));
    }

    #[test]
    fn test_second_load_extends() {
        let ctx = context();
        ctx.load("let a = 1; fn f() { 1 }").unwrap();
        ctx.load("let b = a + 1; fn f() { 2 } fn g(x) { f() + x }").unwrap();

        assert_eq!(ctx.get_global("b").unwrap(), HostValue::Integer(2));
        assert_eq!(ctx.call("g", &[HostValue::from(10)]).unwrap(), HostValue::Integer(12));
        assert_eq!(
            ctx.functions(),
            vec![("f".to_string(), 0), ("g".to_string(), 1)]
        );
        assert!(ctx.has_function("g"));
    }

    #[test]
    fn test_load_errors() {
        let ctx = context();
        assert!(matches!(ctx.load("fn broken( {"), Err(Error::Load(_))));
        assert!(matches!(ctx.load("throw \"at load\";"), Err(Error::Load(_))));
        assert!(!ctx.lock().is_locked());
    }

    #[test]
    fn test_missing_map_key() {
        let ctx = context();
        ctx.load("fn pick(d, k) { d[k] }").unwrap();

        let map: HostValue = [("a", 1)].into_iter().collect();
        assert_eq!(
            ctx.call("pick", &[map.clone(), "a".into()]).unwrap(),
            HostValue::Integer(1)
        );
        assert!(matches!(
            ctx.call("pick", &[map, "z".into()]),
            Err(Error::KeyNotFound(k)) if k == "z"
        ));
    }
}
