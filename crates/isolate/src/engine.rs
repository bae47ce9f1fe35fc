//! The seam between the invocation engine and the guest language engines.
//!
//! The engines themselves are external collaborators: opaque evaluators
//! that can load source, call a value, and register host-callable bindings.
//! Everything the host needs from them is expressed through these traits;
//! the invocation machinery, marshalling, and bridge scripts are all
//! engine-generic.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
};

use errors::ErrorMetadata;
use model::LanguageId;
use value::HostValue;

/// A host function exposed to guest code. Arguments arrive as guest values
/// (the host marshals them as needed); the return value is plain host data
/// that the engine converts back into a guest value.
pub type HostFunction =
    Arc<dyn Fn(Vec<Box<dyn GuestValue>>) -> anyhow::Result<HostValue> + Send + Sync>;

/// An argument to a guest call.
pub enum CallArg {
    /// Plain host data; the engine converts it into a guest value.
    Value(HostValue),
    /// A value that already lives in the guest context.
    Guest(Box<dyn GuestValue>),
    /// A host callback the engine wraps into a guest callable (used to
    /// attach promise resolve/reject handlers).
    Function(HostFunction),
}

/// Inspection surface over a guest value, sufficient for the marshaller.
/// Implementations may hold engine-internal handles; values are only used
/// on the worker thread that owns their context.
pub trait GuestValue: Send {
    fn is_null(&self) -> bool {
        false
    }
    fn as_bool(&self) -> Option<bool> {
        None
    }
    fn as_str(&self) -> Option<&str> {
        None
    }
    fn as_int(&self) -> Option<i64> {
        None
    }
    fn as_float(&self) -> Option<f64> {
        None
    }
    /// Host data smuggled through the guest unchanged, if any.
    fn as_host_value(&self) -> Option<&HostValue> {
        None
    }
    fn array_len(&self) -> Option<usize> {
        None
    }
    fn array_element(&self, _index: usize) -> Option<Box<dyn GuestValue>> {
        None
    }
    /// Keys of a Ruby/Python-style mapping exposing `keys()` and `[]`.
    fn mapping_keys(&self) -> Option<Vec<String>> {
        None
    }
    fn mapping_item(&self, _key: &str) -> Option<Box<dyn GuestValue>> {
        None
    }
    /// Member keys of a plain object.
    fn member_keys(&self) -> Option<Vec<String>> {
        None
    }
    fn member(&self, _name: &str) -> Option<Box<dyn GuestValue>> {
        None
    }
    fn member_is_executable(&self, _name: &str) -> bool {
        false
    }
    fn is_executable(&self) -> bool {
        false
    }
    /// Engine-internal identity recovery for `call`/`call_member` targets.
    fn as_any(&self) -> &dyn std::any::Any;
    fn to_display_string(&self) -> String;
}

/// One guest execution sandbox, used for exactly one invocation and then
/// discarded. Construction is cheap relative to an invocation; nothing is
/// ever shared between contexts.
pub trait GuestContext {
    fn language(&self) -> LanguageId;

    /// Evaluate source in the script binding.
    fn eval(&mut self, filename: &str, source: &str) -> anyhow::Result<Box<dyn GuestValue>>;

    /// Evaluate source as a module and return its namespace (JS only).
    fn eval_module(&mut self, filename: &str, source: &str)
        -> anyhow::Result<Box<dyn GuestValue>>;

    /// Resolve a top-level binding: a `globalThis` member for JS, a module
    /// global for Python, a global variable or top-level method for Ruby.
    fn global(&mut self, name: &str) -> anyhow::Result<Option<Box<dyn GuestValue>>>;

    /// Expose `function` to guest code as a global callable named `name`
    /// (for Ruby, the callable global variable `$name`).
    fn bind_host_function(&mut self, name: &str, function: HostFunction) -> anyhow::Result<()>;

    /// Call an executable guest value.
    fn call(
        &mut self,
        target: &dyn GuestValue,
        args: Vec<CallArg>,
    ) -> anyhow::Result<Box<dyn GuestValue>>;

    /// Call a member of a guest value (e.g. a promise's `then`).
    fn call_member(
        &mut self,
        target: &dyn GuestValue,
        name: &str,
        args: Vec<CallArg>,
    ) -> anyhow::Result<Box<dyn GuestValue>>;

    /// Drain queued microtasks; the promise pump calls this between polls.
    fn drain_microtasks(&mut self) -> anyhow::Result<()>;
}

/// Cooperative cancellation flag shared between the invoker and a context.
/// Engines honor it at their yield points; the pump loop checks it between
/// polls. Tripping it never un-trips it.
#[derive(Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ContextOptions {
    /// When true, JS source is evaluated as a module and the entry resolves
    /// from the module namespace.
    pub module_evaluation: bool,
    pub interrupt: InterruptHandle,
}

/// One supported guest evaluator.
pub trait GuestEngine: Send + Sync {
    fn language(&self) -> LanguageId;
    fn new_context(&self, options: ContextOptions) -> anyhow::Result<Box<dyn GuestContext>>;
}

/// The set of registered evaluators, keyed by language tag.
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<LanguageId, Arc<dyn GuestEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn GuestEngine>) {
        self.engines.insert(engine.language(), engine);
    }

    pub fn engine(&self, language: LanguageId) -> anyhow::Result<Arc<dyn GuestEngine>> {
        self.engines.get(&language).cloned().ok_or_else(|| {
            ErrorMetadata::execution_failed(
                "UnsupportedLanguage",
                format!("no evaluator registered for {language}"),
            )
            .into()
        })
    }

    pub fn languages(&self) -> Vec<LanguageId> {
        self.engines.keys().copied().collect()
    }
}
