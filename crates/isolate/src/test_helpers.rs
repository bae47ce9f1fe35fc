//! A scripted guest engine for tests. The real evaluators are external
//! collaborators behind [`GuestEngine`]; this double implements the same
//! seam over plain data and closures so the invocation machinery — staging,
//! bindings, trampolines, promise settling, marshalling, timeouts — can be
//! exercised end to end.

use std::{
    collections::HashMap,
    sync::Arc,
};

use indexmap::IndexMap;
use model::LanguageId;
use parking_lot::Mutex;
use value::HostValue;

use crate::{
    bridge,
    engine::{
        CallArg,
        ContextOptions,
        GuestContext,
        GuestEngine,
        GuestValue,
        HostFunction,
        InterruptHandle,
    },
};

pub type FakeFunction =
    Arc<dyn Fn(&mut FakeState, Vec<FakeValue>) -> anyhow::Result<FakeValue> + Send + Sync>;

/// A guest value in the scripted engine.
#[derive(Clone)]
pub enum FakeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<FakeValue>),
    Map(IndexMap<String, FakeValue>),
    Function(FakeFunction),
    Thenable(Arc<Mutex<ThenableInner>>),
}

pub struct ThenableInner {
    outcome: Result<FakeValue, String>,
    /// Microtask drains remaining before the outcome is delivered.
    ticks_remaining: u32,
    callbacks: Option<(HostFunction, HostFunction)>,
}

impl FakeValue {
    pub fn map(entries: Vec<(&str, FakeValue)>) -> Self {
        FakeValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn function(
        f: impl Fn(&mut FakeState, Vec<FakeValue>) -> anyhow::Result<FakeValue>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        FakeValue::Function(Arc::new(f))
    }

    /// A thenable that resolves after `ticks` microtask drains.
    pub fn resolving_thenable(ticks: u32, value: FakeValue) -> Self {
        FakeValue::Thenable(Arc::new(Mutex::new(ThenableInner {
            outcome: Ok(value),
            ticks_remaining: ticks,
            callbacks: None,
        })))
    }

    /// A thenable that rejects after `ticks` microtask drains.
    pub fn rejecting_thenable(ticks: u32, reason: impl Into<String>) -> Self {
        FakeValue::Thenable(Arc::new(Mutex::new(ThenableInner {
            outcome: Err(reason.into()),
            ticks_remaining: ticks,
            callbacks: None,
        })))
    }

    pub fn from_host(value: &HostValue) -> Self {
        match value {
            HostValue::Null => FakeValue::Null,
            HostValue::Bool(b) => FakeValue::Bool(*b),
            HostValue::Int64(i) => FakeValue::Int(*i),
            HostValue::Float64(f) => FakeValue::Float(*f),
            HostValue::String(s) => FakeValue::Str(s.clone()),
            HostValue::Array(items) => {
                FakeValue::Array(items.iter().map(FakeValue::from_host).collect())
            },
            HostValue::Map(map) => FakeValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), FakeValue::from_host(v)))
                    .collect(),
            ),
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, FakeValue>> {
        match self {
            FakeValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FakeValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Mutable guts of a fake context, handed to scripted functions so they can
/// reach bound host functions the way real guest code would.
pub struct FakeState {
    pub host_fns: HashMap<String, HostFunction>,
    pub globals: IndexMap<String, FakeValue>,
    pub interrupt: InterruptHandle,
    thenables: Vec<Arc<Mutex<ThenableInner>>>,
}

impl FakeState {
    /// Call a bound host function the way a guest shim would.
    pub fn call_host(&self, name: &str, args: Vec<FakeValue>) -> anyhow::Result<HostValue> {
        let function = self
            .host_fns
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no host binding named {name}"))?;
        let boxed: Vec<Box<dyn GuestValue>> = args
            .into_iter()
            .map(|v| Box::new(FakeGuestValue(v)) as Box<dyn GuestValue>)
            .collect();
        function(boxed)
    }
}

/// Wrapper implementing the seam's value surface over [`FakeValue`].
pub struct FakeGuestValue(pub FakeValue);

impl GuestValue for FakeGuestValue {
    fn is_null(&self) -> bool {
        matches!(self.0, FakeValue::Null)
    }

    fn as_bool(&self) -> Option<bool> {
        match self.0 {
            FakeValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    fn as_int(&self) -> Option<i64> {
        match self.0 {
            FakeValue::Int(i) => Some(i),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self.0 {
            FakeValue::Float(f) => Some(f),
            _ => None,
        }
    }

    fn array_len(&self) -> Option<usize> {
        match &self.0 {
            FakeValue::Array(items) => Some(items.len()),
            _ => None,
        }
    }

    fn array_element(&self, index: usize) -> Option<Box<dyn GuestValue>> {
        match &self.0 {
            FakeValue::Array(items) => items
                .get(index)
                .map(|v| Box::new(FakeGuestValue(v.clone())) as Box<dyn GuestValue>),
            _ => None,
        }
    }

    fn mapping_keys(&self) -> Option<Vec<String>> {
        self.0.as_map().map(|map| map.keys().cloned().collect())
    }

    fn mapping_item(&self, key: &str) -> Option<Box<dyn GuestValue>> {
        self.0
            .as_map()
            .and_then(|map| map.get(key))
            .map(|v| Box::new(FakeGuestValue(v.clone())) as Box<dyn GuestValue>)
    }

    fn member_keys(&self) -> Option<Vec<String>> {
        self.mapping_keys()
    }

    fn member(&self, name: &str) -> Option<Box<dyn GuestValue>> {
        self.mapping_item(name)
    }

    fn member_is_executable(&self, name: &str) -> bool {
        match &self.0 {
            FakeValue::Thenable(_) => name == "then",
            FakeValue::Map(map) => matches!(map.get(name), Some(FakeValue::Function(_))),
            _ => false,
        }
    }

    fn is_executable(&self) -> bool {
        matches!(self.0, FakeValue::Function(_))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn to_display_string(&self) -> String {
        match &self.0 {
            FakeValue::Null => "null".to_string(),
            FakeValue::Bool(b) => b.to_string(),
            FakeValue::Int(i) => i.to_string(),
            FakeValue::Float(f) => f.to_string(),
            FakeValue::Str(s) => s.clone(),
            FakeValue::Array(_) => "[array]".to_string(),
            FakeValue::Map(_) => "[object]".to_string(),
            FakeValue::Function(_) => "[function]".to_string(),
            FakeValue::Thenable(_) => "[promise]".to_string(),
        }
    }
}

/// A scripted evaluator: evaluating a registered source installs its
/// globals; generated trampolines and the platform shim are recognized and
/// given working stand-ins. Everything evaluated is logged for assertions.
pub struct FakeEngine {
    language: LanguageId,
    programs: Mutex<HashMap<String, Vec<(String, FakeValue)>>>,
    eval_log: Arc<Mutex<Vec<(String, String)>>>,
    module_flags: Arc<Mutex<Vec<bool>>>,
}

impl FakeEngine {
    pub fn new(language: LanguageId) -> Arc<Self> {
        Arc::new(Self {
            language,
            programs: Mutex::new(HashMap::new()),
            eval_log: Arc::new(Mutex::new(Vec::new())),
            module_flags: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Register the globals that evaluating `source` installs.
    pub fn define_program(&self, source: impl Into<String>, globals: Vec<(&str, FakeValue)>) {
        self.programs.lock().insert(
            source.into(),
            globals
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
    }

    /// Every `(filename, source)` evaluated across all contexts.
    pub fn evaluated(&self) -> Vec<(String, String)> {
        self.eval_log.lock().clone()
    }

    /// The `module_evaluation` flag of each context constructed.
    pub fn module_flags(&self) -> Vec<bool> {
        self.module_flags.lock().clone()
    }
}

impl GuestEngine for FakeEngine {
    fn language(&self) -> LanguageId {
        self.language
    }

    fn new_context(&self, options: ContextOptions) -> anyhow::Result<Box<dyn GuestContext>> {
        self.module_flags.lock().push(options.module_evaluation);
        Ok(Box::new(FakeContext {
            language: self.language,
            programs: self.programs.lock().clone(),
            eval_log: self.eval_log.clone(),
            state: FakeState {
                host_fns: HashMap::new(),
                globals: IndexMap::new(),
                interrupt: options.interrupt,
                thenables: Vec::new(),
            },
        }))
    }
}

pub struct FakeContext {
    language: LanguageId,
    programs: HashMap<String, Vec<(String, FakeValue)>>,
    eval_log: Arc<Mutex<Vec<(String, String)>>>,
    state: FakeState,
}

impl FakeContext {
    fn convert_arg(&self, arg: CallArg) -> anyhow::Result<FakeValue> {
        Ok(match arg {
            CallArg::Value(host) => FakeValue::from_host(&host),
            CallArg::Guest(guest) => {
                let concrete = guest
                    .as_any()
                    .downcast_ref::<FakeGuestValue>()
                    .ok_or_else(|| anyhow::anyhow!("foreign guest value"))?;
                concrete.0.clone()
            },
            CallArg::Function(host_fn) => FakeValue::Function(Arc::new(move |_state, args| {
                let boxed: Vec<Box<dyn GuestValue>> = args
                    .into_iter()
                    .map(|v| Box::new(FakeGuestValue(v)) as Box<dyn GuestValue>)
                    .collect();
                host_fn(boxed).map(|host| FakeValue::from_host(&host))
            })),
        })
    }

    fn unwrap_target<'a>(&self, target: &'a dyn GuestValue) -> anyhow::Result<&'a FakeValue> {
        target
            .as_any()
            .downcast_ref::<FakeGuestValue>()
            .map(|v| &v.0)
            .ok_or_else(|| anyhow::anyhow!("foreign guest value"))
    }
}

/// Recover the `(function name, argument literal)` of a generated
/// trampoline so the scripted stand-in can route the call to the registered
/// handler. The literal is forwarded verbatim as the handler's argument,
/// which lets tests assert on exactly what was baked in.
fn parse_trampoline(source: &str) -> Option<(String, String)> {
    let call = if source.starts_with("def __faas_invoke__():") {
        source.lines().nth(1)?.trim_start().strip_prefix("return ")?
    } else if source.starts_with("$__faas_invoke__ = lambda do") {
        source.lines().nth(1)?.trim_start()
    } else {
        return None;
    };
    let open = call.find('(')?;
    let close = call.rfind(')')?;
    Some((call[..open].to_string(), call[open + 1..close].to_string()))
}

impl GuestContext for FakeContext {
    fn language(&self) -> LanguageId {
        self.language
    }

    fn eval(&mut self, filename: &str, source: &str) -> anyhow::Result<Box<dyn GuestValue>> {
        self.eval_log
            .lock()
            .push((filename.to_string(), source.to_string()));

        if let Some(globals) = self.programs.get(source).cloned() {
            for (name, v) in globals {
                self.state.globals.insert(name, v);
            }
            return Ok(Box::new(FakeGuestValue(FakeValue::Null)));
        }

        if let Some((function_name, literal)) = parse_trampoline(source) {
            let trampoline = FakeValue::Function(Arc::new(move |state, _args| {
                let handler = state.globals.get(&function_name).cloned().ok_or_else(|| {
                    anyhow::anyhow!("name '{function_name}' is not defined")
                })?;
                let FakeValue::Function(f) = handler else {
                    anyhow::bail!("'{function_name}' is not callable");
                };
                f(state, vec![FakeValue::Str(literal.clone())])
            }));
            self.state
                .globals
                .insert(bridge::TRAMPOLINE_NAME.to_string(), trampoline);
            return Ok(Box::new(FakeGuestValue(FakeValue::Null)));
        }

        if source == bridge::JS_PLATFORM_SHIM {
            let prepare = FakeValue::function(|_state, mut args| {
                let mut event = match args.drain(..).next() {
                    Some(FakeValue::Map(map)) => map,
                    _ => IndexMap::new(),
                };
                event.insert(
                    "platform".to_string(),
                    FakeValue::Str("__faas_platform__".to_string()),
                );
                Ok(FakeValue::Map(event))
            });
            self.state
                .globals
                .insert(bridge::PREPARE_EVENT_NAME.to_string(), prepare);
        }
        Ok(Box::new(FakeGuestValue(FakeValue::Null)))
    }

    fn eval_module(
        &mut self,
        filename: &str,
        source: &str,
    ) -> anyhow::Result<Box<dyn GuestValue>> {
        self.eval_log
            .lock()
            .push((filename.to_string(), source.to_string()));
        let namespace = self
            .programs
            .get(source)
            .cloned()
            .map(|globals| FakeValue::Map(globals.into_iter().collect()))
            .unwrap_or_else(|| FakeValue::Map(IndexMap::new()));
        Ok(Box::new(FakeGuestValue(namespace)))
    }

    fn global(&mut self, name: &str) -> anyhow::Result<Option<Box<dyn GuestValue>>> {
        Ok(self
            .state
            .globals
            .get(name)
            .cloned()
            .map(|v| Box::new(FakeGuestValue(v)) as Box<dyn GuestValue>))
    }

    fn bind_host_function(&mut self, name: &str, function: HostFunction) -> anyhow::Result<()> {
        self.state.host_fns.insert(name.to_string(), function);
        Ok(())
    }

    fn call(
        &mut self,
        target: &dyn GuestValue,
        args: Vec<CallArg>,
    ) -> anyhow::Result<Box<dyn GuestValue>> {
        let target = self.unwrap_target(target)?.clone();
        let FakeValue::Function(f) = target else {
            anyhow::bail!("value is not callable");
        };
        let mut converted = Vec::with_capacity(args.len());
        for arg in args {
            converted.push(self.convert_arg(arg)?);
        }
        let result = f(&mut self.state, converted)?;
        Ok(Box::new(FakeGuestValue(result)))
    }

    fn call_member(
        &mut self,
        target: &dyn GuestValue,
        name: &str,
        args: Vec<CallArg>,
    ) -> anyhow::Result<Box<dyn GuestValue>> {
        let target = self.unwrap_target(target)?.clone();
        match target {
            FakeValue::Thenable(inner) if name == "then" => {
                let mut converted = args.into_iter();
                let (Some(CallArg::Function(resolve)), Some(CallArg::Function(reject))) =
                    (converted.next(), converted.next())
                else {
                    anyhow::bail!("then expects resolve and reject callbacks");
                };
                inner.lock().callbacks = Some((resolve, reject));
                self.state.thenables.push(inner);
                Ok(Box::new(FakeGuestValue(FakeValue::Null)))
            },
            FakeValue::Map(map) => {
                let member = map
                    .get(name)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no member named {name}"))?;
                let boxed = Box::new(FakeGuestValue(member)) as Box<dyn GuestValue>;
                self.call(boxed.as_ref(), args)
            },
            _ => anyhow::bail!("cannot call member {name}"),
        }
    }

    fn drain_microtasks(&mut self) -> anyhow::Result<()> {
        for thenable in &self.state.thenables {
            let mut inner = thenable.lock();
            if inner.callbacks.is_none() {
                continue;
            }
            if inner.ticks_remaining > 0 {
                inner.ticks_remaining -= 1;
                continue;
            }
            let (resolve, reject) = inner.callbacks.take().expect("checked above");
            let outcome = inner.outcome.clone();
            drop(inner);
            match outcome {
                Ok(v) => {
                    resolve(vec![Box::new(FakeGuestValue(v)) as Box<dyn GuestValue>])?;
                },
                Err(reason) => {
                    reject(vec![
                        Box::new(FakeGuestValue(FakeValue::Str(reason))) as Box<dyn GuestValue>
                    ])?;
                },
            }
        }
        Ok(())
    }
}
