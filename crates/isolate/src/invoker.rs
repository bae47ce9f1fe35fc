use std::{
    sync::Arc,
    time::Duration,
};

use errors::ErrorMetadata;
use indexmap::IndexMap;
use model::{
    KvApi,
    LanguageId,
};
use net_proxy::VirtualNetClient;
use parking_lot::Mutex;
use value::{
    host_to_json,
    HostValue,
};

use crate::{
    bridge,
    convert::marshal_guest,
    engine::{
        CallArg,
        ContextOptions,
        EngineRegistry,
        GuestContext,
        GuestEngine,
        GuestValue,
        HostFunction,
        InterruptHandle,
    },
    request::InvocationRequest,
    staging::{
        self,
        StagedFiles,
    },
    worker_pool::{
        resolve_max_workers,
        WorkerPool,
    },
};

/// The invocation engine: a worker pool executing one fresh guest context
/// per call, with timeout/cancellation, dependency injection, network and
/// platform bindings, promise settling, and eager result marshalling.
pub struct Invoker {
    registry: Arc<EngineRegistry>,
    pool: WorkerPool,
    net: Option<Arc<VirtualNetClient>>,
}

impl Invoker {
    pub fn new(registry: Arc<EngineRegistry>, net: Option<Arc<VirtualNetClient>>) -> Self {
        let max_workers = resolve_max_workers(*common::knobs::MAX_INVOCATION_WORKERS);
        let pool = WorkerPool::new(
            "invoke-worker",
            max_workers,
            *common::knobs::WORKER_IDLE_TIMEOUT,
        );
        Self {
            registry,
            pool,
            net,
        }
    }

    /// Run one invocation to completion. Waits up to the request's timeout
    /// (indefinitely when absent or non-positive); on expiry the context is
    /// interrupted and `InvocationTimeout` is raised. Worker failures
    /// propagate with their original kind preserved. Abandoning the returned
    /// future also interrupts the context.
    pub async fn invoke(&self, request: InvocationRequest) -> anyhow::Result<HostValue> {
        let engine = self.registry.engine(request.language_id)?;
        let timeout = request.effective_timeout();
        let mut guard = InterruptOnDrop::new();
        let interrupt = guard.handle.clone();
        let net = self.net.clone();

        let worker_interrupt = interrupt.clone();
        let future = self
            .pool
            .execute(move || do_invoke(engine, request, net, worker_interrupt));

        let outcome = match timeout {
            Some(duration) => match tokio::time::timeout(duration, future).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // The worker sees the interrupt at its next yield point;
                    // its context is discarded regardless.
                    return Err(
                        ErrorMetadata::invocation_timeout(duration.as_millis() as u64).into()
                    );
                },
            },
            None => future.await,
        };
        guard.disarm();
        outcome?
    }
}

/// Trips the interrupt unless disarmed, covering both timeout expiry and a
/// caller abandoning the invoke future mid-wait.
struct InterruptOnDrop {
    handle: InterruptHandle,
    armed: bool,
}

impl InterruptOnDrop {
    fn new() -> Self {
        Self {
            handle: InterruptHandle::new(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.handle.interrupt();
        }
    }
}

fn do_invoke(
    engine: Arc<dyn GuestEngine>,
    request: InvocationRequest,
    net: Option<Arc<VirtualNetClient>>,
    interrupt: InterruptHandle,
) -> anyhow::Result<HostValue> {
    if interrupt.is_interrupted() {
        anyhow::bail!(ErrorMetadata::execution_failed(
            "Interrupted",
            "invocation canceled before it started",
        ));
    }
    let InvocationRequest {
        language_id,
        source_code,
        function_name,
        event,
        files,
        dependencies,
        js_eval_as_module,
        enable_network,
        platform,
        ..
    } = request;

    let mut ctx = engine.new_context(ContextOptions {
        module_evaluation: js_eval_as_module && language_id == LanguageId::Js,
        interrupt: interrupt.clone(),
    })?;
    let ctx = ctx.as_mut();

    // Staged inputs are removed when `staged` drops, on every exit path.
    let staged = staging::stage_files(&files)?;
    let mut event = event;
    if let (Some(staged), HostValue::Map(map)) = (&staged, &mut event) {
        map.insert("files".to_string(), files_event_value(staged));
    }

    if enable_network {
        install_net(ctx, language_id, net)?;
    }
    let platform_installed = match platform.as_ref().and_then(|p| p.kv.clone()) {
        Some(kv) => {
            install_platform(ctx, language_id, kv)?;
            language_id == LanguageId::Js
        },
        None => false,
    };
    match language_id {
        LanguageId::Js => {
            if !dependencies.is_empty() {
                install_require(ctx, dependencies)?;
            }
            invoke_js(
                ctx,
                &source_code,
                &function_name,
                js_eval_as_module,
                event,
                platform_installed,
                &interrupt,
            )
        },
        LanguageId::Python => {
            if !dependencies.is_empty() {
                ctx.eval(
                    "dependencies.py",
                    &bridge::python_dependency_preamble(&dependencies),
                )
                .map_err(tag_guest_failure)?;
            }
            invoke_python(ctx, &source_code, &function_name, &event)
        },
        LanguageId::Ruby => invoke_ruby(ctx, &source_code, &function_name, &event),
    }
}

fn files_event_value(staged: &StagedFiles) -> HostValue {
    HostValue::Array(
        staged
            .files
            .iter()
            .map(|file| {
                let mut meta = IndexMap::new();
                meta.insert("name".to_string(), HostValue::String(file.name.clone()));
                meta.insert(
                    "contentType".to_string(),
                    file.content_type
                        .clone()
                        .map(HostValue::String)
                        .unwrap_or(HostValue::Null),
                );
                meta.insert(
                    "path".to_string(),
                    HostValue::String(file.path.display().to_string()),
                );
                meta.insert("size".to_string(), HostValue::Int64(file.size as i64));
                HostValue::Map(meta)
            })
            .collect(),
    )
}

/// Tag an evaluator failure as a guest evaluation error unless it already
/// carries a more specific kind (engine failures bubble unmodified).
fn tag_guest_failure(e: anyhow::Error) -> anyhow::Error {
    if e.chain()
        .any(|c| c.downcast_ref::<ErrorMetadata>().is_some())
    {
        return e;
    }
    let msg = format!("{e:#}");
    e.context(ErrorMetadata::execution_failed("GuestEvaluationError", msg))
}

fn string_arg(args: &[Box<dyn GuestValue>], index: usize, what: &str) -> anyhow::Result<String> {
    args.get(index)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ErrorMetadata::execution_failed("InvalidArgument", format!("expected string {what}"))
                .into()
        })
}

fn install_net(
    ctx: &mut dyn GuestContext,
    language_id: LanguageId,
    net: Option<Arc<VirtualNetClient>>,
) -> anyhow::Result<()> {
    // Fail closed: a request asking for network in a host with no proxy
    // configured gets nothing.
    let net = net.ok_or_else(|| {
        anyhow::Error::from(ErrorMetadata::egress_denied("networking is not configured"))
    })?;
    let function: HostFunction = Arc::new(move |args| {
        let method = string_arg(&args, 0, "method")?;
        let url = string_arg(&args, 1, "url")?;
        let body = args.get(2).and_then(|v| {
            if v.is_null() {
                None
            } else if let Some(s) = v.as_str() {
                Some(s.to_string())
            } else {
                Some(v.to_display_string())
            }
        });
        let headers = args
            .get(3)
            .map(|v| marshal_guest(v.as_ref()))
            .unwrap_or_else(HostValue::empty_map);
        let headers = flatten_string_map(&headers);
        let response = net.http_blocking(&method, &url, body, &headers)?;

        let mut header_map = IndexMap::with_capacity(response.headers.len());
        for (name, v) in response.headers {
            header_map.insert(name, HostValue::String(v));
        }
        let mut out = IndexMap::new();
        out.insert(
            "status".to_string(),
            HostValue::Int64(i64::from(response.status)),
        );
        out.insert("headers".to_string(), HostValue::Map(header_map));
        out.insert("body".to_string(), HostValue::String(response.body));
        Ok(HostValue::Map(out))
    });
    ctx.bind_host_function(bridge::NET_BINDING, function)?;
    match language_id {
        LanguageId::Js => ctx.eval("net.js", bridge::JS_NET_SHIM)?,
        LanguageId::Python => ctx.eval("net.py", bridge::PYTHON_NET_SHIM)?,
        LanguageId::Ruby => ctx.eval("net.rb", bridge::RUBY_NET_SHIM)?,
    };
    Ok(())
}

fn flatten_string_map(value: &HostValue) -> IndexMap<String, String> {
    let mut flat = IndexMap::new();
    if let HostValue::Map(map) = value {
        for (name, v) in map {
            let rendered = match v {
                HostValue::String(s) => s.clone(),
                HostValue::Null => continue,
                other => host_to_json(other).to_string(),
            };
            flat.insert(name.clone(), rendered);
        }
    }
    flat
}

fn install_platform(
    ctx: &mut dyn GuestContext,
    language_id: LanguageId,
    kv: KvApi,
) -> anyhow::Result<()> {
    let get_kv = kv.clone();
    ctx.bind_host_function(
        bridge::KV_GET_BINDING,
        Arc::new(move |args| {
            let key = string_arg(&args, 0, "key")?;
            Ok(get_kv
                .get(&key)
                .map(HostValue::String)
                .unwrap_or(HostValue::Null))
        }),
    )?;
    let put_kv = kv.clone();
    ctx.bind_host_function(
        bridge::KV_PUT_BINDING,
        Arc::new(move |args| {
            let key = string_arg(&args, 0, "key")?;
            let val = string_arg(&args, 1, "value")?;
            put_kv.put(key, val);
            Ok(HostValue::Null)
        }),
    )?;
    let delete_kv = kv.clone();
    ctx.bind_host_function(
        bridge::KV_DELETE_BINDING,
        Arc::new(move |args| {
            let key = string_arg(&args, 0, "key")?;
            Ok(HostValue::Bool(delete_kv.delete(&key)))
        }),
    )?;
    ctx.bind_host_function(
        bridge::KV_KEYS_BINDING,
        Arc::new(move |_args| {
            Ok(HostValue::Array(
                kv.keys().into_iter().map(HostValue::String).collect(),
            ))
        }),
    )?;
    // Only JS gets the structured `event.platform` surface; other guests
    // reach the bindings directly.
    if language_id == LanguageId::Js {
        ctx.eval("platform.js", bridge::JS_PLATFORM_SHIM)?;
    }
    Ok(())
}

fn install_require(
    ctx: &mut dyn GuestContext,
    dependencies: IndexMap<String, String>,
) -> anyhow::Result<()> {
    let dependencies = Arc::new(dependencies);
    let lookup: HostFunction = Arc::new(move |args| {
        let name = string_arg(&args, 0, "module name")?;
        Ok(dependencies
            .get(&name)
            .map(|source| HostValue::String(source.clone()))
            .unwrap_or(HostValue::Null))
    });
    ctx.bind_host_function(bridge::DEP_SOURCE_BINDING, lookup)?;
    ctx.eval("require.js", bridge::JS_REQUIRE_SHIM)?;
    Ok(())
}

fn invoke_js(
    ctx: &mut dyn GuestContext,
    source_code: &str,
    function_name: &str,
    js_eval_as_module: bool,
    event: HostValue,
    platform_installed: bool,
    interrupt: &InterruptHandle,
) -> anyhow::Result<HostValue> {
    let entry = if js_eval_as_module {
        let namespace = ctx
            .eval_module("function.mjs", source_code)
            .map_err(tag_guest_failure)?;
        namespace.member(function_name)
    } else {
        ctx.eval("function.js", source_code)
            .map_err(tag_guest_failure)?;
        ctx.global(function_name)?
    };
    let entry = entry.filter(|e| e.is_executable()).ok_or_else(|| {
        anyhow::Error::from(ErrorMetadata::function_not_found("js", function_name))
    })?;

    let event_arg = if platform_installed {
        let prepare = ctx
            .global(bridge::PREPARE_EVENT_NAME)?
            .ok_or_else(|| anyhow::anyhow!("platform shim did not install its event helper"))?;
        let prepared = ctx
            .call(prepare.as_ref(), vec![CallArg::Value(event)])
            .map_err(tag_guest_failure)?;
        CallArg::Guest(prepared)
    } else {
        CallArg::Value(event)
    };

    let result = ctx
        .call(entry.as_ref(), vec![event_arg])
        .map_err(tag_guest_failure)?;
    settle_if_promise(ctx, result, interrupt)
}

/// Await a thenable result: attach resolve/reject host callbacks, then pump
/// the guest with a no-op eval on a 1 ms poll until it settles. There is no
/// global event loop; the pump is what drains queued microtasks.
fn settle_if_promise(
    ctx: &mut dyn GuestContext,
    result: Box<dyn GuestValue>,
    interrupt: &InterruptHandle,
) -> anyhow::Result<HostValue> {
    if !result.member_is_executable("then") {
        return Ok(marshal_guest(result.as_ref()));
    }

    type Settled = Arc<Mutex<Option<Result<HostValue, String>>>>;
    let settled: Settled = Arc::new(Mutex::new(None));

    let on_resolve = settled.clone();
    let resolve: HostFunction = Arc::new(move |args| {
        let outcome = args
            .first()
            .map(|v| marshal_guest(v.as_ref()))
            .unwrap_or(HostValue::Null);
        *on_resolve.lock() = Some(Ok(outcome));
        Ok(HostValue::Null)
    });
    let on_reject = settled.clone();
    let reject: HostFunction = Arc::new(move |args| {
        let reason = args
            .first()
            .map(|v| v.to_display_string())
            .unwrap_or_else(|| "unknown reason".to_string());
        *on_reject.lock() = Some(Err(reason));
        Ok(HostValue::Null)
    });
    ctx.call_member(
        result.as_ref(),
        "then",
        vec![CallArg::Function(resolve), CallArg::Function(reject)],
    )
    .map_err(tag_guest_failure)?;

    loop {
        if let Some(outcome) = settled.lock().take() {
            return match outcome {
                Ok(v) => Ok(v),
                Err(reason) => Err(ErrorMetadata::execution_failed(
                    "GuestEvaluationError",
                    format!("promise rejected: {reason}"),
                )
                .into()),
            };
        }
        if interrupt.is_interrupted() {
            anyhow::bail!(ErrorMetadata::execution_failed(
                "Interrupted",
                "invocation interrupted while awaiting a promise",
            ));
        }
        ctx.drain_microtasks().map_err(tag_guest_failure)?;
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn invoke_python(
    ctx: &mut dyn GuestContext,
    source_code: &str,
    function_name: &str,
    event: &HostValue,
) -> anyhow::Result<HostValue> {
    ctx.eval("function.py", source_code)
        .map_err(tag_guest_failure)?;
    ensure_entry(ctx, LanguageId::Python, function_name)?;
    ctx.eval(
        "trampoline.py",
        &bridge::python_trampoline(function_name, event),
    )
    .map_err(tag_guest_failure)?;
    call_trampoline(ctx)
}

fn invoke_ruby(
    ctx: &mut dyn GuestContext,
    source_code: &str,
    function_name: &str,
    event: &HostValue,
) -> anyhow::Result<HostValue> {
    ctx.eval("function.rb", source_code)
        .map_err(tag_guest_failure)?;
    ensure_entry(ctx, LanguageId::Ruby, function_name)?;
    ctx.eval(
        "trampoline.rb",
        &bridge::ruby_trampoline(function_name, event),
    )
    .map_err(tag_guest_failure)?;
    call_trampoline(ctx)
}

fn ensure_entry(
    ctx: &mut dyn GuestContext,
    language_id: LanguageId,
    function_name: &str,
) -> anyhow::Result<()> {
    let executable = ctx
        .global(function_name)?
        .is_some_and(|entry| entry.is_executable());
    if !executable {
        return Err(
            ErrorMetadata::function_not_found(language_id.as_str(), function_name).into(),
        );
    }
    Ok(())
}

fn call_trampoline(ctx: &mut dyn GuestContext) -> anyhow::Result<HostValue> {
    let trampoline = ctx
        .global(bridge::TRAMPOLINE_NAME)?
        .filter(|t| t.is_executable())
        .ok_or_else(|| anyhow::anyhow!("trampoline did not install"))?;
    let result = ctx
        .call(trampoline.as_ref(), Vec::new())
        .map_err(tag_guest_failure)?;
    Ok(marshal_guest(result.as_ref()))
}
