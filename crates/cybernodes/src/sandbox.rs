//! JavaScript sandbox for task scripts.
//!
//! Uses QuickJS through rquickjs. Each run gets a fresh runtime on its own
//! thread, so scripts share no state. The runtime's heap is capped at the
//! task's `memory_limit_mb` and an interrupt handler stops the script at its
//! deadline, so the thread never outlives the run. The script sees `input`
//! and a `require` restricted to the allowed imports; its return value
//! travels back as JSON.

use async_trait::async_trait;
use cybercore::services::{Sandbox, SandboxError};
use cybercore::{SandboxOptions, Value};
use rquickjs::convert::Coerced;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, FromJs, Runtime};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Extra wait before giving up on a sandbox thread that ignores its deadline.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// [`Sandbox`] backed by QuickJS.
#[derive(Debug, Clone)]
pub struct QuickJsSandbox {
    max_stack_bytes: usize,
    /// Module name to a JS expression that evaluates to the module.
    modules: BTreeMap<String, String>,
}

impl QuickJsSandbox {
    pub fn new(max_stack_bytes: usize) -> Self {
        Self {
            max_stack_bytes,
            modules: BTreeMap::new(),
        }
    }

    /// Make `source` available to `require(name)` when `name` is allowed.
    pub fn with_module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.modules.insert(name.into(), source.into());
        self
    }

    fn program(&self, script: &str, input_json: &str, limits: &SandboxOptions) -> Result<String, SandboxError> {
        let allowed = serde_json::to_string(&limits.allowed_imports)
            .map_err(|e| SandboxError::runtime(e.to_string()))?;

        let mut modules = String::new();
        for (name, source) in &self.modules {
            let key = serde_json::to_string(name).map_err(|e| SandboxError::runtime(e.to_string()))?;
            modules.push_str(&format!("    {}: function () {{ return ({}); }},\n", key, source));
        }

        Ok(format!(
            r#"(function () {{
  const __allowed = {allowed};
  const __modules = {{
{modules}  }};
  const __loaded = {{}};
  function require(name) {{
    if (__allowed.indexOf(name) === -1) {{
      throw new Error("Module '" + name + "' is not allowed");
    }}
    if (!Object.prototype.hasOwnProperty.call(__modules, name)) {{
      throw new Error("Module '" + name + "' is not available");
    }}
    if (!(name in __loaded)) {{
      __loaded[name] = __modules[name]();
    }}
    return __loaded[name];
  }}
  const __value = (function (input, require) {{
{script}
  }})({input_json}, require);
  return JSON.stringify(__value === undefined ? null : __value);
}})()"#
        ))
    }
}

impl Default for QuickJsSandbox {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

#[async_trait]
impl Sandbox for QuickJsSandbox {
    async fn run(&self, script: &str, input: Value, limits: &SandboxOptions) -> Result<Value, SandboxError> {
        let memory_limit = limits.memory_limit_mb.saturating_mul(1024 * 1024) as usize;

        let input_json = serde_json::to_string(&input).map_err(|e| SandboxError::runtime(e.to_string()))?;
        if input_json.len() > memory_limit {
            return Err(SandboxError::memory(format!(
                "input of {} bytes exceeds {} MB",
                input_json.len(),
                limits.memory_limit_mb
            )));
        }

        let program = self.program(script, &input_json, limits)?;
        let run_limits = RunLimits {
            memory_bytes: memory_limit,
            stack_bytes: self.max_stack_bytes,
            timeout: Duration::from_millis(limits.timeout_ms),
        };
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name("task-sandbox".to_string())
            .stack_size(self.max_stack_bytes.saturating_mul(2).saturating_add(1024 * 1024))
            .spawn(move || {
                let outcome = evaluate(&program, &run_limits);
                let _ = tx.send(outcome);
            })
            .map_err(|e| SandboxError::runtime(format!("failed to start sandbox: {}", e)))?;

        let wait = Duration::from_millis(limits.timeout_ms) + DEADLINE_GRACE;
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SandboxError::runtime("sandbox thread exited without a result")),
            Err(_) => {
                tracing::warn!("Task sandbox ignored its {}ms deadline", limits.timeout_ms);
                Err(SandboxError::timeout(format!(
                    "script did not finish within {}ms",
                    limits.timeout_ms
                )))
            }
        }
    }
}

struct RunLimits {
    memory_bytes: usize,
    stack_bytes: usize,
    timeout: Duration,
}

fn evaluate(program: &str, limits: &RunLimits) -> Result<Value, SandboxError> {
    let runtime = Runtime::new().map_err(|e| SandboxError::runtime(format!("failed to start sandbox: {}", e)))?;
    let context = Context::full(&runtime).map_err(|e| SandboxError::runtime(format!("failed to start sandbox: {}", e)))?;

    runtime.set_memory_limit(limits.memory_bytes);
    runtime.set_max_stack_size(limits.stack_bytes);

    let interrupted = Arc::new(AtomicBool::new(false));
    let deadline = Instant::now() + limits.timeout;
    let flag = interrupted.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || {
        let expired = Instant::now() >= deadline;
        if expired {
            flag.store(true, Ordering::Relaxed);
        }
        expired
    })));

    let outcome = context.with(|ctx| {
        ctx.eval::<String, _>(program)
            .catch(&ctx)
            .map_err(|caught| classify(&ctx, caught))
    });

    if interrupted.load(Ordering::Relaxed) {
        tracing::warn!("Task script interrupted after {}ms", limits.timeout.as_millis());
        return Err(SandboxError::timeout(format!(
            "script did not finish within {}ms",
            limits.timeout.as_millis()
        )));
    }

    let text = outcome?;
    serde_json::from_str(&text).map_err(|e| SandboxError::runtime(format!("unreadable script result: {}", e)))
}

/// Errors QuickJS raises itself when a runtime limit is hit.
fn is_limit_breach(name: &str, message: &str) -> bool {
    matches!(
        (name, message),
        ("InternalError", "out of memory")
            | ("InternalError", "stack overflow")
            | ("RangeError", "Maximum call stack size exceeded")
    )
}

/// Map an uncaught script failure onto a sandbox error kind.
///
/// Only the engine's own limit errors count as limits; anything the script
/// throws is a runtime error whatever its message says.
fn classify<'js>(ctx: &Ctx<'js>, caught: CaughtError<'js>) -> SandboxError {
    match caught {
        CaughtError::Exception(exception) => {
            let name: Option<String> = exception.as_object().get("name").ok();
            let message = exception.message().unwrap_or_default();
            match name {
                Some(name) if is_limit_breach(&name, &message) => SandboxError::memory(message),
                _ => SandboxError::runtime(message),
            }
        }
        CaughtError::Value(value) => match Coerced::<String>::from_js(ctx, value) {
            Ok(Coerced(text)) => SandboxError::runtime(text),
            Err(_) => SandboxError::runtime("script threw a non-error value"),
        },
        CaughtError::Error(rquickjs::Error::FromJs { .. }) => {
            SandboxError::runtime("script returned a value that cannot be serialized to JSON")
        }
        CaughtError::Error(e) => SandboxError::runtime(e.to_string()),
    }
}
