//! Host functions bound into every interpreter context.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rhai::{Dynamic, Engine, EvalAltResult, Position};

use crate::diagnostics::Termination;
use crate::error::Error;
use crate::globals::GlobalsTable;
use crate::lock::{CancelToken, ExecutionLock};

/// Receives script output as `(plugin_name, text)`.
pub type OutputHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

type EvalResult<T> = Result<T, Box<EvalAltResult>>;

/// Everything the built-ins of one context need to reach.
#[derive(Clone)]
pub(crate) struct Bindings {
    pub name: Arc<str>,
    pub echo: bool,
    pub output: Arc<RwLock<Option<OutputHook>>>,
    pub globals: Arc<GlobalsTable>,
    pub lock: Arc<ExecutionLock>,
    pub cancel: CancelToken,
}

impl Bindings {
    fn emit(&self, text: &str) {
        tracing::info!(target: "plugin_output", plugin = %self.name, "{}", text);
        if self.echo {
            println!("{}", text);
        }
        let hook = self.output.read().clone();
        if let Some(hook) = hook {
            hook(&self.name, text);
        }
    }

    /// Release the execution lock while waiting up to `duration` for a stop request.
    fn pause(&self, duration: Duration) -> EvalResult<()> {
        if self.cancel.is_cancelled() {
            return Err(Termination::Cancelled.into_eval_error());
        }

        let cancel = &self.cancel;
        let cancelled = self
            .lock
            .yield_while(|| {
                if duration.is_zero() {
                    thread::yield_now();
                    cancel.is_cancelled()
                } else {
                    cancel.wait_timeout(duration)
                }
            })
            .map_err(terminate)?;

        if cancelled {
            tracing::debug!(plugin = %self.name, "stop observed at yield point");
            return Err(Termination::Cancelled.into_eval_error());
        }
        Ok(())
    }
}

fn terminate(err: Error) -> Box<EvalAltResult> {
    match err {
        Error::LockTimeout(timeout) => Termination::LockTimeout(timeout).into_eval_error(),
        _ => Termination::Cancelled.into_eval_error(),
    }
}

fn seconds(secs: f64) -> EvalResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("invalid sleep duration: {}", secs).into())
}

/// Register the host built-ins on `engine`.
pub(crate) fn register(engine: &mut Engine, bindings: &Bindings) {
    let out = bindings.clone();
    engine.on_print(move |text| out.emit(text));

    let out = bindings.clone();
    engine.on_debug(move |text, _source, pos| {
        tracing::debug!(target: "plugin_output", plugin = %out.name, %pos, "{}", text);
        out.emit(text);
    });

    let b = bindings.clone();
    engine.register_fn("sleep", move |secs: f64| -> EvalResult<()> {
        b.pause(seconds(secs)?)
    });

    let b = bindings.clone();
    engine.register_fn("sleep", move |secs: i64| -> EvalResult<()> {
        b.pause(seconds(secs as f64)?)
    });

    let b = bindings.clone();
    engine.register_fn("yield_now", move || -> EvalResult<()> {
        b.pause(Duration::ZERO)
    });

    let cancel = bindings.cancel.clone();
    engine.register_fn("stop_requested", move || cancel.is_cancelled());

    engine.register_fn("now_ms", || -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    });

    let globals = bindings.globals.clone();
    engine.register_fn("get_global", move |name: &str| -> EvalResult<Dynamic> {
        globals.get_raw(name).ok_or_else(|| {
            EvalAltResult::ErrorVariableNotFound(name.to_string(), Position::NONE).into()
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockMode;
    use crate::value::HostValue;
    use std::time::Instant;

    fn bindings() -> Bindings {
        Bindings {
            name: Arc::from("builtin-test"),
            echo: false,
            output: Arc::new(RwLock::new(None)),
            globals: Arc::new(GlobalsTable::new()),
            lock: Arc::new(ExecutionLock::new(LockMode::Exclusive)),
            cancel: CancelToken::new(),
        }
    }

    fn engine(b: &Bindings) -> Engine {
        let mut engine = Engine::new();
        register(&mut engine, b);
        engine
    }

    #[test]
    fn test_print_reaches_hook() {
        let b = bindings();
        let lines = Arc::new(RwLock::new(Vec::new()));
        let sink = lines.clone();
        *b.output.write() = Some(Arc::new(move |name: &str, text: &str| {
            sink.write().push(format!("{}: {}", name, text));
        }));

        engine(&b).run(r#"print("hello"); debug("dbg");"#).unwrap();

        let lines = lines.read();
        assert_eq!(lines[0], "builtin-test: hello");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_sleep_accepts_int_and_float() {
        let b = bindings();
        let started = Instant::now();
        engine(&b).run("sleep(0); sleep(0.01);").unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_negative_sleep_raises() {
        let b = bindings();
        let err = engine(&b).run("sleep(-1.0)").unwrap_err();
        assert!(err.to_string().contains("invalid sleep duration"));
    }

    #[test]
    fn test_sleep_after_cancel_terminates() {
        let b = bindings();
        b.cancel.cancel();
        let err = engine(&b)
            .run("try { sleep(5) } catch { 0 }")
            .unwrap_err();
        assert!(matches!(*err, EvalAltResult::ErrorTerminated(..)));
    }

    #[test]
    fn test_stop_requested() {
        let b = bindings();
        let e = engine(&b);
        assert!(!e.eval::<bool>("stop_requested()").unwrap());
        b.cancel.cancel();
        assert!(e.eval::<bool>("stop_requested()").unwrap());
    }

    #[test]
    fn test_get_global() {
        let b = bindings();
        b.globals.set("int_global", HostValue::from(12)).unwrap();
        let e = engine(&b);

        assert_eq!(e.eval::<i64>(r#"get_global("int_global")"#).unwrap(), 12);
        let err = e.eval::<Dynamic>(r#"get_global("missing")"#).unwrap_err();
        assert!(matches!(*err, EvalAltResult::ErrorVariableNotFound(..)));
    }
}
