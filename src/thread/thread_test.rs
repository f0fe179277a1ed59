#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    use arc_gc::gc::GC;
    use onion_vm::{
        context::Context,
        lambda::{
            protected::Protected,
            runnable::{Runnable, RuntimeError, StepResult, Unwind},
        },
        types::{
            function::Function,
            object::{ObjectCell, Value},
            stored::StoredObject,
        },
    };

    use crate::{
        config::ThreadConfig, runtime::Runtime, this_thread, thread::runner::ThreadRunner,
        thread::Thread,
    };

    const LONG: Option<Duration> = Some(Duration::from_secs(10));

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn config(step: u32) -> ThreadConfig {
        ThreadConfig::from_lookup(|_| None).with_step(step)
    }

    fn names(values: &[&str]) -> Vec<StoredObject> {
        values.iter().map(|value| StoredObject::string(value)).collect()
    }

    /// Never returns on its own.
    struct Spin;

    impl Runnable for Spin {
        fn step(&mut self, _ctx: &mut Context, _gc: &mut GC<ObjectCell>) -> Result<StepResult, Unwind> {
            Ok(StepResult::Continue)
        }
    }

    fn spin() -> Function {
        Function::new("spin", |_| Ok(Box::new(Spin)))
    }

    /// Spins until `released`, then sums `0..n` one term per step.
    struct GatedSum {
        released: Arc<AtomicBool>,
        next: i64,
        n: i64,
        sum: i64,
    }

    impl Runnable for GatedSum {
        fn step(&mut self, _ctx: &mut Context, _gc: &mut GC<ObjectCell>) -> Result<StepResult, Unwind> {
            if !self.released.load(Ordering::SeqCst) {
                return Ok(StepResult::Continue);
            }
            if self.next == self.n {
                return Ok(StepResult::Return(vec![Value::Integer(self.sum)]));
            }
            self.sum += self.next;
            self.next += 1;
            Ok(StepResult::Continue)
        }
    }

    fn gated_sum(released: Arc<AtomicBool>, n: i64) -> Function {
        Function::new("gated_sum", move |_| {
            Ok(Box::new(GatedSum {
                released: released.clone(),
                next: 0,
                n,
                sum: 0,
            }))
        })
    }

    fn echo() -> Function {
        Function::native("echo", |_, _, arguments| Ok(arguments))
    }

    fn raise(message: &'static str) -> Function {
        Function::native("raise", move |_, _, _| Err(RuntimeError::raise(message).into()))
    }

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_sleep_then_return() {
        init();
        let runtime = Runtime::new();
        let function = Function::native("sleepy", |ctx, _, _| {
            this_thread::sleep(ctx, Some(&Value::Integer(50)), Some(&Value::string("ms")))?;
            Ok(vec![Value::Integer(42)])
        });
        let started = Instant::now();
        let thread = Thread::spawn(&runtime, &config(200), function, vec![]).unwrap();
        assert_eq!(thread.get(None), vec![StoredObject::Integer(42)]);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(thread.status(), names(&["completed"]));
    }

    #[test]
    fn test_raised_error_reported_as_failed() {
        init();
        let runtime = Runtime::new();
        let thread = Thread::spawn(&runtime, &config(200), raise("boom"), vec![]).unwrap();
        assert_eq!(thread.wait(None), names(&["failed", "boom"]));
        assert_eq!(thread.status(), names(&["failed", "boom"]));
        assert!(thread.get(None).is_empty());
    }

    #[test]
    fn test_traceback_handler_describes_failure() {
        init();
        let runtime = Runtime::new();
        let config = config(200).with_traceback(true);
        let thread = Thread::spawn(&runtime, &config, raise("boom"), vec![]).unwrap();
        let status = thread.wait(None);
        assert_eq!(status.len(), 2);
        assert_eq!(status[0], StoredObject::string("failed"));
        let description = status[1].as_str().unwrap();
        assert!(description.starts_with("boom\nstack traceback:"));
        assert!(description.contains("raise"));
    }

    #[test]
    fn test_panicking_worker_fails() {
        init();
        let runtime = Runtime::new();
        let function = Function::native("panics", |_, _, _| panic!("kaboom"));
        let thread = Thread::spawn(&runtime, &config(200), function, vec![]).unwrap();
        assert_eq!(
            thread.wait(None),
            names(&["failed", "worker panicked: kaboom"])
        );
        assert!(wait_until(|| runtime.shutdown_state().active_threads() == 0));
    }

    #[test]
    fn test_get_with_short_timeout_on_running_worker() {
        init();
        let runtime = Runtime::new();
        let thread = Thread::spawn(&runtime, &config(10), spin(), vec![]).unwrap();
        assert!(thread.get(Some(Duration::from_millis(20))).is_empty());
        assert_eq!(thread.status(), names(&["running"]));
        assert_eq!(
            thread.wait(Some(Duration::from_millis(20))),
            names(&["running"])
        );
        assert!(thread.cancel(LONG));
    }

    #[test]
    fn test_cancel_running_worker() {
        init();
        let runtime = Runtime::new();
        let thread = Thread::spawn(&runtime, &config(10), spin(), vec![]).unwrap();
        assert!(thread.cancel(LONG));
        assert_eq!(thread.wait(None), names(&["canceled"]));
        assert!(thread.get(None).is_empty());
    }

    #[test]
    fn test_second_cancel_is_noop() {
        init();
        let runtime = Runtime::new();
        let thread = Thread::spawn(&runtime, &config(10), spin(), vec![]).unwrap();
        assert!(thread.cancel(LONG));
        assert!(thread.cancel(Some(Duration::ZERO)));
        assert_eq!(thread.status(), names(&["canceled"]));
    }

    #[test]
    fn test_cancel_completed_worker() {
        init();
        let runtime = Runtime::new();
        let thread = Thread::spawn(&runtime, &config(200), echo(), vec![StoredObject::Integer(1)]).unwrap();
        assert_eq!(thread.get(None), vec![StoredObject::Integer(1)]);
        assert!(thread.cancel(Some(Duration::ZERO)));
        assert!(!thread.pause(Some(Duration::ZERO)));
        assert_eq!(thread.status(), names(&["completed"]));
    }

    #[test]
    fn test_cancel_paused_worker() {
        init();
        let runtime = Runtime::new();
        let thread = Thread::spawn(&runtime, &config(10), spin(), vec![]).unwrap();
        assert!(thread.pause(LONG));
        assert_eq!(thread.status(), names(&["paused"]));
        assert!(thread.cancel(LONG));
        assert_eq!(thread.wait(None), names(&["canceled"]));
    }

    #[test]
    fn test_pause_and_resume_keep_result() {
        init();
        let runtime = Runtime::new();

        let released = Arc::new(AtomicBool::new(true));
        let plain = Thread::spawn(&runtime, &config(1), gated_sum(released, 10_000), vec![])
            .unwrap()
            .get(None);

        let released = Arc::new(AtomicBool::new(false));
        let thread = Thread::spawn(
            &runtime,
            &config(1),
            gated_sum(released.clone(), 10_000),
            vec![],
        )
        .unwrap();
        assert!(thread.pause(LONG));
        released.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(thread.status(), names(&["paused"]));

        // 重复暂停仍然得到确认
        assert!(thread.pause(LONG));

        thread.resume();
        assert_eq!(thread.get(None), plain);
        assert_eq!(plain, vec![StoredObject::Integer(49_995_000)]);
    }

    #[test]
    fn test_protected_call_cannot_catch_cancel() {
        init();
        let runtime = Runtime::new();
        let function = Function::new("pcall", |_| Ok(Box::new(Protected::new(spin(), vec![]))));
        let thread = Thread::spawn(&runtime, &config(10), function, vec![]).unwrap();
        assert!(thread.cancel(LONG));
        assert_eq!(thread.wait(None), names(&["canceled"]));
    }

    #[test]
    fn test_sleep_is_cancellable_without_periodic_hook() {
        init();
        let runtime = Runtime::new();
        let function = Function::native("sleep_long", |ctx, _, _| {
            this_thread::sleep(ctx, Some(&Value::Integer(1)), Some(&Value::string("m")))?;
            Ok(vec![])
        });
        let thread = Thread::spawn(&runtime, &config(0), function, vec![]).unwrap();
        let started = Instant::now();
        assert!(thread.cancel(LONG));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(thread.status(), names(&["canceled"]));
    }

    #[test]
    fn test_error_raised_after_cancel_is_reported_as_canceled() {
        init();
        let runtime = Runtime::new();
        let function = Function::native("swallow", |ctx, _, _| {
            // 吞掉取消信号后抛出普通错误
            let _ = this_thread::sleep(ctx, Some(&Value::Integer(1)), Some(&Value::string("m")));
            Err(RuntimeError::raise("late").into())
        });
        let thread = Thread::spawn(&runtime, &config(0), function, vec![]).unwrap();
        assert!(thread.cancel(LONG));
        assert_eq!(thread.wait(None), names(&["canceled"]));
    }

    #[test]
    fn test_runner_marshals_arguments() {
        init();
        let runtime = Runtime::new();
        let ctx = runtime.new_context();
        let thread = ThreadRunner::new(&runtime, echo())
            .call(
                &ctx,
                &[Value::Integer(7), Value::string("seven"), Value::Boolean(true), Value::Nil],
            )
            .unwrap();
        assert_eq!(
            thread.get(None),
            vec![
                StoredObject::Integer(7),
                StoredObject::string("seven"),
                StoredObject::Boolean(true),
                StoredObject::Nil,
            ]
        );
    }

    #[test]
    fn test_runner_rejects_cyclic_table() {
        init();
        let runtime = Runtime::new();
        let mut ctx = runtime.new_context();
        let mut gc = GC::new();
        let table = ctx.new_table(&mut gc);
        ctx.set(&table, &Value::string("self"), &table).unwrap();

        let err = ThreadRunner::new(&runtime, echo())
            .call(&ctx, &[Value::Integer(1), table.clone()])
            .unwrap_err();
        assert_eq!(
            err.message(),
            "onion.thread: bad argument #2 (cyclic table cannot be shared)"
        );
        ctx.set(&table, &Value::string("self"), &Value::Nil).unwrap();
        assert_eq!(runtime.registry().live_entries(), 0);
    }

    #[test]
    fn test_runner_rejects_foreign_context() {
        init();
        let runtime = Runtime::new();
        let foreign = Runtime::new().new_context();
        assert!(ThreadRunner::new(&runtime, echo())
            .call(&foreign, &[])
            .is_err());
    }

    #[test]
    fn test_runner_inherits_paths() {
        init();
        let runtime = Runtime::new();
        let mut ctx = runtime.new_context();
        ctx.set_package_path("lib/?.onion");
        ctx.set_package_cpath("lib/?.so");
        let paths = Function::native("paths", |ctx, _, _| {
            Ok(vec![
                Value::string(ctx.package_path()),
                Value::string(ctx.package_cpath()),
            ])
        });
        let runner = ThreadRunner::inherit(&runtime, &ctx, paths);
        assert_eq!(runner.config().step, 200);
        assert_eq!(
            runner.spawn(vec![]).unwrap().get(None),
            names(&["lib/?.onion", "lib/?.so"])
        );
    }

    #[test]
    fn test_local_table_argument_is_copied() {
        init();
        let runtime = Runtime::new();
        let mut ctx = runtime.new_context();
        let mut gc = GC::new();
        let local = ctx.new_table(&mut gc);
        ctx.set(&local, &Value::Integer(1), &Value::Integer(10)).unwrap();

        let update = Function::native("update", |ctx, _, arguments| {
            let table = &arguments[0];
            let first = ctx.get(table, &Value::Integer(1))?;
            ctx.set(table, &Value::Integer(2), &Value::Integer(20))?;
            Ok(vec![table.clone(), first])
        });
        let thread = ThreadRunner::new(&runtime, update)
            .call(&ctx, &[local.clone()])
            .unwrap();
        let results = thread.get(None);
        assert_eq!(results[1], StoredObject::Integer(10));

        let copy = ctx.load(&results[0]).unwrap();
        assert_eq!(ctx.get(&copy, &Value::Integer(2)).unwrap(), Value::Integer(20));
        // 本地表本身不受影响
        assert_eq!(ctx.get(&local, &Value::Integer(2)).unwrap(), Value::Nil);
    }

    #[test]
    fn test_shared_reference_lifetime() {
        init();
        let runtime = Runtime::new();
        let registry = runtime.registry().clone();
        let mut ctx = runtime.new_context();
        let shared = ctx.new_shared_table();
        let id = match shared {
            Value::Shared(id) => id,
            _ => unreachable!(),
        };

        let released = Arc::new(AtomicBool::new(false));
        let gate = released.clone();
        let hold = Function::native("hold", move |ctx, _, arguments| {
            while !gate.load(Ordering::SeqCst) {
                this_thread::sleep_for(ctx, Duration::from_millis(1))?;
            }
            Ok(arguments)
        });
        let thread = ThreadRunner::new(&runtime, hold)
            .call(&ctx, &[shared.clone()])
            .unwrap();

        // 控制方上下文 + 线程句柄 (+ 工作线程上下文)
        assert!(registry.reference_count(id) >= 2);
        ctx.destroy();
        assert!(registry.is_alive(id));

        released.store(true, Ordering::SeqCst);
        let results = thread.get(None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].gc_handle(), Some(id));
        assert!(registry.reference_count(id) > 0);

        drop(results);
        drop(thread);
        assert!(wait_until(|| !registry.is_alive(id)));
        assert_eq!(registry.reference_count(id), 0);
    }

    #[test]
    fn test_table_from_other_runtime_is_rejected() {
        init();
        let home = Runtime::new();
        let mut home_ctx = home.new_context();
        let owner = home_ctx.new_shared_table();
        home_ctx
            .set(&owner, &Value::Integer(1), &Value::string("home"))
            .unwrap();
        let stored = home_ctx.store(&owner).unwrap();
        let home_id = stored.gc_handle().unwrap();

        // 另一个运行时的第一个条目占据同一个槽位
        let other = Runtime::new();
        let mut other_ctx = other.new_context();
        let local = other_ctx.new_shared_table();
        let other_id = match local {
            Value::Shared(id) => id,
            _ => unreachable!(),
        };
        assert_eq!(home_id, other_id);

        let err = Thread::spawn(&other, &config(200), echo(), vec![stored.clone()]).unwrap_err();
        assert_eq!(
            err.message(),
            "onion.thread: bad argument #1 (table belongs to a different registry)"
        );
        assert_eq!(other.shutdown_state().active_threads(), 0);
        assert_eq!(other.registry().reference_count(other_id), 1);
        assert_eq!(home.registry().reference_count(home_id), 2);

        // 原运行时上的线程照常使用它
        let thread = Thread::spawn(&home, &config(200), echo(), vec![stored]).unwrap();
        let results = thread.get(None);
        assert_eq!(results[0].gc_handle(), Some(home_id));
        let echoed = home_ctx.load(&results[0]).unwrap();
        assert_eq!(
            home_ctx.get(&echoed, &Value::Integer(1)).unwrap(),
            Value::string("home")
        );
    }

    #[test]
    fn test_aliased_local_table_stays_one_table() {
        init();
        let runtime = Runtime::new();
        let mut ctx = runtime.new_context();
        let mut gc = GC::new();
        let inner = ctx.new_table(&mut gc);
        ctx.set(&inner, &Value::Integer(1), &Value::Integer(1)).unwrap();
        let outer = ctx.new_table(&mut gc);
        ctx.set(&outer, &Value::string("a"), &inner).unwrap();
        ctx.set(&outer, &Value::string("b"), &inner).unwrap();

        let alias = Function::native("alias", |ctx, _, arguments| {
            let a = ctx.get(&arguments[0], &Value::string("a"))?;
            let b = ctx.get(&arguments[0], &Value::string("b"))?;
            ctx.set(&a, &Value::Integer(1), &Value::Integer(99))?;
            let seen = ctx.get(&b, &Value::Integer(1))?;
            Ok(vec![
                Value::Boolean(a == b),
                seen,
                a,
                arguments[1].clone(),
                arguments[2].clone(),
            ])
        });
        let thread = ThreadRunner::new(&runtime, alias)
            .call(&ctx, &[outer, inner.clone(), inner.clone()])
            .unwrap();
        let results = thread.get(None);
        assert_eq!(results[0], StoredObject::Boolean(true));
        assert_eq!(results[1], StoredObject::Integer(99));
        // 跨参数出现的同一个本地表也只复制一次
        assert_eq!(results[2].gc_handle(), results[3].gc_handle());
        assert_eq!(results[3].gc_handle(), results[4].gc_handle());
    }

    #[test]
    fn test_spawn_refused_after_shutdown() {
        init();
        let runtime = Runtime::new();
        runtime.shutdown();
        let err = Thread::spawn(&runtime, &config(200), echo(), vec![]).unwrap_err();
        assert_eq!(err.message(), "onion.thread: runtime is shutting down");
        assert_eq!(runtime.shutdown_state().active_threads(), 0);
    }

    #[test]
    fn test_shutdown_stops_running_and_paused_workers() {
        init();
        let runtime = Runtime::new();
        let running = Thread::spawn(&runtime, &config(10), spin(), vec![]).unwrap();
        let paused = Thread::spawn(&runtime, &config(10), spin(), vec![]).unwrap();
        assert!(paused.pause(LONG));

        runtime.shutdown();
        assert_eq!(runtime.shutdown_state().active_threads(), 0);
        assert_eq!(running.status(), names(&["canceled"]));
        assert_eq!(paused.status(), names(&["canceled"]));
    }

    #[test]
    fn test_many_workers() {
        init();
        let runtime = Runtime::new();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                ThreadRunner::new(&runtime, echo())
                    .step(1)
                    .spawn(vec![StoredObject::Integer(i)])
                    .unwrap()
            })
            .collect();
        for (i, thread) in threads.iter().enumerate() {
            assert_eq!(thread.get(None), vec![StoredObject::Integer(i as i64)]);
        }
    }
}
