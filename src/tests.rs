#[cfg(test)]
mod tests {
    use crate::hooks::{HookOwnerId, HookResult, ThreadHook};
    use crate::sim::{SimPlatform, Switch};
    use crate::time::Timeout;
    use crate::waitq::WaitQueue;
    use crate::{
        ExecutionState, Kernel, QueueId, SchedulerConfig, ThreadBuilder, ThreadError, ThreadFlags, ThreadId,
        ThreadLock, ThreadRef, Transition,
    };
    use alloc::sync::Arc;
    use portable_atomic::{AtomicUsize, Ordering};
    use std::vec::Vec;

    const QUANTUM: u64 = crate::time::DEFAULT_QUANTUM_NS;

    type SimKernel = Arc<Kernel<SimPlatform>>;

    fn kernel(cpus: usize) -> SimKernel {
        Kernel::new(SimPlatform::new(cpus), SchedulerConfig::default()).unwrap()
    }

    /// A kernel whose CPU 0 runs an adopted boot thread.
    fn booted(cpus: usize) -> (SimKernel, ThreadRef) {
        let kernel = kernel(cpus);
        let boot = ThreadBuilder::new().name("boot").adopt();
        kernel.start_cpu(&boot).unwrap();
        (kernel, boot)
    }

    fn runnable(kernel: &SimKernel, name: &'static str) -> ThreadRef {
        let thread = kernel.spawn(name, || {}).unwrap();
        assert_eq!(kernel.resume(&thread), Ok(Transition::Completed));
        thread
    }

    /// One quantum expiry on the current CPU.
    fn tick(kernel: &SimKernel) {
        kernel.handle_interrupt(|| kernel.platform().advance(QUANTUM));
    }

    /// A forced-preemption interrupt on the current CPU.
    fn preempt(kernel: &SimKernel) {
        kernel.handle_interrupt(|| {});
    }

    fn current(kernel: &SimKernel) -> ThreadRef {
        kernel.current_thread().unwrap()
    }

    fn queue_ids(kernel: &SimKernel, cpu: usize) -> Vec<ThreadId> {
        kernel.run_queue(cpu).iter().map(|t| t.id()).collect()
    }

    #[test]
    fn test_bootstrap_scenario() {
        let (kernel, boot) = booted(1);
        assert_eq!(kernel.registry().len(), 1);
        assert_eq!(boot.execution_state(), ExecutionState::Running);
        assert!(Arc::ptr_eq(&current(&kernel), &boot));

        let threads: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|name| kernel.spawn(name, || {}).unwrap())
            .collect();
        assert_eq!(kernel.registry().len(), 4);
        assert_eq!(kernel.suspended_len(), 3);
        assert!(threads.iter().all(|t| t.queue() == Some(QueueId::Suspended)));

        for thread in &threads {
            assert_eq!(kernel.resume(thread), Ok(Transition::Completed));
        }
        assert_eq!(kernel.run_queue_len(0), 4);
        assert_eq!(kernel.suspended_len(), 0);
        assert_eq!(
            queue_ids(&kernel, 0),
            [boot.id(), threads[0].id(), threads[1].id(), threads[2].id()]
        );

        tick(&kernel);
        assert!(Arc::ptr_eq(&kernel.run_queue(0)[0], &threads[0]));
        assert!(Arc::ptr_eq(&current(&kernel), &threads[0]));
        assert_eq!(
            kernel.platform().last_switch(),
            Some(Switch {
                cpu: 0,
                from: Some(boot.id()),
                to: threads[0].id(),
            })
        );
        assert_eq!(boot.execution_state(), ExecutionState::NotRunning);
        assert_eq!(threads[0].execution_state(), ExecutionState::Running);
    }

    #[test]
    fn test_round_robin_fairness() {
        let (kernel, boot) = booted(1);
        let a = runnable(&kernel, "a");
        let b = runnable(&kernel, "b");

        let mut order = Vec::new();
        for _ in 0..6 {
            tick(&kernel);
            order.push(current(&kernel).id());
        }
        assert_eq!(order, [a.id(), b.id(), boot.id(), a.id(), b.id(), boot.id()]);

        let stats = kernel.cpu_stats(0).unwrap();
        assert_eq!(stats.context_switches, 6);
        assert_eq!(stats.quantum_expirations, 6);
        assert_eq!(stats.idle_switches, 0);
    }

    #[test]
    fn test_single_thread_keeps_cpu() {
        let (kernel, boot) = booted(1);
        tick(&kernel);
        tick(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &boot));
        assert!(kernel.platform().switches().is_empty());
        // the quantum timer is re-armed every time
        assert_eq!(kernel.platform().armed_timers(), 1);
    }

    #[test]
    fn test_kill_idempotence() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "victim");

        assert_eq!(kernel.kill(&thread), Ok(Transition::Completed));
        assert_eq!(thread.execution_state(), ExecutionState::Dead);
        assert_eq!(kernel.kill(&thread), Err(ThreadError::AlreadyInProgress));
        assert_eq!(kernel.resume(&thread), Err(ThreadError::ThreadDead));
        assert_eq!(kernel.suspend(&thread, false), Err(ThreadError::ThreadDead));
        assert_eq!(kernel.block(&thread, false), Err(ThreadError::ThreadDead));
        assert!(!kernel.registry().contains(&thread));
        assert_eq!(kernel.run_queue_len(0), 1);
    }

    #[test]
    fn test_kill_suspended_thread_frees_after_deferred_work() {
        let (kernel, _boot) = booted(1);
        let thread = kernel.spawn("victim", || {}).unwrap();
        let weak = Arc::downgrade(&thread);
        assert!(thread.has_stack());

        assert_eq!(kernel.kill(&thread), Ok(Transition::Completed));
        assert_eq!(thread.execution_state(), ExecutionState::Dead);
        assert!(!thread.is_queued());
        assert_eq!(kernel.suspended_len(), 0);
        assert_eq!(kernel.registry().len(), 1);

        // teardown waits for the worker
        assert!(thread.has_stack());
        assert_eq!(kernel.platform().pending_deferred(), 1);
        assert_eq!(kernel.platform().drain_deferred(), 1);
        assert!(!thread.has_stack());
        assert!(thread.lock().flags().contains(ThreadFlags::DEATH_NOTIFIED));
        assert_eq!(kernel.join(&thread), Ok(()));

        drop(thread);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_kill_running_thread_completes_at_interrupt() {
        let (kernel, boot) = booted(1);
        let next = runnable(&kernel, "next");

        assert_eq!(kernel.kill(&boot), Ok(Transition::Pending));
        assert_eq!(kernel.platform().take_preemptions(), [0]);
        assert_eq!(kernel.cpu_stats(0).unwrap().preemption_requests, 1);
        assert_eq!(boot.execution_state(), ExecutionState::Running);
        assert!(boot.lock().flags().contains(ThreadFlags::PENDING_DEATH));
        assert_eq!(kernel.platform().armed_timers(), 0);
        assert_eq!(kernel.kill(&boot), Err(ThreadError::AlreadyInProgress));

        preempt(&kernel);
        assert_eq!(boot.execution_state(), ExecutionState::Dead);
        assert!(Arc::ptr_eq(&current(&kernel), &next));
        assert_eq!(next.execution_state(), ExecutionState::Running);
        assert_eq!(
            kernel.platform().last_switch(),
            Some(Switch {
                cpu: 0,
                from: None,
                to: next.id(),
            })
        );
        assert_eq!(queue_ids(&kernel, 0), [next.id()]);
        assert_eq!(kernel.registry().len(), 1);
        assert_eq!(kernel.platform().armed_timers(), 1);
    }

    #[test]
    fn test_kill_during_quantum_expiry() {
        let (kernel, boot) = booted(1);
        let next = runnable(&kernel, "next");

        kernel.handle_interrupt(|| {
            assert_eq!(kernel.kill(&boot), Ok(Transition::Pending));
            kernel.timed_context_switch(0);
        });
        assert_eq!(boot.execution_state(), ExecutionState::Dead);
        assert!(!boot.is_queued());
        assert!(Arc::ptr_eq(&current(&kernel), &next));

        // the requested preemption arrives after the fact and finds nothing to do
        preempt(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &next));
    }

    #[test]
    fn test_expiry_after_kill_switch_keeps_fresh_thread() {
        let (kernel, boot) = booted(1);
        let a = runnable(&kernel, "a");
        let _b = runnable(&kernel, "b");

        assert_eq!(kernel.kill(&boot), Ok(Transition::Pending));
        // the quantum timer fires in the same interrupt that completes the kill
        kernel.handle_interrupt(|| kernel.timed_context_switch(0));

        assert_eq!(boot.execution_state(), ExecutionState::Dead);
        assert!(Arc::ptr_eq(&current(&kernel), &a));
        assert_eq!(a.execution_state(), ExecutionState::Running);
        assert_eq!(
            kernel.platform().last_switch(),
            Some(Switch {
                cpu: 0,
                from: None,
                to: a.id(),
            })
        );
        assert_eq!(kernel.platform().armed_timers(), 1);
    }

    #[test]
    fn test_replaced_quantum_timer_is_ignored() {
        let (kernel, boot) = booted(1);
        let a = runnable(&kernel, "a");
        let stale = kernel.cpu(0).queue.lock().timer_seq;

        assert_eq!(kernel.kill(&boot), Ok(Transition::Pending));
        preempt(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &a));
        let switches = kernel.platform().switches().len();
        let expirations = kernel.cpu_stats(0).unwrap().quantum_expirations;

        // callback of the timer cancelled by the kill, delivered late
        kernel.handle_interrupt(|| kernel.quantum_expired(0, Some(stale)));

        assert!(Arc::ptr_eq(&current(&kernel), &a));
        assert_eq!(kernel.platform().switches().len(), switches);
        assert_eq!(kernel.cpu_stats(0).unwrap().quantum_expirations, expirations);
        assert!(kernel.cpu(0).queue.lock().timer.is_some());
        assert_eq!(kernel.platform().armed_timers(), 1);

        // the live timer still drives the cpu
        let b = runnable(&kernel, "b");
        tick(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &b));
        assert_eq!(kernel.platform().armed_timers(), 1);
    }

    #[test]
    fn test_suspend_resume_round_trip() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "worker");

        assert_eq!(kernel.suspend(&thread, false), Ok(Transition::Completed));
        assert_eq!(thread.execution_state(), ExecutionState::Suspended);
        assert_eq!(thread.queue(), Some(QueueId::Suspended));
        assert_eq!(kernel.run_queue_len(0), 1);
        assert_eq!(kernel.suspend(&thread, false), Err(ThreadError::AlreadyInProgress));

        assert_eq!(kernel.resume(&thread), Ok(Transition::Completed));
        assert_eq!(thread.execution_state(), ExecutionState::NotRunning);
        assert_eq!(thread.queue(), Some(QueueId::Cpu(0)));
        assert_eq!(kernel.run_queue_len(0), 2);
        assert_eq!(kernel.resume(&thread), Err(ThreadError::AlreadyInProgress));
    }

    #[test]
    fn test_suspend_running_thread_switches_to_idle() {
        let (kernel, boot) = booted(1);
        let idle = kernel.idle_thread(0).unwrap().clone();

        assert_eq!(kernel.suspend(&boot, false), Ok(Transition::Pending));
        preempt(&kernel);
        assert_eq!(boot.execution_state(), ExecutionState::Suspended);
        assert_eq!(kernel.suspended_len(), 1);
        assert!(Arc::ptr_eq(&current(&kernel), &idle));
        assert_eq!(idle.execution_state(), ExecutionState::Running);
        assert_eq!(kernel.cpu_stats(0).unwrap().idle_switches, 1);

        assert_eq!(kernel.resume(&boot), Ok(Transition::Completed));
        tick(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &boot));
        assert_eq!(idle.execution_state(), ExecutionState::NotRunning);
    }

    #[test]
    fn test_resume_cancels_pending_suspension() {
        let (kernel, boot) = booted(1);
        assert_eq!(kernel.suspend(&boot, false), Ok(Transition::Pending));
        assert_eq!(kernel.resume(&boot), Ok(Transition::Completed));
        assert!(!boot.lock().flags().contains(ThreadFlags::PENDING_SUSPEND));

        preempt(&kernel);
        assert_eq!(boot.execution_state(), ExecutionState::Running);
        assert!(Arc::ptr_eq(&current(&kernel), &boot));
    }

    #[test]
    fn test_least_loaded_placement() {
        let (kernel, boot) = booted(2);
        kernel.platform().set_current_cpu(1);
        kernel.start_cpu_idle();
        kernel.platform().set_current_cpu(0);

        let a = runnable(&kernel, "a");
        let b = runnable(&kernel, "b");
        let c = runnable(&kernel, "c");
        assert_eq!(boot.queue(), Some(QueueId::Cpu(0)));
        assert_eq!(a.queue(), Some(QueueId::Cpu(1)));
        // ties go to the lowest cpu
        assert_eq!(b.queue(), Some(QueueId::Cpu(0)));
        assert_eq!(c.queue(), Some(QueueId::Cpu(1)));
    }

    #[test]
    fn test_inactive_cpus_are_skipped() {
        let (kernel, _boot) = booted(4);
        for name in ["a", "b", "c"] {
            let thread = runnable(&kernel, name);
            assert_eq!(thread.queue(), Some(QueueId::Cpu(0)));
        }
        assert_eq!(kernel.run_queue_len(0), 4);
    }

    #[test]
    fn test_idle_cpu_picks_up_new_work() {
        let (kernel, _boot) = booted(2);
        kernel.platform().set_current_cpu(1);
        let idle = kernel.start_cpu_idle();
        assert!(Arc::ptr_eq(&current(&kernel), &idle));

        let thread = runnable(&kernel, "late");
        assert_eq!(thread.queue(), Some(QueueId::Cpu(1)));
        tick(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &thread));
        assert_eq!(
            kernel.platform().last_switch(),
            Some(Switch {
                cpu: 1,
                from: Some(idle.id()),
                to: thread.id(),
            })
        );
    }

    #[test]
    #[should_panic(expected = "no active cpu")]
    fn test_resume_without_active_cpu_panics() {
        let kernel = kernel(1);
        let thread = kernel.spawn("orphan", || {}).unwrap();
        let _ = kernel.resume(&thread);
    }

    #[test]
    fn test_timeout_resumes_thread() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "sleeper");

        let timeout = Timeout::relative_ns(1_000);
        assert_eq!(kernel.suspend_timeout(&thread, false, timeout), Ok(Transition::Completed));
        assert!(thread.lock().has_timer());
        assert_eq!(kernel.platform().armed_timers(), 2);

        kernel.platform().advance(999);
        assert_eq!(thread.execution_state(), ExecutionState::Suspended);
        kernel.platform().advance(1);
        assert_eq!(thread.execution_state(), ExecutionState::NotRunning);
        assert!(!thread.lock().has_timer());
        assert_eq!(kernel.platform().armed_timers(), 1);
    }

    #[test]
    fn test_absolute_timeout() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "sleeper");
        kernel.platform().advance(100);

        let timeout = Timeout::absolute_ns(5_000);
        assert_eq!(kernel.suspend_timeout(&thread, false, timeout), Ok(Transition::Completed));
        kernel.platform().advance(4_899);
        assert_eq!(thread.execution_state(), ExecutionState::Suspended);
        kernel.platform().advance(1);
        assert_eq!(thread.execution_state(), ExecutionState::NotRunning);
    }

    #[test]
    fn test_resume_cancels_timeout() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "sleeper");

        kernel
            .suspend_timeout(&thread, false, Timeout::relative_ns(1_000))
            .unwrap();
        assert_eq!(kernel.resume(&thread), Ok(Transition::Completed));
        assert!(!thread.lock().has_timer());
        assert_eq!(kernel.platform().armed_timers(), 1);

        // suspended again without a timeout: the old deadline must not wake it
        assert_eq!(kernel.suspend(&thread, false), Ok(Transition::Completed));
        kernel.platform().advance(5_000);
        assert_eq!(thread.execution_state(), ExecutionState::Suspended);
    }

    #[test]
    fn test_zero_timeout_is_disabled() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "sleeper");
        kernel
            .suspend_timeout(&thread, false, Timeout::relative_ns(0))
            .unwrap();
        assert!(!thread.lock().has_timer());
        assert_eq!(kernel.platform().armed_timers(), 1);
    }

    #[test]
    fn test_timeout_armed_only_once_fully_suspended() {
        let (kernel, boot) = booted(1);
        let _other = runnable(&kernel, "other");

        kernel
            .suspend_timeout(&boot, false, Timeout::relative_ns(1_000))
            .unwrap();
        assert!(!boot.lock().has_timer());

        preempt(&kernel);
        assert_eq!(boot.execution_state(), ExecutionState::Suspended);
        assert!(boot.lock().has_timer());
        kernel.platform().advance(1_000);
        assert_eq!(boot.execution_state(), ExecutionState::NotRunning);
    }

    #[test]
    fn test_failed_timeout_leaves_thread_suspended() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "sleeper");

        kernel.platform().fail_timers(true);
        let result = kernel.suspend_timeout(&thread, false, Timeout::relative_ns(10));
        kernel.platform().fail_timers(false);

        assert_eq!(result, Ok(Transition::Completed));
        assert!(!thread.lock().has_timer());
        kernel.platform().advance(100);
        assert_eq!(thread.execution_state(), ExecutionState::Suspended);
    }

    #[test]
    fn test_kill_cancels_timeout() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "sleeper");
        kernel
            .suspend_timeout(&thread, false, Timeout::relative_ns(1_000))
            .unwrap();
        assert_eq!(kernel.kill(&thread), Ok(Transition::Completed));
        assert_eq!(kernel.platform().armed_timers(), 1);
        kernel.platform().advance(2_000);
        assert_eq!(thread.execution_state(), ExecutionState::Dead);
    }

    #[test]
    fn test_wait_queue_wakes_thread() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "waiter");
        let waitq = Arc::new(WaitQueue::new());

        assert_eq!(kernel.wait(&thread, &waitq), Ok(Transition::Completed));
        assert_eq!(thread.execution_state(), ExecutionState::Suspended);
        assert_eq!(waitq.len(), 1);

        assert_eq!(waitq.wake_many(1), 1);
        assert_eq!(thread.execution_state(), ExecutionState::NotRunning);
        assert_eq!(thread.queue(), Some(QueueId::Cpu(0)));
        assert!(thread.lock().waitq().is_none());
    }

    #[test]
    fn test_resume_detaches_from_wait_queue() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "waiter");
        let waitq = Arc::new(WaitQueue::new());

        kernel.wait(&thread, &waitq).unwrap();
        assert_eq!(kernel.resume(&thread), Ok(Transition::Completed));
        assert!(waitq.is_empty());
        assert_eq!(waitq.wake_all(), 0);
    }

    #[test]
    fn test_wake_before_suspension_cancels_it() {
        let (kernel, boot) = booted(1);
        let waitq = Arc::new(WaitQueue::new());

        assert_eq!(kernel.wait(&boot, &waitq), Ok(Transition::Pending));
        assert_eq!(waitq.wake_all(), 1);
        assert!(!boot.lock().flags().contains(ThreadFlags::PENDING_SUSPEND));

        preempt(&kernel);
        assert_eq!(boot.execution_state(), ExecutionState::Running);
    }

    #[test]
    fn test_wait_timeout_detaches_on_expiry() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "waiter");
        let waitq = Arc::new(WaitQueue::new());

        kernel
            .wait_timeout(&thread, &waitq, Timeout::relative_ns(300))
            .unwrap();
        kernel.platform().advance(300);
        assert_eq!(thread.execution_state(), ExecutionState::NotRunning);
        assert!(waitq.is_empty());
    }

    #[test]
    fn test_kill_detaches_from_wait_queue() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "waiter");
        let waitq = Arc::new(WaitQueue::new());
        kernel.wait(&thread, &waitq).unwrap();

        kernel.kill(&thread).unwrap();
        assert!(waitq.is_empty());
        assert!(!thread.lock().flags().contains(ThreadFlags::HOLDING_WAITQ_LOCK));
    }

    #[test]
    fn test_blocked_thread_is_skipped() {
        let (kernel, boot) = booted(1);
        let a = runnable(&kernel, "a");
        let b = runnable(&kernel, "b");

        assert_eq!(kernel.block(&a, false), Ok(Transition::Completed));
        assert!(a.is_blocked());
        assert_eq!(a.queue(), Some(QueueId::Cpu(0)));

        let mut order = Vec::new();
        for _ in 0..4 {
            tick(&kernel);
            order.push(current(&kernel).id());
        }
        assert_eq!(order, [b.id(), boot.id(), b.id(), boot.id()]);

        assert_eq!(kernel.unblock(&a), Ok(Transition::Completed));
        tick(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &a));
    }

    #[test]
    fn test_block_nests() {
        let (kernel, _boot) = booted(1);
        let thread = runnable(&kernel, "nested");

        kernel.block(&thread, false).unwrap();
        assert_eq!(kernel.block(&thread, false), Ok(Transition::Completed));
        assert_eq!(thread.lock().block_count(), 2);

        kernel.unblock(&thread).unwrap();
        assert!(thread.is_blocked());
        kernel.unblock(&thread).unwrap();
        assert!(!thread.is_blocked());
        assert_eq!(kernel.unblock(&thread), Err(ThreadError::AlreadyInProgress));
    }

    #[test]
    fn test_block_running_thread_falls_back_to_idle() {
        let (kernel, boot) = booted(1);
        let idle = kernel.idle_thread(0).unwrap().clone();

        assert_eq!(kernel.block(&boot, false), Ok(Transition::Pending));
        preempt(&kernel);
        assert!(boot.is_blocked());
        assert_eq!(boot.execution_state(), ExecutionState::NotRunning);
        assert_eq!(boot.queue(), Some(QueueId::Cpu(0)));
        assert!(Arc::ptr_eq(&current(&kernel), &idle));

        tick(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &idle));

        kernel.unblock(&boot).unwrap();
        tick(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &boot));
    }

    #[test]
    fn test_contended_candidate_extends_quantum() {
        let (kernel, boot) = booted(1);
        let next = runnable(&kernel, "next");

        let guard = next.lock();
        tick(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &boot));
        drop(guard);

        tick(&kernel);
        assert!(Arc::ptr_eq(&current(&kernel), &next));
    }

    #[test]
    fn test_manage_validation() {
        let (kernel, _boot) = booted(1);
        let thread = ThreadBuilder::new().spawn(|| {}).unwrap();
        assert_eq!(kernel.kill(&thread), Err(ThreadError::InvalidArgument));
        assert_eq!(kernel.resume(&thread), Err(ThreadError::InvalidArgument));

        let id = kernel.manage(&thread).unwrap();
        assert_eq!(thread.id(), id);
        assert_eq!(kernel.manage(&thread), Err(ThreadError::AlreadyInProgress));

        kernel.kill(&thread).unwrap();
        assert_eq!(kernel.manage(&thread), Err(ThreadError::ThreadDead));

        let idle = kernel.idle_thread(0).unwrap().clone();
        assert_eq!(kernel.kill(&idle), Err(ThreadError::InvalidArgument));
        assert_eq!(kernel.manage(&idle), Err(ThreadError::AlreadyInProgress));
    }

    #[test]
    fn test_thread_ids_skip_sentinel() {
        let (kernel, _boot) = booted(1);
        kernel.set_next_thread_id(u64::MAX - 1);
        let a = kernel.spawn("a", || {}).unwrap();
        let b = kernel.spawn("b", || {}).unwrap();
        assert_eq!(a.id(), ThreadId::new(u64::MAX - 1));
        assert_eq!(b.id(), ThreadId::new(0));
    }

    #[test]
    fn test_registry_lookup_and_iteration() {
        let (kernel, boot) = booted(1);
        let running = runnable(&kernel, "running");
        let parked = kernel.spawn("parked", || {}).unwrap();

        let found = kernel.registry().find(running.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &running));

        let mut active = Vec::new();
        kernel.registry().foreach(false, |t| {
            active.push(t.id());
            true
        });
        active.sort();
        let mut expected = [boot.id(), running.id()];
        expected.sort();
        assert_eq!(active, expected);

        let mut all = 0;
        kernel.registry().foreach(true, |_| {
            all += 1;
            true
        });
        assert_eq!(all, 3);
        assert!(kernel.registry().contains(&parked));
    }

    #[test]
    fn test_foreach_may_kill() {
        let (kernel, _boot) = booted(1);
        for name in ["a", "b", "c"] {
            kernel.spawn(name, || {}).unwrap();
        }
        kernel.registry().foreach(true, |t| {
            if t.execution_state() == ExecutionState::Suspended {
                kernel.kill(t).unwrap();
            }
            true
        });
        assert_eq!(kernel.registry().len(), 1);
    }

    struct Recorder {
        kills: AtomicUsize,
        result: HookResult,
    }

    impl ThreadHook for Recorder {
        fn kill(&self, _thread: &ThreadRef, _lock: &mut ThreadLock<'_>) -> HookResult {
            self.kills.fetch_add(1, Ordering::SeqCst);
            self.result
        }
    }

    #[test]
    fn test_extra_hook_sees_events() {
        let (kernel, _boot) = booted(1);
        let thread = kernel.spawn("hooked", || {}).unwrap();
        let recorder = Arc::new(Recorder {
            kills: AtomicUsize::new(0),
            result: HookResult::NotApplicable,
        });
        assert_eq!(thread.register_hook(HookOwnerId(7), recorder.clone()), Ok(1));
        assert_eq!(thread.find_hook(HookOwnerId(7)), Some(1));
        assert_eq!(thread.find_hook(HookOwnerId::SCHEDULER), Some(0));

        assert_eq!(kernel.kill(&thread), Ok(Transition::Completed));
        assert_eq!(recorder.kills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_async_hook_makes_transition_pending() {
        let (kernel, _boot) = booted(1);
        let thread = kernel.spawn("hooked", || {}).unwrap();
        let recorder = Arc::new(Recorder {
            kills: AtomicUsize::new(0),
            result: HookResult::HandledAsync,
        });
        thread.register_hook(HookOwnerId(7), recorder).unwrap();

        assert_eq!(kernel.kill(&thread), Ok(Transition::Pending));
        // the scheduler's part still completed synchronously
        assert_eq!(thread.execution_state(), ExecutionState::Dead);
    }

    #[test]
    fn test_current_thread_helpers() {
        let (kernel, boot) = booted(1);
        let next = runnable(&kernel, "next");

        assert_eq!(kernel.suspend_current(), Ok(Transition::Pending));
        preempt(&kernel);
        assert_eq!(boot.execution_state(), ExecutionState::Suspended);
        assert!(Arc::ptr_eq(&current(&kernel), &next));

        assert_eq!(kernel.kill_current(), Ok(Transition::Pending));
        preempt(&kernel);
        assert_eq!(next.execution_state(), ExecutionState::Dead);
        assert!(Arc::ptr_eq(&current(&kernel), kernel.idle_thread(0).unwrap()));
    }

    #[test]
    fn test_interrupt_before_start_is_ignored() {
        let kernel = kernel(1);
        preempt(&kernel);
        assert!(kernel.current_thread().is_none());
    }

    #[test]
    #[should_panic(expected = "cannot jump")]
    fn test_sim_bootstrap_panics() {
        let kernel = kernel(1);
        let boot = ThreadBuilder::new().adopt();
        kernel.bootstrap(&boot);
    }

    #[test]
    fn test_queue_membership_invariant() {
        let (kernel, boot) = booted(2);
        kernel.platform().set_current_cpu(1);
        kernel.start_cpu_idle();
        kernel.platform().set_current_cpu(0);

        let threads: Vec<_> = (0..6).map(|_| runnable(&kernel, "t")).collect();
        kernel.suspend(&threads[1], false).unwrap();
        kernel.kill(&threads[2]).unwrap();
        kernel.block(&threads[3], false).unwrap();
        for _ in 0..3 {
            tick(&kernel);
        }

        let mut queued = 0;
        for cpu in 0..2 {
            for thread in kernel.run_queue(cpu) {
                assert_eq!(thread.queue(), Some(QueueId::Cpu(cpu)));
                assert_ne!(thread.execution_state(), ExecutionState::Suspended);
                queued += 1;
            }
        }
        queued += kernel.suspended_len();
        assert_eq!(queued, kernel.registry().len());
        assert!(!threads[2].is_queued());
        assert!(boot.is_queued());
    }
}
