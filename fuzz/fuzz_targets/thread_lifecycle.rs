#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use ferrite_sched::sim::SimPlatform;
use ferrite_sched::thread::stack::MIN_STACK_SIZE;
use ferrite_sched::{
    ExecutionState, Kernel, QueueId, SchedulerConfig, ThreadBuilder, ThreadRef, Timeout, WaitQueue,
};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

const CPUS: usize = 2;
const QUANTUM: u64 = 1_000;

#[derive(Debug, Arbitrary)]
enum ThreadOperation {
    Spawn,
    Resume(u8),
    Suspend(u8),
    SuspendTimeout { thread_idx: u8, ns: u16 },
    Wait { thread_idx: u8, queue: bool },
    Wake { queue: bool, count: u8 },
    Kill(u8),
    Block(u8),
    Unblock(u8),
    Interrupt { cpu: u8, elapsed: u16 },
    Advance(u16),
    Drain,
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);

    // Generate a sequence of lifecycle operations
    let operations: Result<Vec<ThreadOperation>, _> = (0..100)
        .map(|_| ThreadOperation::arbitrary(&mut u))
        .collect();

    if let Ok(ops) = operations {
        fuzz_thread_lifecycle(ops);
    }
});

fn pick(threads: &[ThreadRef], idx: u8) -> Option<&ThreadRef> {
    if threads.is_empty() {
        None
    } else {
        threads.get(idx as usize % threads.len())
    }
}

fn fuzz_thread_lifecycle(operations: Vec<ThreadOperation>) {
    let config = SchedulerConfig::default()
        .with_quantum_ns(QUANTUM)
        .with_default_stack_size(MIN_STACK_SIZE);
    let kernel = match Kernel::new(SimPlatform::new(CPUS), config) {
        Ok(kernel) => kernel,
        Err(_) => return,
    };
    let boot = ThreadBuilder::new().name("boot").adopt();
    kernel.start_cpu(&boot).unwrap();
    kernel.platform().set_current_cpu(1);
    kernel.start_cpu_idle();
    kernel.platform().set_current_cpu(0);

    let mut threads = vec![boot];
    let queues = [Arc::new(WaitQueue::new()), Arc::new(WaitQueue::new())];

    for op in operations {
        match op {
            ThreadOperation::Spawn => {
                if threads.len() < 32 {
                    if let Ok(thread) = kernel.spawn("fuzz", || {}) {
                        threads.push(thread);
                    }
                }
            }
            ThreadOperation::Resume(idx) => {
                if let Some(thread) = pick(&threads, idx) {
                    let _ = kernel.resume(thread);
                }
            }
            ThreadOperation::Suspend(idx) => {
                if let Some(thread) = pick(&threads, idx) {
                    let _ = kernel.suspend(thread, false);
                }
            }
            ThreadOperation::SuspendTimeout { thread_idx, ns } => {
                if let Some(thread) = pick(&threads, thread_idx) {
                    let _ = kernel.suspend_timeout(thread, false, Timeout::relative_ns(ns as u64));
                }
            }
            ThreadOperation::Wait { thread_idx, queue } => {
                if let Some(thread) = pick(&threads, thread_idx) {
                    let _ = kernel.wait(thread, &queues[queue as usize]);
                }
            }
            ThreadOperation::Wake { queue, count } => {
                queues[queue as usize].wake_many(count as usize % 4);
            }
            ThreadOperation::Kill(idx) => {
                if let Some(thread) = pick(&threads, idx) {
                    let _ = kernel.kill(thread);
                }
            }
            ThreadOperation::Block(idx) => {
                if let Some(thread) = pick(&threads, idx) {
                    let _ = kernel.block(thread, false);
                }
            }
            ThreadOperation::Unblock(idx) => {
                if let Some(thread) = pick(&threads, idx) {
                    let _ = kernel.unblock(thread);
                }
            }
            ThreadOperation::Interrupt { cpu, elapsed } => {
                kernel.platform().set_current_cpu(cpu as usize % CPUS);
                kernel.handle_interrupt(|| kernel.platform().advance(elapsed as u64));
                kernel.platform().set_current_cpu(0);
            }
            ThreadOperation::Advance(ns) => kernel.platform().advance(ns as u64),
            ThreadOperation::Drain => {
                kernel.platform().drain_deferred();
            }
        }
        check_invariants(&kernel, &threads);
    }

    kernel.platform().drain_deferred();
    for thread in &threads {
        if thread.execution_state() == ExecutionState::Dead {
            assert!(!thread.has_stack(), "dead thread {} kept its stack", thread.id());
        }
    }
}

fn check_invariants(kernel: &Arc<Kernel<SimPlatform>>, threads: &[ThreadRef]) {
    let mut linked = kernel.suspended_len();
    for cpu in 0..CPUS {
        linked += kernel.run_queue_len(cpu);
    }
    assert_eq!(linked, kernel.registry().len());

    for thread in threads {
        match (thread.execution_state(), thread.queue()) {
            (ExecutionState::Dead, queue) => {
                assert_eq!(queue, None);
                assert!(!kernel.registry().contains(thread));
            }
            (ExecutionState::Suspended, queue) => assert_eq!(queue, Some(QueueId::Suspended)),
            (state, Some(QueueId::Cpu(cpu))) => {
                if state.is_executing() {
                    let current = kernel.current_on(cpu).unwrap();
                    assert!(Arc::ptr_eq(&current, thread), "thread {} executing off-cpu", thread.id());
                }
            }
            (state, queue) => panic!("thread {} is {:?} on {:?}", thread.id(), state, queue),
        }
    }
}
