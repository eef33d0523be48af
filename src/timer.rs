//! The 1-second sweep thread (spec.md §6): periodically drives
//! [`ForwardingEngine::tick`] so ARP retries and NAT idle timeouts fire even
//! when no packets are arriving. Modeled on the teacher's ksoftirqd
//! worker-loop-with-exit shape (`kernel/src/task/softirqd.rs`'s
//! `kthread_should_stop()` loop), adapted to a userspace `std::thread` with
//! an `AtomicBool` stop flag so tests can start and stop it deterministically
//! instead of parking/unparking a kernel thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::engine::ForwardingEngine;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the running sweep thread. Dropping this handle without calling
/// [`SweepThread::stop`] leaves the thread running; call `stop` for a clean
/// shutdown.
pub struct SweepThread {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SweepThread {
    /// Spawns the sweep thread, calling `engine.tick()` once a second.
    pub fn spawn(engine: Arc<ForwardingEngine>) -> Self {
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&should_stop);
        let handle = thread::Builder::new()
            .name("nat-sweep".into())
            .spawn(move || {
                log::info!("sweep thread started");
                while !stop_flag.load(Ordering::Acquire) {
                    thread::sleep(SWEEP_INTERVAL);
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    engine.tick();
                }
                log::info!("sweep thread stopped");
            })
            .expect("failed to spawn sweep thread");

        SweepThread { should_stop, handle: Some(handle) }
    }

    /// Signals the thread to stop and waits for it to exit.
    pub fn stop(mut self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SweepThread {
    fn drop(&mut self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::collab::{Interface, Route, StaticTables};
    use crate::config::Config;
    use std::net::Ipv4Addr;
    use std::sync::Mutex as StdMutex;

    struct NullLink {
        sent: StdMutex<u32>,
    }

    impl crate::collab::LinkLayer for NullLink {
        fn send_frame(&self, _interface: &str, _frame: &[u8]) {
            *self.sent.lock().unwrap() += 1;
        }
    }

    #[test]
    fn stop_joins_cleanly() {
        let interfaces = StaticTables::new(
            vec![Interface { name: "eth0", ip: Ipv4Addr::new(10, 0, 0, 1), mac: [1; 6] }],
            vec![Route {
                destination: Ipv4Addr::new(0, 0, 0, 0),
                mask: Ipv4Addr::new(0, 0, 0, 0),
                gateway: Ipv4Addr::new(10, 0, 0, 2),
                interface: "eth0",
            }],
        );
        let engine = Arc::new(ForwardingEngine::new(
            Config::default(),
            Arc::new(interfaces.clone()),
            Arc::new(interfaces),
            Arc::new(NullLink { sent: StdMutex::new(0) }),
            FakeClock::new(),
        ));

        let sweep = SweepThread::spawn(engine);
        thread::sleep(Duration::from_millis(50));
        sweep.stop();
    }
}
