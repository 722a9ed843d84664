use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::job::QueueJob;

enum Slot {
    Run(Arc<QueueJob>),
    Stop,
}

struct Fifo {
    items: VecDeque<Slot>,
    /// 已入队但尚未处理完的条目数，包括停止信号
    unfinished: usize,
}

struct Shared {
    fifo: Mutex<Fifo>,
    available: Condvar,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Fifo> {
        self.fifo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, slot: Slot) {
        let mut fifo = self.lock();
        fifo.items.push_back(slot);
        fifo.unfinished += 1;
        drop(fifo);
        self.available.notify_one();
    }

    fn pop(&self) -> Slot {
        let mut fifo = self.lock();
        loop {
            if let Some(slot) = fifo.items.pop_front() {
                return slot;
            }
            fifo = self
                .available
                .wait(fifo)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn task_done(&self) {
        let mut fifo = self.lock();
        fifo.unfinished = fifo.unfinished.saturating_sub(1);
        if fifo.unfinished == 0 {
            self.idle.notify_all();
        }
    }
}

/// 关闭工作池的统计结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// 发出的停止信号数量，等于关闭时仍存活的工作线程数
    pub sentinels: usize,
    /// 被丢弃的未开始作业数量
    pub drained: usize,
}

/// 固定数量工作线程共享一个先进先出队列
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn start(num_workers: usize) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            fifo: Mutex::new(Fifo {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let name = format!("worker-{index}");
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&name, &shared))?;
            workers.push(handle);
        }
        info!("工作池已启动, 工作线程数: {num_workers}");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    pub fn enqueue(&self, job: Arc<QueueJob>) {
        debug!(job_id = %job.id(), "作业进入工作队列");
        self.shared.push(Slot::Run(job));
    }

    pub fn alive_workers(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// 等待所有已入队条目处理完，超时返回 false
    pub fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        let mut fifo = self.shared.lock();
        while fifo.unfinished > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            fifo = self
                .shared
                .idle
                .wait_timeout(fifo, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// 丢弃未开始的作业，给每个存活线程一个停止信号并等待全部退出
    ///
    /// 阻塞调用，正在运行的作业会先执行完。
    pub fn shutdown(&self) -> DrainReport {
        let mut workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );

        let mut fifo = self.shared.lock();
        let drained = fifo
            .items
            .drain(..)
            .filter(|slot| matches!(slot, Slot::Run(_)))
            .count();
        fifo.unfinished = fifo.unfinished.saturating_sub(drained);
        let sentinels = workers.iter().filter(|h| !h.is_finished()).count();
        for _ in 0..sentinels {
            fifo.items.push_back(Slot::Stop);
            fifo.unfinished += 1;
        }
        drop(fifo);
        self.shared.available.notify_all();

        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("工作线程异常退出");
            }
        }
        info!(sentinels, drained, "工作池已关闭");
        DrainReport { sentinels, drained }
    }
}

fn worker_loop(name: &str, shared: &Shared) {
    debug!("{name} 开始处理作业");
    loop {
        match shared.pop() {
            Slot::Stop => {
                shared.task_done();
                break;
            }
            Slot::Run(job) => {
                debug!(worker = name, job_id = %job.id(), "开始执行作业");
                if catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
                    warn!(worker = name, job_id = %job.id(), "作业执行时发生panic");
                }
                shared.task_done();
            }
        }
    }
    debug!("{name} 已退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::Fixed;
    use crate::job::Runnable;
    use bioqueue_core::{JobStatus, ProcessOutput, SchedulerResult};
    use std::sync::mpsc;

    /// 阻塞直到测试放行
    struct Gate(Mutex<mpsc::Receiver<()>>);

    impl Runnable for Gate {
        fn run(&self) -> SchedulerResult<ProcessOutput> {
            let _ = self.0.lock().unwrap().recv();
            Ok(ProcessOutput {
                return_code: Some(0),
                ..Default::default()
            })
        }

        fn describe(&self) -> String {
            "gate".into()
        }
    }

    #[test]
    fn test_all_enqueued_jobs_complete() {
        let pool = WorkerPool::start(2).unwrap();
        let jobs: Vec<_> = (0..6)
            .map(|i| Arc::new(QueueJob::new(format!("job-{i}"), Box::new(Fixed(i)))))
            .collect();
        for job in &jobs {
            pool.enqueue(job.clone());
        }
        assert!(pool.wait_idle(Duration::from_secs(10)));
        for (i, job) in jobs.iter().enumerate() {
            assert!(job.is_finished());
            assert_eq!(job.result().unwrap().return_code, Some(i as i32));
        }

        let report = pool.shutdown();
        assert_eq!(report, DrainReport { sentinels: 2, drained: 0 });
        assert_eq!(pool.alive_workers(), 0);
    }

    #[test]
    fn test_shutdown_drains_queued_jobs() {
        let pool = WorkerPool::start(1).unwrap();
        let (release, gate) = mpsc::channel();
        let blocking = Arc::new(QueueJob::new("blocking", Box::new(Gate(Mutex::new(gate)))));
        pool.enqueue(blocking.clone());
        while blocking.status() != JobStatus::Running {
            thread::sleep(Duration::from_millis(5));
        }

        let waiting: Vec<_> = (0..3)
            .map(|i| Arc::new(QueueJob::new(format!("w{i}"), Box::new(Fixed(0)))))
            .collect();
        for job in &waiting {
            pool.enqueue(job.clone());
        }

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            release.send(()).unwrap();
        });
        let report = pool.shutdown();
        releaser.join().unwrap();

        assert_eq!(report, DrainReport { sentinels: 1, drained: 3 });
        assert_eq!(blocking.status(), JobStatus::Completed);
        assert!(waiting.iter().all(|job| job.status() == JobStatus::Queued));
    }

    #[test]
    fn test_sentinels_match_live_workers() {
        let pool = WorkerPool::start(3).unwrap();
        // 单独停掉一个线程
        pool.shared.push(Slot::Stop);
        assert!(pool.wait_idle(Duration::from_secs(5)));
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.alive_workers() != 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let report = pool.shutdown();
        assert_eq!(report.sentinels, 2);
    }
}
