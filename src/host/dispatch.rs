use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere to run work asynchronously, in submission order.
pub trait Dispatcher: Send + Sync {
    fn call_async(&self, job: Job);
}

/// Runs every job on the calling thread before returning.
pub struct CurrentThread;

impl Dispatcher for CurrentThread {
    fn call_async(&self, job: Job) {
        job();
    }
}

/// A named thread draining a job channel one job at a time.
///
/// The processor uses one as its message thread and the editor uses one as
/// its load queue. Dropping the queue lets already queued jobs finish.
pub struct JobQueue {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    delay: Duration,
}

impl JobQueue {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        Self::spawn_with_delay(name, Duration::ZERO)
    }

    /// Every job sleeps `delay` before it runs.
    pub fn spawn_with_delay(name: &str, delay: Duration) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    job();
                }
            })?;
        Ok(Self {
            name: name.to_string(),
            worker_id: worker.thread().id(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            delay,
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn add_job<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.call_async(Box::new(job));
    }
}

impl Dispatcher for JobQueue {
    fn call_async(&self, job: Job) {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match sender {
            Some(sender) => {
                if sender.send(job).is_err() {
                    log::error!("Job queue '{}' has stopped; job dropped", self.name);
                }
            }
            None => log::warn!("Job queue '{}' is shutting down; job dropped", self.name),
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            // Dropped from one of its own jobs: the thread exits on its own.
            if thread::current().id() == self.worker_id {
                return;
            }
            if worker.join().is_err() {
                log::error!("Job queue '{}' worker panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn runs_jobs_in_order_on_one_thread() {
        let queue = JobQueue::spawn("test-queue").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            queue.add_job(move || {
                seen.lock()
                    .unwrap()
                    .push((i, thread::current().name().map(str::to_string)));
            });
        }
        drop(queue);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        for (i, (n, name)) in seen.iter().enumerate() {
            assert_eq!(*n, i);
            assert_eq!(name.as_deref(), Some("test-queue"));
        }
    }

    #[test]
    fn current_thread_runs_inline() {
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        CurrentThread.call_async(Box::new(move || *flag.lock().unwrap() = true));
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn delay_is_applied_before_each_job() {
        let queue = JobQueue::spawn_with_delay("delayed", Duration::from_millis(5)).unwrap();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        queue.add_job(move || tx.send(Instant::now()).unwrap());
        let ran_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ran_at.duration_since(start) >= Duration::from_millis(5));
    }
}
