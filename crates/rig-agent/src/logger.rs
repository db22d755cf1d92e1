//! Task log producer: mirrors lines to `tracing`, buffers them for the controller and feeds the
//! idle watchdog.
use std::{mem, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::Notify, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use rig_core::{CommError, Communicator, LoggerProducer, TracingLogger};
use rig_model::{LogMessage, LogSeverity, LogStream, TaskData};

use crate::timeout::ActivityClock;

/// Most messages kept while the controller is not accepting them; older ones are dropped.
pub const DEFAULT_MAX_BUFFERED: usize = 50_000;
/// Pending messages that wake the background flusher early.
pub const DEFAULT_FLUSH_AT: usize = 1_000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Buffer {
    messages: Vec<LogMessage>,
    dropped: usize,
}

impl Buffer {
    /// Drop the oldest messages beyond `max`.
    fn trim(&mut self, max: usize) {
        if self.messages.len() > max {
            let excess = self.messages.len() - max;
            self.messages.drain(..excess);
            self.dropped += excess;
        }
    }
}

pub struct TaskLogger {
    comm: Arc<dyn Communicator>,
    task: TaskData,
    local: TracingLogger,
    activity: Arc<ActivityClock>,
    buffer: Mutex<Buffer>,
    max_buffered: usize,
    flush_at: usize,
    flush_interval: Duration,
    wake: Notify,
    sending: tokio::sync::Mutex<()>,
}

impl TaskLogger {
    pub fn new(comm: Arc<dyn Communicator>, task: TaskData, activity: Arc<ActivityClock>) -> Self {
        Self {
            local: TracingLogger::new(&task.id),
            comm,
            task,
            activity,
            buffer: Mutex::new(Buffer::default()),
            max_buffered: DEFAULT_MAX_BUFFERED,
            flush_at: DEFAULT_FLUSH_AT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            wake: Notify::new(),
            sending: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = max.max(1);
        self.flush_at = self.flush_at.min(self.max_buffered);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().messages.len()
    }

    /// Messages dropped because the buffer was full and not yet reported.
    pub fn dropped(&self) -> usize {
        self.buffer.lock().dropped
    }

    /// Send buffered messages to the controller.
    ///
    /// On failure the messages are put back in front of anything logged meanwhile, within the
    /// buffer limit.
    pub async fn send(&self) -> Result<(), CommError> {
        let _sending = self.sending.lock().await;
        let batch = mem::take(&mut self.buffer.lock().messages);
        if batch.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.comm.send_log_messages(&self.task, &batch).await {
            let mut buffer = self.buffer.lock();
            let newer = mem::replace(&mut buffer.messages, batch);
            buffer.messages.extend(newer);
            buffer.trim(self.max_buffered);
            return Err(e);
        }

        let dropped = mem::take(&mut self.buffer.lock().dropped);
        if dropped > 0 {
            warn!(task_id = %self.task.id, dropped, "task log buffer overflowed; oldest lines were dropped");
        }
        Ok(())
    }

    /// [`send`](TaskLogger::send), logging instead of returning a failure.
    pub async fn send_or_warn(&self) {
        if let Err(e) = self.send().await {
            warn!(task_id = %self.task.id, pending = self.pending(), error = %e, "sending task logs failed");
        }
    }

    /// Flush every `flush_interval`, or sooner once enough lines are pending, until `done`.
    pub fn spawn_flusher(self: &Arc<Self>, done: CancellationToken) -> JoinHandle<()> {
        let logger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(logger.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = done.cancelled() => return,
                    _ = ticker.tick() => {}
                    _ = logger.wake.notified() => {}
                }
                logger.send_or_warn().await;
            }
        })
    }
}

impl LoggerProducer for TaskLogger {
    fn emit(&self, stream: LogStream, severity: LogSeverity, message: &str) {
        if stream == LogStream::Task {
            self.activity.touch();
        }
        self.local.emit(stream, severity, message);

        let pending = {
            let mut buffer = self.buffer.lock();
            buffer.messages.push(LogMessage::now(stream, severity, message));
            buffer.trim(self.max_buffered);
            buffer.messages.len()
        };
        if pending >= self.flush_at {
            self.wake.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use rig_core::mock::MockCommunicator;

    use super::*;

    #[tokio::test]
    async fn buffers_until_sent() {
        let comm = Arc::new(MockCommunicator::new());
        let logger = TaskLogger::new(comm.clone(), TaskData::new("t1", "s"), Arc::default());
        let producer: &dyn LoggerProducer = &logger;

        producer.execution().info("starting");
        producer.task().info("output");
        assert_eq!(logger.pending(), 2);
        assert!(comm.logs().is_empty());

        logger.send().await.unwrap();
        assert_eq!(logger.pending(), 0);
        let sent = comm.logs();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].stream, LogStream::Task);
        assert_eq!(sent[1].message, "output");
    }

    #[tokio::test]
    async fn task_output_resets_idle_clock() {
        let clock = Arc::new(ActivityClock::new());
        let logger = TaskLogger::new(
            Arc::new(MockCommunicator::new()),
            TaskData::default(),
            clock.clone(),
        );
        let producer: &dyn LoggerProducer = &logger;

        tokio::time::sleep(Duration::from_millis(40)).await;
        producer.execution().info("agent chatter");
        assert!(clock.idle_for() >= Duration::from_millis(40));

        producer.task().info("command output");
        assert!(clock.idle_for() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn failed_send_keeps_order() {
        let comm = Arc::new(MockCommunicator::new());
        let logger = TaskLogger::new(comm.clone(), TaskData::default(), Arc::default());
        let producer: &dyn LoggerProducer = &logger;

        comm.should_fail_logs.store(true, Ordering::SeqCst);
        producer.task().info("one");
        producer.task().info("two");
        assert!(logger.send().await.is_err());
        producer.task().info("three");
        assert_eq!(logger.pending(), 3);

        comm.should_fail_logs.store(false, Ordering::SeqCst);
        logger.send_or_warn().await;

        let lines: Vec<_> = comm.logs().into_iter().map(|m| m.message).collect();
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn full_buffer_drops_oldest_lines() {
        let comm = Arc::new(MockCommunicator::new());
        let logger = TaskLogger::new(comm.clone(), TaskData::default(), Arc::default())
            .with_max_buffered(3);
        let producer: &dyn LoggerProducer = &logger;

        comm.should_fail_logs.store(true, Ordering::SeqCst);
        for i in 0..5 {
            producer.task().info(format!("line {i}"));
        }
        assert!(logger.send().await.is_err());
        producer.task().info("line 5");
        assert_eq!(logger.pending(), 3);
        assert_eq!(logger.dropped(), 3);

        comm.should_fail_logs.store(false, Ordering::SeqCst);
        logger.send().await.unwrap();
        assert_eq!(logger.dropped(), 0);
        let lines: Vec<_> = comm.logs().into_iter().map(|m| m.message).collect();
        assert_eq!(lines, vec!["line 3", "line 4", "line 5"]);
    }

    #[tokio::test]
    async fn flusher_sends_while_running() {
        let comm = Arc::new(MockCommunicator::new());
        let logger = Arc::new(
            TaskLogger::new(comm.clone(), TaskData::default(), Arc::default())
                .with_flush_interval(Duration::from_millis(20)),
        );
        let done = CancellationToken::new();
        let flusher = logger.spawn_flusher(done.clone());

        let producer: &dyn LoggerProducer = logger.as_ref();
        producer.task().info("streamed");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(comm.logs().len(), 1);
        assert_eq!(logger.pending(), 0);

        done.cancel();
        flusher.await.unwrap();
    }

    #[tokio::test]
    async fn flusher_wakes_on_backlog() {
        let comm = Arc::new(MockCommunicator::new());
        let logger = Arc::new(
            TaskLogger::new(comm.clone(), TaskData::default(), Arc::default())
                .with_flush_interval(Duration::from_secs(3600))
                .with_max_buffered(10),
        );
        let done = CancellationToken::new();
        let flusher = logger.spawn_flusher(done.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let producer: &dyn LoggerProducer = logger.as_ref();
        for i in 0..10 {
            producer.task().info(format!("line {i}"));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(comm.logs().len(), 10);

        done.cancel();
        flusher.await.unwrap();
    }
}
