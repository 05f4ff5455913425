//! 任务调度：Background / User / Context 三条通道
//!
//! - Background：后台工作，不阻塞任何用户确认；Semaphore 限制并发
//! - User：用户显式触发的动作；活跃数量通过 watch 通道暴露（外部据此启用/禁用按钮）
//! - Context：单 worker 串行执行，独占 ContextHistory；job 跑在阻塞线程池上，每次执行后把当前 Context 发布到 watch 通道
//!
//! 每次提交返回 TaskHandle，可 join 取结果或 cancel。Background / User 任务取消即 drop 其 future。

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::{Context, ContextHistory};
use crate::core::AgentError;
use crate::react::{AgentEvent, EventSink};

/// 通道类型
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Lane {
    Background,
    User,
    Context,
}

type ContextJob = Box<dyn FnOnce(&mut ContextHistory, &watch::Sender<Arc<Context>>) + Send>;

/// 已提交任务的句柄
pub struct TaskHandle<T> {
    name: String,
    lane: Lane,
    cancel: CancellationToken,
    inner: HandleInner<T>,
}

enum HandleInner<T> {
    Spawned(JoinHandle<Result<T, AgentError>>),
    Queued(oneshot::Receiver<Result<T, AgentError>>),
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// 取消任务；已完成的任务不受影响
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        match &self.inner {
            HandleInner::Spawned(h) => h.is_finished(),
            HandleInner::Queued(_) => false,
        }
    }

    /// 等待结果
    pub async fn join(self) -> Result<T, AgentError> {
        match self.inner {
            HandleInner::Spawned(handle) => match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(AgentError::Cancelled),
                Err(e) => Err(AgentError::TaskPanicked {
                    task: self.name,
                    message: panic_message(e.into_panic()),
                }),
            },
            HandleInner::Queued(rx) => rx.await.unwrap_or(Err(AgentError::SchedulerClosed)),
        }
    }
}

/// drop 时取消所持有的全部任务，除非已 disarm
pub(crate) struct CancelOnDrop {
    tokens: Vec<CancellationToken>,
    armed: bool,
}

impl CancelOnDrop {
    pub(crate) fn new(tokens: Vec<CancellationToken>) -> Self {
        Self {
            tokens,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            for token in &self.tokens {
                token.cancel();
            }
        }
    }
}

/// 结构化等待两个任务：任一失败立即返回并取消另一个；外层 future 被 drop（外层任务被中断）时取消两者
pub async fn join_both<A, B>(a: TaskHandle<A>, b: TaskHandle<B>) -> Result<(A, B), AgentError> {
    let mut guard = CancelOnDrop::new(vec![a.cancel_token(), b.cancel_token()]);
    let result = tokio::try_join!(a.join(), b.join());
    if result.is_ok() {
        guard.disarm();
    }
    result
}

struct SchedulerInner {
    background_permits: Arc<Semaphore>,
    user_active: watch::Sender<usize>,
    context_tx: mpsc::UnboundedSender<ContextJob>,
    current_rx: watch::Receiver<Arc<Context>>,
    shutdown: CancellationToken,
}

/// 多通道任务调度器（可克隆，共享同一组 worker）
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    /// 创建调度器并启动 context worker；必须在 tokio 运行时内调用
    pub fn new(history: ContextHistory, max_background_tasks: usize) -> Self {
        let (context_tx, context_rx) = mpsc::unbounded_channel::<ContextJob>();
        let (current_tx, current_rx) = watch::channel(history.current().clone());
        let (user_active, _) = watch::channel(0usize);
        let shutdown = CancellationToken::new();

        tokio::spawn(context_worker(history, context_rx, current_tx, shutdown.clone()));

        Self {
            inner: Arc::new(SchedulerInner {
                background_permits: Arc::new(Semaphore::new(max_background_tasks.max(1))),
                user_active,
                context_tx,
                current_rx,
                shutdown,
            }),
        }
    }

    /// 后台通道
    pub fn submit_background<T, F>(&self, name: impl Into<String>, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, AgentError>> + Send + 'static,
    {
        let permits = self.inner.background_permits.clone();
        self.spawn(name.into(), Lane::Background, async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| AgentError::SchedulerClosed)?;
            work.await
        })
    }

    /// 用户通道
    pub fn submit_user<T, F>(&self, name: impl Into<String>, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, AgentError>> + Send + 'static,
    {
        let active = UserActiveGuard::enter(self.inner.user_active.clone());
        self.spawn(name.into(), Lane::User, async move {
            let _active = active;
            work.await
        })
    }

    /// Context 通道：在 worker 上串行执行，独占 ContextHistory
    pub fn submit_context<T, F>(&self, name: impl Into<String>, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ContextHistory) -> T + Send + 'static,
    {
        let name = name.into();
        let cancel = self.inner.shutdown.child_token();
        let (tx, rx) = oneshot::channel();
        let job_cancel = cancel.clone();
        let job_name = name.clone();
        let job: ContextJob = Box::new(move |history, current_tx| {
            if job_cancel.is_cancelled() {
                let _ = tx.send(Err(AgentError::Cancelled));
                return;
            }
            tracing::debug!(task = %job_name, "context task");
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| work(history)))
                .map_err(|payload| AgentError::TaskPanicked {
                    task: job_name.clone(),
                    message: panic_message(payload),
                });
            if let Err(e) = &result {
                tracing::error!(task = %job_name, error = %e, "context task failed");
            }
            // 先发布再回复：join 返回后 current_context() 已是新状态
            publish_current(&*history, current_tx);
            let _ = tx.send(result);
        });
        if let Err(mpsc::error::SendError(job)) = self.inner.context_tx.send(job) {
            // worker 已退出：job 内的 sender 随 drop 关闭，join 得到 SchedulerClosed
            drop(job);
            tracing::warn!(task = %name, "context worker closed");
        }
        TaskHandle {
            name,
            lane: Lane::Context,
            cancel,
            inner: HandleInner::Queued(rx),
        }
    }

    /// 经 context 通道由当前 Context 派生新快照并 push，返回当前 Context 与派生附带的结果。
    /// 派生结果与当前相同（同 id）时不入栈；实际入栈时发出 ContextPushed。
    /// deadline 在 job 开始前已取消时不派生，返回 Cancelled
    pub async fn push_derived<T, F>(
        &self,
        name: &str,
        events: &EventSink,
        deadline: Option<CancellationToken>,
        derive: F,
    ) -> Result<(Arc<Context>, T), AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&Context) -> (Context, T) + Send + 'static,
    {
        let handle = self.submit_context(name, move |history| {
            if deadline.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return None;
            }
            let (next, extra) = derive(history.current().as_ref());
            let pushed = history.push_if_changed(next);
            Some((pushed, history.current().clone(), extra))
        });
        let Some((pushed, current, extra)) = handle.join().await? else {
            tracing::debug!(task = %name, "push skipped after deadline");
            return Err(AgentError::Cancelled);
        };
        if pushed {
            events.emit(AgentEvent::ContextPushed {
                context_id: current.id().to_string(),
                action: current.action().to_string(),
            });
        }
        Ok((current, extra))
    }

    /// 当前 Context（最近一次 context 任务完成后的状态）
    pub fn current_context(&self) -> Arc<Context> {
        self.inner.current_rx.borrow().clone()
    }

    /// 订阅当前 Context 的变化（UI、git 集成等观察者）
    pub fn subscribe(&self) -> watch::Receiver<Arc<Context>> {
        self.inner.current_rx.clone()
    }

    /// 订阅活跃的用户任务数
    pub fn subscribe_user_active(&self) -> watch::Receiver<usize> {
        self.inner.user_active.subscribe()
    }

    pub fn user_tasks_active(&self) -> usize {
        *self.inner.user_active.borrow()
    }

    /// 关闭调度器：取消排队中的 context 任务与全部后台 / 用户任务，并关闭 Semaphore
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.background_permits.close();
    }

    fn spawn<T, F>(&self, name: String, lane: Lane, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, AgentError>> + Send + 'static,
    {
        let cancel = self.inner.shutdown.child_token();
        let token = cancel.clone();
        let task_name = name.clone();
        tracing::debug!(task = %name, ?lane, "submit task");
        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(AgentError::Cancelled),
                r = work => r,
            };
            match &result {
                Ok(_) | Err(AgentError::Cancelled) => {}
                Err(e) => tracing::warn!(task = %task_name, ?lane, error = %e, "task failed"),
            }
            result
        });
        TaskHandle {
            name,
            lane,
            cancel,
            inner: HandleInner::Spawned(handle),
        }
    }
}

/// 用户任务计数：创建时 +1，drop 时 -1
struct UserActiveGuard {
    counter: watch::Sender<usize>,
}

impl UserActiveGuard {
    fn enter(counter: watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self { counter }
    }
}

impl Drop for UserActiveGuard {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// 每个 job 在阻塞线程池上执行（job 内可能写回磁盘文件），worker 等待其完成后再取下一个
async fn context_worker(
    mut history: ContextHistory,
    mut rx: mpsc::UnboundedReceiver<ContextJob>,
    mut current_tx: watch::Sender<Arc<Context>>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let ran = tokio::task::spawn_blocking(move || {
            job(&mut history, &current_tx);
            (history, current_tx)
        })
        .await;
        match ran {
            Ok((h, tx)) => {
                history = h;
                current_tx = tx;
            }
            Err(e) => {
                tracing::error!(error = %e, "context worker lost its history");
                break;
            }
        }
    }
    tracing::debug!("context worker stopped");
}

fn publish_current(history: &ContextHistory, current_tx: &watch::Sender<Arc<Context>>) {
    let current = history.current().clone();
    current_tx.send_if_modified(|published| {
        if published.id() == current.id() {
            false
        } else {
            *published = current;
            true
        }
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Plan;
    use std::time::Duration;

    #[tokio::test]
    async fn test_context_lane_serializes_and_publishes() {
        let scheduler = TaskScheduler::new(ContextHistory::default(), 2);
        let mut rx = scheduler.subscribe();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                scheduler.submit_context(format!("push {i}"), move |h| {
                    let next = h.current().with_plan(Plan::new(format!("plan {i}")));
                    h.push(next);
                    h.len()
                })
            })
            .collect();
        let mut lens = Vec::new();
        for h in handles {
            lens.push(h.join().await.unwrap());
        }
        // FIFO：第 i 个任务看到 i+2 个快照
        assert_eq!(lens, (2..12).collect::<Vec<_>>());

        rx.changed().await.unwrap();
        assert_eq!(
            scheduler.current_context().plan().map(Plan::text),
            Some("plan 9")
        );
    }

    #[tokio::test]
    async fn test_background_cancel() {
        let scheduler = TaskScheduler::new(ContextHistory::default(), 1);
        let handle = scheduler.submit_background("sleepy", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(1)
        });
        handle.cancel();
        assert!(matches!(handle.join().await, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn test_user_active_counter() {
        let scheduler = TaskScheduler::new(ContextHistory::default(), 1);
        let (tx, rx) = oneshot::channel::<()>();
        let handle = scheduler.submit_user("wait", async move {
            let _ = rx.await;
            Ok(())
        });
        assert_eq!(scheduler.user_tasks_active(), 1);
        let _ = tx.send(());
        handle.join().await.unwrap();
        assert_eq!(scheduler.user_tasks_active(), 0);
    }

    #[tokio::test]
    async fn test_join_both_cancels_sibling_on_failure() {
        let scheduler = TaskScheduler::new(ContextHistory::default(), 4);
        let slow = scheduler.submit_background("slow", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(1)
        });
        let slow_token = slow.cancel_token();
        let failing = scheduler.submit_background::<u32, _>("failing", async {
            Err(AgentError::Io("disk gone".to_string()))
        });
        let result = join_both(slow, failing).await;
        assert!(matches!(result, Err(AgentError::Io(_))));
        assert!(slow_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_push_derived_emits_only_on_change() {
        let scheduler = TaskScheduler::new(ContextHistory::default(), 1);
        let (events, mut rx) = EventSink::channel();

        let (current, n) = scheduler
            .push_derived("Update plan", &events, None, |c| (c.with_plan(Plan::new("p")), 7))
            .await
            .unwrap();
        assert_eq!(n, 7);
        assert_eq!(current.action(), "Update plan");
        assert!(matches!(rx.try_recv(), Ok(AgentEvent::ContextPushed { .. })));

        let (same, ()) = scheduler
            .push_derived("noop", &events, None, |c| (c.clone(), ()))
            .await
            .unwrap();
        assert_eq!(same.id(), current.id());
        assert!(rx.try_recv().is_err());

        let expired = CancellationToken::new();
        expired.cancel();
        let skipped = scheduler
            .push_derived("late", &events, Some(expired), |c| (c.with_plan(Plan::new("late")), ()))
            .await;
        assert!(matches!(skipped, Err(AgentError::Cancelled)));
        let len = scheduler.submit_context("len", |h| h.len()).join().await.unwrap();
        assert_eq!(len, 2);
    }

    #[tokio::test]
    async fn test_context_panic_is_reported() {
        let scheduler = TaskScheduler::new(ContextHistory::default(), 1);
        let handle = scheduler.submit_context("boom", |_h| -> usize { panic!("boom") });
        assert!(matches!(
            handle.join().await,
            Err(AgentError::TaskPanicked { .. })
        ));
        // worker 仍可继续工作
        let len = scheduler.submit_context("len", |h| h.len()).join().await.unwrap();
        assert_eq!(len, 1);
    }
}
