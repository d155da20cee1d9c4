use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{CompositeError, FlowError, hook};
use crate::fns::RowFn;
use crate::ops::DEFAULT_PREFETCH;
use crate::protocol::subscription::{SubscriptionSlot, TerminalOnce, complete_immediately};
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};
use crate::queue::{FusedQueue, MpscLinked};

/// N 路最新值组合。
///
/// # 逻辑解析（How）
/// - 单把 coordinator 锁覆盖整个合并步骤：覆写 `latest[i]`、维护
///   `active`/`completed` 计数、决定是否入队 `(源下标, 最新值快照)`；
/// - 某源首值之前的条目无法成行时，向该源补一个信用而不入队；
/// - 排水循环尊重下游需求，出队快照交给组合函数，发射后向快照来源
///   再请求一个；
/// - `delay_error` 为真时，已入队的快照先于聚合错误排空；为假时错误
///   短路一切。多源错误经复合错误聚合。
///
/// # 契约说明（What）
/// - 任一源不发一值即完成 → 结果流终止（组合不可能再成立）；
/// - 全部源终端且积压排空 → 结果流终端。
pub fn combine_latest<T, R>(
    sources: Vec<FlowRef<T>>,
    combiner: RowFn<T, R>,
    delay_error: bool,
) -> FlowRef<R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    Arc::new(CombineLatestFlow {
        sources,
        combiner,
        delay_error,
    })
}

struct CombineLatestFlow<T, R> {
    sources: Vec<FlowRef<T>>,
    combiner: RowFn<T, R>,
    delay_error: bool,
}

impl<T, R> Flow<R> for CombineLatestFlow<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<R>) {
        let arity = self.sources.len();
        if arity == 0 {
            complete_immediately(&subscriber);
            return;
        }
        let coordinator = Arc::new(CombineCoordinator {
            downstream: subscriber,
            combiner: Arc::clone(&self.combiner),
            delay_error: self.delay_error,
            slots: (0..arity).map(|_| Arc::new(SubscriptionSlot::new())).collect(),
            state: Mutex::new(CombineState {
                latest: vec![None; arity],
                active: 0,
                completed: 0,
                halted: false,
            }),
            rows: MpscLinked::new(),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            errors: Mutex::new(None),
            terminated: TerminalOnce::new(),
        });
        coordinator
            .downstream
            .on_subscribe(Arc::clone(&coordinator) as SubscriptionRef);
        for (index, source) in self.sources.iter().enumerate() {
            if coordinator.cancelled.load(Ordering::Acquire)
                || coordinator.terminated.is_terminated()
            {
                return;
            }
            source.subscribe(Arc::new(CombineInner {
                index,
                parent: Arc::clone(&coordinator),
            }));
        }
    }
}

struct CombineState<T> {
    latest: Vec<Option<T>>,
    active: usize,
    completed: usize,
    halted: bool,
}

struct CombineCoordinator<T, R> {
    downstream: SubscriberRef<R>,
    combiner: RowFn<T, R>,
    delay_error: bool,
    slots: Vec<Arc<SubscriptionSlot>>,
    state: Mutex<CombineState<T>>,
    rows: MpscLinked<(usize, Vec<T>)>,
    requested: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    done: AtomicBool,
    errors: Mutex<Option<CompositeError>>,
    terminated: TerminalOnce,
}

impl<T, R> CombineCoordinator<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    fn cancel_all(&self) {
        for slot in &self.slots {
            Subscription::cancel(slot.as_ref());
        }
    }

    fn record_error(&self, error: FlowError) {
        let mut errors = self.errors.lock();
        match errors.as_mut() {
            Some(composite) => composite.suppress(error),
            None => *errors = Some(CompositeError::new([error])),
        }
    }

    fn take_error(&self) -> Option<FlowError> {
        self.errors.lock().take().map(|composite| {
            if composite.len() == 1 {
                composite.errors()[0].clone()
            } else {
                composite.into()
            }
        })
    }

    fn inner_next(&self, index: usize, value: T) {
        let row = {
            let mut state = self.state.lock();
            if state.halted {
                return;
            }
            if state.latest[index].is_none() {
                state.active += 1;
            }
            state.latest[index] = Some(value);
            if state.active == state.latest.len() {
                Some(
                    state
                        .latest
                        .iter()
                        .map(|slot| slot.as_ref().cloned().expect("active == arity"))
                        .collect::<Vec<T>>(),
                )
            } else {
                None
            }
        };
        match row {
            Some(snapshot) => {
                self.rows.push((index, snapshot));
                self.drain();
            }
            None => {
                // 尚未成行：该条目被覆写语义消费掉，向源头补一个信用。
                Subscription::request(self.slots[index].as_ref(), 1);
            }
        }
    }

    fn inner_complete(&self, index: usize) {
        let outcome = {
            let mut state = self.state.lock();
            if state.halted {
                return;
            }
            if state.latest[index].is_none() {
                // 该源永远无法参与组合，结果流就此定局。
                state.halted = true;
                CompleteOutcome::NoMoreCombinations
            } else {
                state.completed += 1;
                if state.completed == state.latest.len() {
                    state.halted = true;
                    CompleteOutcome::AllDone
                } else {
                    CompleteOutcome::Continue
                }
            }
        };
        match outcome {
            CompleteOutcome::Continue => {}
            CompleteOutcome::NoMoreCombinations | CompleteOutcome::AllDone => {
                self.done.store(true, Ordering::Release);
                self.cancel_all();
                self.drain();
            }
        }
    }

    fn inner_error(&self, index: usize, error: FlowError) {
        if self.terminated.is_terminated() {
            hook::report(error);
            return;
        }
        self.record_error(error);
        if self.delay_error {
            // 记账后按"该源终端"继续走完成协议，错误延后聚合投递。
            self.inner_complete(index);
        } else {
            self.done.store(true, Ordering::Release);
            self.cancel_all();
            self.drain();
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1usize;
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                self.rows.clear();
            } else {
                self.drain_round();
            }
            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                return;
            }
            missed = remaining;
        }
    }

    fn drain_round(&self) {
        // 立即错误模式：错误短路一切积压。
        if !self.delay_error {
            if let Some(error) = self.take_error() {
                self.rows.clear();
                self.cancel_all();
                if self.terminated.try_terminate() {
                    self.downstream.on_error(error);
                } else {
                    hook::report(error);
                }
                return;
            }
        }

        while self.requested.load(Ordering::Acquire) > 0 {
            if self.terminated.is_terminated() {
                return;
            }
            let Some((origin, row)) = self.rows.poll() else {
                break;
            };
            match (self.combiner)(&row) {
                Ok(combined) => {
                    self.downstream.on_next(combined);
                    demand::produced(&self.requested, 1);
                    Subscription::request(self.slots[origin].as_ref(), 1);
                }
                Err(error) => {
                    self.cancel_all();
                    self.rows.clear();
                    if self.terminated.try_terminate() {
                        self.downstream.on_error(error);
                    } else {
                        hook::report(error);
                    }
                    return;
                }
            }
        }

        if self.done.load(Ordering::Acquire)
            && self.rows.is_empty()
            && self.terminated.try_terminate()
        {
            match self.take_error() {
                Some(error) => self.downstream.on_error(error),
                None => self.downstream.on_complete(),
            }
        }
    }
}

enum CompleteOutcome {
    Continue,
    NoMoreCombinations,
    AllDone,
}

impl<T, R> Subscription for CombineCoordinator<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.cancel_all();
            self.drain();
        }
    }
}

struct CombineInner<T, R> {
    index: usize,
    parent: Arc<CombineCoordinator<T, R>>,
}

impl<T, R> Subscriber<T> for CombineInner<T, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.parent.slots[self.index].install(subscription) {
            Subscription::request(
                self.parent.slots[self.index].as_ref(),
                DEFAULT_PREFETCH as u64,
            );
        }
    }

    fn on_next(&self, item: T) {
        self.parent.inner_next(self.index, item);
    }

    fn on_error(&self, error: FlowError) {
        self.parent.inner_error(self.index, error);
    }

    fn on_complete(&self) {
        self.parent.inner_complete(self.index);
    }
}
