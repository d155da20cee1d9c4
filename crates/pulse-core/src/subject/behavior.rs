use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{FlowError, hook};
use crate::protocol::{
    Flow, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};

/// 当前通知：值或终端标记，单格保存。
#[derive(Clone)]
enum Signal<T> {
    Item(T),
    Failed(FlowError),
    Finished,
}

struct SubjectState<T> {
    index: u64,
    current: Option<Signal<T>>,
}

struct SeatTable<T> {
    seats: Arc<Vec<Arc<Seat<T>>>>,
    terminated: bool,
}

/// 向迟到订阅者重放最新值的热源。
///
/// # 逻辑解析（How）
/// - **写路径**：`emit` 在写锁内原子地 (a) 递增单调 index、(b) 发布新
///   通知，随后对订阅者表快照逐席位调用 `emit_next(通知, index)`；
/// - **读路径**：`subscribe` 先登记席位，再在读锁下快照 `(index, 当前值)`
///   完成"首发射"——有值走快路径内联投递，竞争时转入席位私有积压；
/// - **席位发射**：`emit_next` 在快路径且快照 index 落后于事件 index 时
///   内联发射，否则入积压由快路径持有者排空（逐席位锁保证 I1）；
/// - **终端**：订阅者表原子切换到 TERMINATED 并清空；终端通知对每个
///   席位恰好一次，此后到达的订阅者在 `subscribe` 调用内同步收到终端。
pub struct BehaviorSubject<T> {
    weak: Weak<BehaviorSubject<T>>,
    state: RwLock<SubjectState<T>>,
    table: Mutex<SeatTable<T>>,
}

impl<T> BehaviorSubject<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 创建无初始值的实例。
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// 以初始值创建：首个订阅者立即看到该值。
    pub fn create_default(value: T) -> Arc<Self> {
        Self::build(Some(value))
    }

    fn build(value: Option<T>) -> Arc<Self> {
        Arc::new_cyclic(|weak| BehaviorSubject {
            weak: weak.clone(),
            state: RwLock::new(SubjectState {
                index: 0,
                current: value.map(Signal::Item),
            }),
            table: Mutex::new(SeatTable {
                seats: Arc::new(Vec::new()),
                terminated: false,
            }),
        })
    }

    /// 读取当前值（终端或未初始化时为 `None`）。
    pub fn value(&self) -> Option<T> {
        match &self.state.read().current {
            Some(Signal::Item(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// 是否已经终端。
    pub fn is_terminated(&self) -> bool {
        matches!(
            &self.state.read().current,
            Some(Signal::Failed(_)) | Some(Signal::Finished)
        )
    }

    /// 多播一个新值。
    pub fn emit(&self, value: T) {
        let (index, seats) = {
            let mut state = self.state.write();
            if matches!(
                state.current,
                Some(Signal::Failed(_)) | Some(Signal::Finished)
            ) {
                return;
            }
            state.index += 1;
            state.current = Some(Signal::Item(value.clone()));
            (state.index, self.table.lock().seats.clone())
        };
        for seat in seats.iter() {
            seat.emit_next(index, Signal::Item(value.clone()));
        }
    }

    /// 多播完成终端。
    pub fn finish(&self) {
        if let Some((index, seats)) = self.terminate(Signal::Finished) {
            for seat in seats.iter() {
                seat.emit_next(index, Signal::Finished);
            }
        }
    }

    /// 多播失败终端；重复终端的错误交全局钩子。
    pub fn fail(&self, error: FlowError) {
        match self.terminate(Signal::Failed(error.clone())) {
            Some((index, seats)) => {
                for seat in seats.iter() {
                    seat.emit_next(index, Signal::Failed(error.clone()));
                }
            }
            None => hook::report(error),
        }
    }

    fn terminate(&self, signal: Signal<T>) -> Option<(u64, Arc<Vec<Arc<Seat<T>>>>)> {
        let mut state = self.state.write();
        if matches!(
            state.current,
            Some(Signal::Failed(_)) | Some(Signal::Finished)
        ) {
            return None;
        }
        state.index += 1;
        state.current = Some(signal);
        let mut table = self.table.lock();
        table.terminated = true;
        let seats = table.seats.clone();
        table.seats = Arc::new(Vec::new());
        Some((state.index, seats))
    }

    fn remove_seat(&self, target: &Arc<Seat<T>>) {
        let mut table = self.table.lock();
        if table.terminated {
            return;
        }
        let filtered: Vec<Arc<Seat<T>>> = table
            .seats
            .iter()
            .filter(|seat| !Arc::ptr_eq(seat, target))
            .cloned()
            .collect();
        table.seats = Arc::new(filtered);
    }
}

impl<T> Flow<T> for BehaviorSubject<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<T>) {
        let seat = Arc::new(Seat {
            subject: self.weak.clone(),
            downstream: subscriber,
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            emission: Mutex::new(SeatEmission {
                got_first: false,
                emitting: false,
                seen_index: 0,
                backlog: VecDeque::new(),
            }),
        });
        seat.downstream
            .on_subscribe(Arc::clone(&seat) as SubscriptionRef);

        let registered = {
            let mut table = self.table.lock();
            if table.terminated {
                false
            } else {
                let mut seats = (*table.seats).clone();
                seats.push(Arc::clone(&seat));
                table.seats = Arc::new(seats);
                true
            }
        };

        if registered {
            seat.emit_first(self);
        } else {
            // 终端后到达：同步投递终端通知。
            let snapshot = self.state.read().current.clone();
            seat.emission.lock().got_first = true;
            match snapshot {
                Some(Signal::Failed(error)) => seat.deliver(Signal::Failed(error)),
                _ => seat.deliver(Signal::Finished),
            }
        }
    }
}

impl<T> Subscriber<T> for BehaviorSubject<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        subscription.request(demand::UNBOUNDED);
    }

    fn on_next(&self, item: T) {
        self.emit(item);
    }

    fn on_error(&self, error: FlowError) {
        self.fail(error);
    }

    fn on_complete(&self) {
        self.finish();
    }
}

struct SeatEmission<T> {
    got_first: bool,
    emitting: bool,
    seen_index: u64,
    backlog: VecDeque<(u64, Signal<T>)>,
}

/// 每订阅者席位：私有积压 + 快/慢路径发射状态。
struct Seat<T> {
    subject: Weak<BehaviorSubject<T>>,
    downstream: SubscriberRef<T>,
    requested: AtomicU64,
    cancelled: AtomicBool,
    emission: Mutex<SeatEmission<T>>,
}

impl<T> Seat<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 订阅时的首发射：快照 `(index, 当前值)` 并占据快路径。
    fn emit_first(self: &Arc<Self>, subject: &BehaviorSubject<T>) {
        let (index, snapshot) = {
            let state = subject.state.read();
            (state.index, state.current.clone())
        };
        let inline = {
            let mut emission = self.emission.lock();
            emission.got_first = true;
            emission.seen_index = index;
            match snapshot {
                None => {
                    emission.emitting = false;
                    None
                }
                Some(signal) => {
                    emission.emitting = true;
                    Some(signal)
                }
            }
        };
        if let Some(signal) = inline {
            self.deliver(signal);
            self.drain_backlog();
        }
    }

    /// 写路径的逐席位发射：快路径内联，竞争则入积压。
    fn emit_next(self: &Arc<Self>, index: u64, signal: Signal<T>) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let inline = {
            let mut emission = self.emission.lock();
            if !emission.got_first {
                emission.backlog.push_back((index, signal));
                return;
            }
            if index <= emission.seen_index {
                return;
            }
            if emission.emitting {
                emission.backlog.push_back((index, signal));
                return;
            }
            emission.emitting = true;
            emission.seen_index = index;
            signal
        };
        self.deliver(inline);
        self.drain_backlog();
    }

    fn drain_backlog(self: &Arc<Self>) {
        loop {
            let next = {
                let mut emission = self.emission.lock();
                loop {
                    match emission.backlog.pop_front() {
                        Some((index, signal)) if index > emission.seen_index => {
                            emission.seen_index = index;
                            break Some(signal);
                        }
                        Some(_) => continue,
                        None => {
                            emission.emitting = false;
                            break None;
                        }
                    }
                }
            };
            match next {
                Some(signal) => self.deliver(signal),
                None => return,
            }
        }
    }

    fn deliver(self: &Arc<Self>, signal: Signal<T>) {
        match signal {
            Signal::Item(value) => {
                if self.cancelled.load(Ordering::Acquire) {
                    return;
                }
                if self.requested.load(Ordering::Acquire) > 0 {
                    self.downstream.on_next(value);
                    demand::produced(&self.requested, 1);
                } else {
                    // 热源无法等待：零需求即背压违例。
                    self.detach();
                    self.downstream
                        .on_error(FlowError::missing_demand("behavior_subject"));
                }
            }
            Signal::Failed(error) => {
                if !self.cancelled.swap(true, Ordering::AcqRel) {
                    self.downstream.on_error(error);
                } else {
                    hook::report(error);
                }
            }
            Signal::Finished => {
                if !self.cancelled.swap(true, Ordering::AcqRel) {
                    self.downstream.on_complete();
                }
            }
        }
    }

    fn detach(self: &Arc<Self>) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(subject) = self.subject.upgrade() {
            subject.remove_seat(self);
        }
    }
}

impl<T> Subscription for Seat<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.requested, n);
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(subject) = self.subject.upgrade() {
            let mut table = subject.table.lock();
            if !table.terminated {
                let filtered: Vec<Arc<Seat<T>>> = table
                    .seats
                    .iter()
                    .filter(|seat| !std::ptr::eq(Arc::as_ptr(seat), self))
                    .cloned()
                    .collect();
                table.seats = Arc::new(filtered);
            }
        }
    }
}
