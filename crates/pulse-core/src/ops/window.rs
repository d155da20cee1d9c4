use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{FlowError, hook};
use crate::protocol::subscription::{SubscriptionSlot, TerminalOnce};
use crate::protocol::{
    Flow, FlowRef, Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand,
};
use crate::queue::{FusedQueue, MpscLinked};
use crate::subject::UnicastSubject;

/// 边界切窗：条目进入当前窗口，边界流每发一个信号就关闭当前窗口并
/// 开启新窗口。
///
/// # 逻辑解析（How）
/// - 上游条目与边界信号汇入同一条 MPSC 链式队列，由 missed-counter
///   排水循环串行消化（外沿的串行化保证）；
/// - 窗口体是 [`UnicastSubject`]；开窗消耗一个下游需求，零需求时以
///   背压违例终止；
/// - 活动窗口计数从 1 起步（外层自身占一个名额）：外层取消与每个窗口
///   的终结各扣一，归零才真正撤销上游与边界订阅——已交付的窗口在外层
///   取消后仍可排空自己的积压。
pub fn window_boundary<T, B>(source: FlowRef<T>, boundary: FlowRef<B>) -> FlowRef<FlowRef<T>>
where
    T: Send + 'static,
    B: Send + 'static,
{
    Arc::new(WindowBoundaryFlow { source, boundary })
}

struct WindowBoundaryFlow<T, B> {
    source: FlowRef<T>,
    boundary: FlowRef<B>,
}

impl<T, B> Flow<FlowRef<T>> for WindowBoundaryFlow<T, B>
where
    T: Send + 'static,
    B: Send + 'static,
{
    fn subscribe(&self, subscriber: SubscriberRef<FlowRef<T>>) {
        let main = Arc::new_cyclic(|weak: &Weak<WindowMain<T>>| WindowMain {
            weak: weak.clone(),
            downstream: subscriber,
            signals: MpscLinked::new(),
            wip: AtomicUsize::new(0),
            requested: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            upstream_done: AtomicBool::new(false),
            error: Mutex::new(None),
            terminated: TerminalOnce::new(),
            window_count: AtomicUsize::new(1),
            outer_slot_released: AtomicBool::new(false),
            current: Mutex::new(None),
            upstream: Arc::new(SubscriptionSlot::new()),
            boundary_slot: Arc::new(SubscriptionSlot::new()),
        });
        main.downstream
            .on_subscribe(Arc::clone(&main) as SubscriptionRef);
        self.boundary.subscribe(Arc::new(WindowBoundarySubscriber::<T, B> {
            main: Arc::clone(&main),
            _marker: std::marker::PhantomData,
        }));
        self.source.subscribe(main);
    }
}

enum WindowSignal<T> {
    Item(T),
    Tick,
}

struct WindowMain<T> {
    weak: Weak<WindowMain<T>>,
    downstream: SubscriberRef<FlowRef<T>>,
    signals: MpscLinked<WindowSignal<T>>,
    wip: AtomicUsize,
    requested: AtomicU64,
    cancelled: AtomicBool,
    upstream_done: AtomicBool,
    error: Mutex<Option<FlowError>>,
    terminated: TerminalOnce,
    window_count: AtomicUsize,
    outer_slot_released: AtomicBool,
    current: Mutex<Option<Arc<UnicastSubject<T>>>>,
    upstream: Arc<SubscriptionSlot>,
    boundary_slot: Arc<SubscriptionSlot>,
}

impl<T: Send + 'static> WindowMain<T> {
    /// 窗口名额扣减；归零即撤销两路订阅。
    fn release_window_slot(&self) {
        if self.window_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            Subscription::cancel(self.upstream.as_ref());
            Subscription::cancel(self.boundary_slot.as_ref());
        }
    }

    /// 外层自身的名额只释放一次（终端与取消可能先后到达）。
    fn release_outer_slot(&self) {
        if !self.outer_slot_released.swap(true, Ordering::AcqRel) {
            self.release_window_slot();
        }
    }

    fn signal_error(&self, error: FlowError) {
        if self.terminated.is_terminated() {
            hook::report(error);
            return;
        }
        *self.error.lock() = Some(error);
        self.upstream_done.store(true, Ordering::Release);
        self.drain();
    }

    fn signal_done(&self) {
        self.upstream_done.store(true, Ordering::Release);
        self.drain();
    }

    fn open_window(&self) -> Option<Arc<UnicastSubject<T>>> {
        let weak = self.weak.clone();
        let window = UnicastSubject::with_terminate_action(Some(Arc::new(move || {
            if let Some(main) = weak.upgrade() {
                main.release_window_slot();
            }
        })));
        self.window_count.fetch_add(1, Ordering::AcqRel);
        *self.current.lock() = Some(Arc::clone(&window));
        Some(window)
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1usize;
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                self.signals.clear();
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
        // 首窗：有需求才开。
        if self.current.lock().is_none()
            && !self.upstream_done.load(Ordering::Acquire)
            && !self.terminated.is_terminated()
            && self.requested.load(Ordering::Acquire) > 0
        {
            if let Some(window) = self.open_window() {
                demand::produced(&self.requested, 1);
                self.downstream.on_next(window as FlowRef<T>);
            }
        }

        while let Some(signal) = self.signals.poll() {
            if self.terminated.is_terminated() || self.cancelled.load(Ordering::Acquire) {
                return;
            }
            match signal {
                WindowSignal::Item(item) => {
                    let window = self.current.lock().clone();
                    match window {
                        Some(window) => window.push(item),
                        None => {
                            // 没有窗口也没有需求去开一个：背压违例。
                            if self.requested.load(Ordering::Acquire) > 0 {
                                if let Some(window) = self.open_window() {
                                    demand::produced(&self.requested, 1);
                                    self.downstream.on_next(Arc::clone(&window) as FlowRef<T>);
                                    window.push(item);
                                }
                            } else {
                                self.halt_missing_demand();
                                return;
                            }
                        }
                    }
                }
                WindowSignal::Tick => {
                    if let Some(window) = self.current.lock().take() {
                        window.finish();
                    }
                    if self.upstream_done.load(Ordering::Acquire) {
                        continue;
                    }
                    if self.requested.load(Ordering::Acquire) > 0 {
                        if let Some(window) = self.open_window() {
                            demand::produced(&self.requested, 1);
                            self.downstream.on_next(window as FlowRef<T>);
                        }
                    } else {
                        self.halt_missing_demand();
                        return;
                    }
                }
            }
        }

        if self.upstream_done.load(Ordering::Acquire) && self.terminated.try_terminate() {
            if let Some(window) = self.current.lock().take() {
                match self.error.lock().clone() {
                    Some(error) => window.fail(error),
                    None => window.finish(),
                }
            }
            match self.error.lock().take() {
                Some(error) => self.downstream.on_error(error),
                None => self.downstream.on_complete(),
            }
            self.release_outer_slot();
        }
    }

    fn halt_missing_demand(&self) {
        let error = FlowError::missing_demand("window_boundary");
        if let Some(window) = self.current.lock().take() {
            window.fail(error.clone());
        }
        Subscription::cancel(self.upstream.as_ref());
        Subscription::cancel(self.boundary_slot.as_ref());
        if self.terminated.try_terminate() {
            self.downstream.on_error(error);
        } else {
            hook::report(error);
        }
    }
}

impl<T: Send + 'static> Subscription for WindowMain<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.requested, n);
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.release_outer_slot();
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for WindowMain<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.upstream.install(subscription) {
            Subscription::request(self.upstream.as_ref(), demand::UNBOUNDED);
        }
    }

    fn on_next(&self, item: T) {
        self.signals.push(WindowSignal::Item(item));
        self.drain();
    }

    fn on_error(&self, error: FlowError) {
        Subscription::cancel(self.boundary_slot.as_ref());
        self.signal_error(error);
    }

    fn on_complete(&self) {
        Subscription::cancel(self.boundary_slot.as_ref());
        self.signal_done();
    }
}

struct WindowBoundarySubscriber<T, B> {
    main: Arc<WindowMain<T>>,
    _marker: std::marker::PhantomData<fn(B)>,
}

impl<T, B> Subscriber<B> for WindowBoundarySubscriber<T, B>
where
    T: Send + 'static,
    B: Send + 'static,
{
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.main.boundary_slot.install(subscription) {
            Subscription::request(self.main.boundary_slot.as_ref(), demand::UNBOUNDED);
        }
    }

    fn on_next(&self, _boundary: B) {
        self.main.signals.push(WindowSignal::Tick);
        self.main.drain();
    }

    fn on_error(&self, error: FlowError) {
        Subscription::cancel(self.main.upstream.as_ref());
        self.main.signal_error(error);
    }

    fn on_complete(&self) {
        // 边界耗尽即整体完成。
        Subscription::cancel(self.main.upstream.as_ref());
        self.main.signal_done();
    }
}
