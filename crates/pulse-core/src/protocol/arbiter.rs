//! 需求仲裁：换源不丢需求。
//!
//! # 设计背景（Why）
//! - `repeat`/`retry`/`concat_map` 顺序地从一个上游切换到下一个上游，
//!   而下游的需求是针对整条结果流授予的——换源时未消费的需求必须原封
//!   转交给新源，这正是 [`DemandArbiter`] 的全部职责。
//! - `timeout` 带 fallback 时存在两个可能并发的上游（主源与备源），
//!   [`FullArbiter`] 在保持需求守恒的同时以代际令牌裁决谁的信号有效。
//!
//! # 并发模型（How）
//! - 两个仲裁器都采用 missed-counter 排水：`fetch_add(1) == 0` 认领
//!   排水权，其余线程登记后即返回，认领线程以 `fetch_sub` 检测再入；
//! - 锁内绝不回调上游/下游，所有外呼动作先在锁内收集、出锁执行。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{Subscriber, SubscriberRef, Subscription, SubscriptionRef, demand};
use crate::error::{FlowError, hook};
use crate::queue::{FusedQueue, MpscLinked};

/// 顺序换源仲裁器：多次重订阅之间守恒下游需求。
///
/// # 契约说明（What）
/// - [`set_subscription`](Self::set_subscription)：安装新源；前任默认已
///   终端，不会被取消；新源立即收到全部未消费需求；
/// - [`produced`](Self::produced)：当前源每发射一项，调用方负责登记，
///   仲裁器据此维护未消费余额；
/// - `request`/`cancel` 实现 [`Subscription`]，可直接交给下游。
pub struct DemandArbiter {
    missed_requested: AtomicU64,
    missed_produced: AtomicU64,
    missed_subscription: Mutex<Option<SubscriptionRef>>,
    requested: AtomicU64,
    current: Mutex<Option<SubscriptionRef>>,
    wip: AtomicUsize,
    cancelled: AtomicBool,
}

impl DemandArbiter {
    /// 创建空仲裁器。
    pub fn new() -> Self {
        DemandArbiter {
            missed_requested: AtomicU64::new(0),
            missed_produced: AtomicU64::new(0),
            missed_subscription: Mutex::new(None),
            requested: AtomicU64::new(0),
            current: Mutex::new(None),
            wip: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// 安装新的上游句柄（顺序换源）。
    pub fn set_subscription(&self, subscription: SubscriptionRef) {
        if self.cancelled.load(Ordering::Acquire) {
            subscription.cancel();
            return;
        }
        *self.missed_subscription.lock() = Some(subscription);
        self.drain();
    }

    /// 登记当前源已发射 `n` 项。
    pub fn produced(&self, n: u64) {
        if n == 0 {
            return;
        }
        demand::add_cap(&self.missed_produced, n);
        self.drain();
    }

    /// 是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1usize;
        loop {
            let requested_delta = self.missed_requested.swap(0, Ordering::AcqRel);
            let produced_delta = self.missed_produced.swap(0, Ordering::AcqRel);
            let incoming = self.missed_subscription.lock().take();

            let mut cancel_targets: Vec<SubscriptionRef> = Vec::new();
            let mut request_target: Option<(SubscriptionRef, u64)> = None;

            if self.cancelled.load(Ordering::Acquire) {
                if let Some(previous) = self.current.lock().take() {
                    cancel_targets.push(previous);
                }
                if let Some(fresh) = incoming {
                    cancel_targets.push(fresh);
                }
            } else {
                let mut outstanding = self.requested.load(Ordering::Acquire);
                if outstanding != demand::UNBOUNDED {
                    if requested_delta > 0 {
                        outstanding = outstanding.saturating_add(requested_delta);
                    }
                    if outstanding != demand::UNBOUNDED && produced_delta > 0 {
                        outstanding = match outstanding.checked_sub(produced_delta) {
                            Some(value) => value,
                            None => {
                                hook::report(FlowError::protocol(
                                    "arbiter observed more produced than requested",
                                ));
                                0
                            }
                        };
                    }
                    self.requested.store(outstanding, Ordering::Release);
                }

                if let Some(fresh) = incoming {
                    // 顺序换源：前任已自然终端，替换引用即可。
                    *self.current.lock() = Some(Arc::clone(&fresh));
                    if outstanding > 0 {
                        request_target = Some((fresh, outstanding));
                    }
                } else if requested_delta > 0 {
                    if let Some(active) = self.current.lock().clone() {
                        request_target = Some((active, requested_delta));
                    }
                }
            }

            for victim in cancel_targets {
                victim.cancel();
            }
            if let Some((target, amount)) = request_target {
                target.request(amount);
            }

            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                return;
            }
            missed = remaining;
        }
    }
}

impl Default for DemandArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription for DemandArbiter {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.missed_requested, n);
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.drain();
        }
    }
}

enum ArbiterSignal<T> {
    Switch {
        generation: u64,
        subscription: SubscriptionRef,
    },
    Item {
        generation: u64,
        item: T,
    },
    Error {
        generation: u64,
        error: FlowError,
    },
    Complete {
        generation: u64,
    },
}

struct FullArbiterState<T> {
    current: Option<SubscriptionRef>,
    current_generation: u64,
    outstanding: u64,
    pending: VecDeque<T>,
    completed: bool,
    terminated: bool,
}

/// 双上游多路复用仲裁器（`timeout` fallback 的换轨机关）。
///
/// # 逻辑解析（How）
/// - 每个上游在订阅前领取一个代际（[`next_generation`](Self::next_generation)），
///   其 `on_subscribe` 以该代际安装句柄，此后所有信号都携带代际入队；
/// - 全部输入（安装、条目、终端、需求）汇入同一条排水循环；换轨时旧代际
///   的积压被清除，迟到条目按代际丢弃、迟到错误交钩子；
/// - 条目的发射受下游需求约束：无需求时在 `pending` 缓存，完成信号等
///   积压排空后才投递。
///
/// # 契约说明（What）
/// - 需求守恒：下游的 `request` 既累加本地余额也转发给现任上游；换轨时
///   新上游立即收到全部未消费余额；
/// - 终端唯一：错误优先于积压条目，完成排在积压之后。
pub struct FullArbiter<T> {
    downstream: SubscriberRef<T>,
    signals: MpscLinked<ArbiterSignal<T>>,
    missed_requested: AtomicU64,
    generation: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    state: Mutex<FullArbiterState<T>>,
}

impl<T: Send + 'static> FullArbiter<T> {
    /// 包装下游消费者；调用方随后应把仲裁器自身作为句柄交给下游。
    pub fn new(downstream: SubscriberRef<T>) -> Arc<Self> {
        Arc::new(FullArbiter {
            downstream,
            signals: MpscLinked::new(),
            missed_requested: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(FullArbiterState {
                current: None,
                current_generation: 0,
                outstanding: 0,
                pending: VecDeque::new(),
                completed: false,
                terminated: false,
            }),
        })
    }

    /// 领取下一个代际令牌；持有最新令牌的上游才拥有发言权。
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// 把给定句柄（通常包装了仲裁器与拆除逻辑）先行交给下游。
    pub fn downstream_on_subscribe(&self, subscription: SubscriptionRef) {
        self.downstream.on_subscribe(subscription);
    }

    /// 以指定代际安装上游句柄。
    pub fn install(&self, generation: u64, subscription: SubscriptionRef) {
        self.signals.push(ArbiterSignal::Switch {
            generation,
            subscription,
        });
        self.drain();
    }

    /// 上游条目。过期代际的条目在排水时被丢弃。
    pub fn signal_item(&self, generation: u64, item: T) {
        self.signals.push(ArbiterSignal::Item { generation, item });
        self.drain();
    }

    /// 上游错误。过期代际的错误交全局钩子。
    pub fn signal_error(&self, generation: u64, error: FlowError) {
        self.signals.push(ArbiterSignal::Error { generation, error });
        self.drain();
    }

    /// 上游完成。
    pub fn signal_complete(&self, generation: u64) {
        self.signals.push(ArbiterSignal::Complete { generation });
        self.drain();
    }

    /// 是否已被下游取消。
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1usize;
        loop {
            self.drain_round();
            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                return;
            }
            missed = remaining;
        }
    }

    /// 单轮排水：吸收需求、消化信号、按需发射。所有外呼都在锁外。
    fn drain_round(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            let victim = {
                let mut state = self.state.lock();
                state.pending.clear();
                state.terminated = true;
                state.current.take()
            };
            if let Some(subscription) = victim {
                subscription.cancel();
            }
            while let Some(signal) = self.signals.poll() {
                match signal {
                    ArbiterSignal::Error { error, .. } => hook::report(error),
                    ArbiterSignal::Switch { subscription, .. } => subscription.cancel(),
                    _ => {}
                }
            }
            return;
        }

        // 吸收下游需求：累加余额并转发给现任上游。
        let requested_delta = self.missed_requested.swap(0, Ordering::AcqRel);
        if requested_delta > 0 {
            let forward = {
                let mut state = self.state.lock();
                if state.outstanding != demand::UNBOUNDED {
                    state.outstanding = state.outstanding.saturating_add(requested_delta);
                }
                state.current.clone()
            };
            if let Some(subscription) = forward {
                subscription.request(requested_delta);
            }
        }

        // 消化信号队列。
        while let Some(signal) = self.signals.poll() {
            match signal {
                ArbiterSignal::Switch {
                    generation,
                    subscription,
                } => {
                    let (previous, backlog_request) = {
                        let mut state = self.state.lock();
                        if state.terminated || generation < state.current_generation {
                            (Some(subscription), None)
                        } else {
                            state.current_generation = generation;
                            state.pending.clear();
                            let previous = state.current.replace(Arc::clone(&subscription));
                            let amount = (state.outstanding > 0).then_some(state.outstanding);
                            (previous, amount.map(|n| (subscription, n)))
                        }
                    };
                    if let Some(victim) = previous {
                        victim.cancel();
                    }
                    if let Some((target, amount)) = backlog_request {
                        target.request(amount);
                    }
                }
                ArbiterSignal::Item { generation, item } => {
                    let mut state = self.state.lock();
                    if !state.terminated && generation == state.current_generation {
                        state.pending.push_back(item);
                    }
                }
                ArbiterSignal::Error { generation, error } => {
                    let deliver = {
                        let mut state = self.state.lock();
                        if state.terminated || generation < state.current_generation {
                            false
                        } else {
                            // 错误优先：越过积压条目直接终端。
                            state.terminated = true;
                            state.pending.clear();
                            true
                        }
                    };
                    if deliver {
                        self.downstream.on_error(error);
                    } else {
                        hook::report(error);
                    }
                }
                ArbiterSignal::Complete { generation } => {
                    let mut state = self.state.lock();
                    if !state.terminated && generation == state.current_generation {
                        state.completed = true;
                    }
                }
            }
        }

        // 发射阶段：受需求约束，完成信号等积压排空后投递。
        loop {
            let action = {
                let mut state = self.state.lock();
                if state.terminated {
                    break;
                }
                if let Some(item) = (state.outstanding > 0)
                    .then(|| state.pending.pop_front())
                    .flatten()
                {
                    if state.outstanding != demand::UNBOUNDED {
                        state.outstanding -= 1;
                    }
                    Some(item)
                } else if state.completed && state.pending.is_empty() {
                    state.terminated = true;
                    None
                } else {
                    break;
                }
            };
            match action {
                Some(item) => self.downstream.on_next(item),
                None => {
                    self.downstream.on_complete();
                    break;
                }
            }
        }
    }
}

impl<T: Send + 'static> Subscription for FullArbiter<T> {
    fn request(&self, n: u64) {
        if !demand::validate(n) {
            return;
        }
        demand::add_cap(&self.missed_requested, n);
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.drain();
        }
    }
}

/// 便捷包装：以固定代际把一个 [`Subscriber`] 面桥接到 [`FullArbiter`]。
///
/// `timeout` 的主源与备源订阅者都委托到这里，自身只保留代际判定之外的
/// 额外逻辑（如重置定时器）。
pub struct ArbiterSubscriber<T> {
    arbiter: Arc<FullArbiter<T>>,
    generation: u64,
}

impl<T: Send + 'static> ArbiterSubscriber<T> {
    /// 以领取好的代际构造桥接订阅者。
    pub fn new(arbiter: Arc<FullArbiter<T>>, generation: u64) -> Arc<Self> {
        Arc::new(ArbiterSubscriber {
            arbiter,
            generation,
        })
    }
}

impl<T: Send + 'static> Subscriber<T> for ArbiterSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        self.arbiter.install(self.generation, subscription);
    }

    fn on_next(&self, item: T) {
        self.arbiter.signal_item(self.generation, item);
    }

    fn on_error(&self, error: FlowError) {
        self.arbiter.signal_error(self.generation, error);
    }

    fn on_complete(&self) {
        self.arbiter.signal_complete(self.generation);
    }
}
