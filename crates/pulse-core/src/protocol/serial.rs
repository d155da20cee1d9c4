//! 串行化消费者：把并发上游信号收敛为单读者序列。
//!
//! # 设计背景（Why）
//! - `take_until`、`window_boundary` 等操作符存在两个以上并发信号源
//!   （主流、边界流、定时器），而协议不变量 I1 要求下游入口串行执行。
//! - 采用"emitting 位 + 锁内追加溢出表"的发射者循环：抢到发射权的线程
//!   内联投递并顺带排空溢出，其余线程只追加即返回，既无专职线程也无
//!   无界自旋。
//!
//! # 逻辑解析（How）
//! - 生产者发现 `emitting == false` 时将其置位、出锁投递、回锁取批，
//!   直到溢出表为空才释放发射权；
//! - 终端事件优先：错误插到溢出表头部（越过积压条目），完成追加尾部；
//! - 终端记录之后：条目静默丢弃，错误交全局钩子（I2/I6）。

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Subscriber, SubscriberRef, SubscriptionRef};
use crate::error::{FlowError, hook};

enum SerialEvent<T> {
    Next(T),
    Error(FlowError),
    Complete,
}

struct SerialState<T> {
    emitting: bool,
    done: bool,
    overflow: VecDeque<SerialEvent<T>>,
}

/// 串行化包装：任意线程可调用四个入口，下游观察到的序列满足 I1/I2。
pub struct SerializedSubscriber<T> {
    downstream: SubscriberRef<T>,
    state: Mutex<SerialState<T>>,
}

impl<T: Send + 'static> SerializedSubscriber<T> {
    /// 包装下游消费者。
    pub fn new(downstream: SubscriberRef<T>) -> Arc<Self> {
        Arc::new(SerializedSubscriber {
            downstream,
            state: Mutex::new(SerialState {
                emitting: false,
                done: false,
                overflow: VecDeque::new(),
            }),
        })
    }

    /// 发射权持有者的排空循环：重入锁取批、出锁投递，直到溢出表耗尽。
    fn drain(&self) {
        loop {
            let batch: Vec<SerialEvent<T>> = {
                let mut state = self.state.lock();
                if state.overflow.is_empty() {
                    state.emitting = false;
                    return;
                }
                state.overflow.drain(..).collect()
            };
            for event in batch {
                if self.deliver(event) {
                    // 终端已投递，清空后续积压并退出。
                    let mut state = self.state.lock();
                    state.overflow.clear();
                    state.emitting = false;
                    return;
                }
            }
        }
    }

    /// 投递单个事件；返回 `true` 表示它是终端。
    fn deliver(&self, event: SerialEvent<T>) -> bool {
        match event {
            SerialEvent::Next(item) => {
                self.downstream.on_next(item);
                false
            }
            SerialEvent::Error(error) => {
                self.downstream.on_error(error);
                true
            }
            SerialEvent::Complete => {
                self.downstream.on_complete();
                true
            }
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for SerializedSubscriber<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        // 句柄先行由最先完成订阅的上游保证，包装层直接透传。
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&self, item: T) {
        {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            if state.emitting {
                state.overflow.push_back(SerialEvent::Next(item));
                return;
            }
            state.emitting = true;
        }
        self.downstream.on_next(item);
        self.drain();
    }

    fn on_error(&self, error: FlowError) {
        {
            let mut state = self.state.lock();
            if state.done {
                hook::report(error);
                return;
            }
            state.done = true;
            if state.emitting {
                // 终端优先：错误越过积压条目。
                state.overflow.push_front(SerialEvent::Error(error));
                return;
            }
            state.emitting = true;
        }
        self.downstream.on_error(error);
    }

    fn on_complete(&self) {
        {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.done = true;
            if state.emitting {
                state.overflow.push_back(SerialEvent::Complete);
                return;
            }
            state.emitting = true;
        }
        self.downstream.on_complete();
    }
}
