#![deny(unsafe_code)]
#![doc = "pulse-core: 推送式响应流运行时核心。"]
#![doc = ""]
#![doc = "== 定位 =="]
#![doc = "本 crate 不提供链式构建 DSL，公共面就是协议本身：`Flow`/`Subscriber`/"]
#![doc = "`Subscription` 三件套、操作符构造函数、调度器抽象与错误模型。每个操作符"]
#![doc = "是一台封闭状态机，遵守同一组不变量：串行投递（I1）、终端唯一（I2）、"]
#![doc = "句柄先行（I4）、需求受限（I5）、取消优先（I6）。"]
#![doc = ""]
#![doc = "== 并发模型 =="]
#![doc = "并行线程 + 操作符内部的单线程协作排水循环：missed-counter 认领发射权，"]
#![doc = "竞争线程登记后即返回。核心非挂起，\"等待\"只存在于 Worker 定时器；不做"]
#![doc = "协程化翻译——那会同时丢掉需求信号与确定性取消。"]
#![doc = ""]
#![doc = "== 无 unsafe 约束 =="]
#![doc = "全 crate `deny(unsafe_code)`：无锁队列建立在 crossbeam 之上，原子引用槽"]
#![doc = "以短临界区锁等价实现，代际令牌与计数器保持无锁。"]

pub mod completable;
pub mod error;
pub mod fns;
pub mod ops;
pub mod prelude;
pub mod protocol;
pub mod queue;
pub mod scheduler;
pub mod single;
pub mod source;
pub mod subject;

pub use error::{CompositeError, FlowError, FlowErrorKind};
pub use protocol::{
    CancelFlag, Cancellable, Flow, FlowRef, Subscriber, SubscriberRef, Subscription,
    SubscriptionRef,
};
pub use scheduler::{Scheduler, SchedulerRef, ThreadScheduler, Worker, WorkerRef};
pub use subject::{BehaviorSubject, UnicastSubject};
