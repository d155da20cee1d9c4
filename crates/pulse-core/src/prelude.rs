//! 一揽子导入：测试与下游拼装流水线时的常用面。

pub use crate::completable::{CompletableObserver, CompletableRef, CompletableSource};
pub use crate::error::{CompositeError, FlowError, FlowErrorKind, hook};
pub use crate::fns::{
    BiFn, BiPredicateFn, BooleanSupplierFn, ConsumerFn, KeyFn, MapFn, PredicateFn, RepeatTask,
    RowFn, SupplierFn, Task, map_fn, total_map_fn, total_predicate,
};
pub use crate::ops::{
    DEFAULT_PREFETCH, combine_latest, concat, concat_array, concat_map, debounce, filter, map,
    repeat_until, retry_bi_predicate, sample_timed, scan_seed, single, switch_map, take,
    take_until, take_until_predicate, timeout, timeout_selector, to_list, to_map, window_boundary,
    with_latest_from,
};
pub use crate::protocol::demand;
pub use crate::protocol::serial::SerializedSubscriber;
pub use crate::protocol::subscription::{
    NoopSubscription, SubscriptionSlot, TerminalOnce, complete_immediately, fail_immediately,
};
pub use crate::protocol::{
    CancelFlag, Cancellable, Flow, FlowRef, Subscriber, SubscriberRef, Subscription,
    SubscriptionRef,
};
pub use crate::queue::{FusedQueue, MpscLinked, SpscRing};
pub use crate::scheduler::{
    Scheduler, SchedulerRef, ThreadScheduler, Worker, WorkerRef, default_scheduler,
    reset_default_scheduler, schedule_direct, schedule_periodic, schedule_periodically_direct,
    set_default_scheduler,
};
pub use crate::single::{SingleObserver, SingleObserverRef, SingleRef, SingleSource};
pub use crate::source::{empty, fail, from_iter, just, never, range};
pub use crate::subject::{BehaviorSubject, UnicastSubject};
