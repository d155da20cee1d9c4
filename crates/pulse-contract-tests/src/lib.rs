#![deny(unsafe_code)]
#![doc = "Pulse 契约测试套件（TCK）。"]
#![doc = ""]
#![doc = "为 `pulse-core` 的集成测试与第三方协议实现提供统一测试替身："]
#![doc = "事件录制订阅者、虚拟时间调度器与手动推送探针。所有替身都以"]
#![doc = "生产契约的姿态实现——录制者同样遵守需求算术，虚拟调度器同样"]
#![doc = "满足 Worker 的串行时间线约束。"]

mod manual;
mod recorder;
mod virtual_time;

pub mod support;

pub use manual::ManualFlow;
pub use recorder::{TestSingleObserver, TestSubscriber};
pub use virtual_time::TestScheduler;
