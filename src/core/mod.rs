//! 核心编排层：错误与恢复、状态投影、会话监管、超时监管、流聚合、操作协调

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod stream;
pub mod timeout;

pub use error::{EngineError, ErrorKind, ErrorState};
pub use orchestrator::{plan_route, Action, EngineOptions, OperationCoordinator, RouteKind};
pub use recovery::RecoveryEngine;
pub use session_supervisor::{OperationGuard, SessionSupervisor};
pub use state::{EngineState, OperationSnapshot};
pub use stream::StreamAggregator;
pub use timeout::{StreamIdleGuard, TimeoutPolicy, TimeoutSupervisor};
