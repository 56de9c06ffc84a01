//! 会话监管：单操作互斥与中断管理
//!
//! 同一时刻最多一个操作在执行。try_begin 同步抢占标志位，返回的 OperationGuard
//! 持有本次操作的 CancellationToken；guard 被 drop 时（含操作 future 中途被丢弃）释放标志位。
//! 会话级 token 被取消（shutdown）后，所有操作的 token 随之取消，且不再接受新操作。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::EngineError;

#[derive(Debug)]
pub struct SessionSupervisor {
    in_flight: Arc<AtomicBool>,
    /// 会话级 token；每个操作拿到它的子 token
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel_token: CancellationToken::new(),
        }
    }

    /// 尝试开始一个操作；已有操作在执行时返回 ConcurrentOperation
    pub fn try_begin(&self) -> Result<OperationGuard, EngineError> {
        if self.cancel_token.is_cancelled() {
            return Err(EngineError::collaborator("session has been shut down"));
        }
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::ConcurrentOperation)?;
        Ok(OperationGuard {
            in_flight: self.in_flight.clone(),
            token: self.cancel_token.child_token(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// 取消当前操作（若有）；会话本身在此之后不再可用
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个操作的持有凭证
#[derive(Debug)]
pub struct OperationGuard {
    in_flight: Arc<AtomicBool>,
    token: CancellationToken,
}

impl OperationGuard {
    /// 交给协作方的中止 token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn abort(&self) {
        self.token.cancel();
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}
