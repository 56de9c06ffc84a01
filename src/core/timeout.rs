//! 超时监管
//!
//! 两个相互独立的期限：
//! - 请求超时：覆盖整个操作（派发到提交），与流是否仍有进展无关
//! - 流超时：相邻两段之间的最大间隔，等待下一段时主动计时，到达时再校验一次
//!
//! 第一段只受请求超时约束。期限为 None 表示不限制。

use std::future::Future;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::EngineError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRIEVE_AND_GENERATE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// 各类操作的期限
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// 生成、检索与内容加载
    pub request: Option<Duration>,
    /// 检索 + 生成
    pub retrieve_and_generate: Option<Duration>,
    /// 相邻两段的最大间隔
    pub stream: Option<Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            request: Some(DEFAULT_REQUEST_TIMEOUT),
            retrieve_and_generate: Some(DEFAULT_RETRIEVE_AND_GENERATE_TIMEOUT),
            stream: Some(DEFAULT_STREAM_TIMEOUT),
        }
    }
}

impl TimeoutPolicy {
    /// 关闭所有期限
    pub fn unlimited() -> Self {
        Self {
            request: None,
            retrieve_and_generate: None,
            stream: None,
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// 对整个操作施加请求超时；超时后取消 token，使协作方停止工作
#[derive(Debug, Clone)]
pub struct TimeoutSupervisor {
    token: CancellationToken,
}

impl TimeoutSupervisor {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub async fn run<F, T>(&self, limit: Option<Duration>, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let Some(limit) = limit else {
            return fut.await;
        };
        match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = millis(limit), "request timeout exceeded");
                self.token.cancel();
                Err(EngineError::RequestTimeout {
                    timeout_ms: millis(limit),
                })
            }
        }
    }
}

/// 流间隔看门狗：记录上一段到达时间，下一段必须在 limit 内到达
#[derive(Debug)]
pub struct StreamIdleGuard {
    limit: Option<Duration>,
    last_arrival: Option<Instant>,
}

impl StreamIdleGuard {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            limit,
            last_arrival: None,
        }
    }

    fn expired(&self, limit: Duration) -> EngineError {
        warn!(idle_ms = millis(limit), "stream idle timeout exceeded");
        EngineError::StreamTimeout {
            idle_ms: millis(limit),
        }
    }

    /// 取下一项；流结束返回 Ok(None)
    pub async fn next<S>(&mut self, stream: &mut S) -> Result<Option<S::Item>, EngineError>
    where
        S: Stream + Unpin,
    {
        let item = match (self.limit, self.last_arrival) {
            (Some(limit), Some(last)) => match timeout_at(last + limit, stream.next()).await {
                Ok(item) => {
                    if last.elapsed() > limit {
                        return Err(self.expired(limit));
                    }
                    item
                }
                Err(_) => return Err(self.expired(limit)),
            },
            _ => stream.next().await,
        };
        self.last_arrival = Some(Instant::now());
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn delayed(delays_ms: Vec<u64>) -> impl Stream<Item = u64> + Unpin {
        Box::pin(stream::unfold(delays_ms.into_iter(), |mut it| async move {
            let ms = it.next()?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Some((ms, it))
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_cancels_token() {
        let token = CancellationToken::new();
        let supervisor = TimeoutSupervisor::new(token.clone());
        let result: Result<(), _> = supervisor
            .run(Some(Duration::from_millis(100)), async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(EngineError::RequestTimeout { timeout_ms: 100 }));
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_limit_runs_to_completion() {
        let supervisor = TimeoutSupervisor::new(CancellationToken::new());
        let result = supervisor
            .run(None, async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(7)
            })
            .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_small_gaps_pass() {
        let mut s = delayed(vec![50; 100]);
        let mut guard = StreamIdleGuard::new(Some(Duration::from_millis(200)));
        let mut count = 0;
        while let Some(_) = guard.next(&mut s).await.unwrap() {
            count += 1;
        }
        assert_eq!(count, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_gap_fails() {
        let mut s = delayed(vec![10, 10, 2500]);
        let mut guard = StreamIdleGuard::new(Some(Duration::from_secs(2)));
        assert!(guard.next(&mut s).await.unwrap().is_some());
        assert!(guard.next(&mut s).await.unwrap().is_some());
        assert_eq!(
            guard.next(&mut s).await,
            Err(EngineError::StreamTimeout { idle_ms: 2000 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_chunk_not_bound_by_idle_limit() {
        let mut s = delayed(vec![5000, 10]);
        let mut guard = StreamIdleGuard::new(Some(Duration::from_secs(1)));
        assert_eq!(guard.next(&mut s).await.unwrap(), Some(5000));
        assert_eq!(guard.next(&mut s).await.unwrap(), Some(10));
        assert_eq!(guard.next(&mut s).await.unwrap(), None);
    }
}
