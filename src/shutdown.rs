//! 优雅退出
//!
//! 监听 SIGINT/SIGTERM（Windows 下为 Ctrl+C），通知调度循环停止派发新一轮，
//! 并为收尾工作提供超时上限。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// 退出协调器，可廉价克隆
#[derive(Debug, Clone)]
pub struct ShutdownManager {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug)]
struct ShutdownInner {
    notify: Notify,
    reason_tx: broadcast::Sender<ShutdownReason>,
    /// 先触发后等待时返回的原因
    last_reason: Mutex<Option<ShutdownReason>>,
    shutting_down: AtomicBool,
}

/// 退出原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// 进程内部请求退出
    Application,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(4);
        Self {
            inner: Arc::new(ShutdownInner {
                notify: Notify::new(),
                reason_tx,
                last_reason: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    fn last_reason(&self) -> ShutdownReason {
        self.inner
            .last_reason
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or(ShutdownReason::Application)
    }

    /// 等待退出信号；已经触发过时立即返回
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        let notified = self.inner.notify.notified();
        if self.is_shutting_down() {
            return self.last_reason();
        }
        debug!("等待退出信号...");
        notified.await;
        self.last_reason()
    }

    /// 触发退出，只有第一次生效
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .inner
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("重复的退出信号被忽略");
            return;
        }

        info!("触发优雅退出: {:?}", reason);
        if let Ok(mut guard) = self.inner.last_reason.lock() {
            *guard = Some(reason.clone());
        }
        if let Err(e) = self.inner.reason_tx.send(reason) {
            debug!("没有退出原因订阅者: {}", e);
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.inner.reason_tx.subscribe()
    }

    /// 为调度器等长期运行的组件创建句柄
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self)
    }

    /// 安装信号监听任务
    pub async fn start_signal_handler(&self) -> Result<(), ShutdownError> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigint = signal(SignalKind::interrupt())
                .map_err(|e| ShutdownError::SignalSetup(e.to_string()))?;
            let mut sigterm = signal(SignalKind::terminate())
                .map_err(|e| ShutdownError::SignalSetup(e.to_string()))?;

            let manager = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigint.recv() => {
                        info!("接收到SIGINT信号 (Ctrl+C)");
                        manager.trigger_shutdown(ShutdownReason::Interrupt);
                    }
                    _ = sigterm.recv() => {
                        info!("接收到SIGTERM信号");
                        manager.trigger_shutdown(ShutdownReason::Terminate);
                    }
                }
            });
        }

        #[cfg(windows)]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("监听Ctrl+C信号失败: {}", e);
                    return;
                }
                info!("接收到Ctrl+C信号");
                manager.trigger_shutdown(ShutdownReason::Interrupt);
            });
        }

        info!("信号处理器已启动");
        Ok(())
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("信号设置失败: {0}")]
    SignalSetup(String),

    #[error("优雅退出超时")]
    Timeout,
}

/// 组件侧的退出监听句柄
#[derive(Debug)]
pub struct ShutdownHandle {
    reason_rx: broadcast::Receiver<ShutdownReason>,
    manager: ShutdownManager,
}

impl ShutdownHandle {
    pub fn new(manager: &ShutdownManager) -> Self {
        Self {
            reason_rx: manager.subscribe(),
            manager: manager.clone(),
        }
    }

    /// 等待退出原因，通道关闭时返回 `None`
    pub async fn wait(&mut self) -> Option<ShutdownReason> {
        match self.reason_rx.recv().await {
            Ok(reason) => Some(reason),
            Err(broadcast::error::RecvError::Lagged(_)) => Some(self.manager.last_reason()),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.manager.is_shutting_down()
    }

    /// 在超时内执行收尾
    pub async fn cleanup_with_timeout<F, T>(
        &self,
        cleanup: F,
        limit: Duration,
    ) -> Result<T, ShutdownError>
    where
        F: std::future::Future<Output = T>,
    {
        match timeout(limit, cleanup).await {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!("收尾操作超过 {:?}", limit);
                Err(ShutdownError::Timeout)
            }
        }
    }
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        Self::new(&self.manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_trigger_wins() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutting_down());

        manager.trigger_shutdown(ShutdownReason::Interrupt);
        manager.trigger_shutdown(ShutdownReason::Terminate);

        assert!(manager.is_shutting_down());
        assert_eq!(manager.wait_for_shutdown().await, ShutdownReason::Interrupt);
    }

    #[tokio::test]
    async fn handle_receives_reason() {
        let manager = ShutdownManager::new();
        let mut handle = manager.handle();
        assert!(!handle.is_shutting_down());

        manager.trigger_shutdown(ShutdownReason::Application);
        assert_eq!(handle.wait().await, Some(ShutdownReason::Application));
        assert!(handle.is_shutting_down());
    }

    #[tokio::test]
    async fn cleanup_times_out() {
        let manager = ShutdownManager::new();
        let handle = manager.handle();
        let result = handle
            .cleanup_with_timeout(
                tokio::time::sleep(Duration::from_secs(5)),
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(ShutdownError::Timeout)));
    }
}
