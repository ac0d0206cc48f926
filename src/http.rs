use once_cell::sync::OnceCell;
use reqwest::Client;
use std::time::Duration;

/// 全局复用的 HTTP Client（统一连接池/Keep-Alive），避免每次请求重复创建。
///
/// 说明：
/// - 统计 API、头像下载与 Twitter 调用的超时需求不同，这里按 timeout 维度拆分 client。
/// - `Client` 本身是线程安全的，适合全局复用。
static CLIENT_TIMEOUT_30S: OnceCell<Client> = OnceCell::new();
static CLIENT_TIMEOUT_90S: OnceCell<Client> = OnceCell::new();

const USER_AGENT: &str = concat!("prosu-poster/", env!("CARGO_PKG_VERSION"));

/// timeout=30s 的 HTTP Client（统计 API / 头像 / 凭据校验）。
pub fn client_timeout_30s() -> Result<&'static Client, reqwest::Error> {
    CLIENT_TIMEOUT_30S.get_or_try_init(|| build_client(Duration::from_secs(30)))
}

/// timeout=90s 的 HTTP Client（媒体上传等大请求）。
pub fn client_timeout_90s() -> Result<&'static Client, reqwest::Error> {
    CLIENT_TIMEOUT_90S.get_or_try_init(|| build_client(Duration::from_secs(90)))
}

/// 按给定超时构建独立 client（测试或自定义超时场景）。
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}
