/// Configuration for [`SyncServer`](crate::SyncServer).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long fan-out operations wait for each client's reply before
    /// counting it as missing. Negative waits forever.
    ///
    /// Default: 30 000 ms.
    pub reply_timeout_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 30_000,
        }
    }
}
