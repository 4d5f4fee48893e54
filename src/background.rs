//! 临时归档过期清扫的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::temp::TempArchives;

/// 启动临时归档清扫任务；`interval` 为 `None` 时不启动。
pub fn spawn_background_tasks(
    temp: Arc<TempArchives>,
    interval: Option<Duration>,
) -> Option<JoinHandle<()>> {
    let Some(period) = interval else {
        info!("temp archive sweep disabled");
        return None;
    };

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match temp.sweep().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "temp archive sweep finished"),
                Err(err) => warn!(dir = ?temp.dir(), error = %err, "temp archive sweep failed"),
            }
        }
    }))
}
