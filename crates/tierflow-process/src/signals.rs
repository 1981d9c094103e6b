//! 終了シグナルの待機
//!
//! Unix では SIGINT / SIGTERM / SIGQUIT のいずれかを受け取ると完了する。
//! 受け取ったシグナル名を返す。

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<String> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name.to_string())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<String> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C".to_string())
}
