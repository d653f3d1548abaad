use colored::Colorize;
use swflow_container::DaemonClient;

fn print_connection_hint(cause: &dyn std::fmt::Display) {
    eprintln!();
    eprintln!("{}", "✗ Docker接続エラー".red().bold());
    eprintln!();
    eprintln!("{}", "原因:".yellow());
    eprintln!("  {}", cause);
    eprintln!();
    eprintln!("{}", "解決方法:".yellow());
    eprintln!("  • Dockerが起動しているか確認してください");
    eprintln!("  • DOCKER_HOST が正しいデーモンを指しているか確認してください");
    eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
}

/// Docker接続を初期化（エラーハンドリング付き）
pub async fn init_docker_with_error_handling() -> anyhow::Result<DaemonClient> {
    let client = match DaemonClient::connect_local() {
        Ok(client) => client,
        Err(e) => {
            print_connection_hint(&e);
            return Err(anyhow::anyhow!("Docker接続に失敗しました"));
        }
    };

    // 接続テスト
    if let Err(e) = client.ping().await {
        print_connection_hint(&e);
        return Err(anyhow::anyhow!("Docker接続に失敗しました"));
    }

    tracing::debug!("Docker daemon reachable at {:?}", client.host());
    Ok(client)
}
