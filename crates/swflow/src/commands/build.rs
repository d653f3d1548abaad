use crate::docker;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use swflow_build::{BuildError, BuildOptions, ConsoleSink, Pipeline, PipelineConfig, ProcessLauncher};
use swflow_container::{ClientGuard, DaemonStatus};
use tokio_util::sync::CancellationToken;

pub async fn handle(working_dir: &Path, options: BuildOptions) -> anyhow::Result<()> {
    let tool = swflow_config::load(working_dir)?;
    let config = match PipelineConfig::new(working_dir.to_path_buf(), &tool, &options) {
        Ok(config) => config,
        Err(e) => return Err(report_failure(&e)),
    };

    println!("{}", "🔨 ワークフローをビルド中...".green().bold());
    println!("  イメージ: {}", image_label(&config).cyan());
    if !config.graph.extensions.is_empty() {
        println!("  拡張: {}", config.graph.extensions.join(", ").cyan());
    }

    println!();
    println!("{}", "Dockerに接続中...".blue());
    let client = docker::init_docker_with_error_handling().await?;
    let guard = Arc::new(ClientGuard::new(client));

    let token = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(token.clone());

    let launcher = ProcessLauncher::new(working_dir);
    let mut pipeline = Pipeline::new(config, launcher, Arc::new(ConsoleSink));
    let result = pipeline.run(guard, &token).await;
    interrupt.abort();

    match result {
        Ok(report) => {
            if let DaemonStatus::Started { id } = &report.daemon {
                tracing::debug!("BuildKit container started: {}", id);
            }
            println!();
            println!("{}", "✓ Build success".green().bold());
            println!(
                "🚀 Build took: {}",
                humantime::format_duration(round_millis(report.elapsed))
            );
            Ok(())
        }
        Err(e) => Err(report_failure(&e)),
    }
}

fn image_label(config: &PipelineConfig) -> String {
    let graph = &config.graph;
    [graph.registry.as_str(), graph.group.as_str(), graph.name.as_str()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
        + ":"
        + &graph.tag
}

fn report_failure(e: &BuildError) -> anyhow::Error {
    eprintln!();
    eprintln!("{} {}", "✗".red().bold(), e.user_message().red());
    anyhow::anyhow!("ビルドに失敗しました")
}

/// Ctrl-C でパイプラインをキャンセル
fn spawn_interrupt_handler(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!();
                eprintln!("{}", "ℹ 中断しています...".yellow());
                token.cancel();
            }
            Err(e) => tracing::warn!("Failed to install Ctrl+C handler: {}", e),
        }
    })
}

fn round_millis(elapsed: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(elapsed.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use swflow_config::ToolConfig;

    #[test]
    fn test_image_label() {
        let options = BuildOptions {
            image: Some("quay.io/acme/greeting".to_string()),
            image_tag: Some("1.0".to_string()),
            ..Default::default()
        };
        let config =
            PipelineConfig::new("/tmp/proj".into(), &ToolConfig::default(), &options).unwrap();
        assert_eq!(image_label(&config), "quay.io/acme/greeting:1.0");

        let options = BuildOptions {
            image_name: Some("greeting".to_string()),
            ..Default::default()
        };
        let config =
            PipelineConfig::new("/tmp/proj".into(), &ToolConfig::default(), &options).unwrap();
        assert_eq!(image_label(&config), "greeting:latest");
    }

    #[test]
    fn test_round_millis() {
        let elapsed = std::time::Duration::from_micros(1_234_567);
        assert_eq!(round_millis(elapsed).as_millis(), 1234);
        assert_eq!(
            humantime::format_duration(round_millis(elapsed)).to_string(),
            "1s 234ms"
        );
    }
}
