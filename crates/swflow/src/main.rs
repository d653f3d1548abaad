mod commands;
mod docker;

use clap::{Args, Parser, Subcommand};
use swflow_build::BuildOptions;

#[derive(Parser)]
#[command(name = "swflow")]
#[command(about = "ワークフローを、そのままコンテナへ。", long_about = None)]
struct Cli {
    /// 詳細ログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ワークフロープロジェクトをビルドしてイメージを作成
    Build(BuildArgs),
    /// バージョン情報を表示
    Version,
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// 追加する Quarkus 拡張（カンマ区切り）
    #[arg(short = 'e', long = "extension", env = "SWFLOW_EXTENSION", default_value = "")]
    extensions: String,
    /// 完全なイメージ名 ([registry/][repository/]name[:tag])
    #[arg(short = 'i', long, env = "SWFLOW_IMAGE")]
    image: Option<String>,
    /// イメージのレジストリ（--image の値を上書き）
    #[arg(long, env = "SWFLOW_IMAGE_REGISTRY")]
    image_registry: Option<String>,
    /// イメージのリポジトリ（--image の値を上書き）
    #[arg(long, env = "SWFLOW_IMAGE_REPOSITORY")]
    image_repository: Option<String>,
    /// イメージ名（--image の値を上書き）
    #[arg(long, env = "SWFLOW_IMAGE_NAME")]
    image_name: Option<String>,
    /// イメージのタグ（--image の値を上書き）
    #[arg(long, env = "SWFLOW_IMAGE_TAG")]
    image_tag: Option<String>,
}

impl From<BuildArgs> for BuildOptions {
    fn from(args: BuildArgs) -> Self {
        Self {
            extensions: args.extensions,
            image: args.image,
            image_registry: args.image_registry,
            image_repository: args.image_repository,
            image_name: args.image_name,
            image_tag: args.image_tag,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    // stdout はビルダーの出力に使うので、ログは stderr へ
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Version => {
            println!("swflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Build(args) => {
            let working_dir = std::env::current_dir()?;
            commands::build::handle(&working_dir, args.into()).await
        }
    }
}
