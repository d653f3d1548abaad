//! ワークフロープロジェクトのビルドグラフ
//!
//! 共有のベース状態（アプリケーションのビルド）から、マニフェスト抽出と
//! ランタイムイメージの 2 つの出力を派生させます。

use crate::error::Result;
use crate::image::{ImageConfig, ImageMetaResolver};
use crate::state::{CopyInfo, Exec, Platform, State};
use std::path::PathBuf;

pub const DEFAULT_BUILDER_IMAGE: &str = "quay.io/lmotta/kn-workflow:2.10.0.Final";
pub const DEFAULT_RUNTIME_IMAGE: &str = "openjdk:11";

/// ビルダーイメージ内のプロジェクトディレクトリ
pub const PROJECT_DIR: &str = "/tmp/kn-plugin-workflow";

const WORKFLOW_FILE: &str = "workflow.sw.json";
const PROPERTIES_FILE: &str = "application.properties";
const RESOURCES_DIR: &str = "./src/main/resources";
const MANIFESTS_DIR: &str = "/tmp/kn-plugin-workflow/target/kubernetes";
const LIBS_DIR: &str = "/tmp/kn-plugin-workflow/target/quarkus-app/lib/";
const RUNNER_DIR: &str = "/runner/";

/// セッションで同期されるビルドコンテキスト名
pub const CONTEXT_NAME: &str = "context";

/// グラフ構築のパラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowGraphOptions {
    /// ローカルのビルドコンテキスト（任意ファイルの有無の判定に使用）
    pub context_dir: PathBuf,
    /// 追加する Quarkus 拡張
    pub extensions: Vec<String>,
    /// Knative サービス名
    pub knative_name: String,
    pub registry: String,
    pub group: String,
    pub name: String,
    pub tag: String,
    pub builder_image: String,
    pub runtime_image: String,
    /// ビルダーイメージの設定（未解決なら既定値）
    pub builder_config: ImageConfig,
    /// ランタイムイメージの設定（未解決なら既定値）
    pub runtime_config: ImageConfig,
}

impl Default for WorkflowGraphOptions {
    fn default() -> Self {
        Self {
            context_dir: PathBuf::from("."),
            extensions: Vec::new(),
            knative_name: String::new(),
            registry: String::new(),
            group: String::new(),
            name: String::new(),
            tag: "latest".to_string(),
            builder_image: DEFAULT_BUILDER_IMAGE.to_string(),
            runtime_image: DEFAULT_RUNTIME_IMAGE.to_string(),
            builder_config: ImageConfig::default(),
            runtime_config: ImageConfig::default(),
        }
    }
}

impl WorkflowGraphOptions {
    fn extension_list(&self) -> Option<String> {
        let extensions: Vec<&str> = self
            .extensions
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            None
        } else {
            Some(extensions.join(","))
        }
    }
}

/// 出力成果物のコピー設定
fn artifact_copy() -> CopyInfo {
    CopyInfo {
        follow_symlinks: true,
        copy_dir_contents_only: true,
        attempt_unpack: false,
        create_dest_path: true,
        allow_wildcard: true,
        allow_empty_wildcard: true,
    }
}

/// ベース状態: 拡張の追加、ソースのコピー、パッケージング
pub fn build_base(options: &WorkflowGraphOptions) -> Result<State> {
    let project = State::image_with_config(
        &options.builder_image,
        Some(Platform::linux_amd64()),
        &options.builder_config,
    )
    .dir(PROJECT_DIR);

    let extension_step = match options.extension_list() {
        Some(list) => Exec::shlex(&format!("./mvnw quarkus:add-extension -Dextensions={}", list))?,
        None => Exec::shlex("echo \"WITHOUT ADDITIONAL EXTENSIONS\"")?,
    };
    let mut state = project.run(extension_step).root();

    let context = State::local(CONTEXT_NAME);
    state = state.copy(
        &context,
        &format!("./{}", WORKFLOW_FILE),
        &format!("{}/{}", RESOURCES_DIR, WORKFLOW_FILE),
        &CopyInfo::default(),
    );

    if options.context_dir.join(PROPERTIES_FILE).is_file() {
        tracing::debug!("Including {}", PROPERTIES_FILE);
        state = state.copy(
            &context,
            PROPERTIES_FILE,
            &format!("{}/{}", RESOURCES_DIR, PROPERTIES_FILE),
            &CopyInfo::default(),
        );
    }

    let package = format!(
        "./mvnw package \
         -Dquarkus.kubernetes.deployment-target=knative \
         -Dquarkus.knative.name={} \
         -Dquarkus.container-image.registry={} \
         -Dquarkus.container-image.group={} \
         -Dquarkus.container-image.name={} \
         -Dquarkus.container-image.tag={}",
        options.knative_name, options.registry, options.group, options.name, options.tag
    );
    Ok(state.run(Exec::shlex(&package)?).root())
}

/// 生成されたマニフェストだけを空のルートへ取り出す
pub fn build_output_files(base: &State) -> State {
    State::scratch().copy(base, MANIFESTS_DIR, ".", &artifact_copy())
}

/// ランタイムイメージにアプリケーションのライブラリを配置
pub fn build_runner_image(base: &State, runtime_image: &str, config: &ImageConfig) -> State {
    State::image_with_config(runtime_image, Some(Platform::linux_amd64()), config).copy(
        base,
        LIBS_DIR,
        RUNNER_DIR,
        &artifact_copy(),
    )
}

/// 1 回のパイプライン実行で使う 3 つの状態
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    pub base: State,
    pub output_files: State,
    pub runner_image: State,
}

impl WorkflowGraph {
    pub fn build(options: &WorkflowGraphOptions) -> Result<Self> {
        let base = build_base(options)?;
        let output_files = build_output_files(&base);
        let runner_image =
            build_runner_image(&base, &options.runtime_image, &options.runtime_config);
        Ok(Self {
            base,
            output_files,
            runner_image,
        })
    }

    /// 両方のベースイメージの設定を解決してからグラフを構築
    pub async fn resolve<R: ImageMetaResolver>(
        options: &WorkflowGraphOptions,
        resolver: &R,
    ) -> Result<Self> {
        let platform = Platform::linux_amd64();
        let mut resolved = options.clone();
        resolved.builder_config = resolver
            .resolve_image_config(&options.builder_image, &platform)
            .await?;
        resolved.runtime_config = resolver
            .resolve_image_config(&options.runtime_image, &platform)
            .await?;
        tracing::debug!(
            "Resolved image configs: builder={:?} runtime={:?}",
            resolved.builder_config,
            resolved.runtime_config
        );
        Self::build(&resolved)
    }
}
