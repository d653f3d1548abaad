//! 不変の LLB 状態
//!
//! `State` の各操作は `&self` を受け取り新しい `State` を返します。
//! 既存の値は変更されないため、ひとつのベース状態を複数の派生状態で
//! 安全に共有できます（グラフは構成上 DAG になります）。

use crate::definition::Definition;
use crate::error::{LlbError, Result};
use crate::image::ImageConfig;
use crate::pb;
use prost::Message;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// イメージメタデータを解決しない場合の PATH
const DEFAULT_PATH_ENV: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// 対象プラットフォーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: String,
}

impl Platform {
    pub fn linux_amd64() -> Self {
        Self {
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
            variant: String::new(),
        }
    }

    fn to_pb(&self) -> pb::Platform {
        pb::Platform {
            architecture: self.architecture.clone(),
            os: self.os.clone(),
            variant: self.variant.clone(),
        }
    }
}

/// ひとつの Op（DAG の頂点）
///
/// 入力のダイジェストを含めてエンコード済みなので、生成後は変化しません。
struct Vertex {
    digest: String,
    bytes: Vec<u8>,
    inputs: Vec<Output>,
    metadata: pb::OpMetadata,
}

impl Vertex {
    fn new(mut op: pb::Op, inputs: Vec<Output>, caps: &[&str]) -> Arc<Self> {
        op.inputs = inputs
            .iter()
            .map(|input| pb::Input {
                digest: input.vertex.digest.clone(),
                index: input.index,
            })
            .collect();
        let bytes = op.encode_to_vec();
        let digest = digest_of(&bytes);
        let metadata = pb::OpMetadata {
            caps: caps.iter().map(|cap| (cap.to_string(), true)).collect(),
            ..Default::default()
        };
        Arc::new(Self {
            digest,
            bytes,
            inputs,
            metadata,
        })
    }
}

/// 頂点の出力（Op の n 番目の結果）
#[derive(Clone)]
struct Output {
    vertex: Arc<Vertex>,
    index: i64,
}

impl Output {
    fn root(vertex: Arc<Vertex>) -> Self {
        Self { vertex, index: 0 }
    }
}

/// コンテンツアドレス（BuildKit と同じ `sha256:<hex>` 形式）
pub(crate) fn digest_of(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// ファイルシステム状態
#[derive(Clone)]
pub struct State {
    output: Option<Output>,
    dir: String,
    env: Vec<(String, String)>,
    user: String,
    platform: Option<Platform>,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("digest", &self.digest())
            .field("dir", &self.dir)
            .field("env", &self.env)
            .field("user", &self.user)
            .field("platform", &self.platform)
            .finish()
    }
}

/// 構造的な等価性（出力ダイジェストとメタデータが同じなら等しい）
impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.digest() == other.digest()
            && self.output_index() == other.output_index()
            && self.dir == other.dir
            && self.env == other.env
            && self.user == other.user
            && self.platform == other.platform
    }
}

impl State {
    /// 空のファイルシステム
    pub fn scratch() -> Self {
        Self {
            output: None,
            dir: "/".to_string(),
            env: Vec::new(),
            user: String::new(),
            platform: None,
        }
    }

    /// コンテナイメージから開始（イメージ設定は解決しない）
    pub fn image(reference: &str, platform: Option<Platform>) -> Self {
        Self::image_with_config(reference, platform, &ImageConfig::default())
    }

    /// 解決済みのイメージ設定を初期環境としてコンテナイメージから開始
    ///
    /// PATH がなければ既定値を補います。
    pub fn image_with_config(
        reference: &str,
        platform: Option<Platform>,
        config: &ImageConfig,
    ) -> Self {
        let op = pb::Op {
            op: Some(pb::op::Op::Source(pb::SourceOp {
                identifier: format!("docker-image://{}", normalize_image_ref(reference)),
                attrs: BTreeMap::new(),
            })),
            platform: platform.as_ref().map(Platform::to_pb),
            constraints: Some(pb::WorkerConstraints::default()),
            ..Default::default()
        };
        let vertex = Vertex::new(op, Vec::new(), &["source.image", "constraints", "platform"]);
        let mut env = config.env_pairs();
        if !env.iter().any(|(k, _)| k == "PATH") {
            env.insert(0, ("PATH".to_string(), DEFAULT_PATH_ENV.to_string()));
        }
        let dir = match config.working_dir.as_deref() {
            Some(dir) if dir.starts_with('/') => clean(dir),
            Some(dir) => clean(&format!("/{}", dir)),
            None => "/".to_string(),
        };
        Self {
            output: Some(Output::root(vertex)),
            dir,
            env,
            user: config.user.clone().unwrap_or_default(),
            platform,
        }
    }

    /// クライアント側のローカルディレクトリ（セッション経由で同期される）
    pub fn local(name: &str) -> Self {
        let op = pb::Op {
            op: Some(pb::op::Op::Source(pb::SourceOp {
                identifier: format!("local://{}", name),
                attrs: BTreeMap::new(),
            })),
            constraints: Some(pb::WorkerConstraints::default()),
            ..Default::default()
        };
        let vertex = Vertex::new(op, Vec::new(), &["source.local", "constraints"]);
        Self {
            output: Some(Output::root(vertex)),
            ..Self::scratch()
        }
    }

    /// 作業ディレクトリを変更した新しい状態
    pub fn dir(&self, path: &str) -> Self {
        let dir = if path.starts_with('/') {
            clean(path)
        } else {
            clean(&format!("{}/{}", self.dir, path))
        };
        Self {
            dir,
            ..self.clone()
        }
    }

    /// 環境変数を追加した新しい状態
    pub fn add_env(&self, key: &str, value: &str) -> Self {
        let mut env: Vec<(String, String)> =
            self.env.iter().filter(|(k, _)| k != key).cloned().collect();
        env.push((key.to_string(), value.to_string()));
        Self {
            env,
            ..self.clone()
        }
    }

    /// 実行ユーザーを変更した新しい状態
    pub fn user(&self, name: &str) -> Self {
        Self {
            user: name.to_string(),
            ..self.clone()
        }
    }

    /// 実行ユーザー（空ならイメージの既定）
    pub fn get_user(&self) -> &str {
        &self.user
    }

    pub fn get_dir(&self) -> &str {
        &self.dir
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_platform(&self) -> Option<&Platform> {
        self.platform.as_ref()
    }

    /// 出力を生成する Op のダイジェスト（scratch は None）
    pub fn digest(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.vertex.digest.as_str())
    }

    fn output_index(&self) -> Option<i64> {
        self.output.as_ref().map(|o| o.index)
    }

    /// この状態のルートファイルシステム上でコマンドを実行
    pub fn run(&self, exec: Exec) -> ExecState {
        let (inputs, root_input) = match &self.output {
            Some(output) => (vec![output.clone()], 0),
            None => (Vec::new(), -1),
        };
        let op = pb::Op {
            op: Some(pb::op::Op::Exec(pb::ExecOp {
                meta: Some(pb::Meta {
                    args: exec.args,
                    env: self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
                    cwd: self.dir.clone(),
                    user: self.user.clone(),
                    remove_mount_stubs_recursive: true,
                }),
                mounts: vec![pb::Mount {
                    input: root_input,
                    dest: "/".to_string(),
                    output: 0,
                    ..Default::default()
                }],
                network: pb::NetMode::Unset as i32,
                security: pb::SecurityMode::Sandbox as i32,
            })),
            platform: self.platform.as_ref().map(Platform::to_pb),
            constraints: Some(pb::WorkerConstraints::default()),
            ..Default::default()
        };
        let vertex = Vertex::new(
            op,
            inputs,
            &["exec.meta.base", "exec.mount.bind", "constraints", "platform"],
        );
        ExecState {
            root: Self {
                output: Some(Output::root(vertex)),
                ..self.clone()
            },
        }
    }

    /// `source` の `src` をこの状態の `dest` にコピーした新しい状態
    pub fn copy(&self, source: &State, src: &str, dest: &str, info: &CopyInfo) -> Self {
        let mut inputs = Vec::new();
        let mut index_of = |output: &Option<Output>| match output {
            Some(output) => {
                inputs.push(output.clone());
                (inputs.len() - 1) as i64
            }
            None => -1,
        };
        let input = index_of(&self.output);
        let secondary_input = index_of(&source.output);

        let op = pb::Op {
            op: Some(pb::op::Op::File(pb::FileOp {
                actions: vec![pb::FileAction {
                    input,
                    secondary_input,
                    output: 0,
                    action: Some(pb::file_action::Action::Copy(pb::FileActionCopy {
                        src: normalize_path(&source.dir, src, true),
                        dest: normalize_path(&self.dir, dest, true),
                        mode: -1,
                        follow_symlink: info.follow_symlinks,
                        dir_copy_contents: info.copy_dir_contents_only,
                        attempt_unpack_docker_compatibility: info.attempt_unpack,
                        create_dest_path: info.create_dest_path,
                        allow_wildcard: info.allow_wildcard,
                        allow_empty_wildcard: info.allow_empty_wildcard,
                        timestamp: -1,
                    })),
                }],
            })),
            platform: self.platform.as_ref().map(Platform::to_pb),
            constraints: Some(pb::WorkerConstraints::default()),
            ..Default::default()
        };
        let vertex = Vertex::new(op, inputs, &["file.base", "constraints", "platform"]);
        Self {
            output: Some(Output::root(vertex)),
            ..self.clone()
        }
    }

    /// `buildctl` に渡せる定義へマーシャル
    pub fn marshal(&self) -> Definition {
        let mut def = pb::Definition::default();
        let mut visited = std::collections::HashSet::new();

        if let Some(output) = &self.output {
            collect(&output.vertex, &mut def, &mut visited);
        }

        // 終端 Op: 最終出力だけを入力に持つ
        let terminal = pb::Op {
            inputs: self
                .output
                .iter()
                .map(|o| pb::Input {
                    digest: o.vertex.digest.clone(),
                    index: o.index,
                })
                .collect(),
            ..Default::default()
        };
        let bytes = terminal.encode_to_vec();
        def.metadata.insert(digest_of(&bytes), pb::OpMetadata::default());
        def.def.push(bytes);

        tracing::debug!(
            "Marshaled definition: {} ops, head {:?}",
            def.def.len(),
            self.digest()
        );
        Definition::new(def)
    }
}

/// 依存を先に出力する後行順走査（同じ頂点は一度だけ）
fn collect(
    vertex: &Arc<Vertex>,
    def: &mut pb::Definition,
    visited: &mut std::collections::HashSet<String>,
) {
    if visited.contains(&vertex.digest) {
        return;
    }
    for input in &vertex.inputs {
        collect(&input.vertex, def, visited);
    }
    visited.insert(vertex.digest.clone());
    def.def.push(vertex.bytes.clone());
    def.metadata
        .insert(vertex.digest.clone(), vertex.metadata.clone());
}

/// `run` の結果
#[derive(Debug, Clone)]
pub struct ExecState {
    root: State,
}

impl ExecState {
    /// ルートマウントの出力
    pub fn root(&self) -> State {
        self.root.clone()
    }
}

/// 実行するコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exec {
    args: Vec<String>,
}

impl Exec {
    /// シェル風の文字列を引数に分割（シェルは経由しない）
    pub fn shlex(command: &str) -> Result<Self> {
        let args =
            shlex::split(command).ok_or_else(|| LlbError::InvalidCommand(command.to_string()))?;
        Self::args(args)
    }

    pub fn args(args: Vec<String>) -> Result<Self> {
        if args.is_empty() {
            return Err(LlbError::EmptyCommand);
        }
        Ok(Self { args })
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }
}

/// コピー動作のオプション
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyInfo {
    pub follow_symlinks: bool,
    pub copy_dir_contents_only: bool,
    pub attempt_unpack: bool,
    pub create_dest_path: bool,
    pub allow_wildcard: bool,
    pub allow_empty_wildcard: bool,
}

/// `/` 区切りパスの正規化（`.` と `..` を解決し、重複スラッシュを除去）
fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if rooted {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// 相対パスを `parent` 基準の絶対パスにする（末尾の `/` と `/.` は保持）
fn normalize_path(parent: &str, path: &str, keep_slash: bool) -> String {
    let mut out = clean(path);
    if !out.starts_with('/') {
        out = clean(&format!("/{}/{}", parent, out));
    }
    if keep_slash {
        if path.ends_with('/') && !out.ends_with('/') {
            out.push('/');
        } else if path.ends_with("/.") {
            if out != "/" {
                out.push('/');
            }
            out.push('.');
        }
    }
    out
}

/// イメージ参照を完全修飾名にする
///
/// 例: `openjdk:11` → `docker.io/library/openjdk:11`
pub fn normalize_image_ref(reference: &str) -> String {
    let (name, suffix) = match reference.find('@') {
        Some(pos) => reference.split_at(pos),
        None => {
            let last_slash = reference.rfind('/').map_or(0, |p| p + 1);
            match reference[last_slash..].rfind(':') {
                Some(pos) => reference.split_at(last_slash + pos),
                None => (reference, ""),
            }
        }
    };

    let (domain, remainder) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first, rest.to_string())
        }
        _ => ("docker.io", name.to_string()),
    };
    let remainder = if domain == "docker.io" && !remainder.contains('/') {
        format!("library/{}", remainder)
    } else {
        remainder
    };

    let suffix = if suffix.is_empty() { ":latest" } else { suffix };
    format!("{}/{}{}", domain, remainder, suffix)
}
