//! ファイル同期（アップロード / ダウンロード）
//!
//! デーモンは `FileSync/DiffCopy` でローカルのディレクトリを要求し、
//! `FileSend/DiffCopy` でビルド結果を送り返します。どちらも fsutil の
//! パケットプロトコル（STAT → REQ → DATA → FIN）です。

use crate::error::{Result, SessionError};
use crate::proto::filesync::file_send_server::FileSend;
use crate::proto::filesync::file_sync_server::FileSync;
use crate::proto::{
    MODE_DIR, MODE_PERM, MODE_SETGID, MODE_SETUID, MODE_STICKY, MODE_SYMLINK, Packet, PacketType,
    Stat,
};
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use walkdir::WalkDir;

const CHUNK_SIZE: usize = 32 * 1024;
const MAX_SYMLINK_HOPS: usize = 40;

const KEY_DIR_NAME: &str = "dir-name";
const KEY_INCLUDE_PATTERNS: &str = "include-patterns";
const KEY_EXCLUDE_PATTERNS: &str = "exclude-patterns";
const KEY_FOLLOW_PATHS: &str = "followpaths";

/// Stat 変換の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapResult {
    Keep,
    Skip,
}

/// 送信前に各エントリへ適用する変換
pub type StatMap = Arc<dyn Fn(&str, &mut Stat) -> MapResult + Send + Sync>;

/// 所有者を uid=0 / gid=0 に書き換える
pub fn reset_ownership() -> StatMap {
    Arc::new(|_, stat| {
        stat.uid = 0;
        stat.gid = 0;
        MapResult::Keep
    })
}

/// 名前付きで公開するローカルディレクトリ
#[derive(Clone)]
pub struct SyncedDir {
    pub name: String,
    pub dir: PathBuf,
    pub map: Option<StatMap>,
}

impl fmt::Debug for SyncedDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedDir")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("map", &self.map.is_some())
            .finish()
    }
}

impl SyncedDir {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            map: None,
        }
    }

    pub fn with_map(mut self, map: StatMap) -> Self {
        self.map = Some(map);
        self
    }
}

/// アップロード機能（`FileSync`）
#[derive(Debug, Clone)]
pub struct FsSyncProvider {
    dirs: Arc<HashMap<String, SyncedDir>>,
}

impl FsSyncProvider {
    pub fn new(dirs: impl IntoIterator<Item = SyncedDir>) -> Self {
        let dirs = dirs.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self {
            dirs: Arc::new(dirs),
        }
    }

    pub fn dir(&self, name: &str) -> Option<&SyncedDir> {
        self.dirs.get(name)
    }
}

/// ダウンロード機能（`FileSend`）
#[derive(Debug, Clone)]
pub struct FsSyncTarget {
    dir: PathBuf,
}

impl FsSyncTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// include / exclude パターン
#[derive(Debug, Default)]
struct PathFilter {
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
}

impl PathFilter {
    fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| {
                    glob::Pattern::new(p.trim_start_matches("./")).map_err(|e| {
                        SessionError::InvalidPattern {
                            pattern: p.clone(),
                            message: e.to_string(),
                        }
                    })
                })
                .collect::<Result<Vec<_>>>()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// パス自身または祖先がパターンに一致するか
    fn matches(patterns: &[glob::Pattern], path: &str) -> bool {
        let mut end = 0;
        loop {
            let next = path[end..].find('/').map(|i| end + i);
            let prefix = match next {
                Some(i) => &path[..i],
                None => path,
            };
            if patterns.iter().any(|p| p.matches(prefix)) {
                return true;
            }
            match next {
                Some(i) => end = i + 1,
                None => return false,
            }
        }
    }

    fn allows(&self, path: &str, is_dir: bool) -> bool {
        if Self::matches(&self.exclude, path) {
            return false;
        }
        if self.include.is_empty() || Self::matches(&self.include, path) {
            return true;
        }
        // 一致するファイルを含みうる親ディレクトリは残す
        is_dir && {
            let prefix = format!("{}/", path);
            self.include.iter().any(|p| p.as_str().starts_with(&prefix))
        }
    }
}

/// ローカルのメタデータを fsutil の Stat に変換
#[cfg(unix)]
fn stat_of(rel: &str, path: &Path, metadata: &std::fs::Metadata) -> Result<Stat> {
    use std::os::unix::fs::MetadataExt;

    let raw = metadata.mode();
    let mut mode = raw & MODE_PERM;
    if raw & 0o4000 != 0 {
        mode |= MODE_SETUID;
    }
    if raw & 0o2000 != 0 {
        mode |= MODE_SETGID;
    }
    if raw & 0o1000 != 0 {
        mode |= MODE_STICKY;
    }

    let file_type = metadata.file_type();
    let mut linkname = String::new();
    if file_type.is_dir() {
        mode |= MODE_DIR;
    } else if file_type.is_symlink() {
        mode |= MODE_SYMLINK;
        linkname = std::fs::read_link(path)?.to_string_lossy().into_owned();
    }

    Ok(Stat {
        path: rel.to_string(),
        mode,
        uid: metadata.uid(),
        gid: metadata.gid(),
        size: if file_type.is_file() {
            metadata.len() as i64
        } else {
            0
        },
        mod_time: metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec(),
        linkname,
        ..Default::default()
    })
}

/// ルートからの相対パスを正規化（ルートの外へ出る場合は None）
fn normalize_rel(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(parts.iter().collect())
}

/// パスのうち最初にシンボリックリンクになっている部分とそのリンク先
fn first_symlink(root: &Path, rel: &Path) -> Option<(PathBuf, PathBuf)> {
    let mut prefix = PathBuf::new();
    for component in rel.components() {
        prefix.push(component);
        if let Ok(link) = std::fs::read_link(root.join(&prefix)) {
            return Some((prefix, link));
        }
    }
    None
}

/// followpaths のシンボリックリンクを辿り、経由したリンクとリンク先の相対パスを返す
///
/// 途中のディレクトリがリンクの場合も辿ります。絶対パスのリンクは
/// 同期ディレクトリをルートとして解釈し、ルートの外を指すリンクはそこで打ち切ります。
fn follow_symlinks(root: &Path, follow: &[String]) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    let mut add = |path: &Path| {
        let path = path.to_string_lossy().replace('\\', "/");
        if !path.is_empty() && !targets.contains(&path) {
            targets.push(path);
        }
    };

    for path in follow {
        let Some(mut rel) = normalize_rel(Path::new(path)) else {
            continue;
        };
        let mut hops = 0;
        while let Some((prefix, link)) = first_symlink(root, &rel) {
            hops += 1;
            let joined = if link.is_absolute() {
                link
            } else {
                prefix.parent().unwrap_or(Path::new("")).join(link)
            };
            let Some(resolved) = normalize_rel(&joined).filter(|_| hops <= MAX_SYMLINK_HOPS)
            else {
                tracing::debug!("Not following symlink {}", prefix.display());
                break;
            };
            add(&prefix);
            rel = match rel.strip_prefix(&prefix) {
                Ok(rest) if !rest.as_os_str().is_empty() => resolved.join(rest),
                _ => resolved,
            };
        }
        if hops <= MAX_SYMLINK_HOPS && first_symlink(root, &rel).is_none() {
            add(&rel);
        }
    }
    targets
}

/// include パターンにリンク先を加える（include が空なら全件送るので不要）
fn include_with_followed(root: &Path, include: &[String], follow: &[String]) -> Vec<String> {
    let mut patterns = include.to_vec();
    if !include.is_empty() {
        patterns.extend(
            follow_symlinks(root, follow)
                .iter()
                .map(|target| glob::Pattern::escape(target)),
        );
    }
    patterns
}

/// 送信するエントリ（ID は並び順）
struct Entry {
    stat: Stat,
    path: PathBuf,
}

/// ディレクトリを辞書順・深さ優先で列挙（ルート自身は含まない）
fn walk(synced: &SyncedDir, filter: &PathFilter) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut walker = WalkDir::new(&synced.dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(item) = walker.next() {
        let item = item.map_err(|e| SessionError::Io(e.into()))?;
        let rel = item
            .path()
            .strip_prefix(&synced.dir)
            .map_err(|_| SessionError::InvalidPath(item.path().display().to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        let is_dir = item.file_type().is_dir();

        if !filter.allows(&rel, is_dir) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }

        let metadata = item.path().symlink_metadata()?;
        let mut stat = stat_of(&rel, item.path(), &metadata)?;
        if let Some(map) = &synced.map
            && map(&rel, &mut stat) == MapResult::Skip
        {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }

        entries.push(Entry {
            stat,
            path: item.path().to_path_buf(),
        });
    }
    Ok(entries)
}

fn metadata_values(request_meta: &tonic::metadata::MetadataMap, key: &str) -> Vec<String> {
    request_meta
        .get_all(key)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

async fn send(tx: &mpsc::Sender<std::result::Result<Packet, Status>>, packet: Packet) -> bool {
    tx.send(Ok(packet)).await.is_ok()
}

/// 送信側: STAT を全件送り、REQ に応じて内容を返す
async fn send_dir(
    entries: Vec<Entry>,
    mut inbound: Streaming<Packet>,
    tx: mpsc::Sender<std::result::Result<Packet, Status>>,
) -> Result<()> {
    for (id, entry) in entries.iter().enumerate() {
        if !send(&tx, Packet::stat(id as u32, entry.stat.clone())).await {
            return Ok(());
        }
    }
    if !send(&tx, Packet::end_of_stats()).await {
        return Ok(());
    }

    let mut buffer = vec![0u8; CHUNK_SIZE];
    while let Some(packet) = inbound.message().await.map_err(|e| {
        SessionError::Io(std::io::Error::other(e.message().to_string()))
    })? {
        match packet.kind() {
            Some(PacketType::PacketReq) => {
                let Some(entry) = entries.get(packet.id as usize) else {
                    let _ = tx
                        .send(Err(Status::invalid_argument(format!(
                            "invalid file request {}",
                            packet.id
                        ))))
                        .await;
                    return Ok(());
                };
                let mut file = tokio::fs::File::open(&entry.path).await?;
                loop {
                    let n = file.read(&mut buffer).await?;
                    if n == 0 {
                        break;
                    }
                    if !send(&tx, Packet::data(packet.id, buffer[..n].to_vec())).await {
                        return Ok(());
                    }
                }
                send(&tx, Packet::data(packet.id, Vec::new())).await;
            }
            Some(PacketType::PacketFin) => {
                send(&tx, Packet::fin()).await;
                return Ok(());
            }
            Some(PacketType::PacketErr) => {
                tracing::warn!(
                    "Receiver reported error: {}",
                    String::from_utf8_lossy(&packet.data)
                );
                return Ok(());
            }
            _ => {}
        }
    }
    Ok(())
}

/// 相対パスをターゲットディレクトリ内に解決（外側を指すパスは拒否）
fn resolve_within(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(SessionError::InvalidPath(rel.to_string()));
    }
    Ok(root.join(rel_path))
}

/// 受信したリンク先がターゲットディレクトリ内に留まるか
fn check_linkname(linkname: &str) -> Result<()> {
    let link = Path::new(linkname);
    if linkname.is_empty()
        || link
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(SessionError::InvalidPath(linkname.to_string()));
    }
    Ok(())
}

/// 既存のシンボリックリンクを経由して書き込まないよう取り除く
async fn remove_symlink(path: &Path) -> Result<()> {
    if let Ok(metadata) = tokio::fs::symlink_metadata(path).await
        && metadata.file_type().is_symlink()
    {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & MODE_PERM))?;
    Ok(())
}

/// 受信側: STAT を受け取り、通常ファイルを REQ して書き出す
async fn receive_into(
    root: PathBuf,
    mut inbound: Streaming<Packet>,
    tx: mpsc::Sender<std::result::Result<Packet, Status>>,
) -> Result<()> {
    tokio::fs::create_dir_all(&root).await?;

    let mut next_id: u32 = 0;
    let mut wanted: Vec<(u32, PathBuf, u32)> = Vec::new();
    let mut open: HashMap<u32, (tokio::fs::File, PathBuf, u32)> = HashMap::new();
    let mut stats_done = false;

    while let Some(packet) = inbound.message().await.map_err(|e| {
        SessionError::Io(std::io::Error::other(e.message().to_string()))
    })? {
        match packet.kind() {
            Some(PacketType::PacketStat) if !stats_done => {
                let Some(stat) = packet.stat else {
                    stats_done = true;
                    for (id, path, mode) in wanted.drain(..) {
                        remove_symlink(&path).await?;
                        let file = tokio::fs::File::create(&path).await?;
                        open.insert(id, (file, path, mode));
                        send(&tx, Packet::request(id)).await;
                    }
                    if open.is_empty() {
                        send(&tx, Packet::fin()).await;
                    }
                    continue;
                };

                let id = next_id;
                next_id += 1;
                let target = resolve_within(&root, &stat.path)?;
                if stat.is_dir() {
                    tokio::fs::create_dir_all(&target).await?;
                    set_mode(&target, stat.mode)?;
                } else if stat.is_symlink() {
                    check_linkname(&stat.linkname)?;
                    let _ = tokio::fs::remove_file(&target).await;
                    tokio::fs::symlink(&stat.linkname, &target).await?;
                } else if stat.is_regular() {
                    wanted.push((id, target, stat.mode));
                }
            }
            Some(PacketType::PacketData) => {
                if packet.data.is_empty() {
                    if let Some((mut file, path, mode)) = open.remove(&packet.id) {
                        file.flush().await?;
                        set_mode(&path, mode)?;
                    }
                    if open.is_empty() {
                        send(&tx, Packet::fin()).await;
                    }
                } else if let Some((file, _, _)) = open.get_mut(&packet.id) {
                    file.write_all(&packet.data).await?;
                }
            }
            Some(PacketType::PacketFin) => return Ok(()),
            Some(PacketType::PacketErr) => {
                return Err(SessionError::Io(std::io::Error::other(
                    String::from_utf8_lossy(&packet.data).into_owned(),
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

type PacketStream = ReceiverStream<std::result::Result<Packet, Status>>;

#[tonic::async_trait]
impl FileSync for FsSyncProvider {
    type DiffCopyStream = PacketStream;

    async fn diff_copy(
        &self,
        request: Request<Streaming<Packet>>,
    ) -> std::result::Result<Response<Self::DiffCopyStream>, Status> {
        let meta = request.metadata();
        let name = metadata_values(meta, KEY_DIR_NAME)
            .into_iter()
            .next()
            .unwrap_or_default();
        let include = metadata_values(meta, KEY_INCLUDE_PATTERNS);
        let exclude = metadata_values(meta, KEY_EXCLUDE_PATTERNS);
        let follow = metadata_values(meta, KEY_FOLLOW_PATHS);

        let synced = self
            .dir(&name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownDir(name.clone()))?;
        tracing::debug!(
            "Syncing '{}' from {} (include={:?}, exclude={:?}, follow={:?})",
            name,
            synced.dir.display(),
            include,
            exclude,
            follow
        );

        let entries = tokio::task::spawn_blocking(move || {
            let include = include_with_followed(&synced.dir, &include, &follow);
            let filter = PathFilter::new(&include, &exclude)?;
            walk(&synced, &filter)
        })
        .await
        .map_err(|e| Status::internal(e.to_string()))??;
        tracing::debug!("Sending {} entries for '{}'", entries.len(), name);

        let (tx, rx) = mpsc::channel(16);
        let inbound = request.into_inner();
        tokio::spawn(async move {
            if let Err(e) = send_dir(entries, inbound, tx.clone()).await {
                tracing::warn!("File sync for '{}' failed: {}", name, e);
                let _ = tx.send(Err(e.into())).await;
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[tonic::async_trait]
impl FileSend for FsSyncTarget {
    type DiffCopyStream = PacketStream;

    async fn diff_copy(
        &self,
        request: Request<Streaming<Packet>>,
    ) -> std::result::Result<Response<Self::DiffCopyStream>, Status> {
        let root = self.dir.clone();
        tracing::debug!("Receiving files into {}", root.display());

        let (tx, rx) = mpsc::channel(16);
        let inbound = request.into_inner();
        tokio::spawn(async move {
            if let Err(e) = receive_into(root, inbound, tx.clone()).await {
                tracing::warn!("File download failed: {}", e);
                let _ = tx.send(Ok(Packet::error(&e.to_string()))).await;
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_without_patterns_allows_everything() {
        let filter = PathFilter::new(&[], &[]).unwrap();
        assert!(filter.allows("a.txt", false));
        assert!(filter.allows("dir/b.txt", false));
    }

    #[test]
    fn test_filter_include() {
        let filter = PathFilter::new(&["workflow.sw.json".to_string()], &[]).unwrap();
        assert!(filter.allows("workflow.sw.json", false));
        assert!(!filter.allows("other.json", false));

        let filter = PathFilter::new(&["src/*.json".to_string()], &[]).unwrap();
        assert!(filter.allows("src", true));
        assert!(filter.allows("src/a.json", false));
        assert!(!filter.allows("target", true));
    }

    #[test]
    fn test_filter_exclude_covers_children() {
        let filter = PathFilter::new(&[], &["target".to_string()]).unwrap();
        assert!(!filter.allows("target", true));
        assert!(!filter.allows("target/classes/a.class", false));
        assert!(filter.allows("src/a.java", false));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = PathFilter::new(&["[".to_string()], &[]);
        assert!(matches!(result, Err(SessionError::InvalidPattern { .. })));
    }

    #[test]
    fn test_resolve_within_rejects_escape() {
        let root = Path::new("/tmp/out");
        assert_eq!(
            resolve_within(root, "a/b.yaml").unwrap(),
            PathBuf::from("/tmp/out/a/b.yaml")
        );
        assert!(resolve_within(root, "../etc/passwd").is_err());
        assert!(resolve_within(root, "/etc/passwd").is_err());
    }

    #[test]
    fn test_check_linkname() {
        assert!(check_linkname("knative.yml").is_ok());
        assert!(check_linkname("./sub/knative.yml").is_ok());
        assert!(check_linkname("").is_err());
        assert!(check_linkname("/etc/passwd").is_err());
        assert!(check_linkname("../outside").is_err());
        assert!(check_linkname("sub/../../outside").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_follow_symlinks() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("real/nested")).unwrap();
        std::fs::write(dir.path().join("real/nested/app.json"), "{}").unwrap();
        std::os::unix::fs::symlink("real/nested", dir.path().join("hop")).unwrap();
        std::os::unix::fs::symlink("hop/app.json", dir.path().join("app.json")).unwrap();
        std::os::unix::fs::symlink("/real", dir.path().join("absolute")).unwrap();
        std::os::unix::fs::symlink("../../etc", dir.path().join("escape")).unwrap();

        std::os::unix::fs::symlink("loop", dir.path().join("loop")).unwrap();

        assert_eq!(
            follow_symlinks(dir.path(), &["./app.json".to_string()]),
            ["app.json", "hop", "real/nested/app.json"]
        );
        assert_eq!(
            follow_symlinks(dir.path(), &["absolute".to_string()]),
            ["absolute", "real"]
        );
        assert!(follow_symlinks(dir.path(), &["escape".to_string()]).is_empty());
        assert_eq!(follow_symlinks(dir.path(), &["real".to_string()]), ["real"]);
        assert_eq!(follow_symlinks(dir.path(), &["loop".to_string()]), ["loop"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_followed_target_passes_include_filter() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("shared")).unwrap();
        std::fs::write(dir.path().join("shared/workflow.sw.json"), "{}").unwrap();
        std::fs::write(dir.path().join("other.txt"), "x").unwrap();
        std::os::unix::fs::symlink(
            "shared/workflow.sw.json",
            dir.path().join("workflow.sw.json"),
        )
        .unwrap();

        let include = vec!["workflow.sw.json".to_string()];
        let synced = SyncedDir::new("context", dir.path());

        let plain = PathFilter::new(&include, &[]).unwrap();
        let paths: Vec<String> = walk(&synced, &plain)
            .unwrap()
            .into_iter()
            .map(|e| e.stat.path)
            .collect();
        assert_eq!(paths, ["workflow.sw.json"]);

        let followed = include_with_followed(dir.path(), &include, &include);
        let filter = PathFilter::new(&followed, &[]).unwrap();
        let entries = walk(&synced, &filter).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.stat.path.as_str()).collect();
        assert_eq!(
            paths,
            ["shared", "shared/workflow.sw.json", "workflow.sw.json"]
        );
        assert!(entries[2].stat.is_symlink());
        assert_eq!(entries[2].stat.linkname, "shared/workflow.sw.json");
    }

    #[test]
    fn test_walk_is_ordered_and_mapped() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/z.txt"), "z").unwrap();

        let synced = SyncedDir::new("context", dir.path()).with_map(reset_ownership());
        let entries = walk(&synced, &PathFilter::default()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.stat.path.as_str()).collect();
        assert_eq!(paths, ["a", "a/z.txt", "b.txt"]);

        assert!(entries[0].stat.is_dir());
        assert!(entries[1].stat.is_regular());
        assert_eq!(entries[2].stat.size, 1);
        assert!(entries.iter().all(|e| e.stat.uid == 0 && e.stat.gid == 0));
    }

    #[test]
    fn test_walk_skip_map() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "k").unwrap();
        std::fs::write(dir.path().join("drop.txt"), "d").unwrap();

        let synced = SyncedDir::new("context", dir.path()).with_map(Arc::new(|path, _| {
            if path == "drop.txt" {
                MapResult::Skip
            } else {
                MapResult::Keep
            }
        }));
        let entries = walk(&synced, &PathFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stat.path, "keep.txt");
    }
}
