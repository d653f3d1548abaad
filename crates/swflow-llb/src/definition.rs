//! マーシャル済みのビルド定義

use crate::error::Result;
use crate::pb;
use crate::state::digest_of;
use prost::Message;
use std::io::Write;

/// `buildctl build` の標準入力に渡すバイナリ定義
///
/// Op は依存が先に並び、最後に終端 Op が来ます。
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    inner: pb::Definition,
}

impl Definition {
    pub(crate) fn new(inner: pb::Definition) -> Self {
        Self { inner }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(pb::Definition::decode(bytes)?))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.encode_to_vec()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// 含まれる Op の数（終端 Op を含む）
    pub fn len(&self) -> usize {
        self.inner.def.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.def.is_empty()
    }

    /// 各 Op のダイジェスト（定義内の順序）
    pub fn digests(&self) -> Vec<String> {
        self.inner.def.iter().map(|bytes| digest_of(bytes)).collect()
    }

    /// 各 Op をデコード
    pub fn ops(&self) -> Result<Vec<pb::Op>> {
        self.inner
            .def
            .iter()
            .map(|bytes| Ok(pb::Op::decode(bytes.as_slice())?))
            .collect()
    }

    pub fn metadata(&self, digest: &str) -> Option<&pb::OpMetadata> {
        self.inner.metadata.get(digest)
    }
}
