//! セッションのワイヤ型
//!
//! fsutil の `types.Packet` / `types.Stat` と gRPC Health のメッセージ。
//! フィールド番号は上流の .proto に合わせています。

use std::collections::BTreeMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Packet {
    #[prost(enumeration = "PacketType", tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub stat: Option<Stat>,
    #[prost(uint32, tag = "3")]
    pub id: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

impl Packet {
    pub fn stat(id: u32, stat: Stat) -> Self {
        Self {
            r#type: PacketType::PacketStat as i32,
            stat: Some(stat),
            id,
            data: Vec::new(),
        }
    }

    /// STAT 送信の終端（stat なし）
    pub fn end_of_stats() -> Self {
        Self {
            r#type: PacketType::PacketStat as i32,
            ..Default::default()
        }
    }

    pub fn request(id: u32) -> Self {
        Self {
            r#type: PacketType::PacketReq as i32,
            id,
            ..Default::default()
        }
    }

    /// 空の data はそのファイルの終端
    pub fn data(id: u32, data: Vec<u8>) -> Self {
        Self {
            r#type: PacketType::PacketData as i32,
            id,
            data,
            ..Default::default()
        }
    }

    pub fn fin() -> Self {
        Self {
            r#type: PacketType::PacketFin as i32,
            ..Default::default()
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            r#type: PacketType::PacketErr as i32,
            data: message.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> Option<PacketType> {
        PacketType::try_from(self.r#type).ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PacketType {
    PacketStat = 0,
    PacketReq = 1,
    PacketData = 2,
    PacketFin = 3,
    PacketErr = 4,
}

/// ファイルのメタデータ（mode は Go の `os.FileMode` 表現）
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Stat {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(uint32, tag = "2")]
    pub mode: u32,
    #[prost(uint32, tag = "3")]
    pub uid: u32,
    #[prost(uint32, tag = "4")]
    pub gid: u32,
    #[prost(int64, tag = "5")]
    pub size: i64,
    /// UNIX 時刻（ナノ秒）
    #[prost(int64, tag = "6")]
    pub mod_time: i64,
    #[prost(string, tag = "7")]
    pub linkname: String,
    #[prost(int64, tag = "8")]
    pub devmajor: i64,
    #[prost(int64, tag = "9")]
    pub devminor: i64,
    #[prost(btree_map = "string, bytes", tag = "10")]
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

pub const MODE_DIR: u32 = 1 << 31;
pub const MODE_SYMLINK: u32 = 1 << 27;
pub const MODE_SETUID: u32 = 1 << 23;
pub const MODE_SETGID: u32 = 1 << 22;
pub const MODE_STICKY: u32 = 1 << 20;
pub const MODE_PERM: u32 = 0o777;

/// 通常ファイル以外を示すビット（Go の `ModeType` 相当）
const MODE_TYPE: u32 = MODE_DIR | MODE_SYMLINK | (1 << 26) | (1 << 25) | (1 << 24) | (1 << 21) | (1 << 19);

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_DIR != 0
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & MODE_SYMLINK != 0
    }

    pub fn is_regular(&self) -> bool {
        self.mode & MODE_TYPE == 0
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthCheckRequest {
    #[prost(string, tag = "1")]
    pub service: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthCheckResponse {
    #[prost(enumeration = "ServingStatus", tag = "1")]
    pub status: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ServingStatus {
    Unknown = 0,
    Serving = 1,
    NotServing = 2,
    ServiceUnknown = 3,
}

pub mod filesync {
    include!(concat!(env!("OUT_DIR"), "/moby.filesync.v1.FileSync.rs"));
    include!(concat!(env!("OUT_DIR"), "/moby.filesync.v1.FileSend.rs"));
}

pub mod health {
    include!(concat!(env!("OUT_DIR"), "/grpc.health.v1.Health.rs"));
}
