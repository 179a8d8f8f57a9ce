//! Prost message structs for the `heronfs.NameService` package.
//!
//! Field tags are stable wire contract; do not renumber.

/// In-band status carried by every response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    EPerm = 1,
    ENotDir = 2,
    ENoEnt = 3,
    EAcces = 4,
    EExist = 5,
    EInval = 6,
    ENotEmpty = 7,
    EDQuot = 8,
    EIo = 9,
    ENoSpc = 10,
    EBusy = 11,
    ENameTooLong = 12,
    ENotSupported = 13,
    ESessionExpired = 14,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FileType {
    Regular = 0,
    Directory = 1,
    Symlink = 2,
}

/// Wire form of one file's metadata
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileStatusProto {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(enumeration = "FileType", tag = "2")]
    pub file_type: i32,
    #[prost(uint64, tag = "3")]
    pub length: u64,
    #[prost(uint32, tag = "4")]
    pub permission: u32,
    #[prost(string, tag = "5")]
    pub owner: String,
    #[prost(string, tag = "6")]
    pub group: String,
    #[prost(uint64, tag = "7")]
    pub atime: u64,
    #[prost(uint64, tag = "8")]
    pub mtime: u64,
    #[prost(uint64, tag = "9")]
    pub block_size: u64,
    #[prost(uint32, tag = "10")]
    pub nlink: u32,
    #[prost(uint32, tag = "11")]
    pub replication: u32,
}

/// Open a session as a given user. An empty `user` selects the shared
/// anonymous session on nameservers that predate per-user sessions.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenSessionRequest {
    #[prost(string, tag = "1")]
    pub user: String,
    #[prost(string, tag = "2")]
    pub primary_group: String,
    #[prost(string, repeated, tag = "3")]
    pub groups: Vec<String>,
    #[prost(uint32, tag = "4")]
    pub client_version: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenSessionResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub session_id: u64,
    #[prost(uint32, tag = "3")]
    pub protocol_version: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseSessionRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
}

/// Response for operations that carry nothing but a status
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmptyResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFileStatusRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFileStatusResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub file: Option<FileStatusProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListStatusRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListStatusResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<FileStatusProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateFileRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(uint32, tag = "3")]
    pub mode: u32,
    #[prost(bool, tag = "4")]
    pub overwrite: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateFileResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub file: Option<FileStatusProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(uint64, tag = "3")]
    pub offset: u64,
    #[prost(uint32, tag = "4")]
    pub length: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(uint64, tag = "3")]
    pub offset: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(uint32, tag = "2")]
    pub written: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MkdirsRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(uint32, tag = "3")]
    pub mode: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(bool, tag = "3")]
    pub recursive: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenameRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub src: String,
    #[prost(string, tag = "3")]
    pub dst: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetPermissionRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(uint32, tag = "3")]
    pub mode: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetOwnerRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(string, optional, tag = "3")]
    pub owner: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub group: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetTimesRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(uint64, optional, tag = "3")]
    pub atime: Option<u64>,
    #[prost(uint64, optional, tag = "4")]
    pub mtime: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TruncateRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(uint64, tag = "3")]
    pub length: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFsStatsRequest {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFsStatsResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub capacity: u64,
    #[prost(uint64, tag = "3")]
    pub used: u64,
    #[prost(uint64, tag = "4")]
    pub remaining: u64,
    #[prost(uint64, tag = "5")]
    pub file_count: u64,
}
