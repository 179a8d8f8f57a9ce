use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use crate::messages::*;

/// Unary client for the `heronfs.NameService` gRPC service.
///
/// Cloning is cheap: channel clones share one underlying connection.
#[derive(Debug, Clone)]
pub struct NameServiceClient {
    inner: Grpc<Channel>,
}

impl NameServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: Grpc::new(channel),
        }
    }

    async fn unary<Req, Resp>(
        &mut self,
        request: Req,
        path: &'static str,
    ) -> Result<Response<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        self.inner
            .unary(Request::new(request), PathAndQuery::from_static(path), codec)
            .await
    }

    pub async fn open_session(
        &mut self,
        request: OpenSessionRequest,
    ) -> Result<Response<OpenSessionResponse>, Status> {
        self.unary(request, "/heronfs.NameService/OpenSession").await
    }

    pub async fn close_session(
        &mut self,
        request: CloseSessionRequest,
    ) -> Result<Response<EmptyResponse>, Status> {
        self.unary(request, "/heronfs.NameService/CloseSession").await
    }

    pub async fn get_file_status(
        &mut self,
        request: GetFileStatusRequest,
    ) -> Result<Response<GetFileStatusResponse>, Status> {
        self.unary(request, "/heronfs.NameService/GetFileStatus").await
    }

    pub async fn list_status(
        &mut self,
        request: ListStatusRequest,
    ) -> Result<Response<ListStatusResponse>, Status> {
        self.unary(request, "/heronfs.NameService/ListStatus").await
    }

    pub async fn create_file(
        &mut self,
        request: CreateFileRequest,
    ) -> Result<Response<CreateFileResponse>, Status> {
        self.unary(request, "/heronfs.NameService/CreateFile").await
    }

    pub async fn read(&mut self, request: ReadRequest) -> Result<Response<ReadResponse>, Status> {
        self.unary(request, "/heronfs.NameService/Read").await
    }

    pub async fn write(
        &mut self,
        request: WriteRequest,
    ) -> Result<Response<WriteResponse>, Status> {
        self.unary(request, "/heronfs.NameService/Write").await
    }

    pub async fn mkdirs(
        &mut self,
        request: MkdirsRequest,
    ) -> Result<Response<EmptyResponse>, Status> {
        self.unary(request, "/heronfs.NameService/Mkdirs").await
    }

    pub async fn delete(
        &mut self,
        request: DeleteRequest,
    ) -> Result<Response<EmptyResponse>, Status> {
        self.unary(request, "/heronfs.NameService/Delete").await
    }

    pub async fn rename(
        &mut self,
        request: RenameRequest,
    ) -> Result<Response<EmptyResponse>, Status> {
        self.unary(request, "/heronfs.NameService/Rename").await
    }

    pub async fn set_permission(
        &mut self,
        request: SetPermissionRequest,
    ) -> Result<Response<EmptyResponse>, Status> {
        self.unary(request, "/heronfs.NameService/SetPermission").await
    }

    pub async fn set_owner(
        &mut self,
        request: SetOwnerRequest,
    ) -> Result<Response<EmptyResponse>, Status> {
        self.unary(request, "/heronfs.NameService/SetOwner").await
    }

    pub async fn set_times(
        &mut self,
        request: SetTimesRequest,
    ) -> Result<Response<EmptyResponse>, Status> {
        self.unary(request, "/heronfs.NameService/SetTimes").await
    }

    pub async fn truncate(
        &mut self,
        request: TruncateRequest,
    ) -> Result<Response<EmptyResponse>, Status> {
        self.unary(request, "/heronfs.NameService/Truncate").await
    }

    pub async fn get_fs_stats(
        &mut self,
        request: GetFsStatsRequest,
    ) -> Result<Response<GetFsStatsResponse>, Status> {
        self.unary(request, "/heronfs.NameService/GetFsStats").await
    }
}
