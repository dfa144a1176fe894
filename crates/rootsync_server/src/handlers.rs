//! Transaction handlers.
//!
//! Every handler reads one request message, calls a service and replies
//! with one response message. Service calls run on the blocking pool since
//! they wait on per-key locks and sync the store. Pushes that change a file
//! notify the other members of its root directory after the reply is sent.

use crate::dispatcher::{Dispatcher, InitialHandler, TransactionContext, TransactionHandler};
use crate::error::{ServerError, ServerResult};
use crate::locks::run_blocking;
use crate::notify::Notifier;
use crate::pool::{ConnectionHandle, ConnectionPool};
use crate::registration::RegistrationService;
use crate::sharing::SharingService;
use crate::sync::SyncEngine;
use crate::transport::MessageStream;
use async_trait::async_trait;
use rootsync_protocol::transaction::{
    FILE_HISTORY, JOIN_ROOT_DIR, PUSH_FILE, REGISTER_ROOT_DIR, RESOLVE_CONFLICT, SHARE_FILE,
    STOP_SHARING,
};
use rootsync_protocol::{
    ClientRegisterRequest, Decode, Encode, FileHistoryRequest, FileHistoryResponse,
    NotificationKind, PushFileRequest, PushFileResponse, PushOutcome, ResolveConflictRequest,
    ResolveConflictResponse, RootDirJoinRequest, RootDirRegisterRequest, RootDirResponse,
    ShareRequest, ShareResponse, StopSharingRequest, StopSharingResponse, SyncNotification,
};
use std::sync::Arc;

/// Services shared by the transaction handlers.
pub(crate) struct Services {
    pub registration: Arc<RegistrationService>,
    pub sync: Arc<SyncEngine>,
    pub sharing: Arc<SharingService>,
    pub notifier: Arc<Notifier>,
    pub max_message_size: usize,
}

impl Services {
    async fn receive<T: Decode>(&self, stream: &mut dyn MessageStream) -> ServerResult<T> {
        let message = stream.recv_message().await?;
        if message.len() > self.max_message_size {
            return Err(ServerError::InvalidRequest(format!(
                "message of {} bytes exceeds limit of {}",
                message.len(),
                self.max_message_size
            )));
        }
        Ok(T::decode(&message)?)
    }
}

async fn reply<T: Encode>(stream: &mut dyn MessageStream, message: &T) -> ServerResult<()> {
    let bytes = message
        .encode()
        .map_err(|e| ServerError::Internal(format!("cannot encode response: {e}")))?;
    stream.send_message(bytes).await
}

/// Builds the dispatcher serving every client transaction.
pub(crate) fn build_dispatcher(
    services: Arc<Services>,
    pool: Arc<ConnectionPool>,
) -> ServerResult<Dispatcher> {
    let builder = Dispatcher::builder(Arc::new(RegisterClient(Arc::clone(&services))))
        .register(REGISTER_ROOT_DIR, Arc::new(RegisterRootDir(Arc::clone(&services))))?
        .register(JOIN_ROOT_DIR, Arc::new(JoinRootDir(Arc::clone(&services))))?
        .register(PUSH_FILE, Arc::new(PushFile(Arc::clone(&services))))?
        .register(RESOLVE_CONFLICT, Arc::new(ResolveConflict(Arc::clone(&services))))?
        .register(FILE_HISTORY, Arc::new(History(Arc::clone(&services))))?
        .register(SHARE_FILE, Arc::new(ShareFile(Arc::clone(&services))))?
        .register(STOP_SHARING, Arc::new(StopSharing(services)))?;
    Ok(builder.build(pool))
}

struct RegisterClient(Arc<Services>);

#[async_trait]
impl InitialHandler for RegisterClient {
    async fn register(
        &self,
        connection: &ConnectionHandle,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<String> {
        let request: ClientRegisterRequest = self.0.receive(stream).await?;
        let registration = Arc::clone(&self.0.registration);
        let bound = Arc::clone(connection);
        let response =
            run_blocking(move || registration.register_client(&request, &bound)).await?;

        if let Err(err) = reply(stream, &response).await {
            self.0.registration.unbind_client(&response.uuid, connection);
            return Err(err);
        }
        Ok(response.uuid)
    }
}

struct RegisterRootDir(Arc<Services>);

#[async_trait]
impl TransactionHandler for RegisterRootDir {
    async fn handle(
        &self,
        context: &TransactionContext,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<()> {
        let request: RootDirRegisterRequest = self.0.receive(stream).await?;
        let registration = Arc::clone(&self.0.registration);
        let client_uuid = context.client_uuid.clone();
        let root =
            run_blocking(move || registration.register_root_dir(&client_uuid, &request)).await?;
        reply(stream, &RootDirResponse::from(&root)).await
    }
}

struct JoinRootDir(Arc<Services>);

#[async_trait]
impl TransactionHandler for JoinRootDir {
    async fn handle(
        &self,
        context: &TransactionContext,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<()> {
        let request: RootDirJoinRequest = self.0.receive(stream).await?;
        let registration = Arc::clone(&self.0.registration);
        let client_uuid = context.client_uuid.clone();
        let root = run_blocking(move || registration.join_root_dir(&client_uuid, &request)).await?;
        reply(stream, &RootDirResponse::from(&root)).await
    }
}

struct PushFile(Arc<Services>);

#[async_trait]
impl TransactionHandler for PushFile {
    async fn handle(
        &self,
        context: &TransactionContext,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<()> {
        let request: PushFileRequest = self.0.receive(stream).await?;
        let sync = Arc::clone(&self.0.sync);
        let client_uuid = context.client_uuid.clone();
        let submission =
            run_blocking(move || sync.submit_file_state(&client_uuid, &request)).await?;
        let response = PushFileResponse {
            outcome: submission.outcome,
            latest_hash: submission.file.latest_hash.clone(),
            staged_keys: submission.file.conflict.staged_keys(),
        };
        reply(stream, &response).await?;

        if submission.changed {
            let kind = match submission.outcome {
                PushOutcome::Accepted => NotificationKind::FileUpdated,
                PushOutcome::ConflictOpened | PushOutcome::ConflictAppended => {
                    NotificationKind::ConflictOpened
                }
            };
            let notification =
                SyncNotification::for_file(kind, &submission.file, context.client_uuid.clone());
            self.0.notifier.broadcast(&notification).await;
        }
        Ok(())
    }
}

struct ResolveConflict(Arc<Services>);

#[async_trait]
impl TransactionHandler for ResolveConflict {
    async fn handle(
        &self,
        context: &TransactionContext,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<()> {
        let request: ResolveConflictRequest = self.0.receive(stream).await?;
        let sync = Arc::clone(&self.0.sync);
        let client_uuid = context.client_uuid.clone();
        let file = run_blocking(move || sync.resolve_conflict(&client_uuid, &request)).await?;
        let response = ResolveConflictResponse {
            latest_hash: file.latest_hash.clone(),
            latest_sync_timestamp: file.latest_sync_timestamp,
        };
        reply(stream, &response).await?;

        let notification = SyncNotification::for_file(
            NotificationKind::ConflictResolved,
            &file,
            context.client_uuid.clone(),
        );
        self.0.notifier.broadcast(&notification).await;
        Ok(())
    }
}

struct History(Arc<Services>);

#[async_trait]
impl TransactionHandler for History {
    async fn handle(
        &self,
        context: &TransactionContext,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<()> {
        let request: FileHistoryRequest = self.0.receive(stream).await?;
        let sync = Arc::clone(&self.0.sync);
        let client_uuid = context.client_uuid.clone();
        let entries =
            run_blocking(move || sync.history(&client_uuid, &request.after_path)).await?;
        reply(stream, &FileHistoryResponse { entries }).await
    }
}

struct ShareFile(Arc<Services>);

#[async_trait]
impl TransactionHandler for ShareFile {
    async fn handle(
        &self,
        context: &TransactionContext,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<()> {
        let request: ShareRequest = self.0.receive(stream).await?;
        let service = Arc::clone(&self.0.sharing);
        let client_uuid = context.client_uuid.clone();
        let sharing = run_blocking(move || {
            service.create_link(&client_uuid, &request.after_path, request.max_count)
        })
        .await?;
        let response = ShareResponse {
            link: sharing.link,
            max_count: sharing.max_count,
        };
        reply(stream, &response).await
    }
}

struct StopSharing(Arc<Services>);

#[async_trait]
impl TransactionHandler for StopSharing {
    async fn handle(
        &self,
        context: &TransactionContext,
        stream: &mut dyn MessageStream,
    ) -> ServerResult<()> {
        let request: StopSharingRequest = self.0.receive(stream).await?;
        let sharing = Arc::clone(&self.0.sharing);
        let client_uuid = context.client_uuid.clone();
        let removed =
            run_blocking(move || sharing.stop_sharing(&client_uuid, &request.link)).await?;
        reply(stream, &StopSharingResponse { removed }).await
    }
}
