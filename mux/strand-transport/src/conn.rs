// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection: owner of the pipe, the handshake outcome, the flow
//! table and the reader/writer tasks.
//!
//! One reader task owns the receive side of the pipe and demultiplexes
//! inbound messages; one writer task owns the send side and drains three
//! bounded queues in strict priority order (releases, then control, then
//! flow data). All other state lives behind a single mutex, with credit
//! accounting off to the side so the hot path does not contend on it.

use crate::{
    blessings::{BlessingsFlow, BLESSINGS_FLOW_ID},
    error::Error,
    flow::{Flow, PendingOpen, RecvItem},
    flow_control::{RecvAccounting, SendCredit},
    handshake::{self, HandshakeOutcome},
    options::ConnOptions,
    pipe::{MessagePipe, PipeReader, PipeWriter},
    Crypter, DischargePreparer, FlowHandler, PeerAuthorizer, RejectedBlessing,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use strand_core::{
    buffer::NetBufPool,
    endpoint::{Endpoint, RoutingId},
    message::{
        AckLameDuck, Auth, Data, EnterLameDuck, HealthCheckResponse, Message, OpenFlow, Release,
        TearDown,
    },
    security::{Blessings, Discharge, Principal, PublicKey},
    version::{Version, VersionRange},
};
use strand_crypto::Role;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, watch, Notify},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, trace, warn};

const RELEASE_QUEUE_DEPTH: usize = 128;
const CONTROL_QUEUE_DEPTH: usize = 64;
const DATA_QUEUE_DEPTH: usize = 64;

/// Connection lifecycle
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Active,
    Closing,
    Closed,
}

pub(crate) struct FlowEntry {
    recv_tx: mpsc::UnboundedSender<RecvItem>,
    local_closed: bool,
    remote_closed: bool,
}

struct MuxState {
    status: Status,
    flows: HashMap<u64, FlowEntry>,
    next_flow_id: u64,
    local_lame_duck: bool,
    remote_lame_duck: bool,
    remote_acked_lame_duck: bool,
}

enum CloseOrigin {
    App,
    Reader,
    Writer,
}

pub(crate) struct ConnInner {
    role: Role,
    version: Version,
    mtu: u64,
    negotiated_tokens: u64,
    local_ep: Endpoint,
    remote_ep: Endpoint,
    rtt: Duration,
    remote_public_key: PublicKey,
    remote_blessings: Mutex<Blessings>,
    remote_discharges: Mutex<Vec<Discharge>>,
    local_blessings_key: u64,
    local_discharge_key: u64,
    authorized_names: Vec<String>,
    rejected: Vec<RejectedBlessing>,
    discharge_refresh: Option<Duration>,

    opts: ConnOptions,
    blessings_flow: Arc<BlessingsFlow>,
    send_credit: SendCredit,
    recv_accounting: RecvAccounting,

    mux: Mutex<MuxState>,
    release_tx: mpsc::Sender<Message>,
    control_tx: mpsc::Sender<Message>,
    data_tx: mpsc::Sender<Message>,
    shutdown_tx: watch::Sender<bool>,

    close_reason: Mutex<Option<String>>,
    closed_notify: Notify,
    lame_duck_notify: Notify,
    last_activity: Mutex<Instant>,
    handler: Option<Arc<dyn FlowHandler>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A secure multiplexed connection over one byte-oriented transport
pub struct Conn {
    inner: Arc<ConnInner>,
}

impl Conn {
    /// Dials: runs the client half of the handshake and starts the
    /// connection tasks. Failure tears the transport down.
    #[allow(clippy::too_many_arguments)]
    pub async fn new_dialed<T>(
        transport: T,
        local_ep: Endpoint,
        remote_ep: Endpoint,
        versions: VersionRange,
        principal: Arc<dyn Principal>,
        authorizer: Option<Arc<dyn PeerAuthorizer>>,
        handler: Option<Arc<dyn FlowHandler>>,
        crypter: Option<Arc<dyn Crypter>>,
        opts: ConnOptions,
    ) -> Result<Self, Error>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut pipe = MessagePipe::new(transport, NetBufPool::new());
        let blessings_flow = Arc::new(BlessingsFlow::new(crypter));
        let dial_as_server = handler.is_some();

        let outcome = timeout(
            opts.handshake_timeout,
            handshake::dial(
                &mut pipe,
                &blessings_flow,
                &principal,
                versions,
                &local_ep,
                &remote_ep,
                authorizer.as_ref(),
                dial_as_server,
                &opts,
            ),
        )
        .await
        .map_err(|_| Error::HandshakeTimeout)??;

        Ok(Self::start(Role::Dialer, pipe, outcome, blessings_flow, handler, opts))
    }

    /// Accepts: runs the server half of the handshake and starts the
    /// connection tasks
    #[allow(clippy::too_many_arguments)]
    pub async fn new_accepted<T>(
        transport: T,
        authorized_peers: Vec<String>,
        local_ep: Endpoint,
        versions: VersionRange,
        principal: Arc<dyn Principal>,
        handler: Arc<dyn FlowHandler>,
        preparer: Option<Arc<dyn DischargePreparer>>,
        crypter: Option<Arc<dyn Crypter>>,
        opts: ConnOptions,
    ) -> Result<Self, Error>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut pipe = MessagePipe::new(transport, NetBufPool::new());
        let blessings_flow = Arc::new(BlessingsFlow::new(crypter));

        let outcome = timeout(
            opts.handshake_timeout,
            handshake::accept(
                &mut pipe,
                &blessings_flow,
                &principal,
                versions,
                &local_ep,
                &authorized_peers,
                preparer.as_ref(),
                &opts,
            ),
        )
        .await
        .map_err(|_| Error::HandshakeTimeout)??;

        Ok(Self::start(
            Role::Acceptor,
            pipe,
            outcome,
            blessings_flow,
            Some(handler),
            opts,
        ))
    }

    fn start<T>(
        role: Role,
        pipe: MessagePipe<T>,
        outcome: HandshakeOutcome,
        blessings_flow: Arc<BlessingsFlow>,
        handler: Option<Arc<dyn FlowHandler>>,
        opts: ConnOptions,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (pipe_reader, pipe_writer) = pipe.split();
        let (release_tx, release_rx) = mpsc::channel(RELEASE_QUEUE_DEPTH);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let (data_tx, data_rx) = mpsc::channel(DATA_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // dialer-allocated ids are odd, acceptor-allocated even; 1 and 2
        // belong to the blessings flow
        let next_flow_id = match role {
            Role::Dialer => 3,
            Role::Acceptor => 4,
        };

        let inner = Arc::new(ConnInner {
            role,
            version: outcome.version,
            mtu: outcome.mtu,
            negotiated_tokens: outcome.negotiated_tokens,
            local_ep: outcome.local_ep,
            remote_ep: outcome.remote_ep,
            rtt: outcome.rtt,
            remote_public_key: outcome.remote_public_key,
            remote_blessings: Mutex::new(outcome.remote_blessings),
            remote_discharges: Mutex::new(outcome.remote_discharges),
            local_blessings_key: outcome.blessings_key,
            local_discharge_key: outcome.discharge_key,
            authorized_names: outcome.authorized_names,
            rejected: outcome.rejected,
            discharge_refresh: outcome.discharge_refresh,
            opts,
            blessings_flow,
            send_credit: SendCredit::new(outcome.negotiated_tokens),
            recv_accounting: RecvAccounting::new(outcome.negotiated_tokens),
            mux: Mutex::new(MuxState {
                status: Status::Active,
                flows: HashMap::new(),
                next_flow_id,
                local_lame_duck: false,
                remote_lame_duck: false,
                remote_acked_lame_duck: false,
            }),
            release_tx,
            control_tx,
            data_tx,
            shutdown_tx,
            close_reason: Mutex::new(None),
            closed_notify: Notify::new(),
            lame_duck_notify: Notify::new(),
            last_activity: Mutex::new(Instant::now()),
            handler,
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(writer_task(
            inner.clone(),
            pipe_writer,
            release_rx,
            control_rx,
            data_rx,
            shutdown_rx,
        )));
        tasks.push(tokio::spawn(reader_task(inner.clone(), pipe_reader)));
        if let Some(channel_timeout) = inner.opts.channel_timeout {
            tasks.push(tokio::spawn(health_check_task(
                inner.clone(),
                channel_timeout,
            )));
        }
        *inner.tasks.lock().unwrap() = tasks;

        Self { inner }
    }

    /// Opens a new flow using the connection's own blessings
    pub async fn dial_flow(&self) -> Result<Flow, Error> {
        self.inner.dial_flow(None, &[]).await
    }

    /// Opens a new flow presenting specific blessings and discharges
    pub async fn dial_flow_with(
        &self,
        blessings: Blessings,
        discharges: &[Discharge],
    ) -> Result<Flow, Error> {
        self.inner.dial_flow(Some(blessings), discharges).await
    }

    /// Announces lame duck and waits for the peer's acknowledgment
    pub async fn enter_lame_duck(&self) -> Result<(), Error> {
        self.inner.enter_lame_duck().await
    }

    /// Tears the connection down, cancelling all flows
    pub async fn close(&self, reason: Option<String>) {
        self.inner.shutdown(reason, CloseOrigin::App);
    }

    /// Resolves once the connection has fully closed
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.closed_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.status() == Status::Closed {
                return;
            }
            notified.await;
        }
    }

    pub fn status(&self) -> Status {
        self.inner.mux.lock().unwrap().status
    }

    /// The reason the connection closed, if it has
    pub fn close_reason(&self) -> Option<String> {
        self.inner.close_reason.lock().unwrap().clone()
    }

    /// True if `ep` names this connection's remote, or names no routing
    /// id at all
    pub fn matches_rid(&self, ep: &Endpoint) -> bool {
        ep.matches_routing_id(self.inner.remote_ep.routing_id)
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.inner.local_ep
    }

    pub fn remote_endpoint(&self) -> &Endpoint {
        &self.inner.remote_ep
    }

    pub fn remote_routing_id(&self) -> RoutingId {
        self.inner.remote_ep.routing_id
    }

    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// True when this end initiated the connection
    pub fn is_dialer(&self) -> bool {
        matches!(self.inner.role, Role::Dialer)
    }

    pub fn mtu(&self) -> u64 {
        self.inner.mtu
    }

    /// Round-trip time measured during the handshake
    pub fn rtt(&self) -> Duration {
        self.inner.rtt
    }

    pub fn remote_public_key(&self) -> &PublicKey {
        &self.inner.remote_public_key
    }

    pub fn remote_blessings(&self) -> Blessings {
        self.inner.remote_blessings.lock().unwrap().clone()
    }

    /// Names the authorizer accepted during the dial handshake
    pub fn authorized_names(&self) -> &[String] {
        &self.inner.authorized_names
    }

    pub fn rejected_blessings(&self) -> &[RejectedBlessing] {
        &self.inner.rejected
    }

    /// How long the acceptor's discharges stay fresh; a connection in
    /// lame duck never refreshes them
    pub fn discharge_refresh(&self) -> Option<Duration> {
        self.inner.discharge_refresh
    }

    /// True once either side has announced lame duck
    pub fn in_lame_duck(&self) -> bool {
        let mux = self.inner.mux.lock().unwrap();
        mux.local_lame_duck || mux.remote_lame_duck
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        // a dropped handle tears the connection down; flows learn about
        // it through their cancelled receive queues
        self.inner.shutdown(None, CloseOrigin::App);
    }
}

impl ConnInner {
    #[inline]
    pub(crate) fn mtu(&self) -> u64 {
        self.mtu
    }

    #[inline]
    pub(crate) fn negotiated_tokens(&self) -> u64 {
        self.negotiated_tokens
    }

    pub(crate) async fn acquire_credit(&self, id: u64, want: u64) -> Result<u64, Error> {
        self.send_credit.acquire(id, want).await
    }

    pub(crate) async fn send_flow_data(&self, msg: Message) -> Result<(), Error> {
        self.data_tx
            .send(msg)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Records application consumption and schedules a Release once the
    /// threshold is crossed
    pub(crate) fn note_consumed(&self, id: u64, n: u64) {
        if id == BLESSINGS_FLOW_ID {
            return;
        }
        if let Some(counters) = self.recv_accounting.on_read(id, n) {
            let _ = self.release_tx.try_send(Message::from(Release { counters }));
        }
    }

    pub(crate) fn note_local_close(&self, id: u64) {
        let mut mux = self.mux.lock().unwrap();
        if let Some(entry) = mux.flows.get_mut(&id) {
            entry.local_closed = true;
            if entry.remote_closed {
                self.remove_flow_locked(&mut mux, id);
            }
        }
    }

    /// Cleanup for a handle dropped without an orderly close
    pub(crate) fn drop_flow(&self, id: u64, send_close: bool) {
        let mut mux = self.mux.lock().unwrap();
        let Some(entry) = mux.flows.get_mut(&id) else {
            return;
        };
        if send_close && !entry.local_closed {
            let _ = self.data_tx.try_send(Message::from(Data {
                id,
                flags: strand_core::message::flags::CLOSE,
                payload: Vec::new(),
            }));
        }
        self.remove_flow_locked(&mut mux, id);
    }

    fn remove_flow_locked(&self, mux: &mut MuxState, id: u64) {
        mux.flows.remove(&id);
        self.send_credit.remove_flow(id);
        if let Some(counters) = self.recv_accounting.on_close(id) {
            let _ = self.release_tx.try_send(Message::from(Release { counters }));
        }
    }

    async fn dial_flow(
        self: &Arc<Self>,
        blessings: Option<Blessings>,
        discharges: &[Discharge],
    ) -> Result<Flow, Error> {
        let (blessings_key, discharge_key) = match blessings {
            Some(blessings) => {
                let (bkey, dkey, records) =
                    self.blessings_flow.prepare_send(&blessings, discharges, &[])?;
                for record in records {
                    // the control queue outranks flow data, so these
                    // records reach the peer before the OpenFlow that
                    // references them
                    self.control_tx
                        .send(record)
                        .await
                        .map_err(|_| Error::ConnectionClosed)?;
                }
                (bkey, dkey)
            }
            None => (self.local_blessings_key, self.local_discharge_key),
        };

        let (id, recv_rx) = {
            let mut mux = self.mux.lock().unwrap();
            ensure_active(&mux)?;
            if mux.flows.len() >= self.opts.max_flows {
                return Err(Error::TooManyFlows);
            }
            let id = mux.next_flow_id;
            mux.next_flow_id += 2;
            let (recv_tx, recv_rx) = mpsc::unbounded_channel();
            mux.flows.insert(
                id,
                FlowEntry {
                    recv_tx,
                    local_closed: false,
                    remote_closed: false,
                },
            );
            (id, recv_rx)
        };
        self.send_credit.add_flow(id, self.negotiated_tokens);
        trace!(id, "dialed flow");

        Ok(Flow {
            conn: self.clone(),
            id,
            recv: recv_rx,
            leftover: Vec::new(),
            remote_done: false,
            write_closed: false,
            pending_open: Some(PendingOpen {
                blessings_key,
                discharge_key,
            }),
            remote_blessings: Blessings::default(),
        })
    }

    async fn enter_lame_duck(self: &Arc<Self>) -> Result<(), Error> {
        {
            let mut mux = self.mux.lock().unwrap();
            ensure_active(&mux)?;
            mux.local_lame_duck = true;
        }
        // ordered behind queued flow data so the peer drains everything
        // it was already promised before it sees the announcement
        self.data_tx
            .send(Message::from(EnterLameDuck))
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        loop {
            let notified = self.lame_duck_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mux = self.mux.lock().unwrap();
                if mux.remote_acked_lame_duck {
                    return Ok(());
                }
                if mux.status != Status::Active {
                    return Err(Error::ConnectionClosed);
                }
            }
            notified.await;
        }
    }

    /// Single exit path for the connection; idempotent
    fn shutdown(self: &Arc<Self>, reason: Option<String>, origin: CloseOrigin) {
        {
            let mut mux = self.mux.lock().unwrap();
            if mux.status != Status::Active {
                return;
            }
            mux.status = Status::Closing;
        }
        debug!(reason = reason.as_deref().unwrap_or(""), "closing connection");
        *self.close_reason.lock().unwrap() = reason.clone();

        // best effort: tell the peer why
        let _ = self.control_tx.try_send(Message::from(TearDown {
            message: reason.unwrap_or_default(),
        }));
        let _ = self.shutdown_tx.send(true);

        self.send_credit.close();
        self.blessings_flow.close();

        {
            let mut mux = self.mux.lock().unwrap();
            // dropping the senders cancels pending reads
            mux.flows.clear();
            mux.status = Status::Closed;
        }

        // the writer drains and exits via the shutdown signal; the
        // reader is parked in recv and must be aborted unless it is the
        // one closing us
        let tasks = self.tasks.lock().unwrap();
        for (index, task) in tasks.iter().enumerate() {
            let is_writer = index == 0;
            let is_reader = index == 1;
            match origin {
                CloseOrigin::Reader if is_reader => continue,
                CloseOrigin::Writer if is_writer => continue,
                _ => {}
            }
            if !is_writer {
                task.abort();
            }
        }
        drop(tasks);

        self.closed_notify.notify_waiters();
        self.lame_duck_notify.notify_waiters();
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// Demultiplexes one Data message
    fn handle_data(self: &Arc<Self>, data: Data) -> Result<(), Error> {
        if data.id == BLESSINGS_FLOW_ID {
            return self.blessings_flow.process(&data.payload);
        }

        let mut mux = self.mux.lock().unwrap();
        let close = data.closes_flow();
        let Some(entry) = mux.flows.get_mut(&data.id) else {
            // data racing a local close is dropped, not an error
            trace!(id = data.id, "data for unknown flow");
            return Ok(());
        };
        if !data.payload.is_empty() {
            let _ = entry.recv_tx.send(RecvItem::Bytes(data.payload));
        }
        if close {
            entry.remote_closed = true;
            let _ = entry.recv_tx.send(RecvItem::End);
            if entry.local_closed {
                let id = data.id;
                self.remove_flow_locked(&mut mux, id);
            }
        }
        Ok(())
    }

    /// Creates the peer-opened flow and hands it to the accept handler
    fn handle_open_flow(self: &Arc<Self>, open: OpenFlow) -> Result<(), Error> {
        let remote_blessings = self
            .blessings_flow
            .try_get_remote(open.blessings_key, open.discharge_key)
            .map(|(blessings, _)| blessings)
            .unwrap_or_default();

        let (recv_rx, close) = {
            let mut mux = self.mux.lock().unwrap();
            if mux.flows.len() >= self.opts.max_flows {
                return Err(Error::TooManyFlows);
            }
            if mux.flows.contains_key(&open.id) {
                trace!(id = open.id, "duplicate open for existing flow");
                return Ok(());
            }
            let (recv_tx, recv_rx) = mpsc::unbounded_channel();
            let close = open.flags & strand_core::message::flags::CLOSE != 0;
            if !open.payload.is_empty() {
                let _ = recv_tx.send(RecvItem::Bytes(open.payload));
            }
            if close {
                let _ = recv_tx.send(RecvItem::End);
            }
            mux.flows.insert(
                open.id,
                FlowEntry {
                    recv_tx,
                    local_closed: false,
                    remote_closed: close,
                },
            );
            (recv_rx, close)
        };
        self.send_credit.add_flow(open.id, open.initial_counters);
        trace!(id = open.id, close, "accepted flow");

        let flow = Flow {
            conn: self.clone(),
            id: open.id,
            recv: recv_rx,
            leftover: Vec::new(),
            remote_done: false,
            write_closed: false,
            pending_open: None,
            remote_blessings,
        };
        if let Some(handler) = &self.handler {
            handler.handle_flow(flow);
        }
        Ok(())
    }

    /// A post-handshake Auth refreshes the peer's blessings; the public
    /// key bound at handshake time must never change
    fn handle_auth(&self, auth: Auth) -> Result<(), Error> {
        let Some((blessings, discharges)) = self
            .blessings_flow
            .try_get_remote(auth.blessings_key, auth.discharge_key)
        else {
            return Err(Error::NoPublicKey);
        };
        if blessings.public_key != self.remote_public_key {
            return Err(Error::InconsistentPublicKey);
        }
        *self.remote_blessings.lock().unwrap() = blessings;
        *self.remote_discharges.lock().unwrap() = discharges;
        Ok(())
    }
}

fn ensure_active(mux: &MuxState) -> Result<(), Error> {
    if mux.status != Status::Active {
        return Err(Error::ConnectionClosed);
    }
    Ok(())
}

async fn reader_task<T>(inner: Arc<ConnInner>, mut pipe: PipeReader<T>)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let result = reader_loop(&inner, &mut pipe).await;
    let reason = match &result {
        Ok(()) => None,
        Err(err) => {
            if !matches!(err, Error::TearDownReceived(_)) {
                warn!(error = %err, "reader failed");
            }
            Some(format!("{}: {err}", err.id()))
        }
    };
    inner.shutdown(reason, CloseOrigin::Reader);
}

async fn reader_loop<T>(inner: &Arc<ConnInner>, pipe: &mut PipeReader<T>) -> Result<(), Error>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let msg = pipe.recv().await?;
        inner.touch();
        trace!(tag = msg.tag(), "received message");
        match msg {
            Message::Release(release) => inner.send_credit.release(&release.counters),
            Message::Data(data) => inner.handle_data(data)?,
            Message::OpenFlow(open) => inner.handle_open_flow(open)?,
            Message::Auth(auth) => inner.handle_auth(auth)?,
            Message::TearDown(teardown) => {
                return Err(Error::TearDownReceived(teardown.message))
            }
            Message::EnterLameDuck(_) => {
                inner.mux.lock().unwrap().remote_lame_duck = true;
                inner.lame_duck_notify.notify_waiters();
                inner
                    .control_tx
                    .send(Message::from(AckLameDuck))
                    .await
                    .map_err(|_| Error::ConnectionClosed)?;
            }
            Message::AckLameDuck(_) => {
                inner.mux.lock().unwrap().remote_acked_lame_duck = true;
                inner.lame_duck_notify.notify_waiters();
            }
            Message::HealthCheckRequest(_) => {
                inner
                    .control_tx
                    .send(Message::from(HealthCheckResponse))
                    .await
                    .map_err(|_| Error::ConnectionClosed)?;
            }
            Message::HealthCheckResponse(_) => {}
            // proxy traffic is opaque to the multiplexer
            Message::MultiProxyRequest(_)
            | Message::ProxyServerRequest(_)
            | Message::ProxyResponse(_)
            | Message::ProxyErrorResponse(_) => {
                trace!("ignoring proxy message");
            }
            Message::Setup(_) => {
                return Err(Error::Recv(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "setup message after the handshake",
                )))
            }
        }
    }
}

async fn writer_task<T>(
    inner: Arc<ConnInner>,
    mut pipe: PipeWriter<T>,
    mut release_rx: mpsc::Receiver<Message>,
    mut control_rx: mpsc::Receiver<Message>,
    mut data_rx: mpsc::Receiver<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let msg = tokio::select! {
            biased;
            Some(msg) = release_rx.recv() => msg,
            Some(msg) = control_rx.recv() => msg,
            _ = shutdown_rx.changed() => break,
            Some(msg) = data_rx.recv() => msg,
            else => break,
        };
        if let Err(err) = pipe.send(&msg).await {
            warn!(error = %err, "writer failed");
            inner.shutdown(Some(format!("{}: {err}", err.id())), CloseOrigin::Writer);
            return;
        }
    }

    // drain what was already queued, in priority order, so the peer
    // still sees releases and the final TearDown
    while let Ok(msg) = release_rx.try_recv() {
        let _ = pipe.send(&msg).await;
    }
    while let Ok(msg) = control_rx.try_recv() {
        let _ = pipe.send(&msg).await;
    }
    while let Ok(msg) = data_rx.try_recv() {
        let _ = pipe.send(&msg).await;
    }
}

async fn health_check_task(inner: Arc<ConnInner>, channel_timeout: Duration) {
    let probe_interval = (channel_timeout / 4).max(Duration::from_millis(10));
    loop {
        tokio::time::sleep(probe_interval).await;
        let idle = inner.idle_for();
        if idle >= channel_timeout {
            inner.shutdown(
                Some(format!("{}: the channel went idle", Error::ChannelTimeout.id())),
                CloseOrigin::App,
            );
            return;
        }
        if idle >= channel_timeout / 2 {
            let _ = inner
                .control_tx
                .send(Message::from(strand_core::message::HealthCheckRequest))
                .await;
        }
    }
}
