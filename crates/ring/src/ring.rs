//! The tcp ring discovery implementation.
//!
//! Io layer around [RingState]: a listener accepts inbound ring
//! traffic, a single ring task applies messages to the state machine
//! and carries out the resulting effects, and one outbound connection
//! is held to the current ring successor. Failure detection is sender
//! side: a member that cannot deliver to its successor probes it
//! directly, and declares it failed only when the probe also fails.

use crate::protocol::*;
use crate::*;
use gridmesh_api::builder::Builder;
use gridmesh_api::config::Config;
use gridmesh_api::discovery::*;
use gridmesh_api::*;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};

/// The tcp ring discovery factory.
#[derive(Debug)]
pub struct TcpRingFactory {}

impl TcpRingFactory {
    /// Construct a new TcpRingFactory.
    pub fn create() -> DynDiscoveryFactory {
        let out: DynDiscoveryFactory = Arc::new(Self {});
        out
    }
}

impl DiscoveryFactory for TcpRingFactory {
    fn default_config(&self, config: &mut Config) -> MeshResult<()> {
        config.add_default_module_config::<TcpRingModConfig>(
            TCP_RING_MOD.into(),
        )
    }

    fn validate_config(&self, config: &Config) -> MeshResult<()> {
        let config: TcpRingModConfig =
            config.get_module_config(TCP_RING_MOD)?;
        let config = &config.tcp_ring;

        config.bind_addr.parse::<SocketAddr>().map_err(|e| {
            MeshError::config(format!(
                "invalid bind addr {:?}: {e}",
                config.bind_addr,
            ))
        })?;
        for seed in &config.seed_addrs {
            seed.parse::<SocketAddr>().map_err(|e| {
                MeshError::config(format!(
                    "invalid seed addr {seed:?}: {e}"
                ))
            })?;
        }
        if !(config.quorum_fraction > 0.0 && config.quorum_fraction <= 1.0)
        {
            return Err(MeshError::config(
                "quorumFraction must be in (0.0, 1.0]",
            ));
        }
        if config.max_frame_bytes == 0 {
            return Err(MeshError::config(
                "maxFrameBytes must be positive",
            ));
        }
        Ok(())
    }

    fn create(
        &self,
        builder: Arc<Builder>,
        local: NodeInfo,
    ) -> BoxFut<'static, MeshResult<DynDiscovery>> {
        Box::pin(async move {
            let config: TcpRingModConfig =
                builder.config.get_module_config(TCP_RING_MOD)?;
            let out: DynDiscovery =
                TcpRing::create(config.tcp_ring, local).await?;
            Ok(out)
        })
    }
}

enum Cmd {
    Inbound(RingMessage),
    Apply(Vec<RingEffect>, tokio::sync::oneshot::Sender<()>),
}

type Listeners = Arc<Mutex<Vec<DynTopologyListener>>>;

struct TcpRing {
    config: TcpRingConfig,
    seeds: Vec<SocketAddr>,
    state: Arc<Mutex<RingState>>,
    cmd_send: tokio::sync::mpsc::Sender<Cmd>,
    topo_rx: tokio::sync::watch::Receiver<Arc<Topology>>,
    connected_rx: tokio::sync::watch::Receiver<bool>,
    listeners: Listeners,
    tasks: Vec<tokio::task::AbortHandle>,
}

impl Drop for TcpRing {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for TcpRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpRing")
            .field("local", &self.local_node().id)
            .field("topology", &self.topology().version())
            .finish()
    }
}

impl TcpRing {
    async fn create(
        config: TcpRingConfig,
        local: NodeInfo,
    ) -> MeshResult<Arc<Self>> {
        let bind: SocketAddr = config.bind_addr.parse().map_err(|e| {
            MeshError::config(format!(
                "invalid bind addr {:?}: {e}",
                config.bind_addr,
            ))
        })?;
        let mut seeds = Vec::new();
        for seed in &config.seed_addrs {
            seeds.push(seed.parse().map_err(|e| {
                MeshError::config(format!(
                    "invalid seed addr {seed:?}: {e}"
                ))
            })?);
        }

        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| MeshError::other_src("bind ring listener", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| MeshError::other_src("ring listener addr", e))?;
        let local = local.with_addr(addr);
        tracing::info!(node = %local.id, %addr, "ring listener bound");

        let state = Arc::new(Mutex::new(RingState::new(
            local,
            config.quorum_fraction,
        )));
        let (cmd_send, cmd_recv) = tokio::sync::mpsc::channel(1024);
        let (topo_tx, topo_rx) =
            tokio::sync::watch::channel(Arc::new(Topology::empty()));
        let (conn_tx, connected_rx) = tokio::sync::watch::channel(false);
        let listeners: Listeners = Arc::new(Mutex::new(Vec::new()));

        let tasks = vec![
            tokio::task::spawn(accept_task(
                listener,
                state.clone(),
                cmd_send.clone(),
                config.max_frame_bytes as usize,
            ))
            .abort_handle(),
            tokio::task::spawn(ring_task(RingTask {
                state: state.clone(),
                cmd_recv,
                topo_tx,
                conn_tx,
                listeners: listeners.clone(),
                config: config.clone(),
            }))
            .abort_handle(),
        ];

        Ok(Arc::new(Self {
            config,
            seeds,
            state,
            cmd_send,
            topo_rx,
            connected_rx,
            listeners,
            tasks,
        }))
    }

    /// Run effects through the ring task so all io happens in one
    /// place. Resolves once they have been carried out.
    async fn apply(&self, effects: Vec<RingEffect>) -> MeshResult<()> {
        let (ack_send, ack_recv) = tokio::sync::oneshot::channel();
        self.cmd_send
            .send(Cmd::Apply(effects, ack_send))
            .await
            .map_err(|_| MeshError::other("ring task stopped"))?;
        ack_recv
            .await
            .map_err(|_| MeshError::other("ring task stopped"))
    }

    async fn send_join_requests(&self) {
        let msg = self.state.lock().expect("poisoned").join_request();
        let max = self.config.max_frame_bytes as usize;
        for addr in &self.seeds {
            let res = tokio::time::timeout(
                self.config.connect_timeout(),
                async {
                    let mut socket = TcpStream::connect(*addr)
                        .await
                        .map_err(|e| {
                            MeshError::other_src("connect seed", e)
                        })?;
                    write_frame(&mut socket, &msg, max).await
                },
            )
            .await;
            match res {
                Ok(Ok(())) => {
                    tracing::debug!(%addr, "join request sent")
                }
                _ => tracing::debug!(%addr, "seed unreachable"),
            }
        }
    }
}

impl Discovery for TcpRing {
    fn local_node(&self) -> Arc<NodeInfo> {
        Arc::new(self.state.lock().expect("poisoned").local_node())
    }

    fn topology(&self) -> Arc<Topology> {
        self.topo_rx.borrow().clone()
    }

    fn node(&self, id: &NodeId) -> Option<Arc<NodeInfo>> {
        self.topology().node(id).cloned()
    }

    fn subscribe(&self, listener: DynTopologyListener) {
        listener.on_topology_change(self.topology());
        self.listeners.lock().expect("poisoned").push(listener);
    }

    fn join(&self) -> BoxFut<'_, MeshResult<Arc<Topology>>> {
        Box::pin(async move {
            if self.seeds.is_empty() {
                // nothing to join: bootstrap a new grid
                let effects =
                    self.state.lock().expect("poisoned").start_first();
                self.apply(effects).await?;
                return Ok(self.topology());
            }

            let deadline = tokio::time::Instant::now()
                + self.config.join_timeout();
            let mut connected = self.connected_rx.clone();
            loop {
                if *connected.borrow() {
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(MeshError::timeout("join"));
                }
                self.send_join_requests().await;
                tokio::select! {
                    changed = connected.changed() => {
                        if changed.is_err() {
                            return Err(MeshError::other(
                                "ring task stopped",
                            ));
                        }
                    }
                    _ = tokio::time::sleep(
                        self.config.heartbeat_interval(),
                    ) => (),
                }
            }
            Ok(self.topology())
        })
    }

    fn leave(&self) -> BoxFut<'_, MeshResult<()>> {
        Box::pin(async move {
            let effects =
                self.state.lock().expect("poisoned").local_leave();
            self.apply(effects).await
        })
    }
}

async fn accept_task(
    listener: TcpListener,
    state: Arc<Mutex<RingState>>,
    cmd_send: tokio::sync::mpsc::Sender<Cmd>,
    max_frame_bytes: usize,
) {
    loop {
        let mut socket = match listener.accept().await {
            Ok((socket, _)) => socket,
            Err(e) => {
                tracing::debug!(?e, "ring accept failed");
                continue;
            }
        };
        let state = state.clone();
        let cmd_send = cmd_send.clone();
        tokio::task::spawn(async move {
            loop {
                match read_frame(&mut socket, max_frame_bytes).await {
                    Ok(msg) => {
                        if matches!(msg.body, RingBody::Ping) {
                            // answered inline, never circulated
                            let reply = state
                                .lock()
                                .expect("poisoned")
                                .probe_reply();
                            if write_frame(
                                &mut socket,
                                &reply,
                                max_frame_bytes,
                            )
                            .await
                            .is_err()
                            {
                                break;
                            }
                        } else if cmd_send
                            .send(Cmd::Inbound(msg))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    // peer closed or sent garbage
                    Err(_) => break,
                }
            }
        });
    }
}

struct RingTask {
    state: Arc<Mutex<RingState>>,
    cmd_recv: tokio::sync::mpsc::Receiver<Cmd>,
    topo_tx: tokio::sync::watch::Sender<Arc<Topology>>,
    conn_tx: tokio::sync::watch::Sender<bool>,
    listeners: Listeners,
    config: TcpRingConfig,
}

async fn ring_task(mut task: RingTask) {
    // the one outbound connection, to the current ring successor
    let mut out: Option<(NodeId, TcpStream)> = None;
    let mut beat = tokio::time::interval(task.config.heartbeat_interval());
    beat.set_missed_tick_behavior(
        tokio::time::MissedTickBehavior::Delay,
    );

    loop {
        let (effects, ack) = tokio::select! {
            cmd = task.cmd_recv.recv() => match cmd {
                Some(Cmd::Inbound(msg)) => (
                    task.state.lock().expect("poisoned").handle(msg),
                    None,
                ),
                Some(Cmd::Apply(effects, ack)) => (effects, Some(ack)),
                None => break,
            },
            _ = beat.tick() => {
                let mut state =
                    task.state.lock().expect("poisoned");
                if state.status() == NodeStatus::Connected
                    && state.successor().is_some()
                {
                    (
                        vec![RingEffect::Forward(state.next_heartbeat())],
                        None,
                    )
                } else {
                    (Vec::new(), None)
                }
            }
        };

        process_effects(&mut task, &mut out, effects).await;

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

async fn process_effects(
    task: &mut RingTask,
    out: &mut Option<(NodeId, TcpStream)>,
    effects: Vec<RingEffect>,
) {
    let mut queue: VecDeque<RingEffect> = effects.into();
    while let Some(effect) = queue.pop_front() {
        match effect {
            RingEffect::Publish(topo) => {
                tracing::info!(
                    version = topo.version(),
                    members = topo.len(),
                    "topology change",
                );
                let _ = task.topo_tx.send(topo.clone());
                for listener in
                    task.listeners.lock().expect("poisoned").iter()
                {
                    listener.on_topology_change(topo.clone());
                }
            }
            RingEffect::Connected => {
                let _ = task.conn_tx.send(true);
            }
            RingEffect::Segmented => {
                tracing::error!("local node segmented");
                let _ = task.conn_tx.send(false);
            }
            RingEffect::Forward(msg) => {
                forward(task, out, &mut queue, msg).await;
            }
        }
    }
}

/// Deliver a message to the current successor, walking past members
/// that turn out to be unreachable. Each skipped member is declared
/// failed, which feeds further effects back into the queue.
async fn forward(
    task: &mut RingTask,
    out: &mut Option<(NodeId, TcpStream)>,
    queue: &mut VecDeque<RingEffect>,
    msg: RingMessage,
) {
    loop {
        let succ = task.state.lock().expect("poisoned").successor();
        let Some(succ) = succ else {
            // alone in the ring
            return;
        };
        let Some(addr) = succ.addr else {
            let fx = task
                .state
                .lock()
                .expect("poisoned")
                .suspect_failed(succ.id);
            queue.extend(fx);
            continue;
        };

        if send_to(out, succ.id, addr, &msg, &task.config)
            .await
            .is_ok()
        {
            return;
        }

        // delivery failed: probe before declaring failure
        if probe(&task.state, addr, &task.config).await {
            *out = None;
            if send_to(out, succ.id, addr, &msg, &task.config)
                .await
                .is_ok()
            {
                return;
            }
        }

        tracing::warn!(node = %succ.id, %addr, "ring successor unreachable");
        let fx = task
            .state
            .lock()
            .expect("poisoned")
            .suspect_failed(succ.id);
        queue.extend(fx);
    }
}

async fn send_to(
    out: &mut Option<(NodeId, TcpStream)>,
    id: NodeId,
    addr: SocketAddr,
    msg: &RingMessage,
    config: &TcpRingConfig,
) -> MeshResult<()> {
    let max = config.max_frame_bytes as usize;

    // reuse the cached connection while the successor is unchanged
    if matches!(out, Some((cached, _)) if *cached == id) {
        if let Some((_, socket)) = out.as_mut() {
            if write_frame(socket, msg, max).await.is_ok() {
                return Ok(());
            }
        }
    }
    *out = None;

    let mut socket =
        tokio::time::timeout(config.connect_timeout(), async {
            TcpStream::connect(addr)
                .await
                .map_err(|e| MeshError::other_src("connect successor", e))
        })
        .await
        .map_err(|_| MeshError::timeout("connect successor"))??;
    write_frame(&mut socket, msg, max).await?;
    *out = Some((id, socket));
    Ok(())
}

/// Direct liveness probe: fresh connection, ping, await pong.
async fn probe(
    state: &Arc<Mutex<RingState>>,
    addr: SocketAddr,
    config: &TcpRingConfig,
) -> bool {
    let msg = state.lock().expect("poisoned").probe();
    let max = config.max_frame_bytes as usize;
    let attempt = async {
        let mut socket = TcpStream::connect(addr).await.ok()?;
        write_frame(&mut socket, &msg, max).await.ok()?;
        let reply = read_frame(&mut socket, max).await.ok()?;
        matches!(reply.body, RingBody::Pong).then_some(())
    };
    tokio::time::timeout(config.connect_timeout(), attempt)
        .await
        .ok()
        .flatten()
        .is_some()
}
