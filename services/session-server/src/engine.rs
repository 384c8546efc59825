//! Per-session authoritative state machine (C5) and the mutation-tracking
//! contract (C8). One tokio task per live session; `SessionState` is owned
//! exclusively by that task, so there is no lock anywhere in this file —
//! the actor boundary is the synchronization primitive (§5, §9).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sequencer_model::mutate::{apply_mutation, sanitize_cursor_move, ApplyError, MutationEffect};
use sequencer_protocol::limits::MAX_CONCURRENT_STREAMS;
use sequencer_protocol::{ClientCommand, ClientMessage, PlayerInfo, ServerBroadcast, Session};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::store::SessionStore;

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Outcome of `attach`: either the stream is registered and given an
/// outbound channel, or it's rejected (§4.5.1, §8.3's 11th-connection case).
pub enum AttachOutcome {
    Attached { outbound: mpsc::UnboundedReceiver<ServerBroadcast> },
    CapacityExceeded,
}

enum EngineCommand {
    Attach {
        player_id: String,
        reply: oneshot::Sender<AttachOutcome>,
    },
    Detach {
        player_id: String,
    },
    Inbound {
        player_id: String,
        message: ClientMessage,
    },
    Publish {
        reply: oneshot::Sender<Session>,
    },
    Snapshot {
        reply: oneshot::Sender<Session>,
    },
    ReplaceState {
        new_state: sequencer_protocol::SessionState,
        name: Option<Option<String>>,
        reply: oneshot::Sender<Result<Session, String>>,
    },
}

/// A live handle to a session's actor task. Cloning is cheap (just the
/// sender); dropping the last handle does not stop the task — the task
/// stops itself when the last stream detaches (hibernation, §4.6).
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn attach(&self, player_id: String) -> AttachOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(EngineCommand::Attach { player_id, reply: reply_tx }).await.is_err() {
            return AttachOutcome::CapacityExceeded;
        }
        reply_rx.await.unwrap_or(AttachOutcome::CapacityExceeded)
    }

    pub async fn detach(&self, player_id: String) {
        let _ = self.tx.send(EngineCommand::Detach { player_id }).await;
    }

    pub async fn inbound(&self, player_id: String, message: ClientMessage) {
        let _ = self.tx.send(EngineCommand::Inbound { player_id, message }).await;
    }

    pub async fn publish(&self) -> Option<Session> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(EngineCommand::Publish { reply: reply_tx }).await.ok()?;
        reply_rx.await.ok()
    }

    pub async fn snapshot(&self) -> Option<Session> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(EngineCommand::Snapshot { reply: reply_tx }).await.ok()?;
        reply_rx.await.ok()
    }

    /// Routes a full-state HTTP replace (§4.7 PUT) through the live actor
    /// so it serializes against concurrent WS mutations instead of racing
    /// the engine's own write-through persistence (§5: the engine owns
    /// `SessionState` exclusively). `name: None` leaves the name untouched.
    pub async fn replace_state(
        &self,
        new_state: sequencer_protocol::SessionState,
        name: Option<Option<String>>,
    ) -> Option<Result<Session, String>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(EngineCommand::ReplaceState { new_state, name, reply: reply_tx }).await.ok()?;
        reply_rx.await.ok()
    }
}

struct ClientSlot {
    outbound: mpsc::UnboundedSender<ServerBroadcast>,
}

struct SessionEngine {
    session: Session,
    server_seq: u64,
    clients: HashMap<String, ClientSlot>,
    players: HashMap<String, PlayerInfo>,
    playing: HashSet<String>,
    store: Arc<dyn SessionStore>,
}

/// Spawns the actor task for `session` and returns a handle to it plus the
/// task's `JoinHandle`, so callers can clean up a registry entry once the
/// task exits (last client detached, hibernation). The task exits once the
/// last client detaches, after a final flush.
pub fn spawn(session: Session, store: Arc<dyn SessionStore>) -> (EngineHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let engine = SessionEngine {
        session,
        server_seq: 0,
        clients: HashMap::new(),
        players: HashMap::new(),
        playing: HashSet::new(),
        store,
    };
    let join_handle = tokio::spawn(engine.run(rx));
    (EngineHandle { tx }, join_handle)
}

impl SessionEngine {
    async fn run(mut self, mut rx: mpsc::Receiver<EngineCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                EngineCommand::Attach { player_id, reply } => {
                    let outcome = self.handle_attach(player_id).await;
                    let _ = reply.send(outcome);
                }
                EngineCommand::Detach { player_id } => {
                    self.handle_detach(&player_id).await;
                    if self.clients.is_empty() {
                        info!(session_id = %self.session.id, "last client detached, hibernating");
                        break;
                    }
                }
                EngineCommand::Inbound { player_id, message } => {
                    self.handle_inbound(&player_id, message).await;
                }
                EngineCommand::Publish { reply } => {
                    self.session.immutable = true;
                    self.session.updated_at = now_millis();
                    let _ = self.persist().await;
                    let _ = reply.send(self.session.clone());
                }
                EngineCommand::Snapshot { reply } => {
                    let _ = reply.send(self.session.clone());
                }
                EngineCommand::ReplaceState { new_state, name, reply } => {
                    let outcome = self.handle_replace_state(new_state, name).await;
                    let _ = reply.send(outcome);
                }
            }
        }
    }

    async fn handle_attach(&mut self, player_id: String) -> AttachOutcome {
        if self.clients.len() >= MAX_CONCURRENT_STREAMS {
            warn!(session_id = %self.session.id, "rejecting attach: stream cap reached");
            return AttachOutcome::CapacityExceeded;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.clients.insert(player_id.clone(), ClientSlot { outbound: outbound_tx });

        let now = now_millis();
        let player = self.players.entry(player_id.clone()).or_insert_with(|| {
            let (color_index, color, animal) = sequencer_model::derive_identity(&player_id);
            PlayerInfo {
                id: player_id.clone(),
                connected_at: now,
                last_message_at: now,
                message_count: 0,
                color_index,
                animal: animal.to_owned(),
                color: color.to_owned(),
                name: format!("{color} {animal}"),
            }
        });
        player.last_message_at = now;
        let player = player.clone();

        self.send_to(&player_id, ServerBroadcast::StateSync {
            state: self.session.state.clone(),
            player_count: self.clients.len(),
        });
        self.broadcast_except(&player_id, ServerBroadcast::PlayerJoined { player });

        info!(session_id = %self.session.id, player_id = %player_id, "player attached");
        AttachOutcome::Attached { outbound: outbound_rx }
    }

    async fn handle_detach(&mut self, player_id: &str) {
        self.clients.remove(player_id);
        self.players.remove(player_id);
        let was_playing = self.playing.remove(player_id);

        self.broadcast(ServerBroadcast::PlayerLeft { player_id: player_id.to_owned() });
        if was_playing {
            self.broadcast(ServerBroadcast::PlaybackStopped { player_id: player_id.to_owned() });
        }

        if self.clients.is_empty() {
            let _ = self.persist().await;
        }
        info!(session_id = %self.session.id, player_id = %player_id, "player detached");
    }

    async fn handle_replace_state(
        &mut self,
        mut new_state: sequencer_protocol::SessionState,
        name: Option<Option<String>>,
    ) -> Result<Session, String> {
        if self.session.immutable {
            return Err("published sessions cannot be replaced".to_owned());
        }
        let repairs = sequencer_model::validate::repair_state_invariants(&mut new_state);
        let errors = sequencer_model::validate::validate_state_invariants(&new_state);
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }
        if !repairs.is_empty() {
            info!(session_id = %self.session.id, repairs = repairs.len(), "repaired state invariants on replace");
        }
        if let Some(name) = name {
            self.session.name = name;
        }
        self.session.state = new_state;
        self.session.updated_at = now_millis();
        self.persist().await?;
        Ok(self.session.clone())
    }

    async fn handle_inbound(&mut self, player_id: &str, message: ClientMessage) {
        if let Some(player) = self.players.get_mut(player_id) {
            player.last_message_at = now_millis();
            player.message_count += 1;
        }

        let type_tag = message.command.type_tag();
        if message.command.is_mutating() && self.session.immutable {
            self.send_to(player_id, ServerBroadcast::Error {
                message: format!("session is published; {type_tag} is rejected"),
            });
            return;
        }

        if message.command.is_mutating() {
            self.handle_mutating(player_id, message).await;
        } else {
            self.handle_read_only(player_id, message.command);
        }
    }

    async fn handle_mutating(&mut self, player_id: &str, message: ClientMessage) {
        let client_seq = message.seq;
        match apply_mutation(&mut self.session.state, &message.command) {
            Ok(effect) => {
                self.session.updated_at = now_millis();
                let seq = self.next_seq();
                let broadcast = effect_to_broadcast(effect, player_id.to_owned(), seq, client_seq);
                self.broadcast(broadcast);
                if let Err(msg) = self.persist().await {
                    self.send_to(player_id, ServerBroadcast::Error { message: msg });
                }
            }
            Err(ApplyError::Validation(msg)) | Err(ApplyError::Capacity(msg)) => {
                self.send_to(player_id, ServerBroadcast::Error { message: msg });
            }
        }
    }

    fn handle_read_only(&mut self, player_id: &str, command: ClientCommand) {
        match command {
            ClientCommand::Play => {
                if self.playing.insert(player_id.to_owned()) {
                    self.broadcast(ServerBroadcast::PlaybackStarted { player_id: player_id.to_owned() });
                }
            }
            ClientCommand::Stop => {
                if self.playing.remove(player_id) {
                    self.broadcast(ServerBroadcast::PlaybackStopped { player_id: player_id.to_owned() });
                }
            }
            ClientCommand::StateHash { hash } => {
                let actual = sequencer_model::hash_state(&self.session.state);
                if actual != hash {
                    warn!(session_id = %self.session.id, player_id = %player_id, "state hash drift detected");
                }
            }
            ClientCommand::RequestSnapshot => {
                self.send_to(player_id, ServerBroadcast::Snapshot {
                    state: self.session.state.clone(),
                    players: self.players.values().cloned().collect(),
                    player_id: player_id.to_owned(),
                    server_seq: self.server_seq,
                    playing_player_ids: self.playing.iter().cloned().collect(),
                    immutable: Some(self.session.immutable),
                });
            }
            ClientCommand::ClockSyncRequest { client_time } => {
                self.send_to(player_id, ServerBroadcast::ClockSyncResponse {
                    client_time,
                    server_time: now_millis(),
                });
            }
            ClientCommand::CursorMove { position, track_id } => {
                let sanitized = sanitize_cursor_move(position);
                self.broadcast_except(player_id, ServerBroadcast::CursorMoved {
                    player_id: player_id.to_owned(),
                    position: sanitized,
                    track_id,
                });
            }
            ClientCommand::MuteTrack { track_id, muted } => {
                self.broadcast(ServerBroadcast::TrackMuted { player_id: player_id.to_owned(), track_id, muted });
            }
            ClientCommand::SoloTrack { track_id, soloed } => {
                self.broadcast(ServerBroadcast::TrackSoloed { player_id: player_id.to_owned(), track_id, soloed });
            }
            other => unreachable!("non-mutating command not handled: {:?}", other.type_tag()),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.server_seq += 1;
        self.server_seq
    }

    fn send_to(&self, player_id: &str, broadcast: ServerBroadcast) {
        if let Some(slot) = self.clients.get(player_id) {
            let _ = slot.outbound.send(broadcast);
        }
    }

    fn broadcast(&self, broadcast: ServerBroadcast) {
        for slot in self.clients.values() {
            let _ = slot.outbound.send(broadcast.clone());
        }
    }

    fn broadcast_except(&self, except_player_id: &str, broadcast: ServerBroadcast) {
        for (player_id, slot) in &self.clients {
            if player_id != except_player_id {
                let _ = slot.outbound.send(broadcast.clone());
            }
        }
    }

    async fn persist(&self) -> Result<(), String> {
        let store = self.store.clone();
        let session = self.session.clone();
        let result = tokio::task::spawn_blocking(move || store.save(&session)).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(session_id = %self.session.id, error = %err, "durable write failed");
                Err(format!("durable write failed: {err}"))
            }
            Err(err) => {
                warn!(session_id = %self.session.id, error = %err, "persistence task panicked");
                Err(format!("persistence task panicked: {err}"))
            }
        }
    }
}

fn effect_to_broadcast(
    effect: MutationEffect,
    player_id: String,
    seq: u64,
    client_seq: Option<u64>,
) -> ServerBroadcast {
    use sequencer_protocol::messages::{BroadcastEnvelope, ParameterLockEffect};
    let envelope = BroadcastEnvelope { seq, client_seq };
    match effect {
        MutationEffect::StepToggled { track_id, step, value } => {
            ServerBroadcast::StepToggled { envelope, player_id, track_id, step, value }
        }
        MutationEffect::TempoSet { tempo } => ServerBroadcast::TempoSet { envelope, player_id, tempo },
        MutationEffect::SwingSet { swing } => ServerBroadcast::SwingSet { envelope, player_id, swing },
        MutationEffect::ParameterLockSet { track_id, step, lock } => ServerBroadcast::ParameterLockSet {
            envelope,
            player_id,
            effect: ParameterLockEffect { track_id, step, lock },
        },
        MutationEffect::TrackAdded { track_id } => ServerBroadcast::TrackAdded { envelope, player_id, track_id },
        MutationEffect::TrackDeleted { track_id } => ServerBroadcast::TrackDeleted { envelope, player_id, track_id },
        MutationEffect::TrackCleared { track_id } => ServerBroadcast::TrackCleared { envelope, player_id, track_id },
        MutationEffect::TrackSampleSet { track_id, sample_id } => {
            ServerBroadcast::TrackSampleSet { envelope, player_id, track_id, sample_id }
        }
        MutationEffect::TrackVolumeSet { track_id, volume } => {
            ServerBroadcast::TrackVolumeSet { envelope, player_id, track_id, volume }
        }
        MutationEffect::TrackTransposeSet { track_id, transpose } => {
            ServerBroadcast::TrackTransposeSet { envelope, player_id, track_id, transpose }
        }
        MutationEffect::TrackStepCountSet { track_id, step_count } => {
            ServerBroadcast::TrackStepCountSet { envelope, player_id, track_id, step_count }
        }
        MutationEffect::TrackSwingSet { track_id, swing } => {
            ServerBroadcast::TrackSwingSet { envelope, player_id, track_id, swing }
        }
        MutationEffect::EffectsSet { effects } => ServerBroadcast::EffectsSet { envelope, player_id, effects },
        MutationEffect::ScaleSet { scale } => ServerBroadcast::ScaleSet { envelope, player_id, scale },
        MutationEffect::FmParamsSet { track_id, fm_params } => {
            ServerBroadcast::FmParamsSet { envelope, player_id, track_id, fm_params }
        }
        MutationEffect::SequenceCopied { source_track_id, dest_track_id } => {
            ServerBroadcast::SequenceCopied { envelope, player_id, source_track_id, dest_track_id }
        }
        MutationEffect::SequenceMoved { source_track_id, dest_track_id } => {
            ServerBroadcast::SequenceMoved { envelope, player_id, source_track_id, dest_track_id }
        }
        MutationEffect::SessionNameSet { name } => ServerBroadcast::SessionNameSet { envelope, player_id, name },
        MutationEffect::StepsBatchCleared { track_id, steps } => {
            ServerBroadcast::StepsBatchCleared { envelope, player_id, track_id, steps }
        }
        MutationEffect::ParameterLocksBatchSet { track_id, locks } => {
            ServerBroadcast::ParameterLocksBatchSet { envelope, player_id, track_id, locks }
        }
        MutationEffect::LoopRegionSet { start, end } => ServerBroadcast::LoopRegionSet { envelope, player_id, start, end },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use sequencer_protocol::SessionState;
    use uuid::Uuid;

    fn fresh_session() -> Session {
        let id = Uuid::new_v4();
        Session {
            id: id.to_string(),
            created_at: 0,
            updated_at: 0,
            last_accessed_at: 0,
            name: None,
            remixed_from: None,
            remixed_from_name: None,
            remix_count: 0,
            immutable: false,
            state: SessionState::default(),
        }
    }

    #[tokio::test]
    async fn attach_sends_state_sync_and_broadcasts_player_joined_to_others() {
        let (handle, _join) = spawn(fresh_session(), Arc::new(MockStore::new()));

        let AttachOutcome::Attached { outbound: mut p1_rx } = handle.attach("p1".to_owned()).await else {
            panic!("expected attach to succeed");
        };
        assert!(matches!(p1_rx.recv().await.unwrap(), ServerBroadcast::StateSync { .. }));

        let AttachOutcome::Attached { outbound: mut p2_rx } = handle.attach("p2".to_owned()).await else {
            panic!("expected attach to succeed");
        };
        assert!(matches!(p2_rx.recv().await.unwrap(), ServerBroadcast::StateSync { .. }));
        assert!(matches!(p1_rx.recv().await.unwrap(), ServerBroadcast::PlayerJoined { .. }));
    }

    #[tokio::test]
    async fn eleventh_attach_is_rejected_and_first_ten_are_unaffected() {
        let (handle, _join) = spawn(fresh_session(), Arc::new(MockStore::new()));
        let mut receivers = Vec::new();
        for i in 0..10 {
            let AttachOutcome::Attached { outbound } = handle.attach(format!("p{i}")).await else {
                panic!("expected attach {i} to succeed");
            };
            receivers.push(outbound);
        }
        assert!(matches!(handle.attach("p-overflow".to_owned()).await, AttachOutcome::CapacityExceeded));
    }

    #[tokio::test]
    async fn toggle_step_broadcasts_with_client_seq_to_all_attached_players() {
        let (handle, _join) = spawn(fresh_session(), Arc::new(MockStore::new()));
        let AttachOutcome::Attached { outbound: mut p1_rx } = handle.attach("p1".to_owned()).await else { panic!() };
        drain(&mut p1_rx).await;

        let add_track = ClientMessage {
            command: ClientCommand::AddTrack(sequencer_protocol::AddTrackPayload {
                track_id: "t1".to_owned(),
                name: "kick".to_owned(),
                sample_id: "s1".to_owned(),
            }),
            seq: Some(1),
            ack: None,
        };
        handle.inbound("p1".to_owned(), add_track).await;
        let broadcast = p1_rx.recv().await.unwrap();
        assert_eq!(broadcast.server_seq(), Some(1));

        let toggle = ClientMessage {
            command: ClientCommand::ToggleStep { track_id: "t1".to_owned(), step: 0 },
            seq: Some(2),
            ack: None,
        };
        handle.inbound("p1".to_owned(), toggle).await;
        let broadcast = p1_rx.recv().await.unwrap();
        match broadcast {
            ServerBroadcast::StepToggled { envelope, value, .. } => {
                assert_eq!(envelope.client_seq, Some(2));
                assert!(value);
            }
            other => panic!("unexpected broadcast: {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_add_track_still_resolves_the_senders_pending_mutation() {
        let (handle, _join) = spawn(fresh_session(), Arc::new(MockStore::new()));
        let AttachOutcome::Attached { outbound: mut p1_rx } = handle.attach("p1".to_owned()).await else { panic!() };
        drain(&mut p1_rx).await;

        let payload = sequencer_protocol::AddTrackPayload {
            track_id: "t1".to_owned(),
            name: "kick".to_owned(),
            sample_id: "s1".to_owned(),
        };
        handle
            .inbound("p1".to_owned(), ClientMessage { command: ClientCommand::AddTrack(payload.clone()), seq: Some(1), ack: None })
            .await;
        p1_rx.recv().await.unwrap();

        handle
            .inbound("p1".to_owned(), ClientMessage { command: ClientCommand::AddTrack(payload), seq: Some(2), ack: None })
            .await;
        let broadcast = p1_rx.recv().await.unwrap();
        assert_eq!(broadcast.server_seq(), Some(2));
        match broadcast {
            ServerBroadcast::TrackAdded { envelope, .. } => assert_eq!(envelope.client_seq, Some(2)),
            other => panic!("unexpected broadcast: {other:?}"),
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state.tracks.len(), 1, "duplicate add must not create a second track");
    }

    #[tokio::test]
    async fn published_session_rejects_mutations_and_does_not_advance_seq() {
        let mut session = fresh_session();
        session.immutable = true;
        let (handle, _join) = spawn(session, Arc::new(MockStore::new()));
        let AttachOutcome::Attached { outbound: mut p1_rx } = handle.attach("p1".to_owned()).await else { panic!() };
        drain(&mut p1_rx).await;

        handle
            .inbound("p1".to_owned(), ClientMessage { command: ClientCommand::SetTempo { tempo: 140 }, seq: Some(1), ack: None })
            .await;
        let broadcast = p1_rx.recv().await.unwrap();
        assert!(matches!(broadcast, ServerBroadcast::Error { .. }));
        assert_eq!(broadcast.server_seq(), None);
    }

    #[tokio::test]
    async fn mute_track_is_not_gated_by_immutability_and_carries_no_server_seq() {
        let mut session = fresh_session();
        session.immutable = true;
        let (handle, _join) = spawn(session, Arc::new(MockStore::new()));
        let AttachOutcome::Attached { outbound: mut p1_rx } = handle.attach("p1".to_owned()).await else { panic!() };
        drain(&mut p1_rx).await;

        handle
            .inbound(
                "p1".to_owned(),
                ClientMessage {
                    command: ClientCommand::MuteTrack { track_id: "t1".to_owned(), muted: true },
                    seq: None,
                    ack: None,
                },
            )
            .await;
        let broadcast = p1_rx.recv().await.unwrap();
        assert!(matches!(broadcast, ServerBroadcast::TrackMuted { .. }));
        assert_eq!(broadcast.server_seq(), None);
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<ServerBroadcast>) {
        let _ = tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await;
    }

    #[tokio::test]
    async fn replace_state_persists_and_repairs_before_applying() {
        let (handle, _join) = spawn(fresh_session(), Arc::new(MockStore::new()));
        let mut new_state = SessionState { tempo: 999, ..SessionState::default() };
        new_state.tracks.push(sequencer_protocol::Track::new("t1", "kick", "s1"));

        let result = handle.replace_state(new_state, Some(Some("renamed".to_owned()))).await.unwrap();
        let session = result.unwrap();
        assert_eq!(session.state.tempo, sequencer_protocol::limits::MAX_TEMPO, "out-of-range tempo should be repaired");
        assert_eq!(session.name, Some("renamed".to_owned()));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state.tempo, sequencer_protocol::limits::MAX_TEMPO);
    }

    #[tokio::test]
    async fn replace_state_is_rejected_on_a_published_session() {
        let mut session = fresh_session();
        session.immutable = true;
        let (handle, _join) = spawn(session, Arc::new(MockStore::new()));

        let result = handle.replace_state(SessionState::default(), None).await.unwrap();
        assert!(result.is_err());
    }
}
