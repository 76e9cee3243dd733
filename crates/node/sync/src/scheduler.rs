//! The synchronous scheduling core of the beacon sync.
//!
//! The [`Scheduler`] decides which peer is asked for what and turns responses into blocks that
//! are ready for import, strictly in parent-linked order. It performs no I/O and takes the
//! current time and a "known block" predicate as arguments, so every decision is testable
//! without a runtime.
//!
//! A target starts a session. The session first resolves the header chain from the target back
//! to the first locally known ancestor, the anchor, by asking peers for headers in reverse. Once
//! anchored, the bodies above the anchor are fetched in ranges, lowest range first, paired with
//! their headers and held in a reorder buffer until every block below them has been released.
//!
//! Responses to requests issued for an older session are not thrown away blindly. Headers are
//! used if the current session still needs them and bodies are kept if their block hash is on
//! the current target's header chain.

use crate::{FetchMode, PeerError, PeerId, SyncConfig};
use alloy_eips::BlockNumHash;
use alloy_primitives::BlockHash;
use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use marlin_primitives::{BlockBody, SealedBlock, SealedHeader, validate_body};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::{Duration, Instant},
};

/// Identifies an issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("#{_0}")]
pub struct RequestId(pub(crate) u64);

/// What a request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Headers walking back from `hash`.
    Headers {
        /// The first header to return.
        hash: BlockHash,
        /// Maximum number of headers.
        limit: u64,
    },
    /// Bodies for consecutive headers.
    Bodies {
        /// The headers, ascending.
        headers: Vec<SealedHeader>,
    },
}

/// A request assigned to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The request id.
    pub id: RequestId,
    /// The session the request was issued for.
    pub session: u64,
    /// What is requested.
    pub kind: RequestKind,
}

/// A peer's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Headers, walking towards genesis.
    Headers(Vec<SealedHeader>),
    /// Bodies, in request order.
    Bodies(Vec<BlockBody>),
}

/// What the scheduler made of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Headers extended the chain below the target.
    Headers {
        /// Headers added.
        added: usize,
        /// Whether a known ancestor was reached.
        anchored: bool,
    },
    /// Bodies were paired with their headers and buffered.
    Bodies {
        /// Blocks added to the reorder buffer.
        buffered: usize,
    },
    /// The response does not fit the current target and was dropped.
    Stale,
    /// The response was rejected and the peer put on cooldown.
    Rejected(PeerError),
    /// The target's header chain reached genesis without meeting the local chain.
    Unreachable,
    /// The request id is unknown, e.g. because the peer was removed.
    Unknown,
}

/// What setting a target requires from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPlan {
    /// The target is already known locally; only a forkchoice update is needed.
    Known,
    /// A session was started to fetch the gap.
    Fetch,
}

/// What an invalid block did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidBlockOutcome {
    /// The range from the block on is fetched again, from another peer when possible.
    Retry,
    /// The block failed too often; the target was abandoned.
    Abandoned,
    /// The block is not part of the current target.
    Ignored,
}

/// A block released for import, with the peer that served its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// The block.
    pub block: SealedBlock,
    /// The peer that served the body.
    pub peer: PeerId,
}

#[derive(Debug)]
struct PeerState {
    backoff: ExponentialBackoff,
    cooldown_until: Option<Instant>,
    failures: u32,
    busy: bool,
}

#[derive(Debug)]
struct InFlight {
    peer: PeerId,
    session: u64,
    kind: RequestKind,
}

#[derive(Debug)]
struct BodyRange {
    headers: Vec<SealedHeader>,
    avoid: Option<PeerId>,
}

#[derive(Debug)]
struct Session {
    id: u64,
    target: SealedHeader,
    /// Headers above the anchor, keyed by number.
    skeleton: BTreeMap<u64, SealedHeader>,
    anchor: Option<BlockNumHash>,
    /// The last block handed out for import.
    released: Option<BlockNumHash>,
    headers_in_flight: bool,
    attempts: HashMap<BlockHash, u32>,
}

impl Session {
    /// The hash of the next header to resolve, while not yet anchored.
    fn needed_hash(&self) -> Option<BlockHash> {
        if self.anchor.is_some() {
            return None;
        }
        self.skeleton.first_key_value().map(|(_, h)| h.parent_hash)
    }

    fn on_chain(&self, block: &SealedBlock) -> bool {
        self.skeleton.get(&block.number()).is_some_and(|h| h.hash() == block.hash())
    }
}

/// Plans header and body requests for the current sync target.
#[derive(Debug)]
pub struct Scheduler {
    header_limit: u64,
    body_limit: usize,
    max_buffered: u64,
    max_retries: u32,
    backoff: ExponentialBuilder,
    max_cooldown: Duration,
    next_session: u64,
    request_seq: u64,
    session: Option<Session>,
    peers: HashMap<PeerId, PeerState>,
    in_flight: HashMap<RequestId, InFlight>,
    queue: BTreeMap<u64, BodyRange>,
    ready: BTreeMap<u64, Fetched>,
}

impl Scheduler {
    /// Creates a scheduler with no target and no peers.
    pub fn new(config: &SyncConfig) -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(config.min_peer_cooldown)
            .with_max_delay(config.max_peer_cooldown)
            .with_factor(2.0)
            .without_max_times();
        Self {
            header_limit: config.header_request_limit.max(1),
            body_limit: config.body_request_limit.max(1),
            max_buffered: config.max_buffered_blocks.max(1),
            max_retries: config.max_block_retries.max(1),
            backoff,
            max_cooldown: config.max_peer_cooldown,
            next_session: 0,
            request_seq: 0,
            session: None,
            peers: HashMap::new(),
            in_flight: HashMap::new(),
            queue: BTreeMap::new(),
            ready: BTreeMap::new(),
        }
    }

    /// The id of the current session, if any.
    pub fn session(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id)
    }

    /// The target of the current session.
    pub fn target(&self) -> Option<&SealedHeader> {
        self.session.as_ref().map(|s| &s.target)
    }

    /// The locally known ancestor the current target chain builds on.
    pub fn anchor(&self) -> Option<BlockNumHash> {
        self.session.as_ref().and_then(|s| s.anchor)
    }

    /// The last block handed out for import.
    pub fn released(&self) -> Option<BlockNumHash> {
        self.session.as_ref().and_then(|s| s.released)
    }

    /// Returns true if the whole chain up to the target has been released.
    pub fn is_complete(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.released.is_some_and(|r| r.hash == s.target.hash()))
    }

    /// Blocks held in the reorder buffer.
    pub fn buffered(&self) -> usize {
        self.ready.len()
    }

    /// Body ranges waiting for a peer.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if `peer` is registered.
    pub fn has_peer(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    /// Registered peer ids.
    pub fn peer_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    /// How requests are spread given the registered peers.
    pub fn mode(&self) -> FetchMode {
        FetchMode::for_peers(self.peers.len())
    }

    /// The end of `peer`'s cooldown, if it is cooling down at `now`.
    pub fn cooldown(&self, peer: &PeerId, now: Instant) -> Option<Instant> {
        self.peers.get(peer).and_then(|p| p.cooldown_until).filter(|until| *until > now)
    }

    /// Registers a peer.
    pub fn add_peer(&mut self, peer: PeerId) {
        self.peers.entry(peer).or_insert_with(|| PeerState {
            backoff: self.backoff.build(),
            cooldown_until: None,
            failures: 0,
            busy: false,
        });
    }

    /// Unregisters a peer. Its outstanding work is queued again.
    pub fn remove_peer(&mut self, peer: &PeerId) {
        if self.peers.remove(peer).is_none() {
            return;
        }
        let ids: Vec<_> =
            self.in_flight.iter().filter(|(_, f)| f.peer == *peer).map(|(id, _)| *id).collect();
        for id in ids {
            if let Some(request) = self.in_flight.remove(&id) {
                self.requeue(request, None);
            }
        }
    }

    /// Starts a session for `target`, superseding the current one.
    ///
    /// Requests in flight for the old session are left to complete; their results are checked
    /// against the new target when they arrive.
    pub fn set_target(
        &mut self,
        target: SealedHeader,
        known: impl Fn(BlockHash) -> bool,
    ) -> TargetPlan {
        self.queue.clear();
        if known(target.hash()) {
            self.session = None;
            self.ready.clear();
            return TargetPlan::Known;
        }

        self.next_session += 1;
        let mut skeleton = BTreeMap::new();
        skeleton.insert(target.number, target.clone());
        let mut session = Session {
            id: self.next_session,
            target,
            skeleton,
            anchor: None,
            released: None,
            headers_in_flight: false,
            attempts: HashMap::new(),
        };
        debug!(
            target: "sync::scheduler",
            session = session.id,
            number = session.target.number,
            hash = %session.target.hash(),
            "New sync target"
        );
        if let Some(parent) = session.needed_hash().filter(|hash| known(*hash)) {
            let number = session.target.number.saturating_sub(1);
            session.anchor = Some(BlockNumHash::new(number, parent));
        }
        self.session = Some(session);
        if self.anchor().is_some() {
            self.plan_bodies();
        }
        TargetPlan::Fetch
    }

    /// Drops the current session.
    pub fn abandon(&mut self) {
        if let Some(session) = self.session.take() {
            warn!(
                target: "sync::scheduler",
                session = session.id,
                target = %session.target.hash(),
                "Abandoning sync target"
            );
        }
        self.queue.clear();
        self.ready.clear();
    }

    /// Assigns the next piece of work to `peer`, if it is idle and not cooling down.
    pub fn next_request(&mut self, peer: PeerId, now: Instant) -> Option<Request> {
        let mode = self.mode();
        let state = self.peers.get(&peer)?;
        if state.busy || state.cooldown_until.is_some_and(|until| until > now) {
            return None;
        }
        let session = self.session.as_mut()?;

        let kind = if let Some(hash) = session.needed_hash() {
            if session.headers_in_flight {
                return None;
            }
            let lowest = session.skeleton.first_key_value().map_or(1, |(n, _)| *n);
            session.headers_in_flight = true;
            RequestKind::Headers { hash, limit: self.header_limit.min(lowest).max(1) }
        } else {
            let released = session.released.map_or(0, |r| r.number);
            let key = self
                .queue
                .iter()
                .find(|(_, range)| mode == FetchMode::Single || range.avoid != Some(peer))
                .map(|(first, _)| *first)?;
            if key > released.saturating_add(self.max_buffered) {
                return None;
            }
            let range = self.queue.remove(&key)?;
            RequestKind::Bodies { headers: range.headers }
        };

        self.request_seq += 1;
        let id = RequestId(self.request_seq);
        let session = session.id;
        self.in_flight.insert(id, InFlight { peer, session, kind: kind.clone() });
        if let Some(state) = self.peers.get_mut(&peer) {
            state.busy = true;
        }
        trace!(target: "sync::scheduler", %peer, %id, session, "Assigned request");
        Some(Request { id, session, kind })
    }

    /// Processes the result of request `id`.
    pub fn on_response(
        &mut self,
        id: RequestId,
        result: Result<Response, PeerError>,
        now: Instant,
        known: impl Fn(BlockHash) -> bool,
    ) -> Outcome {
        let Some(request) = self.in_flight.remove(&id) else {
            return Outcome::Unknown;
        };
        let peer = request.peer;
        if let Some(state) = self.peers.get_mut(&peer) {
            state.busy = false;
        }

        let checked = match (&request.kind, result) {
            (_, Err(err)) => Err(err),
            (RequestKind::Headers { hash, limit }, Ok(Response::Headers(headers))) => {
                check_headers(*hash, *limit, &headers).map(|()| Response::Headers(headers))
            }
            (RequestKind::Bodies { headers }, Ok(Response::Bodies(bodies))) => {
                check_bodies(headers, &bodies).map(|()| Response::Bodies(bodies))
            }
            (_, Ok(_)) => Err(PeerError::Other("unexpected response type".into())),
        };

        match checked {
            Err(err) => {
                debug!(target: "sync::scheduler", %peer, %id, %err, "Rejected response");
                self.penalize(peer, now);
                self.requeue(request, Some(peer));
                Outcome::Rejected(err)
            }
            Ok(Response::Headers(headers)) => {
                self.reward(peer);
                self.on_headers(request, headers, known)
            }
            Ok(Response::Bodies(bodies)) => {
                self.reward(peer);
                self.on_bodies(request, bodies)
            }
        }
    }

    fn on_headers(
        &mut self,
        request: InFlight,
        headers: Vec<SealedHeader>,
        known: impl Fn(BlockHash) -> bool,
    ) -> Outcome {
        let RequestKind::Headers { hash, .. } = request.kind else {
            return Outcome::Unknown;
        };
        let Some(session) = self.session.as_mut() else {
            return Outcome::Stale;
        };
        if session.id == request.session {
            session.headers_in_flight = false;
        }
        if session.needed_hash() != Some(hash) {
            trace!(
                target: "sync::scheduler",
                session = request.session,
                %hash,
                "Dropping stale headers"
            );
            return Outcome::Stale;
        }

        let mut added = 0;
        for header in headers {
            let (number, parent) = (header.number, header.parent_hash);
            session.skeleton.insert(number, header);
            added += 1;
            if known(parent) {
                session.anchor = Some(BlockNumHash::new(number.saturating_sub(1), parent));
                break;
            }
            if number == 0 {
                self.abandon();
                return Outcome::Unreachable;
            }
        }

        let anchored = session.anchor.is_some();
        if anchored {
            debug!(
                target: "sync::scheduler",
                session = session.id,
                anchor = ?session.anchor,
                headers = session.skeleton.len(),
                "Header chain anchored"
            );
            self.plan_bodies();
        }
        Outcome::Headers { added, anchored }
    }

    fn on_bodies(&mut self, request: InFlight, bodies: Vec<BlockBody>) -> Outcome {
        let RequestKind::Bodies { headers } = request.kind else {
            return Outcome::Unknown;
        };
        let current = self.session.as_ref().is_some_and(|s| s.id == request.session);
        let served = bodies.len();

        let mut buffered = 0;
        for (header, body) in headers.iter().zip(bodies) {
            let block = SealedBlock::from_parts(header.clone(), body);
            if self.fits(&block) {
                self.ready.insert(block.number(), Fetched { block, peer: request.peer });
                buffered += 1;
            }
        }
        if current && served < headers.len() {
            let rest = headers[served..].to_vec();
            self.queue.insert(rest[0].number, BodyRange { headers: rest, avoid: None });
        }

        if !current && buffered == 0 {
            trace!(target: "sync::scheduler", session = request.session, "Dropping stale bodies");
            return Outcome::Stale;
        }
        Outcome::Bodies { buffered }
    }

    /// Returns true if `block` is on the current target chain above the released cursor.
    fn fits(&self, block: &SealedBlock) -> bool {
        self.session.as_ref().is_some_and(|s| {
            s.on_chain(block) && s.released.is_some_and(|r| block.number() > r.number)
        })
    }

    /// Releases the buffered blocks that extend the last released block, in order.
    pub fn drain_ready(&mut self) -> Vec<Fetched> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let Some(mut released) = session.released else {
            return Vec::new();
        };

        let mut out = Vec::new();
        while let Some(entry) = self.ready.first_entry() {
            if *entry.key() <= released.number {
                entry.remove();
                continue;
            }
            if *entry.key() != released.number + 1 {
                break;
            }
            let fetched = entry.remove();
            if fetched.block.parent_hash() != released.hash || !session.on_chain(&fetched.block) {
                let header = fetched.block.sealed_header();
                self.queue.insert(header.number, BodyRange { headers: vec![header], avoid: None });
                break;
            }
            released = BlockNumHash::new(fetched.block.number(), fetched.block.hash());
            out.push(fetched);
        }
        session.released = Some(released);
        out
    }

    /// Records that `hash`, served by `peer`, failed import.
    ///
    /// The peer is put on cooldown and everything from the block on is fetched again, unless
    /// the block has failed too often, in which case the target is abandoned.
    pub fn on_invalid_block(
        &mut self,
        hash: BlockHash,
        peer: PeerId,
        now: Instant,
    ) -> InvalidBlockOutcome {
        self.penalize(peer, now);
        let max_retries = self.max_retries;
        let Some(session) = self.session.as_mut() else {
            return InvalidBlockOutcome::Ignored;
        };
        let Some(header) = session.skeleton.values().find(|h| h.hash() == hash).cloned() else {
            return InvalidBlockOutcome::Ignored;
        };

        let attempts = session.attempts.entry(hash).or_default();
        *attempts += 1;
        warn!(
            target: "sync::scheduler",
            number = header.number,
            %hash,
            %peer,
            attempts = *attempts,
            "Invalid block"
        );
        if *attempts >= max_retries {
            self.abandon();
            return InvalidBlockOutcome::Abandoned;
        }

        session.released = Some(BlockNumHash::new(header.number - 1, header.parent_hash));
        self.ready.retain(|number, _| *number > header.number);
        self.replan_from(header.number, Some(peer));
        InvalidBlockOutcome::Retry
    }

    /// Queues body ranges for the whole skeleton above the anchor.
    fn plan_bodies(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(anchor) = session.anchor else {
            return;
        };
        session.released = Some(anchor);
        session.skeleton.retain(|number, _| *number > anchor.number);
        let skeleton = &session.skeleton;
        self.ready.retain(|number, fetched| {
            skeleton.get(number).is_some_and(|h| h.hash() == fetched.block.hash())
        });
        self.replan_from(anchor.number + 1, None);
    }

    /// Rebuilds the body queue from `from` up to the target, skipping blocks that are buffered
    /// or in flight for the current session.
    fn replan_from(&mut self, from: u64, avoid: Option<PeerId>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let in_flight: HashSet<u64> = self
            .in_flight
            .values()
            .filter(|f| f.session == session.id)
            .filter_map(|f| match &f.kind {
                RequestKind::Bodies { headers } => Some(headers.iter().map(|h| h.number)),
                RequestKind::Headers { .. } => None,
            })
            .flatten()
            .collect();

        self.queue.clear();
        let mut current: Vec<SealedHeader> = Vec::new();
        let mut ranges = Vec::new();
        for (number, header) in session.skeleton.range(from..) {
            let skip = in_flight.contains(number) || self.ready.contains_key(number);
            let contiguous = current.last().is_none_or(|last| last.number + 1 == *number);
            if (skip || !contiguous || current.len() >= self.body_limit) && !current.is_empty() {
                ranges.push(std::mem::take(&mut current));
            }
            if !skip {
                current.push(header.clone());
            }
        }
        if !current.is_empty() {
            ranges.push(current);
        }

        for (i, headers) in ranges.into_iter().enumerate() {
            let avoid = if i == 0 { avoid } else { None };
            self.queue.insert(headers[0].number, BodyRange { headers, avoid });
        }
        trace!(target: "sync::scheduler", from, ranges = self.queue.len(), "Planned body ranges");
    }

    /// Puts the work of a failed or orphaned request back, if it still belongs to the session.
    fn requeue(&mut self, request: InFlight, avoid: Option<PeerId>) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == request.session) else {
            return;
        };
        match request.kind {
            RequestKind::Headers { .. } => session.headers_in_flight = false,
            RequestKind::Bodies { headers } => {
                if let Some(first) = headers.first() {
                    self.queue.insert(first.number, BodyRange { headers, avoid });
                }
            }
        }
    }

    fn penalize(&mut self, peer: PeerId, now: Instant) {
        let Some(state) = self.peers.get_mut(&peer) else {
            return;
        };
        let delay = state.backoff.next().unwrap_or(self.max_cooldown);
        state.cooldown_until = Some(now + delay);
        state.failures += 1;
        debug!(
            target: "sync::scheduler",
            %peer,
            ?delay,
            failures = state.failures,
            "Peer cooling down"
        );
        marlin_macros::inc!(counter, crate::Metrics::PEER_FAILURES);
    }

    fn reward(&mut self, peer: PeerId) {
        if let Some(state) = self.peers.get_mut(&peer) {
            if state.failures > 0 {
                state.backoff = self.backoff.build();
                state.failures = 0;
            }
            state.cooldown_until = None;
        }
    }
}

/// Checks that `headers` walk back from `hash` without gaps.
fn check_headers(hash: BlockHash, limit: u64, headers: &[SealedHeader]) -> Result<(), PeerError> {
    if headers.is_empty() {
        return Err(PeerError::Empty);
    }
    if headers.len() as u64 > limit {
        return Err(PeerError::TooMany { limit: limit as usize, got: headers.len() });
    }
    let mut expected = hash;
    let mut expected_number = None;
    for (i, header) in headers.iter().enumerate() {
        let below_genesis = header.number == 0 && i + 1 < headers.len();
        let linked = header.hash() == expected &&
            expected_number.is_none_or(|number| header.number == number);
        if !linked || below_genesis {
            return Err(PeerError::Unlinked { number: header.number, hash: header.hash() });
        }
        expected = header.parent_hash;
        expected_number = header.number.checked_sub(1);
    }
    Ok(())
}

/// Checks that `bodies` cover a non-empty prefix of `headers` and match them.
fn check_bodies(headers: &[SealedHeader], bodies: &[BlockBody]) -> Result<(), PeerError> {
    if bodies.is_empty() {
        return Err(PeerError::Empty);
    }
    if bodies.len() > headers.len() {
        return Err(PeerError::TooMany { limit: headers.len(), got: bodies.len() });
    }
    for (header, body) in headers.iter().zip(bodies) {
        validate_body(header, body)
            .map_err(|_| PeerError::BodyMismatch { number: header.number })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B512;
    use marlin_primitives::test_utils::ChainBuilder;
    use rstest::rstest;

    const P1: PeerId = B512::repeat_byte(1);
    const P2: PeerId = B512::repeat_byte(2);

    fn config() -> SyncConfig {
        SyncConfig {
            header_request_limit: 8,
            body_request_limit: 4,
            min_peer_cooldown: Duration::from_millis(10),
            max_peer_cooldown: Duration::from_millis(80),
            ..Default::default()
        }
    }

    /// A chain of `len` blocks where `local` leading blocks are known locally.
    fn setup(len: usize, local: usize) -> (Scheduler, Vec<SealedBlock>, HashSet<BlockHash>) {
        let chain = ChainBuilder::default().with_transactions(1).build(len);
        let known = chain[..local].iter().map(|b| b.hash()).collect();
        let mut scheduler = Scheduler::new(&config());
        scheduler.add_peer(P1);
        (scheduler, chain, known)
    }

    fn headers_back(chain: &[SealedBlock], hash: BlockHash, limit: u64) -> Vec<SealedHeader> {
        let mut out = Vec::new();
        let mut next = chain.iter().rev().find(|b| b.hash() == hash);
        while let Some(block) = next {
            if out.len() as u64 == limit {
                break;
            }
            out.push(block.sealed_header());
            next = chain.iter().find(|b| b.hash() == block.parent_hash());
        }
        out
    }

    fn serve(chain: &[SealedBlock], request: &Request) -> Response {
        match &request.kind {
            RequestKind::Headers { hash, limit } => {
                Response::Headers(headers_back(chain, *hash, *limit))
            }
            RequestKind::Bodies { headers } => Response::Bodies(
                headers
                    .iter()
                    .filter_map(|h| chain.iter().find(|b| b.hash() == h.hash()))
                    .map(|b| b.body().clone())
                    .collect(),
            ),
        }
    }

    /// Serves every request `peer` gets until none is left, returning released blocks.
    fn pump(
        scheduler: &mut Scheduler,
        chain: &[SealedBlock],
        known: &HashSet<BlockHash>,
        peer: PeerId,
        now: Instant,
    ) -> Vec<Fetched> {
        let mut released = Vec::new();
        while let Some(request) = scheduler.next_request(peer, now) {
            let response = serve(chain, &request);
            scheduler.on_response(request.id, Ok(response), now, |h| known.contains(&h));
            released.extend(scheduler.drain_ready());
        }
        released
    }

    fn run_to_completion(
        scheduler: &mut Scheduler,
        chain: &[SealedBlock],
        known: &HashSet<BlockHash>,
        peer: PeerId,
    ) -> Vec<SealedBlock> {
        pump(scheduler, chain, known, peer, Instant::now()).into_iter().map(|f| f.block).collect()
    }

    /// Serves header requests from `peer` until the target chain is anchored.
    fn anchor(
        scheduler: &mut Scheduler,
        chain: &[SealedBlock],
        known: &HashSet<BlockHash>,
        peer: PeerId,
    ) {
        let now = Instant::now();
        while scheduler.anchor().is_none() {
            let request = scheduler.next_request(peer, now).unwrap();
            assert!(matches!(request.kind, RequestKind::Headers { .. }));
            scheduler.on_response(request.id, Ok(serve(chain, &request)), now, |h| {
                known.contains(&h)
            });
        }
    }

    #[test]
    fn test_resolves_headers_then_bodies_in_order() {
        let (mut scheduler, chain, known) = setup(30, 5);
        let target = chain[29].sealed_header();
        assert_eq!(scheduler.set_target(target, |h| known.contains(&h)), TargetPlan::Fetch);

        let released = run_to_completion(&mut scheduler, &chain, &known, P1);
        assert_eq!(scheduler.anchor(), Some(BlockNumHash::new(4, chain[4].hash())));
        assert_eq!(released, chain[5..].to_vec());
        assert!(scheduler.is_complete());
        assert_eq!(scheduler.buffered(), 0);
    }

    #[test]
    fn test_known_target_needs_no_fetch() {
        let (mut scheduler, chain, known) = setup(10, 10);
        let plan = scheduler.set_target(chain[7].sealed_header(), |h| known.contains(&h));
        assert_eq!(plan, TargetPlan::Known);
        assert!(scheduler.next_request(P1, Instant::now()).is_none());
    }

    #[test]
    fn test_child_of_known_block_is_anchored_immediately() {
        let (mut scheduler, chain, known) = setup(10, 9);
        scheduler.set_target(chain[9].sealed_header(), |h| known.contains(&h));
        assert_eq!(scheduler.anchor(), Some(BlockNumHash::new(8, chain[8].hash())));
        let request = scheduler.next_request(P1, Instant::now()).unwrap();
        assert!(matches!(request.kind, RequestKind::Bodies { ref headers } if headers.len() == 1));
    }

    #[test]
    fn test_out_of_order_bodies_are_buffered() {
        let (mut scheduler, chain, known) = setup(13, 1);
        scheduler.add_peer(P2);
        scheduler.set_target(chain[12].sealed_header(), |h| known.contains(&h));
        anchor(&mut scheduler, &chain, &known, P1);
        let now = Instant::now();

        // 1..=4 to P1, 5..=8 to P2
        let low = scheduler.next_request(P1, now).unwrap();
        let high = scheduler.next_request(P2, now).unwrap();
        let response = serve(&chain, &high);
        let outcome = scheduler.on_response(high.id, Ok(response), now, |h| known.contains(&h));
        assert_eq!(outcome, Outcome::Bodies { buffered: 4 });
        assert!(scheduler.drain_ready().is_empty());
        assert_eq!(scheduler.buffered(), 4);

        let response = serve(&chain, &low);
        scheduler.on_response(low.id, Ok(response), now, |h| known.contains(&h));
        let released: Vec<_> = scheduler.drain_ready().into_iter().map(|f| f.block).collect();
        assert_eq!(released, chain[1..9].to_vec());
        assert_eq!(scheduler.released().unwrap().number, 8);
    }

    #[test]
    fn test_superseded_bodies_are_dropped() {
        // canonical chain to 150, competing fork from 90 to 140
        let (mut scheduler, chain, _) = setup(151, 0);
        let fork = ChainBuilder::default()
            .with_transactions(1)
            .with_salt(9)
            .with_parent(chain[90].info())
            .build(50);
        let known: HashSet<_> = chain[..100].iter().map(|b| b.hash()).collect();
        let is_known = |h: BlockHash| known.contains(&h);
        let now = Instant::now();

        scheduler.set_target(chain[150].sealed_header(), is_known);
        anchor(&mut scheduler, &chain, &known, P1);
        assert_eq!(scheduler.anchor().map(|a| a.number), Some(99));
        let in_flight = scheduler.next_request(P1, now).unwrap();
        let old_session = in_flight.session;

        let fork_known: HashSet<_> = chain[..91].iter().map(|b| b.hash()).collect();
        let fork_is_known = |h: BlockHash| fork_known.contains(&h);
        scheduler.set_target(fork[49].sealed_header(), fork_is_known);
        assert_ne!(scheduler.session(), Some(old_session));

        let response = serve(&chain, &in_flight);
        let outcome = scheduler.on_response(in_flight.id, Ok(response), now, fork_is_known);
        assert_eq!(outcome, Outcome::Stale);
        assert_eq!(scheduler.buffered(), 0);

        let mut all = chain[..91].to_vec();
        all.extend(fork.iter().cloned());
        let released = run_to_completion(&mut scheduler, &all, &fork_known, P1);
        assert_eq!(released, fork);
    }

    #[test]
    fn test_stale_bodies_on_new_target_chain_are_kept() {
        let (mut scheduler, chain, known) = setup(20, 3);
        scheduler.add_peer(P2);
        let is_known = |h: BlockHash| known.contains(&h);
        let now = Instant::now();
        scheduler.set_target(chain[10].sealed_header(), is_known);
        anchor(&mut scheduler, &chain, &known, P1);
        let bodies = scheduler.next_request(P1, now).unwrap();
        let RequestKind::Bodies { headers } = &bodies.kind else { panic!("expected bodies") };
        assert_eq!(headers[0].number, 3);

        // the new target extends the old one
        scheduler.set_target(chain[19].sealed_header(), is_known);
        anchor(&mut scheduler, &chain, &known, P2);
        let outcome = scheduler.on_response(bodies.id, Ok(serve(&chain, &bodies)), now, is_known);
        assert_eq!(outcome, Outcome::Bodies { buffered: 4 });

        let mut released: Vec<_> = scheduler.drain_ready().into_iter().map(|f| f.block).collect();
        released.extend(run_to_completion(&mut scheduler, &chain, &known, P1));
        assert_eq!(released, chain[3..].to_vec());
    }

    #[test]
    fn test_failure_puts_peer_on_exponential_cooldown() {
        let (mut scheduler, chain, known) = setup(10, 1);
        let is_known = |h: BlockHash| known.contains(&h);
        scheduler.set_target(chain[9].sealed_header(), is_known);
        let mut now = Instant::now();

        let mut delays = Vec::new();
        for _ in 0..5 {
            let request = scheduler.next_request(P1, now).unwrap();
            let outcome = scheduler.on_response(request.id, Err(PeerError::Timeout), now, is_known);
            assert_eq!(outcome, Outcome::Rejected(PeerError::Timeout));
            let until = scheduler.cooldown(&P1, now).unwrap();
            assert!(scheduler.next_request(P1, now).is_none());
            delays.push(until - now);
            now = until;
        }
        let expected: Vec<_> = scheduler.backoff.build().take(5).collect();
        assert_eq!(delays, expected);
        assert_eq!(delays[0], config().min_peer_cooldown);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays[1] > delays[0]);
        assert_eq!(delays[4], config().max_peer_cooldown);

        // success resets the backoff
        let request = scheduler.next_request(P1, now).unwrap();
        scheduler.on_response(request.id, Ok(serve(&chain, &request)), now, is_known);
        let request = scheduler.next_request(P1, now).unwrap();
        scheduler.on_response(request.id, Err(PeerError::Disconnected), now, is_known);
        assert_eq!(scheduler.cooldown(&P1, now).unwrap() - now, config().min_peer_cooldown);
    }

    #[rstest]
    #[case::wrong_first(|c: &[SealedBlock]| vec![c[3].sealed_header()])]
    #[case::gap(|c: &[SealedBlock]| vec![c[8].sealed_header(), c[6].sealed_header()])]
    #[case::empty(|_: &[SealedBlock]| Vec::new())]
    fn test_bad_headers_rejected(#[case] response: fn(&[SealedBlock]) -> Vec<SealedHeader>) {
        let (mut scheduler, chain, known) = setup(10, 1);
        let is_known = |h: BlockHash| known.contains(&h);
        let now = Instant::now();
        scheduler.set_target(chain[9].sealed_header(), is_known);
        let request = scheduler.next_request(P1, now).unwrap();
        let expected = RequestKind::Headers { hash: chain[8].hash(), limit: 8 };
        assert_eq!(request.kind, expected);

        let response = Ok(Response::Headers(response(&chain)));
        let outcome = scheduler.on_response(request.id, response, now, is_known);
        assert!(matches!(outcome, Outcome::Rejected(_)));
        assert!(scheduler.anchor().is_none());
        scheduler.add_peer(P2);
        assert!(matches!(
            scheduler.next_request(P2, now).unwrap().kind,
            RequestKind::Headers { .. }
        ));
    }

    #[test]
    fn test_mismatched_body_retried_on_other_peer() {
        let (mut scheduler, chain, known) = setup(5, 1);
        scheduler.add_peer(P2);
        let is_known = |h: BlockHash| known.contains(&h);
        let now = Instant::now();
        scheduler.set_target(chain[4].sealed_header(), is_known);
        anchor(&mut scheduler, &chain, &known, P1);

        let request = scheduler.next_request(P1, now).unwrap();
        let RequestKind::Bodies { headers } = &request.kind else { panic!("expected bodies") };
        assert_eq!(headers.len(), 4);
        let donor = ChainBuilder::default().with_transactions(3).build(1).remove(0);
        let bodies = vec![donor.body().clone(); headers.len()];
        let response = Ok(Response::Bodies(bodies));
        let outcome = scheduler.on_response(request.id, response, now, is_known);
        assert_eq!(outcome, Outcome::Rejected(PeerError::BodyMismatch { number: 1 }));

        // the range avoids P1 while P2 is around
        let later = now + Duration::from_secs(1);
        assert!(scheduler.next_request(P1, later).is_none());
        let retry = scheduler.next_request(P2, later).unwrap();
        assert_eq!(retry.kind, request.kind);
    }

    #[test]
    fn test_single_peer_retries_its_own_failure() {
        let (mut scheduler, chain, known) = setup(6, 1);
        let is_known = |h: BlockHash| known.contains(&h);
        let now = Instant::now();
        scheduler.set_target(chain[5].sealed_header(), is_known);
        anchor(&mut scheduler, &chain, &known, P1);
        let request = scheduler.next_request(P1, now).unwrap();
        scheduler.on_response(request.id, Err(PeerError::Timeout), now, is_known);

        assert_eq!(scheduler.mode(), FetchMode::Single);
        let retry = scheduler.next_request(P1, now + Duration::from_secs(1)).unwrap();
        assert_eq!(retry.kind, request.kind);
    }

    #[test]
    fn test_partial_bodies_requeue_rest() {
        let (mut scheduler, chain, known) = setup(6, 1);
        let is_known = |h: BlockHash| known.contains(&h);
        let now = Instant::now();
        scheduler.set_target(chain[5].sealed_header(), is_known);
        anchor(&mut scheduler, &chain, &known, P1);

        let request = scheduler.next_request(P1, now).unwrap();
        let bodies = vec![chain[1].body().clone(), chain[2].body().clone()];
        let response = Ok(Response::Bodies(bodies));
        let outcome = scheduler.on_response(request.id, response, now, is_known);
        assert_eq!(outcome, Outcome::Bodies { buffered: 2 });
        assert!(scheduler.cooldown(&P1, now).is_none());

        let rest = scheduler.next_request(P1, now).unwrap();
        let RequestKind::Bodies { headers } = rest.kind else { panic!("expected bodies") };
        assert_eq!(headers.first().map(|h| h.number), Some(3));
    }

    #[test]
    fn test_invalid_block_replans_then_abandons() {
        let (mut scheduler, chain, known) = setup(12, 1);
        let mut now = Instant::now();
        scheduler.set_target(chain[11].sealed_header(), |h| known.contains(&h));

        for attempt in 1..=3 {
            let released = pump(&mut scheduler, &chain, &known, P1, now);
            let first = if attempt == 1 { 1 } else { 6 };
            assert_eq!(released.first().map(|f| f.block.number()), Some(first));
            assert_eq!(released.last().map(|f| f.block.number()), Some(11));

            let bad = released.iter().find(|f| f.block.number() == 6).unwrap();
            let outcome = scheduler.on_invalid_block(bad.block.hash(), bad.peer, now);
            if attempt < 3 {
                assert_eq!(outcome, InvalidBlockOutcome::Retry);
                assert_eq!(scheduler.released().unwrap().number, 5);
            } else {
                assert_eq!(outcome, InvalidBlockOutcome::Abandoned);
                assert!(scheduler.session().is_none());
            }
            now += Duration::from_secs(1);
        }
    }

    #[test]
    fn test_removed_peer_work_is_requeued() {
        let (mut scheduler, chain, known) = setup(6, 1);
        scheduler.add_peer(P2);
        let is_known = |h: BlockHash| known.contains(&h);
        let now = Instant::now();
        scheduler.set_target(chain[5].sealed_header(), is_known);
        let request = scheduler.next_request(P1, now).unwrap();
        scheduler.remove_peer(&P1);
        assert_eq!(scheduler.in_flight(), 0);
        let retry = scheduler.next_request(P2, now).unwrap();
        assert_eq!(retry.kind, request.kind);
        let outcome = scheduler.on_response(request.id, Ok(serve(&chain, &request)), now, is_known);
        assert_eq!(outcome, Outcome::Unknown);
    }

    #[test]
    fn test_unreachable_target_is_abandoned() {
        let (mut scheduler, chain, _) = setup(5, 0);
        let now = Instant::now();
        scheduler.set_target(chain[4].sealed_header(), |_| false);
        let request = scheduler.next_request(P1, now).unwrap();
        let response = Ok(serve(&chain, &request));
        let outcome = scheduler.on_response(request.id, response, now, |_| false);
        assert_eq!(outcome, Outcome::Unreachable);
        assert!(scheduler.session().is_none());
    }

    #[test]
    fn test_buffer_limit_pauses_body_requests() {
        let chain = ChainBuilder::default().build(40);
        let known: HashSet<_> = [chain[0].hash()].into_iter().collect();
        let is_known = |h: BlockHash| known.contains(&h);
        let mut scheduler = Scheduler::new(&SyncConfig {
            header_request_limit: 64,
            body_request_limit: 4,
            max_buffered_blocks: 12,
            ..config()
        });
        scheduler.add_peer(P1);
        scheduler.add_peer(P2);
        let now = Instant::now();
        scheduler.set_target(chain[39].sealed_header(), is_known);
        let request = scheduler.next_request(P1, now).unwrap();
        scheduler.on_response(request.id, Ok(serve(&chain, &request)), now, is_known);

        // 1..=4 stays in flight on P1 while P2 runs ahead
        let _low = scheduler.next_request(P1, now).unwrap();
        let mut served = 0;
        while let Some(request) = scheduler.next_request(P2, now) {
            scheduler.on_response(request.id, Ok(serve(&chain, &request)), now, is_known);
            served += 1;
        }
        assert_eq!(served, 2);
        assert_eq!(scheduler.buffered(), 8);
    }
}
