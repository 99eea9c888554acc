// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The Setup/Auth state machine.
//!
//! Both roles first exchange Setup in the clear (concurrently, so
//! neither side blocks the other), negotiate version, MTU and token
//! budget, and turn encryption on. Credentials then travel over the
//! blessings flow, and each side proves possession of its signing key
//! with a role-tagged signature over the channel binding. For protocol
//! versions that cover Setup in the binding, the binding is the digest
//! of both Setup records in dialer-then-acceptor order, so a tampered
//! negotiation cannot authenticate.

use crate::{
    blessings::{BlessingsFlow, BLESSINGS_FLOW_ID},
    error::Error,
    options::{ConnOptions, DEFAULT_MTU, DEFAULT_SHARED_TOKENS},
    pipe::MessagePipe,
    DischargePreparer, PeerAuthorizer, RejectedBlessing,
};
use sha2::{Digest, Sha256};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use strand_core::{
    endpoint::Endpoint,
    message::{Auth, Message, Setup},
    security::{Blessings, Discharge, Principal, PublicKey},
    version::{Version, VersionRange},
};
use strand_crypto::{BoxKeyPair, Role};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

const AUTH_DIALER_TAG: &[u8] = b"AuthDial\x00";
const AUTH_ACCEPTOR_TAG: &[u8] = b"AuthAcpt\x00";

/// Everything the connection needs to know once the handshake is done
#[derive(Debug)]
pub(crate) struct HandshakeOutcome {
    pub version: Version,
    pub mtu: u64,
    /// Per-flow credit, shared-pool size and release threshold all key
    /// off this negotiated value
    pub negotiated_tokens: u64,
    pub local_ep: Endpoint,
    pub remote_ep: Endpoint,
    pub remote_public_key: PublicKey,
    pub remote_blessings: Blessings,
    pub remote_discharges: Vec<Discharge>,
    pub local_blessings: Blessings,
    pub local_discharges: Vec<Discharge>,
    pub blessings_key: u64,
    pub discharge_key: u64,
    pub rtt: Duration,
    pub discharge_refresh: Option<Duration>,
    pub authorized_names: Vec<String>,
    pub rejected: Vec<RejectedBlessing>,
}

struct SetupOutcome {
    version: Version,
    mtu: u64,
    tokens: u64,
    binding: Vec<u8>,
    local_ep: Endpoint,
    remote_setup: Setup,
    rtt_start: Instant,
}

fn protocol_violation(detail: &str) -> Error {
    Error::Recv(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        detail.to_string(),
    ))
}

fn binding_message(tag: &[u8], binding: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(tag.len() + binding.len());
    message.extend_from_slice(tag);
    message.extend_from_slice(binding);
    message
}

/// Exchanges Setup messages, negotiates parameters and enables
/// encryption
async fn setup<T: AsyncRead + AsyncWrite>(
    pipe: &mut MessagePipe<T>,
    role: Role,
    versions: VersionRange,
    local_ep: &Endpoint,
    remote_ep: &Endpoint,
    opts: &ConnOptions,
) -> Result<SetupOutcome, Error> {
    let keypair = BoxKeyPair::generate();
    let local_setup = Setup {
        versions,
        peer_nacl_public_key: Some(keypair.public_key()),
        peer_remote_endpoint: (!remote_ep.is_zero()).then(|| remote_ep.clone()),
        peer_local_endpoint: (!local_ep.is_zero()).then(|| local_ep.clone()),
        mtu: opts.mtu,
        shared_tokens: opts.shared_tokens,
    };
    let local_bytes = Message::from(local_setup.clone()).encode_to_vec();

    // send our Setup while reading theirs; neither side may wait for
    // the other before sending
    let (reader, writer) = pipe.frame_halves();
    let rtt_start = Instant::now();
    let (sent, received) = tokio::join!(writer.write_frame(&local_bytes), reader.read_frame());
    sent?;
    let remote_bytes = received?.into_vec();

    let remote_setup = match Message::decode(&remote_bytes)? {
        Message::Setup(setup) => setup,
        other => {
            return Err(protocol_violation(&format!(
                "expected a setup message, got type {}",
                other.tag()
            )))
        }
    };
    trace!(?remote_setup, "received setup");

    let version = versions.common_version(remote_setup.versions)?;

    let local_mtu = if opts.mtu == 0 { DEFAULT_MTU } else { opts.mtu };
    let remote_mtu = if remote_setup.mtu == 0 {
        DEFAULT_MTU
    } else {
        remote_setup.mtu
    };
    let mtu = local_mtu.min(remote_mtu);

    let local_tokens = if opts.shared_tokens == 0 {
        DEFAULT_SHARED_TOKENS
    } else {
        opts.shared_tokens
    };
    let mut tokens = local_tokens;
    if remote_setup.shared_tokens != 0 && remote_setup.shared_tokens < tokens {
        tokens = remote_setup.shared_tokens;
    }

    let peer_key = remote_setup
        .peer_nacl_public_key
        .filter(|key| key != &[0u8; 32])
        .ok_or(Error::MissingSetupOption("peerNaClPublicKey"))?;

    let raw_binding = pipe.enable_encryption(role, keypair, &peer_key);
    pipe.set_mtu(mtu, tokens);

    let binding = if version.covers_setup_in_binding() {
        // the binding covers both Setup records, dialer first
        let mut digest = Sha256::new();
        match role {
            Role::Dialer => {
                digest.update(&local_bytes);
                digest.update(&remote_bytes);
            }
            Role::Acceptor => {
                digest.update(&remote_bytes);
                digest.update(&local_bytes);
            }
        }
        digest.finalize().to_vec()
    } else {
        raw_binding.to_vec()
    };

    // the endpoint the peer says it dialed is our address if we didn't
    // know it ourselves
    let local_ep = if local_ep.is_zero() {
        remote_setup.peer_remote_endpoint.clone().unwrap_or_default()
    } else {
        local_ep.clone()
    };

    Ok(SetupOutcome {
        version,
        mtu,
        tokens,
        binding,
        local_ep,
        remote_setup,
        rtt_start,
    })
}

/// Reads blessings-flow records until the peer's Auth arrives
async fn read_remote_auth<T: AsyncRead + AsyncWrite>(
    pipe: &mut MessagePipe<T>,
    blessings_flow: &BlessingsFlow,
) -> Result<(Auth, Instant), Error> {
    loop {
        match pipe.recv().await? {
            Message::Data(data) if data.id == BLESSINGS_FLOW_ID => {
                blessings_flow.process(&data.payload)?;
            }
            Message::Auth(auth) => return Ok((auth, Instant::now())),
            Message::TearDown(teardown) => {
                return Err(Error::TearDownReceived(teardown.message))
            }
            // keepalives and credit may arrive early; they carry no
            // handshake state
            Message::HealthCheckRequest(_)
            | Message::HealthCheckResponse(_)
            | Message::Release(_) => {}
            other => {
                return Err(protocol_violation(&format!(
                    "unexpected message during handshake: type {}",
                    other.tag()
                )))
            }
        }
    }
}

fn resolve_remote(
    blessings_flow: &BlessingsFlow,
    auth: &Auth,
    binding: &[u8],
    peer_tag: &[u8],
) -> Result<(PublicKey, Blessings, Vec<Discharge>), Error> {
    // records for a key always precede the Auth that references it
    let (remote_blessings, remote_discharges) = blessings_flow
        .try_get_remote(auth.blessings_key, auth.discharge_key)
        .ok_or(Error::AcceptorBlessingsMissing)?;
    if remote_blessings.is_zero() {
        return Err(Error::AcceptorBlessingsMissing);
    }

    let remote_public_key = remote_blessings.public_key.clone();
    if auth.family != remote_public_key.algo.family() {
        return Err(Error::InvalidChannelBinding);
    }
    strand_crypto::verify(
        &remote_public_key,
        &binding_message(peer_tag, binding),
        &auth.channel_binding,
    )
    .map_err(|_| Error::InvalidChannelBinding)?;

    blessings_flow.set_public_key_binding(remote_public_key.clone());
    Ok((remote_public_key, remote_blessings, remote_discharges))
}

/// Publishes our credentials and sends our Auth message
async fn send_local_auth<T: AsyncRead + AsyncWrite>(
    pipe: &mut MessagePipe<T>,
    blessings_flow: &BlessingsFlow,
    principal: &Arc<dyn Principal>,
    local_blessings: &Blessings,
    local_discharges: &[Discharge],
    authorized_peers: &[String],
    binding: &[u8],
    tag: &[u8],
) -> Result<(u64, u64), Error> {
    let (blessings_key, discharge_key, records) =
        blessings_flow.prepare_send(local_blessings, local_discharges, authorized_peers)?;
    for record in &records {
        pipe.send(record).await?;
    }

    let signature = principal
        .sign(&binding_message(tag, binding))
        .map_err(|err| Error::NotTrusted(err.to_string()))?;
    let auth = Auth {
        family: principal.public_key().algo.family(),
        blessings_key,
        discharge_key,
        channel_binding: signature,
    };
    pipe.send(&Message::from(auth)).await?;
    Ok((blessings_key, discharge_key))
}

/// The dialer's half of the handshake
#[allow(clippy::too_many_arguments)]
pub(crate) async fn dial<T: AsyncRead + AsyncWrite>(
    pipe: &mut MessagePipe<T>,
    blessings_flow: &BlessingsFlow,
    principal: &Arc<dyn Principal>,
    versions: VersionRange,
    local_ep: &Endpoint,
    remote_ep: &Endpoint,
    authorizer: Option<&Arc<dyn PeerAuthorizer>>,
    dial_as_server: bool,
    opts: &ConnOptions,
) -> Result<HandshakeOutcome, Error> {
    // a pure client reveals only its public key; a server additionally
    // presents its real blessings
    let local_blessings = if dial_as_server {
        let blessings = principal.default_blessings();
        if blessings.is_zero() {
            Blessings::nameless(principal.public_key().clone())
        } else {
            blessings
        }
    } else {
        Blessings::nameless(principal.public_key().clone())
    };

    let setup = setup(
        pipe,
        Role::Dialer,
        versions,
        local_ep,
        remote_ep,
        opts,
    )
    .await?;

    let (remote_auth, rtt_end) = read_remote_auth(pipe, blessings_flow).await?;
    let rtt = rtt_end.duration_since(setup.rtt_start);

    let (remote_public_key, remote_blessings, remote_discharges) = resolve_remote(
        blessings_flow,
        &remote_auth,
        &setup.binding,
        AUTH_ACCEPTOR_TAG,
    )?;

    let remote_actual = setup
        .remote_setup
        .peer_local_endpoint
        .clone()
        .unwrap_or_default();

    let mut authorized_names = Vec::new();
    let mut rejected = Vec::new();
    // reaching a different routing id means this hop is a proxy, and
    // proxies are not authorized as the destination
    if remote_ep.matches_routing_id(remote_actual.routing_id) {
        if let Some(authorizer) = authorizer {
            let (names, rejections) = authorizer
                .authorize_peer(
                    &setup.local_ep,
                    &remote_actual,
                    &remote_blessings,
                    &remote_discharges,
                )
                .map_err(Error::NotTrusted)?;
            authorized_names = names;
            rejected = rejections;
        }
    }

    let (blessings_key, discharge_key) = send_local_auth(
        pipe,
        blessings_flow,
        principal,
        &local_blessings,
        &[],
        &[],
        &setup.binding,
        AUTH_DIALER_TAG,
    )
    .await?;

    debug!(version = %setup.version, rtt_us = rtt.as_micros() as u64, "dial handshake complete");

    Ok(HandshakeOutcome {
        version: setup.version,
        mtu: setup.mtu,
        negotiated_tokens: setup.tokens,
        local_ep: setup.local_ep,
        remote_ep: remote_actual,
        remote_public_key,
        remote_blessings,
        remote_discharges,
        local_blessings,
        local_discharges: Vec::new(),
        blessings_key,
        discharge_key,
        rtt,
        discharge_refresh: None,
        authorized_names,
        rejected,
    })
}

/// The acceptor's half of the handshake
pub(crate) async fn accept<T: AsyncRead + AsyncWrite>(
    pipe: &mut MessagePipe<T>,
    blessings_flow: &BlessingsFlow,
    principal: &Arc<dyn Principal>,
    versions: VersionRange,
    local_ep: &Endpoint,
    authorized_peers: &[String],
    preparer: Option<&Arc<dyn DischargePreparer>>,
    opts: &ConnOptions,
) -> Result<HandshakeOutcome, Error> {
    let mut local_blessings = principal.default_blessings();
    if local_blessings.is_zero() {
        local_blessings = Blessings::nameless(principal.public_key().clone());
    }

    // may issue sub-RPCs to satisfy third-party caveats
    let (local_discharges, discharge_refresh) = match preparer {
        Some(preparer) => preparer.prepare_discharges(&local_blessings).await,
        None => (Vec::new(), None),
    };

    let setup = setup(
        pipe,
        Role::Acceptor,
        versions,
        local_ep,
        &Endpoint::default(),
        opts,
    )
    .await?;

    let (blessings_key, discharge_key) = send_local_auth(
        pipe,
        blessings_flow,
        principal,
        &local_blessings,
        &local_discharges,
        authorized_peers,
        &setup.binding,
        AUTH_ACCEPTOR_TAG,
    )
    .await?;
    let rtt_start = Instant::now();

    let (remote_auth, rtt_end) = read_remote_auth(pipe, blessings_flow).await?;
    let rtt = rtt_end.duration_since(rtt_start);

    let (remote_public_key, remote_blessings, remote_discharges) = resolve_remote(
        blessings_flow,
        &remote_auth,
        &setup.binding,
        AUTH_DIALER_TAG,
    )?;

    let remote_ep = setup
        .remote_setup
        .peer_local_endpoint
        .clone()
        .unwrap_or_default();

    debug!(version = %setup.version, rtt_us = rtt.as_micros() as u64, "accept handshake complete");

    Ok(HandshakeOutcome {
        version: setup.version,
        mtu: setup.mtu,
        negotiated_tokens: setup.tokens,
        local_ep: setup.local_ep,
        remote_ep,
        remote_public_key,
        remote_blessings,
        remote_discharges,
        local_blessings,
        local_discharges,
        blessings_key,
        discharge_key,
        rtt,
        discharge_refresh,
        authorized_names: Vec::new(),
        rejected: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::buffer::NetBufPool;
    use strand_crypto::Ed25519Principal;
    use tokio::io::DuplexStream;

    fn principal(name: &str) -> Arc<dyn Principal> {
        Arc::new(Ed25519Principal::generate(name))
    }

    fn pipes() -> (MessagePipe<DuplexStream>, MessagePipe<DuplexStream>) {
        let (client, server) = tokio::io::duplex(1 << 20);
        (
            MessagePipe::new(client, NetBufPool::new()),
            MessagePipe::new(server, NetBufPool::new()),
        )
    }

    struct AllowAll;

    impl PeerAuthorizer for AllowAll {
        fn authorize_peer(
            &self,
            _local: &Endpoint,
            _remote: &Endpoint,
            blessings: &Blessings,
            _discharges: &[Discharge],
        ) -> Result<(Vec<String>, Vec<RejectedBlessing>), String> {
            Ok((blessings.names.clone(), Vec::new()))
        }
    }

    struct DenyAll;

    impl PeerAuthorizer for DenyAll {
        fn authorize_peer(
            &self,
            _local: &Endpoint,
            _remote: &Endpoint,
            _blessings: &Blessings,
            _discharges: &[Discharge],
        ) -> Result<(Vec<String>, Vec<RejectedBlessing>), String> {
            Err("nobody is welcome here".into())
        }
    }

    async fn run_pair(
        dial_versions: VersionRange,
        accept_versions: VersionRange,
        authorizer: Option<Arc<dyn PeerAuthorizer>>,
    ) -> (
        Result<HandshakeOutcome, Error>,
        Result<HandshakeOutcome, Error>,
    ) {
        let (mut dial_pipe, mut accept_pipe) = pipes();
        let dial_principal = principal("test:dialer");
        let accept_principal = principal("test:acceptor");
        let opts = ConnOptions::default();

        let dial_task = async {
            let blessings_flow = BlessingsFlow::new(None);
            dial(
                &mut dial_pipe,
                &blessings_flow,
                &dial_principal,
                dial_versions,
                &Endpoint::default(),
                &Endpoint::default(),
                authorizer.as_ref(),
                false,
                &opts,
            )
            .await
        };
        let accept_task = async {
            let blessings_flow = BlessingsFlow::new(None);
            accept(
                &mut accept_pipe,
                &blessings_flow,
                &accept_principal,
                accept_versions,
                &Endpoint::default(),
                &[],
                None,
                &opts,
            )
            .await
        };
        tokio::join!(dial_task, accept_task)
    }

    #[tokio::test]
    async fn handshake_completes_and_negotiates() {
        let (dialed, accepted) = run_pair(
            VersionRange::new(13, 15),
            VersionRange::new(14, 20),
            Some(Arc::new(AllowAll)),
        )
        .await;
        let dialed = dialed.unwrap();
        let accepted = accepted.unwrap();

        assert_eq!(dialed.version, Version(15));
        assert_eq!(accepted.version, Version(15));
        assert_eq!(dialed.mtu, accepted.mtu);
        assert_eq!(dialed.negotiated_tokens, accepted.negotiated_tokens);

        // the acceptor presented its real blessings; the pure-client
        // dialer stayed nameless
        assert_eq!(dialed.remote_blessings.names, ["test:acceptor"]);
        assert_eq!(dialed.authorized_names, ["test:acceptor"]);
        assert!(accepted.remote_blessings.names.is_empty());
        assert!(!accepted.remote_public_key.is_empty());
    }

    #[tokio::test]
    async fn disjoint_versions_fail() {
        let (dialed, accepted) =
            run_pair(VersionRange::new(1, 3), VersionRange::new(14, 15), None).await;
        assert!(matches!(dialed, Err(Error::NoCompatibleVersions(_))));
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn untrusted_peer_fails_the_dial() {
        let (dialed, _accepted) = run_pair(
            VersionRange::new(13, 15),
            VersionRange::new(13, 15),
            Some(Arc::new(DenyAll)),
        )
        .await;
        match dialed {
            Err(Error::NotTrusted(reason)) => assert!(reason.contains("nobody")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_nacl_key_fails_setup() {
        let (mut dial_pipe, mut accept_pipe) = pipes();
        let accept_principal = principal("test:acceptor");
        let opts = ConnOptions::default();

        let rogue = async {
            let keyless = Message::from(Setup {
                versions: VersionRange::new(13, 15),
                mtu: 4096,
                shared_tokens: 1 << 16,
                ..Default::default()
            });
            let (reader, writer) = dial_pipe.frame_halves();
            let encoded = keyless.encode_to_vec();
            let (_, _) = tokio::join!(writer.write_frame(&encoded), reader.read_frame());
        };
        let accept_task = async {
            let blessings_flow = BlessingsFlow::new(None);
            accept(
                &mut accept_pipe,
                &blessings_flow,
                &accept_principal,
                VersionRange::new(13, 15),
                &Endpoint::default(),
                &[],
                None,
                &opts,
            )
            .await
        };
        let (_, accepted) = tokio::join!(rogue, accept_task);
        assert!(matches!(accepted, Err(Error::MissingSetupOption(_))));
    }

    #[tokio::test]
    async fn swapped_signature_prefix_fails_verification() {
        let (mut dial_pipe, mut accept_pipe) = pipes();
        let rogue_principal = principal("test:rogue");
        let accept_principal = principal("test:acceptor");
        let opts = ConnOptions::default();

        // a dialer that signs with the acceptor's tag
        let rogue = async {
            let blessings_flow = BlessingsFlow::new(None);
            let setup = setup(
                &mut dial_pipe,
                Role::Dialer,
                VersionRange::new(13, 15),
                &Endpoint::default(),
                &Endpoint::default(),
                &opts,
            )
            .await?;
            let (_, _) = read_remote_auth(&mut dial_pipe, &blessings_flow).await?;
            send_local_auth(
                &mut dial_pipe,
                &blessings_flow,
                &rogue_principal,
                &rogue_principal.default_blessings(),
                &[],
                &[],
                &setup.binding,
                AUTH_ACCEPTOR_TAG,
            )
            .await
        };
        let accept_task = async {
            let blessings_flow = BlessingsFlow::new(None);
            accept(
                &mut accept_pipe,
                &blessings_flow,
                &accept_principal,
                VersionRange::new(13, 15),
                &Endpoint::default(),
                &[],
                None,
                &opts,
            )
            .await
        };
        let (rogue_result, accepted) = tokio::join!(rogue, accept_task);
        let _: Result<(u64, u64), Error> = rogue_result;
        assert!(matches!(accepted, Err(Error::InvalidChannelBinding)));
    }

    #[tokio::test]
    async fn successive_handshakes_produce_distinct_bindings() {
        // ephemeral box keys are fresh per connection, so the bindings
        // the two handshakes sign can never repeat
        let mut bindings = Vec::new();
        for _ in 0..2 {
            let (mut dial_pipe, mut accept_pipe) = pipes();
            let opts = ConnOptions::default();
            let dial_principal = principal("test:dialer");
            let accept_principal = principal("test:acceptor");

            let dial_task = async {
                let blessings_flow = BlessingsFlow::new(None);
                let outcome = setup(
                    &mut dial_pipe,
                    Role::Dialer,
                    VersionRange::new(13, 15),
                    &Endpoint::default(),
                    &Endpoint::default(),
                    &opts,
                )
                .await?;
                // finish the exchange so the acceptor is not left hanging
                let blessings = dial_principal.default_blessings();
                send_local_auth(
                    &mut dial_pipe,
                    &blessings_flow,
                    &dial_principal,
                    &blessings,
                    &[],
                    &[],
                    &outcome.binding,
                    AUTH_DIALER_TAG,
                )
                .await?;
                let _ = read_remote_auth(&mut dial_pipe, &blessings_flow).await?;
                Ok::<_, Error>(outcome.binding)
            };
            let accept_task = async {
                let blessings_flow = BlessingsFlow::new(None);
                accept(
                    &mut accept_pipe,
                    &blessings_flow,
                    &accept_principal,
                    VersionRange::new(13, 15),
                    &Endpoint::default(),
                    &[],
                    None,
                    &opts,
                )
                .await
            };
            let (binding, accepted) = tokio::join!(dial_task, accept_task);
            accepted.unwrap();
            bindings.push(binding.unwrap());
        }
        assert_ne!(bindings[0], bindings[1]);
    }
}
