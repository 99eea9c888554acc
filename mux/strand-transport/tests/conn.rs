// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end connection scenarios over an in-memory duplex transport.

use std::{sync::Arc, time::Duration};
use strand_core::{
    endpoint::Endpoint,
    security::{Blessings, Discharge, Principal},
    version::VersionRange,
};
use strand_crypto::Ed25519Principal;
use strand_transport::{
    Conn, ConnOptions, Error, Flow, FlowHandler, PeerAuthorizer, RejectedBlessing,
};
use tokio::sync::mpsc;

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

struct Collector {
    flows: mpsc::UnboundedSender<Flow>,
}

impl FlowHandler for Collector {
    fn handle_flow(&self, flow: Flow) {
        let _ = self.flows.send(flow);
    }
}

struct Harness {
    dialer: Conn,
    acceptor: Conn,
    accepted: mpsc::UnboundedReceiver<Flow>,
}

async fn connect(opts: ConnOptions) -> Harness {
    let (client, server) = tokio::io::duplex(1 << 20);
    let (flow_tx, accepted) = mpsc::unbounded_channel();

    let dial_principal: Arc<dyn Principal> = Arc::new(Ed25519Principal::generate("test:dialer"));
    let accept_principal: Arc<dyn Principal> =
        Arc::new(Ed25519Principal::generate("test:acceptor"));

    let accept_opts = opts.clone();
    let accept_task = tokio::spawn(async move {
        Conn::new_accepted(
            server,
            Vec::new(),
            Endpoint::default(),
            VersionRange::SUPPORTED,
            accept_principal,
            Arc::new(Collector { flows: flow_tx }),
            None,
            None,
            accept_opts,
        )
        .await
    });

    let dialer = Conn::new_dialed(
        client,
        Endpoint::default(),
        Endpoint::default(),
        VersionRange::SUPPORTED,
        dial_principal,
        Some(Arc::new(AllowAll)),
        None,
        None,
        opts,
    )
    .await
    .expect("dial failed");

    let acceptor = accept_task.await.unwrap().expect("accept failed");
    Harness {
        dialer,
        acceptor,
        accepted,
    }
}

#[tokio::test]
async fn dial_open_echo_and_eof() {
    let mut harness = connect(ConnOptions::default()).await;

    let mut flow = harness.dialer.dial_flow().await.unwrap();
    flow.write_and_close(b"fake payload").await.unwrap();

    let mut accepted = harness.accepted.recv().await.unwrap();
    let bytes = accepted.read_to_end().await.unwrap();
    assert_eq!(bytes, b"fake payload");

    // echo back on the same flow
    accepted.write_and_close(b"fake payload").await.unwrap();
    let echoed = flow.read_to_end().await.unwrap();
    assert_eq!(echoed, b"fake payload");
}

#[tokio::test]
async fn handshake_authenticates_both_ends() {
    let harness = connect(ConnOptions::default()).await;

    assert_eq!(harness.dialer.version(), harness.acceptor.version());
    assert_eq!(harness.dialer.mtu(), harness.acceptor.mtu());
    assert_eq!(harness.dialer.authorized_names(), ["test:acceptor"]);
    assert_eq!(
        harness.dialer.remote_blessings().names,
        vec!["test:acceptor".to_string()]
    );
    // the dialer acted as a pure client and stayed nameless
    assert!(harness.acceptor.remote_blessings().names.is_empty());
    assert!(!harness.acceptor.remote_public_key().is_empty());
}

#[tokio::test]
async fn writes_arrive_in_order() {
    let mut harness = connect(ConnOptions::default()).await;

    let mut flow = harness.dialer.dial_flow().await.unwrap();
    let mut want = Vec::new();
    for i in 0..50u32 {
        let chunk = i.to_be_bytes();
        flow.write(&chunk).await.unwrap();
        want.extend_from_slice(&chunk);
    }
    flow.close().await.unwrap();

    let mut accepted = harness.accepted.recv().await.unwrap();
    let got = accepted.read_to_end().await.unwrap();
    assert_eq!(got, want);
}

#[tokio::test]
async fn large_transfer_respects_mtu_and_credit() {
    let opts = ConnOptions::default()
        .with_mtu(1024)
        .with_shared_tokens(4096);
    let mut harness = connect(opts).await;

    let payload: Vec<u8> = (0..64 * 1024u32).map(|i| i as u8).collect();
    let flow = harness.dialer.dial_flow().await.unwrap();
    let payload_clone = payload.clone();
    let writer = tokio::spawn(async move {
        let mut flow = flow;
        flow.write_and_close(&payload_clone).await.unwrap();
    });

    let mut accepted = harness.accepted.recv().await.unwrap();
    let got = accepted.read_to_end().await.unwrap();
    writer.await.unwrap();
    assert_eq!(got, payload);
}

#[tokio::test]
async fn sender_blocks_until_receiver_releases() {
    // a shared budget of 1500 bytes cannot carry two whole kilobytes
    let opts = ConnOptions::default().with_shared_tokens(1500);
    let mut harness = connect(opts).await;

    let mut first = harness.dialer.dial_flow().await.unwrap();
    first.write(&[0xaa; 1024]).await.unwrap();

    let mut second = harness.dialer.dial_flow().await.unwrap();
    let blocked = tokio::spawn(async move {
        second.write(&[0xbb; 1024]).await.unwrap();
        second
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished(), "second flow should be out of credit");

    // consuming the first kilobyte makes its receiver issue a Release
    let mut first_accepted = harness.accepted.recv().await.unwrap();
    let mut buf = vec![0u8; 1024];
    let mut read = 0;
    while read < 1024 {
        let n = first_accepted.read(&mut buf[read..]).await.unwrap();
        assert!(n > 0);
        read += n;
    }

    let mut second = blocked.await.unwrap();
    second.close().await.unwrap();
    drop(first);
}

#[tokio::test]
async fn closing_a_flow_is_idempotent() {
    let mut harness = connect(ConnOptions::default()).await;

    let mut flow = harness.dialer.dial_flow().await.unwrap();
    flow.write(b"x").await.unwrap();
    flow.close().await.unwrap();
    flow.close().await.unwrap();
    assert!(matches!(flow.write(b"y").await, Err(Error::FlowClosed)));

    let mut accepted = harness.accepted.recv().await.unwrap();
    assert_eq!(accepted.read_to_end().await.unwrap(), b"x");
}

#[tokio::test]
async fn lame_duck_drains_before_announcing() {
    let mut harness = connect(ConnOptions::default()).await;

    let mut flow = harness.dialer.dial_flow().await.unwrap();
    let mut want = Vec::new();
    for i in 0..10u8 {
        let msg = [i; 32];
        flow.write(&msg).await.unwrap();
        want.extend_from_slice(&msg);
    }
    flow.close().await.unwrap();

    // returns only once the peer acknowledged
    harness.dialer.enter_lame_duck().await.unwrap();
    assert!(harness.acceptor.in_lame_duck());

    // every byte written before the announcement is still delivered
    let mut accepted = harness.accepted.recv().await.unwrap();
    let got = accepted.read_to_end().await.unwrap();
    assert_eq!(got, want);
}

#[tokio::test]
async fn teardown_reaches_the_peer() {
    let harness = connect(ConnOptions::default()).await;

    harness.dialer.close(Some("done testing".into())).await;
    harness.acceptor.closed().await;

    let reason = harness.acceptor.close_reason().unwrap_or_default();
    assert!(reason.contains("done testing"), "reason: {reason}");
}

#[tokio::test]
async fn conn_close_cancels_flows() {
    let mut harness = connect(ConnOptions::default()).await;

    let mut flow = harness.dialer.dial_flow().await.unwrap();
    flow.write(b"hello").await.unwrap();
    let mut accepted = harness.accepted.recv().await.unwrap();

    harness.dialer.close(None).await;
    harness.acceptor.closed().await;

    let mut buf = [0u8; 16];
    // the accepted flow either saw the data then the cancellation, or
    // the cancellation alone
    loop {
        match accepted.read(&mut buf).await {
            Ok(n) if n > 0 => continue,
            Ok(0) => panic!("expected cancellation, saw clean EOF"),
            Ok(_) => unreachable!(),
            Err(Error::ConnectionClosed) => break,
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert!(matches!(
        flow.write(b"more").await,
        Err(Error::ConnectionClosed | Error::FlowClosed)
    ));
}

#[tokio::test]
async fn dialing_on_a_closed_conn_fails() {
    let harness = connect(ConnOptions::default()).await;
    harness.dialer.close(None).await;
    assert!(matches!(
        harness.dialer.dial_flow().await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn flow_ids_partition_by_role() {
    let mut harness = connect(ConnOptions::default()).await;

    let dialed = harness.dialer.dial_flow().await.unwrap();
    assert_eq!(dialed.id() % 2, 1);
    assert!(dialed.id() >= 3);

    let from_acceptor = harness.acceptor.dial_flow().await.unwrap();
    assert_eq!(from_acceptor.id() % 2, 0);
    assert!(from_acceptor.id() >= 4);

    // both directions work: keep the dialed flow alive long enough to
    // receive on the acceptor side
    let mut dialed = dialed;
    dialed.write_and_close(b"ping").await.unwrap();
    let mut accepted = harness.accepted.recv().await.unwrap();
    assert_eq!(accepted.read_to_end().await.unwrap(), b"ping");
}

#[tokio::test]
async fn too_many_flows_is_rejected() {
    let opts = ConnOptions::default().with_max_flows(2);
    let harness = connect(opts).await;

    let _first = harness.dialer.dial_flow().await.unwrap();
    let _second = harness.dialer.dial_flow().await.unwrap();
    assert!(matches!(
        harness.dialer.dial_flow().await,
        Err(Error::TooManyFlows)
    ));
}

#[tokio::test]
async fn health_checks_keep_an_active_conn_alive() {
    let opts = ConnOptions::default().with_channel_timeout(Duration::from_millis(200));
    let mut harness = connect(opts).await;

    // idle well past the timeout; keepalives must prevent teardown
    tokio::time::sleep(Duration::from_millis(600)).await;
    let mut flow = harness.dialer.dial_flow().await.unwrap();
    flow.write_and_close(b"still here").await.unwrap();
    let mut accepted = harness.accepted.recv().await.unwrap();
    assert_eq!(accepted.read_to_end().await.unwrap(), b"still here");
}

#[tokio::test]
async fn flow_level_blessings_reach_the_acceptor() {
    let mut harness = connect(ConnOptions::default()).await;

    let blessings = Blessings {
        public_key: harness.acceptor.remote_public_key().clone(),
        names: vec!["test:dialer:delegate".into()],
    };
    let mut flow = harness
        .dialer
        .dial_flow_with(blessings.clone(), &[])
        .await
        .unwrap();
    flow.write_and_close(b"with blessings").await.unwrap();

    let mut accepted = harness.accepted.recv().await.unwrap();
    assert_eq!(accepted.remote_blessings(), &blessings);
    assert_eq!(accepted.read_to_end().await.unwrap(), b"with blessings");
}

#[tokio::test]
async fn rtt_is_measured() {
    let harness = connect(ConnOptions::default()).await;
    // an in-memory transport round-trips quickly, but the measurement
    // must exist and be sane
    assert!(harness.dialer.rtt() < Duration::from_secs(5));
    assert!(harness.acceptor.rtt() < Duration::from_secs(5));
}
