//! End-to-end handshake, driven over the in-memory `ChannelTransport`
//! rather than calling the state machine methods directly — exercises the
//! C8/C9 boundary the way a real host would.

use std::sync::Arc;

use sage_core::{
    ChannelTransport, HandshakeMachine, SageError, SecureSession, StaticDidResolver,
    TransportAdapter,
};
use sage_crypto::{KeyKind, KeyPair};
use sage_proto::{HandshakeConfig, SessionConfig};

fn peers() -> (Arc<HandshakeMachine>, Arc<HandshakeMachine>, ChannelTransport, ChannelTransport) {
    let alice_key = Arc::new(KeyPair::generate(KeyKind::Ed25519).unwrap());
    let bob_key = Arc::new(KeyPair::generate(KeyKind::Ed25519).unwrap());

    let resolver = Arc::new(StaticDidResolver::new());
    resolver.register("did:sage:test:alice", alice_key.public());
    resolver.register("did:sage:test:bob", bob_key.public());

    let alice = HandshakeMachine::new(
        "did:sage:test:alice",
        alice_key,
        Arc::clone(&resolver) as Arc<dyn sage_core::DidResolver>,
        sage_core::SessionManager::new(),
        HandshakeConfig::default(),
        SessionConfig::default(),
    );
    let bob = HandshakeMachine::new(
        "did:sage:test:bob",
        bob_key,
        resolver as Arc<dyn sage_core::DidResolver>,
        sage_core::SessionManager::new(),
        HandshakeConfig::default(),
        SessionConfig::default(),
    );

    let (alice_transport, bob_transport) = ChannelTransport::pair();
    (alice, bob, alice_transport, bob_transport)
}

#[test]
fn full_handshake_over_channel_transport_then_application_traffic() {
    let (alice, bob, alice_transport, bob_transport) = peers();
    let ctx = "ctx-e2e";

    let env_inv = alice.initiate(ctx, "did:sage:test:bob").unwrap();
    alice_transport.send(env_inv).unwrap();
    let env_inv = bob_transport.try_recv().expect("invitation delivered");
    bob.on_invitation(&env_inv).unwrap();

    let env_req = alice.send_request(ctx).unwrap();
    alice_transport.send(env_req).unwrap();
    let env_req = bob_transport.try_recv().expect("request delivered");
    let env_res = bob.on_request(&env_req).unwrap();

    bob_transport.send(env_res).unwrap();
    let env_res = alice_transport.try_recv().expect("response delivered");
    let (env_complete, session_a) = alice.on_response(&env_res).unwrap();

    alice_transport.send(env_complete).unwrap();
    let env_complete = bob_transport.try_recv().expect("complete delivered");
    let (_ack, session_b) = bob.on_complete(&env_complete).unwrap();

    assert_eq!(session_a.id(), session_b.id());
    assert_session_keys_complementary(&session_a, &session_b);

    let ciphertext = session_a.encrypt(b"ping").unwrap();
    let plaintext = session_b.decrypt(&ciphertext).unwrap();
    assert_eq!(plaintext, b"ping");

    let reply = session_b.encrypt(b"pong").unwrap();
    let plaintext = session_a.decrypt(&reply).unwrap();
    assert_eq!(plaintext, b"pong");
}

fn assert_session_keys_complementary(a: &SecureSession, b: &SecureSession) {
    assert_eq!(a.out_enc(), b.in_enc());
    assert_eq!(a.in_enc(), b.out_enc());
}

#[test]
fn a_replayed_invitation_is_rejected_on_the_wire() {
    let (alice, bob, alice_transport, bob_transport) = peers();
    let ctx = "ctx-replay-wire";

    let env_inv = alice.initiate(ctx, "did:sage:test:bob").unwrap();
    alice_transport.send(env_inv.clone()).unwrap();
    let first = bob_transport.try_recv().unwrap();
    bob.on_invitation(&first).unwrap();

    alice_transport.send(env_inv).unwrap();
    let second = bob_transport.try_recv().unwrap();
    assert!(matches!(
        bob.on_invitation(&second),
        Err(SageError::Replay)
    ));
    // the retransmit must not have torn down bob's staged pending context
    assert_eq!(bob.pending_count(), 1);

    let env_req = alice.send_request(ctx).unwrap();
    alice_transport.send(env_req).unwrap();
    let env_req = bob_transport.try_recv().expect("request delivered");
    let env_res = bob.on_request(&env_req).unwrap();

    bob_transport.send(env_res).unwrap();
    let env_res = alice_transport.try_recv().expect("response delivered");
    let (env_complete, session_a) = alice.on_response(&env_res).unwrap();

    alice_transport.send(env_complete).unwrap();
    let env_complete = bob_transport.try_recv().expect("complete delivered");
    let (_ack, session_b) = bob.on_complete(&env_complete).unwrap();

    assert_eq!(session_a.id(), session_b.id());
}
