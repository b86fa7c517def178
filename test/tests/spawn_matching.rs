//! Spawn/match/unspawn flows: dynamic spawns, unique-hash matching in both
//! arrival orders, duplicate detection, and unspawn teardown.

use tether_client::ClientEvent;
use tether_server::ServerEvent;
use tether_shared::{ReplicationError, SpawnOptions};
use tether_test::helpers::{exchange, test_client, test_server, MemoryNetwork, TestWorld};

fn connected_pair() -> (
    MemoryNetwork,
    tether_server::Server<u64>,
    tether_client::Client<u64>,
    TestWorld,
    TestWorld,
    u64,
) {
    let net = MemoryNetwork::new();
    let mut server = test_server();
    let mut client = test_client();
    server.listen(net.server_transport()).unwrap();
    let (transport, peer_id) = net.connect_client();
    client.connect(transport).unwrap();

    let mut server_world = TestWorld::new();
    let mut client_world = TestWorld::new();
    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 3);
    assert!(client.is_connected());

    (net, server, client, server_world, client_world, peer_id)
}

#[test]
fn dynamic_spawn_instantiates_and_promotes_the_observer() {
    let (_net, mut server, mut client, mut server_world, mut client_world, peer_id) =
        connected_pair();

    let entity = server_world.create_entity();
    let network_id = server
        .spawn_object(&mut server_world, entity, 77, SpawnOptions::default())
        .unwrap();

    // spawn sent but not yet acknowledged
    let (_, client_events) =
        exchange(&mut server, &mut server_world, &mut client, &mut client_world, 1);
    assert_eq!(client_world.instantiated.len(), 1);
    assert_eq!(client_world.instantiated[0].1, 77);
    assert!(client_events
        .iter()
        .any(|event| matches!(event, ClientEvent::ObjectConnected { network_id: id, .. } if *id == network_id)));

    // the acknowledgment promotes the peer to a full observer
    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 1);
    let record = server.object_record(network_id).unwrap();
    assert!(record.is_observer(peer_id));
    assert!(!record.is_pending_observer(peer_id));
}

#[test]
fn local_registration_before_spawn_message_converges() {
    let (_net, mut server, mut client, mut server_world, mut client_world, peer_id) =
        connected_pair();

    // client registers the door before the server announces it
    let client_entity = client_world.create_entity();
    client
        .register_object(&mut client_world, client_entity, "door_1")
        .unwrap();

    let server_entity = server_world.create_entity();
    let options = SpawnOptions {
        unique_id: Some("door_1".to_string()),
        ..Default::default()
    };
    let network_id = server
        .spawn_object(&mut server_world, server_entity, 55, options)
        .unwrap();

    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 2);

    // no instantiation: the pre-existing local object was matched
    assert!(client_world.instantiated.is_empty());
    assert!(client.object_record(network_id).is_some());
    let record = server.object_record(network_id).unwrap();
    assert!(record.is_observer(peer_id));
}

#[test]
fn spawn_message_before_local_registration_converges() {
    let (_net, mut server, mut client, mut server_world, mut client_world, peer_id) =
        connected_pair();

    let server_entity = server_world.create_entity();
    let options = SpawnOptions {
        unique_id: Some("door_1".to_string()),
        ..Default::default()
    };
    let network_id = server
        .spawn_object(&mut server_world, server_entity, 55, options)
        .unwrap();

    // deliver the spawn first; it parks in the remote pending table
    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 1);
    assert!(client.object_record(network_id).is_none());

    let client_entity = client_world.create_entity();
    client
        .register_object(&mut client_world, client_entity, "door_1")
        .unwrap();
    assert!(client.object_record(network_id).is_some());

    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 1);
    let record = server.object_record(network_id).unwrap();
    assert!(record.is_observer(peer_id));
}

#[test]
fn duplicate_unique_id_fails_the_second_registration() {
    let (_net, _server, mut client, _server_world, mut client_world, _peer_id) = connected_pair();

    let first = client_world.create_entity();
    let second = client_world.create_entity();
    client
        .register_object(&mut client_world, first, "door_1")
        .unwrap();

    let error = client
        .register_object(&mut client_world, second, "door_1")
        .unwrap_err();
    assert_eq!(
        error,
        tether_client::TetherClientError::Replication(ReplicationError::DuplicateUniqueId {
            unique_id: "door_1".to_string()
        })
    );
}

#[test]
fn several_spawns_in_one_tick_all_connect() {
    let (_net, mut server, mut client, mut server_world, mut client_world, _peer_id) =
        connected_pair();

    let mut ids = Vec::new();
    for type_hash in [70u64, 71, 72] {
        let entity = server_world.create_entity();
        ids.push(
            server
                .spawn_object(&mut server_world, entity, type_hash, SpawnOptions::default())
                .unwrap(),
        );
    }

    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 2);

    assert_eq!(client_world.instantiated.len(), 3);
    for id in ids {
        assert!(client.object_record(id).is_some());
    }
}

#[test]
fn unspawn_tears_down_the_remote_mirror() {
    let (_net, mut server, mut client, mut server_world, mut client_world, _peer_id) =
        connected_pair();

    let entity = server_world.create_entity();
    let network_id = server
        .spawn_object(&mut server_world, entity, 77, SpawnOptions::default())
        .unwrap();
    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 2);
    let client_entity = client_world.instantiated[0].0;

    server
        .unspawn_object(&mut server_world, network_id, true)
        .unwrap();
    let (server_events, client_events) =
        exchange(&mut server, &mut server_world, &mut client, &mut client_world, 2);

    assert!(server.object_record(network_id).is_none());
    assert!(client.object_record(network_id).is_none());
    assert_eq!(server_world.destroyed, vec![entity]);
    assert_eq!(client_world.destroyed, vec![client_entity]);
    assert!(server_events
        .iter()
        .any(|event| matches!(event, ServerEvent::ObjectDisconnected { network_id: id, .. } if *id == network_id)));
    assert!(client_events
        .iter()
        .any(|event| matches!(event, ClientEvent::ObjectDisconnected { network_id: id, .. } if *id == network_id)));
}

#[test]
fn owner_client_with_permission_can_request_unspawn() {
    let (_net, mut server, mut client, mut server_world, mut client_world, peer_id) =
        connected_pair();

    let entity = server_world.create_entity();
    let options = SpawnOptions {
        owner: peer_id,
        owner_can_unspawn: true,
        ..Default::default()
    };
    let network_id = server
        .spawn_object(&mut server_world, entity, 77, options)
        .unwrap();
    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 2);

    client.request_unspawn(network_id, true).unwrap();
    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 2);

    assert!(server.object_record(network_id).is_none());
    assert!(client.object_record(network_id).is_none());
}

#[test]
fn non_owner_unspawn_request_is_a_protocol_violation() {
    let (_net, mut server, mut client, mut server_world, mut client_world, peer_id) =
        connected_pair();

    // owned by the server, not the client
    let entity = server_world.create_entity();
    let network_id = server
        .spawn_object(&mut server_world, entity, 77, SpawnOptions::default())
        .unwrap();
    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 2);

    // the local permission check blocks the polite path
    assert!(client.request_unspawn(network_id, true).is_err());

    // a hostile client sends the message anyway and is disconnected
    let payload = tether_test::helpers::frame_message(
        tether_shared::MessageType::DESTROY_OBJECT,
        &tether_shared::DestroyObjectMessage {
            network_id,
            destroy: true,
        },
    );
    _net.inject_from_client(peer_id, payload, 0);
    exchange(&mut server, &mut server_world, &mut client, &mut client_world, 1);

    assert!(!server.has_peer(peer_id));
    assert!(server.object_record(network_id).is_some());
}
