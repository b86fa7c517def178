//! Show/hide visibility flows: pending-observer promotion, selective
//! spawn delivery, and the server-observation guard.

use tether_server::{Server, TetherServerError};
use tether_shared::{ReplicationError, SpawnOptions, SERVER_PEER_ID};
use tether_test::helpers::{exchange_many, test_client, test_server, MemoryNetwork, TestWorld};

struct TwoClientRig {
    net: MemoryNetwork,
    server: Server<u64>,
    server_world: TestWorld,
    client1: tether_client::Client<u64>,
    client1_world: TestWorld,
    peer1: u64,
    client2: tether_client::Client<u64>,
    client2_world: TestWorld,
    peer2: u64,
}

impl TwoClientRig {
    fn new() -> Self {
        let net = MemoryNetwork::new();
        let mut server = test_server();
        server.listen(net.server_transport()).unwrap();

        let mut client1 = test_client();
        let (transport1, peer1) = net.connect_client();
        client1.connect(transport1).unwrap();

        let mut client2 = test_client();
        let (transport2, peer2) = net.connect_client();
        client2.connect(transport2).unwrap();

        let mut rig = Self {
            net,
            server,
            server_world: TestWorld::new(),
            client1,
            client1_world: TestWorld::new(),
            peer1,
            client2,
            client2_world: TestWorld::new(),
            peer2,
        };
        rig.run(3);
        assert!(rig.client1.is_connected());
        assert!(rig.client2.is_connected());
        rig
    }

    fn run(&mut self, rounds: usize) {
        exchange_many(
            &mut self.server,
            &mut self.server_world,
            &mut [
                (&mut self.client1, &mut self.client1_world),
                (&mut self.client2, &mut self.client2_world),
            ],
            rounds,
        );
    }
}

#[test]
fn selective_spawn_shows_then_promotes_on_acknowledgment() {
    let mut rig = TwoClientRig::new();

    // visible only to peer2; peer1 must never hear about it
    let entity = rig.server_world.create_entity();
    let options = SpawnOptions {
        observers: Some(vec![rig.peer2]),
        ..Default::default()
    };
    let network_id = rig
        .server
        .spawn_object(&mut rig.server_world, entity, 77, options)
        .unwrap();
    rig.run(2);

    assert!(rig.client1.object_record(network_id).is_none());
    assert!(rig.client1_world.instantiated.is_empty());
    assert!(rig.client2.object_record(network_id).is_some());

    // now show it to peer1: first pending, observer only after the ack
    rig.server.network_show(rig.peer1, network_id).unwrap();
    {
        let record = rig.server.object_record(network_id).unwrap();
        assert!(record.is_pending_observer(rig.peer1));
        assert!(!record.is_observer(rig.peer1));
    }

    // deliver the spawn to peer1, but don't let its ack back yet
    rig.server.tick(&mut rig.server_world);
    let _ = rig.client1.tick(&mut rig.client1_world);
    assert_eq!(rig.client1_world.instantiated.len(), 1);
    {
        let record = rig.server.object_record(network_id).unwrap();
        assert!(record.is_pending_observer(rig.peer1));
        assert!(!record.is_observer(rig.peer1));
    }

    // the ack lands on the next server tick
    rig.run(1);
    let record = rig.server.object_record(network_id).unwrap();
    assert!(record.is_observer(rig.peer1));
    assert!(!record.is_pending_observer(rig.peer1));
}

#[test]
fn exactly_one_spawn_message_per_show() {
    let mut rig = TwoClientRig::new();

    let entity = rig.server_world.create_entity();
    let options = SpawnOptions {
        observers: Some(vec![rig.peer2]),
        ..Default::default()
    };
    let network_id = rig
        .server
        .spawn_object(&mut rig.server_world, entity, 77, options)
        .unwrap();
    rig.server.network_show(rig.peer1, network_id).unwrap();
    // a second show for an already-pending peer must not double-send
    rig.server.network_show(rig.peer1, network_id).unwrap();
    rig.run(3);

    assert_eq!(rig.client1_world.instantiated.len(), 1);
}

#[test]
fn hide_unspawns_on_the_hidden_peer_only() {
    let mut rig = TwoClientRig::new();

    let entity = rig.server_world.create_entity();
    let network_id = rig
        .server
        .spawn_object(&mut rig.server_world, entity, 77, SpawnOptions::default())
        .unwrap();
    rig.run(2);
    assert!(rig.client1.object_record(network_id).is_some());
    assert!(rig.client2.object_record(network_id).is_some());

    rig.server.network_hide(rig.peer1, network_id).unwrap();
    rig.run(2);

    assert!(rig.client1.object_record(network_id).is_none());
    assert_eq!(rig.client1_world.destroyed.len(), 1);
    assert!(rig.client2.object_record(network_id).is_some());

    let record = rig.server.object_record(network_id).unwrap();
    assert!(!record.is_observer(rig.peer1));
    assert!(record.is_observer(rig.peer2));
}

#[test]
fn hiding_the_server_observation_is_rejected() {
    let mut rig = TwoClientRig::new();

    let entity = rig.server_world.create_entity();
    let network_id = rig
        .server
        .spawn_object(&mut rig.server_world, entity, 77, SpawnOptions::default())
        .unwrap();

    let error = rig.server.network_hide(SERVER_PEER_ID, network_id).unwrap_err();
    assert_eq!(
        error,
        TetherServerError::Replication(ReplicationError::CannotTargetServer)
    );
}

#[test]
fn late_joiner_catches_up_on_visible_objects_only() {
    let mut rig = TwoClientRig::new();

    let default_entity = rig.server_world.create_entity();
    let default_id = rig
        .server
        .spawn_object(&mut rig.server_world, default_entity, 80, SpawnOptions::default())
        .unwrap();

    let selective_entity = rig.server_world.create_entity();
    let selective_options = SpawnOptions {
        observers: Some(vec![rig.peer1]),
        ..Default::default()
    };
    let selective_id = rig
        .server
        .spawn_object(&mut rig.server_world, selective_entity, 81, selective_options)
        .unwrap();
    rig.run(2);

    // a third client joins after both spawns
    let mut late_client = test_client();
    let (transport, late_peer) = rig.net.connect_client();
    late_client.connect(transport).unwrap();
    let mut late_world = TestWorld::new();

    for _ in 0..3 {
        rig.server.tick(&mut rig.server_world);
        let _ = late_client.tick(&mut late_world);
    }
    assert!(late_client.is_connected());

    // the default-visible object was replayed; the selective one was not
    assert!(late_client.object_record(default_id).is_some());
    assert!(late_client.object_record(selective_id).is_none());

    let record = rig.server.object_record(default_id).unwrap();
    assert!(record.is_observer(late_peer));
}

#[test]
fn disconnect_purges_observers_in_the_same_tick() {
    let mut rig = TwoClientRig::new();

    let entity = rig.server_world.create_entity();
    let network_id = rig
        .server
        .spawn_object(&mut rig.server_world, entity, 77, SpawnOptions::default())
        .unwrap();
    rig.run(2);
    assert!(rig
        .server
        .object_record(network_id)
        .unwrap()
        .is_observer(rig.peer1));

    rig.server.disconnect_peer(rig.peer1);

    let record = rig.server.object_record(network_id).unwrap();
    assert!(!record.is_observer(rig.peer1));
    assert!(!record.is_pending_observer(rig.peer1));
    assert!(!rig.server.has_peer(rig.peer1));
}
