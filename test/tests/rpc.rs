//! RPC dispatch: ownership gating, client-bound delivery, and the local
//! short-circuit path.

use std::{cell::RefCell, rc::Rc};

use tether_server::RpcRecipients;
use tether_shared::{
    BitReader, BitWriter, RpcTarget, Serde, SpawnOptions, UnsignedVariableInteger,
    SERVER_PEER_ID,
};
use tether_test::helpers::{exchange_many, test_client, test_server, MemoryNetwork, TestWorld};

const DOOR_TYPE: u64 = 77;

fn encode_amount(amount: u64) -> Vec<u8> {
    let mut writer = BitWriter::new();
    UnsignedVariableInteger::<7>::new(amount as i128).ser(&mut writer);
    writer.to_bytes()
}

fn decode_amount(reader: &mut BitReader) -> u64 {
    UnsignedVariableInteger::<7>::de(reader)
        .map(|value| value.get() as u64)
        .unwrap_or(0)
}

fn noop_handler() -> tether_shared::RpcHandler<u64> {
    Box::new(|_, _, _, _| Ok(()))
}

struct Rig {
    net: MemoryNetwork,
    server: tether_server::Server<u64>,
    server_world: TestWorld,
    client1: tether_client::Client<u64>,
    client1_world: TestWorld,
    peer1: u64,
    client2: tether_client::Client<u64>,
    client2_world: TestWorld,
    peer2: u64,
}

impl Rig {
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

/// Builds a connected two-client rig, running `setup` on all three nodes
/// before anything starts (RPC registration closes at startup).
fn rig_with<F>(mut setup: F) -> Rig
where
    F: FnMut(&mut tether_server::Server<u64>, &mut tether_client::Client<u64>, &mut tether_client::Client<u64>),
{
    let net = MemoryNetwork::new();
    let mut server = test_server();
    let mut client1 = test_client();
    let mut client2 = test_client();

    setup(&mut server, &mut client1, &mut client2);

    server.listen(net.server_transport()).unwrap();
    let (transport1, peer1) = net.connect_client();
    client1.connect(transport1).unwrap();
    let (transport2, peer2) = net.connect_client();
    client2.connect(transport2).unwrap();

    let mut rig = Rig {
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

#[test]
fn ownership_gated_rpc_drops_non_owner_calls() {
    let health = Rc::new(RefCell::new(0u64));
    let health_in_handler = health.clone();

    let mut heal_hash = 0;
    let mut rig = rig_with(|server, client1, client2| {
        let health_in_handler = health_in_handler.clone();
        heal_hash = server
            .register_rpc(
                DOOR_TYPE,
                "Heal",
                Some("Heal(int)"),
                RpcTarget::ServerOnly,
                true,
                Box::new(move |_, _, _, args| {
                    *health_in_handler.borrow_mut() += decode_amount(args);
                    Ok(())
                }),
            )
            .unwrap();
        // clients carry the same descriptor table to route invocations
        client1
            .register_rpc(DOOR_TYPE, "Heal", Some("Heal(int)"), RpcTarget::ServerOnly, true, noop_handler())
            .unwrap();
        client2
            .register_rpc(DOOR_TYPE, "Heal", Some("Heal(int)"), RpcTarget::ServerOnly, true, noop_handler())
            .unwrap();
    });

    // the object is owned by peer2
    let entity = rig.server_world.create_entity();
    let options = SpawnOptions {
        owner: rig.peer2,
        ..Default::default()
    };
    let network_id = rig
        .server
        .spawn_object(&mut rig.server_world, entity, DOOR_TYPE, options)
        .unwrap();
    rig.run(2);

    // non-owner call: dropped on the server, nothing mutates
    rig.client1
        .invoke_rpc(&mut rig.client1_world, network_id, heal_hash, encode_amount(25))
        .unwrap();
    rig.run(2);
    assert_eq!(*health.borrow(), 0);

    // owner call goes through
    rig.client2
        .invoke_rpc(&mut rig.client2_world, network_id, heal_hash, encode_amount(25))
        .unwrap();
    rig.run(2);
    assert_eq!(*health.borrow(), 25);
}

#[test]
fn client_bound_rpc_reaches_only_the_addressed_observer() {
    let flashes = Rc::new(RefCell::new(Vec::new()));
    let flashes_in_c1 = flashes.clone();
    let flashes_in_c2 = flashes.clone();

    let mut flash_hash = 0;
    let mut rig = rig_with(|server, client1, client2| {
        server
            .register_rpc(DOOR_TYPE, "Flash", None, RpcTarget::ClientOnly, false, noop_handler())
            .map(|hash| flash_hash = hash)
            .unwrap();
        let flashes = flashes_in_c1.clone();
        client1
            .register_rpc(
                DOOR_TYPE,
                "Flash",
                None,
                RpcTarget::ClientOnly,
                false,
                Box::new(move |_, _, _, _| {
                    flashes.borrow_mut().push(1u8);
                    Ok(())
                }),
            )
            .unwrap();
        let flashes = flashes_in_c2.clone();
        client2
            .register_rpc(
                DOOR_TYPE,
                "Flash",
                None,
                RpcTarget::ClientOnly,
                false,
                Box::new(move |_, _, _, _| {
                    flashes.borrow_mut().push(2u8);
                    Ok(())
                }),
            )
            .unwrap();
    });

    let entity = rig.server_world.create_entity();
    let network_id = rig
        .server
        .spawn_object(&mut rig.server_world, entity, DOOR_TYPE, SpawnOptions::default())
        .unwrap();
    rig.run(2);

    let peer1 = rig.peer1;
    rig.server
        .invoke_rpc(
            &mut rig.server_world,
            network_id,
            flash_hash,
            Vec::new(),
            RpcRecipients::One(peer1),
        )
        .unwrap();
    rig.run(2);

    assert_eq!(flashes.borrow().as_slice(), &[1u8]);
}

#[test]
fn server_target_rpc_short_circuits_without_the_wire() {
    let health = Rc::new(RefCell::new(0u64));
    let health_in_handler = health.clone();

    let mut heal_hash = 0;
    let mut rig = rig_with(|server, _, _| {
        let health_in_handler = health_in_handler.clone();
        heal_hash = server
            .register_rpc(
                DOOR_TYPE,
                "Heal",
                Some("Heal(int)"),
                RpcTarget::ServerOnly,
                true,
                Box::new(move |_, _, _, args| {
                    *health_in_handler.borrow_mut() += decode_amount(args);
                    Ok(())
                }),
            )
            .unwrap();
    });

    let entity = rig.server_world.create_entity();
    let options = SpawnOptions {
        owner: SERVER_PEER_ID,
        ..Default::default()
    };
    let network_id = rig
        .server
        .spawn_object(&mut rig.server_world, entity, DOOR_TYPE, options)
        .unwrap();

    // no tick between invocation and effect: the call never hits the wire
    rig.server
        .invoke_rpc(
            &mut rig.server_world,
            network_id,
            heal_hash,
            encode_amount(40),
            RpcRecipients::All,
        )
        .unwrap();
    assert_eq!(*health.borrow(), 40);
}

#[test]
fn owner_return_is_the_only_client_requestable_transfer() {
    let mut rig = rig_with(|_, _, _| {});

    let entity = rig.server_world.create_entity();
    let options = SpawnOptions {
        owner: rig.peer1,
        ..Default::default()
    };
    let network_id = rig
        .server
        .spawn_object(&mut rig.server_world, entity, DOOR_TYPE, options)
        .unwrap();
    rig.run(2);

    // owner asks for the object back to the server: allowed
    rig.client1.request_owner_return(network_id).unwrap();
    rig.run(2);
    assert_eq!(
        rig.server.object_record(network_id).unwrap().owner,
        SERVER_PEER_ID
    );

    // a request naming a third peer is a violation; peer2 is disconnected
    let payload = tether_test::helpers::frame_message(
        tether_shared::MessageType::CHANGE_OWNER_REQUEST,
        &tether_shared::ChangeOwnerMessage {
            network_id,
            new_owner: rig.peer1,
        },
    );
    rig.net.inject_from_client(rig.peer2, payload, 0);
    rig.run(1);

    assert!(!rig.server.has_peer(rig.peer2));
    assert_eq!(
        rig.server.object_record(network_id).unwrap().owner,
        SERVER_PEER_ID
    );
}
