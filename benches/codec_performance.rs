//! Performance benchmarks for payload encoding and in-memory delivery

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use peril::game::{Location, Unit, UnitRank};
use peril::pubsub::{Codec, JsonCodec, MsgPackCodec};
use peril::routing::RoutingTable;
use peril::types::{ArmyMove, GameLog, PlayerSnapshot};

fn army_move(units: u32) -> ArmyMove {
    let mut player = PlayerSnapshot::new("bench_player");
    for id in 1..=units {
        player.units.insert(
            id,
            Unit {
                id,
                rank: UnitRank::Infantry,
                location: Location::Asia,
            },
        );
    }

    ArmyMove {
        units: player.units.values().cloned().collect(),
        player,
        to_location: Location::Asia,
    }
}

fn bench_encode(c: &mut Criterion) {
    let army_move = army_move(20);
    let log = GameLog::new("bench_player", "A war between bob and alice resulted in a draw");

    c.bench_function("json_encode_army_move_20_units", |b| {
        b.iter(|| black_box(JsonCodec.encode(&army_move)))
    });
    c.bench_function("msgpack_encode_army_move_20_units", |b| {
        b.iter(|| black_box(MsgPackCodec.encode(&army_move)))
    });
    c.bench_function("msgpack_encode_game_log", |b| {
        b.iter(|| black_box(MsgPackCodec.encode(&log)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let army_move = army_move(20);
    let json = JsonCodec.encode(&army_move).unwrap();
    let msgpack = MsgPackCodec.encode(&army_move).unwrap();
    let log = MsgPackCodec
        .encode(&GameLog::new("bench_player", "bench_player won a war against bob"))
        .unwrap();

    c.bench_function("json_decode_army_move_20_units", |b| {
        b.iter(|| black_box(JsonCodec.decode::<ArmyMove>(&json)))
    });
    c.bench_function("msgpack_decode_army_move_20_units", |b| {
        b.iter(|| black_box(MsgPackCodec.decode::<ArmyMove>(&msgpack)))
    });
    c.bench_function("msgpack_decode_game_log", |b| {
        b.iter(|| black_box(MsgPackCodec.decode::<GameLog>(&log)))
    });
}

fn bench_memory_publish(c: &mut Criterion) {
    use peril::pubsub::{Broker, MemoryBroker, Publisher, Topology};

    let rt = tokio::runtime::Runtime::new().unwrap();
    let routing = RoutingTable::default();
    let broker = MemoryBroker::new();
    let publisher = rt.block_on(async {
        let channel = broker.open_channel().await.unwrap();
        routing
            .declare_exchanges(&Topology::new(&routing.dead_letter_exchange), &channel)
            .await
            .unwrap();
        Publisher::new(channel)
    });
    let army_move = army_move(5);

    c.bench_function("memory_publish_army_move", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    publisher
                        .publish_json(&routing.topic_exchange, "army_moves.bench_player", &army_move)
                        .await,
                )
            })
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_memory_publish);
criterion_main!(benches);
