use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use tokio_util::codec::{Decoder, Encoder};

use pfcp_wire::{
    rules::{ApplyAction, Far, Pdr},
    Codec, FSeid, Ie, IeType, Message, NodeId, SessionEstablishmentRequest,
};

fn establishment_request(n_rules: usize) -> Message {
    let mut rng = rand::thread_rng();
    let mut body = SessionEstablishmentRequest {
        node_id: Some(Ie::new_node_id(&NodeId::Ipv4([10, 0, 0, 1].into())).unwrap()),
        cp_f_seid: Some(Ie::new_f_seid(&FSeid::new(rng.gen(), [10, 0, 0, 1].into()))),
        ..Default::default()
    };

    for i in 0..n_rules {
        let pdi = Ie::new_grouped(IeType::PDI, &[Ie::new(IeType::SOURCE_INTERFACE, vec![0])]);
        let pdr = Pdr::new(i as u16, rng.gen(), pdi).with_far_id(i as u32);
        body.create_pdr.push(pdr.to_create_ie());
        body.create_far.push(Far::new(i as u32, ApplyAction::FORW).to_create_ie());
    }

    Message::new(rng.gen(), body)
}

fn codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for n_rules in [1, 8, 64] {
        let msg = establishment_request(n_rules);
        let mut encoded = BytesMut::new();
        msg.encode(&mut encoded).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", n_rules), &msg, |b, msg| {
            let mut buf = BytesMut::with_capacity(encoded.len());
            b.iter(|| {
                buf.clear();
                Codec.encode(black_box(msg.clone()), &mut buf).unwrap();
            })
        });

        group.bench_with_input(BenchmarkId::new("decode", n_rules), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Codec.decode(&mut buf).unwrap());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, codec);
criterion_main!(benches);
